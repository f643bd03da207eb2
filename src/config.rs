use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "concoursd=info";

/// Start-up settings read from the environment. Runtime settings live in the
/// `settings` table instead.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Workspace opened before the first request; in-memory store otherwise.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("CONCOURSD_WORKSPACE").ok(),
            std::env::var("CONCOURSD_LOG").ok(),
        )
    }

    fn from_vars(workspace: Option<String>, log_filter: Option<String>) -> Self {
        let workspace = workspace
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty() && w != ":memory:")
            .map(PathBuf::from);
        let log_filter = log_filter
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Self {
            workspace,
            log_filter,
        }
    }
}

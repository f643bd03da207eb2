use regex::Regex;
use std::sync::OnceLock;

pub const STUDENT_PATTERN: &str = r"^[0-9]{8}[A-Za-z]$";
pub const DEFAULT_CORRECTOR_PATTERN: &str = r"^[A-Za-z0-9]{6,}$";
pub const ADMIN_PATTERN: &str = r"^AD[0-9]{4}AK$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Corrector,
    Service,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" | "candidate" => Some(Self::Student),
            "corrector" => Some(Self::Corrector),
            "service" => Some(Self::Service),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Corrector => "corrector",
            Self::Service => "service",
            Self::Admin => "admin",
        }
    }
}

fn student_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STUDENT_PATTERN).expect("static student pattern"))
}

fn admin_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ADMIN_PATTERN).expect("static admin pattern"))
}

fn default_corrector_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DEFAULT_CORRECTOR_PATTERN).expect("static corrector pattern"))
}

/// Checks a configured corrector/service pattern before it is saved.
pub fn compile_corrector_pattern(pattern: &str) -> Result<Regex, String> {
    let p = pattern.trim();
    let Some(inner) = p.strip_prefix('^').and_then(|rest| rest.strip_suffix('$')) else {
        return Err("correctorPattern must be anchored with ^ and $".to_string());
    };
    // An odd run of backslashes before the final `$` escapes it.
    let trailing_escapes = inner.chars().rev().take_while(|c| *c == '\\').count();
    if trailing_escapes % 2 == 1 {
        return Err("correctorPattern must be anchored with ^ and $".to_string());
    }
    // Grouped so a top-level alternation still has to match the whole value.
    Regex::new(&format!("^(?:{})$", inner))
        .map_err(|e| format!("correctorPattern is not a valid regex: {}", e))
}

/// Format gate per role. Only the shape is checked, never existence.
#[derive(Debug, Clone, Default)]
pub struct MatriculeValidator {
    corrector: Option<Regex>,
}

impl MatriculeValidator {
    pub fn with_corrector_pattern(pattern: &str) -> Result<Self, String> {
        Ok(Self {
            corrector: Some(compile_corrector_pattern(pattern)?),
        })
    }

    pub fn validate(&self, value: &str, role: Role) -> bool {
        match role {
            Role::Student => student_regex().is_match(value),
            Role::Corrector | Role::Service => self
                .corrector
                .as_ref()
                .unwrap_or_else(|| default_corrector_regex())
                .is_match(value),
            Role::Admin => admin_regex().is_match(value),
        }
    }
}

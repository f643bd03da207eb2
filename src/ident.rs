use crate::error::DomainError;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const ANON_PREFIX: &str = "ANON-";
const ANON_RANDOM_LEN: usize = 9;
const COPY_RANDOM_LEN: usize = 5;
const CODE_RANDOM_LEN: usize = 6;
pub const MAX_BATCH: usize = 1000;

/// Code-type catalogue used for prefixed codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeType {
    Candidate,
    Session,
    Corrector,
    Exam,
    Access,
}

impl CodeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candidate" => Some(Self::Candidate),
            "session" => Some(Self::Session),
            "corrector" => Some(Self::Corrector),
            "exam" => Some(Self::Exam),
            "access" => Some(Self::Access),
            _ => None,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Candidate => "CAND",
            Self::Session => "SESS",
            Self::Corrector => "CORR",
            Self::Exam => "EXAM",
            Self::Access => "ACC",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Candidate => "Code Candidat",
            Self::Session => "Code Session",
            Self::Corrector => "Code Correcteur",
            Self::Exam => "Code Examen",
            Self::Access => "Code d'Accès",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdKind {
    /// `ANON-` + 9 random characters.
    Anonymous,
    /// Timestamp + 5 random characters, for copies.
    Copy,
    /// Same shape as `Copy`, for exam sessions.
    Session,
    /// `PREFIX-TIMESTAMP-RANDOM6`.
    Code {
        code_type: CodeType,
        prefix: Option<String>,
    },
}

impl IdKind {
    pub fn parse(kind: &str, prefix: Option<&str>) -> Option<Self> {
        match kind {
            "anonymous" => Some(Self::Anonymous),
            "copy" => Some(Self::Copy),
            // Bare "session" is the copy-shaped id; the prefixed form is "code:session".
            "session" => Some(Self::Session),
            other => {
                let code_type = CodeType::parse(other.strip_prefix("code:").unwrap_or(other))?;
                let prefix = prefix
                    .map(|p| p.trim().to_ascii_uppercase())
                    .filter(|p| !p.is_empty());
                Some(Self::Code { code_type, prefix })
            }
        }
    }
}

pub fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Non-cryptographic identifier source. Collisions are possible and are the
/// caller's concern.
pub struct IdGenerator<R: Rng> {
    rng: R,
}

impl IdGenerator<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> IdGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    fn random_chars(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| BASE36[self.rng.gen_range(0..BASE36.len())] as char)
            .collect()
    }

    pub fn generate(&mut self, kind: &IdKind, now: DateTime<Utc>) -> String {
        let stamp = to_base36(now.timestamp_millis().max(0) as u64);
        match kind {
            IdKind::Anonymous => format!("{}{}", ANON_PREFIX, self.random_chars(ANON_RANDOM_LEN)),
            IdKind::Copy | IdKind::Session => {
                format!("{}-{}", stamp, self.random_chars(COPY_RANDOM_LEN))
            }
            IdKind::Code { code_type, prefix } => {
                let prefix = prefix.as_deref().unwrap_or(code_type.prefix());
                format!("{}-{}-{}", prefix, stamp, self.random_chars(CODE_RANDOM_LEN))
            }
        }
    }

    pub fn generate_batch(
        &mut self,
        kind: &IdKind,
        quantity: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, DomainError> {
        if !(1..=MAX_BATCH).contains(&quantity) {
            return Err(DomainError::new(
                "bad_params",
                format!("quantity must be in 1..={}", MAX_BATCH),
            ));
        }
        Ok((0..quantity).map(|_| self.generate(kind, now)).collect())
    }
}

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

/// How a stored credential authenticates against the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Basic,
    Token,
    Ssh,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Basic => "basic",
            AuthKind::Token => "token",
            AuthKind::Ssh => "ssh",
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(AuthKind::Basic),
            "token" => Ok(AuthKind::Token),
            "ssh" => Ok(AuthKind::Ssh),
            other => Err(format!("unknown auth kind: {other}")),
        }
    }
}

/// A stored credential. The secret lives only in `sealed_data`; this type
/// deliberately has no serde derives so it can never leak through an API
/// response by accident.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub auth_kind: AuthKind,
    pub sealed_data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(id: String, auth_kind: AuthKind, sealed_data: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id,
            auth_kind,
            sealed_data,
            created_at: now,
            updated_at: now,
        }
    }
}

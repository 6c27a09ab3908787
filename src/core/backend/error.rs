use serde::{Deserialize, Serialize};
use std::fmt;

use crate::security::sql_guard::SqlGuardError;

/// Error body returned by the REST and RPC endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl RpcErrorPayload {
    /// Parses an error body, keeping the raw text as the message when it is
    /// not the expected JSON shape.
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str::<Self>(body).unwrap_or_else(|_| Self {
            message: body.trim().to_string(),
            ..Self::default()
        })
    }

    pub fn code_is(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for RpcErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "[{code}] ")?;
        }
        write!(f, "{}", self.message)?;
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

/// What a caller can do about a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Another execution path may succeed.
    Fallback,
    /// The channel itself failed (transport, server error, broken database
    /// connection). Another channel may still work; if none does, an
    /// operator has to run the statement.
    Operator,
    /// The request itself was wrong or the data says no.
    None,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Execution channel unavailable: {0}")]
    ChannelUnavailable(RpcErrorPayload),
    #[error("Backend returned {status}: {payload}")]
    Rpc { status: u16, payload: RpcErrorPayload },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Guard(#[from] SqlGuardError),
    #[error("Direct database error: {0}")]
    Database(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

pub const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Codes meaning the RPC function is missing or may not be called.
const CHANNEL_UNAVAILABLE_CODES: &[&str] = &["PGRST202", "42883", INSUFFICIENT_PRIVILEGE];

pub const UNDEFINED_COLUMN: &str = "42703";
pub const UNDEFINED_TABLE: &str = "42P01";
pub const SCHEMA_CACHE_TABLE_MISSING: &str = "PGRST205";
pub const DUPLICATE_COLUMN: &str = "42701";
pub const DUPLICATE_TABLE: &str = "42P07";

impl BackendError {
    /// Classifies a failed RPC response.
    pub fn from_rpc_response(status: u16, payload: RpcErrorPayload) -> Self {
        let code_says_unavailable = payload
            .code
            .as_deref()
            .is_some_and(|c| CHANNEL_UNAVAILABLE_CODES.contains(&c));

        if code_says_unavailable || status == 401 || status == 403 {
            Self::ChannelUnavailable(payload)
        } else {
            Self::Rpc { status, payload }
        }
    }

    /// A channel that cannot take statements at all, with no backend code.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ChannelUnavailable(RpcErrorPayload {
            message: message.into(),
            ..RpcErrorPayload::default()
        })
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            Self::ChannelUnavailable(_) => Recovery::Fallback,
            Self::Transport(_) | Self::Decode(_) | Self::Database(_) => Recovery::Operator,
            Self::Rpc { status, .. } if *status >= 500 => Recovery::Operator,
            Self::Rpc { .. } | Self::NotFound(_) | Self::Guard(_) => Recovery::None,
        }
    }

    pub fn payload(&self) -> Option<&RpcErrorPayload> {
        match self {
            Self::ChannelUnavailable(p) | Self::Rpc { payload: p, .. } => Some(p),
            _ => None,
        }
    }

    /// True for errors that mean the object being created is already there.
    pub fn is_already_exists(&self) -> bool {
        let Some(payload) = self.payload() else {
            return matches!(self, Self::Database(msg) if msg.contains("already exists"));
        };
        payload.code_is(DUPLICATE_COLUMN)
            || payload.code_is(DUPLICATE_TABLE)
            || payload.message.contains("already exists")
    }

    /// True for errors that mean the probed column or table does not exist.
    pub fn is_undefined_object(&self) -> bool {
        self.payload().is_some_and(|p| {
            p.code_is(UNDEFINED_COLUMN)
                || p.code_is(UNDEFINED_TABLE)
                || p.code_is(SCHEMA_CACHE_TABLE_MISSING)
        })
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::ipc::error::err;
use crate::ipc::types::Request;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// The authenticated caller behind a request token.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
}

/// Resolve the request token to a live session. Expired sessions are torn
/// down on sight; everything that fails here maps to `unauthorized` so the
/// shell knows to drop its stored token and return to sign-in.
pub fn require_session(conn: &Connection, req: &Request) -> Result<Session, HandlerErr> {
    let Some(token) = req.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(HandlerErr::new("unauthorized", "missing session token"));
    };

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let Some((user_id, expires_at)) = row else {
        return Err(HandlerErr::new("unauthorized", "unknown session token"));
    };

    let expired = DateTime::parse_from_rfc3339(&expires_at)
        .map(|t| t.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);
    if expired {
        let _ = conn.execute("DELETE FROM sessions WHERE token = ?", [token]);
        return Err(HandlerErr::new("unauthorized", "session expired"));
    }

    Ok(Session {
        token: token.to_string(),
        user_id,
    })
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn parse_date_param(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::new("bad_params", "date must be YYYY-MM-DD"))
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

//! Painting sessions and the session file format.
//!
//! A session file lists one `uid,client_id` pair per line. Blank lines and
//! lines starting with `#` are skipped, fields are trimmed, and columns past
//! the second are ignored. Uids must be decimal, client ids 40 lowercase hex
//! characters, and a uid may appear only once.

use std::collections::HashSet;
use std::fmt;

use reqwest::header::{HeaderValue, InvalidHeaderValue};

const SECRET_LEN: usize = 40;

/// One authenticated account able to paint. Read-only once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    id: u64,
    secret: String,
}

impl Session {
    #[must_use]
    pub fn new(id: u64, secret: impl Into<String>) -> Self {
        Self { id, secret: secret.into() }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `Cookie` header carrying this session's credential.
    pub(crate) fn cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("_uid={}; __client_id={}", self.id, self.secret))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("line {line}: expected `uid,client_id`")]
    Malformed { line: usize },
    #[error("line {line}: uid {value:?} is not a decimal number")]
    InvalidUid { line: usize, value: String },
    #[error("line {line}: client id must be {len} lowercase hex characters", len = SECRET_LEN)]
    InvalidSecret { line: usize },
    #[error("line {line}: duplicate uid {uid}")]
    DuplicateUid { line: usize, uid: u64 },
}

/// Parse a session file. Line numbers in errors are 1-based.
///
/// # Errors
///
/// Returns the first [`SessionError`] found; a bad line rejects the whole file.
pub fn parse_sessions(text: &str) -> Result<Vec<Session>, SessionError> {
    let mut sessions = Vec::new();
    let mut seen = HashSet::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split(',').map(str::trim);
        let (Some(uid), Some(secret)) = (fields.next(), fields.next()) else {
            return Err(SessionError::Malformed { line });
        };

        if uid.is_empty() || !uid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SessionError::InvalidUid { line, value: uid.to_owned() });
        }
        let id = uid
            .parse::<u64>()
            .map_err(|_| SessionError::InvalidUid { line, value: uid.to_owned() })?;

        if !is_client_id(secret) {
            return Err(SessionError::InvalidSecret { line });
        }
        if !seen.insert(id) {
            return Err(SessionError::DuplicateUid { line, uid: id });
        }
        sessions.push(Session::new(id, secret));
    }

    Ok(sessions)
}

fn is_client_id(value: &str) -> bool {
    value.len() == SECRET_LEN && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

//! Blocking HTTP clients for the two remote services (weather lookup and the
//! streaming chart).
//!
//! - Blocking client using `ureq` (no async).
//! - Every agent carries a global timeout so one slow service cannot stall
//!   the rest of a polling tick.
//! - Non-2xx responses are turned into [`ClientError::Http`] with the body kept
//!   for the log.

pub mod chart;
pub mod weather;

use http::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Debug)]
pub enum ClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
    Auth(String),
    NotFound(String),
}

impl core::fmt::Display for ClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClientError::Transport(s) => write!(f, "transport error: {}", s),
            ClientError::Http { status, message } => {
                let reason = StatusCode::from_u16(*status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("");
                write!(f, "http {} {}: {}", status, reason, message)
            }
            ClientError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
            ClientError::Auth(e) => write!(f, "auth error: {}", e),
            ClientError::NotFound(e) => write!(f, "not found: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ureq::Error> for ClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::StatusCode(status) => ClientError::Http {
                status,
                message: String::from("<no body>"),
            },
            other => ClientError::Transport(other.to_string()),
        }
    }
}

pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

/// Read the whole body, failing on non-2xx.
pub(crate) fn read_body(mut resp: http::Response<ureq::Body>) -> Result<String, ClientError> {
    let status = resp.status();
    let body = resp.body_mut().read_to_string()?;
    if status.is_success() {
        Ok(body)
    } else {
        let message = if body.trim().is_empty() {
            String::from("<no body>")
        } else {
            body
        };
        Err(ClientError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(resp: http::Response<ureq::Body>) -> Result<T, ClientError> {
    let body = read_body(resp)?;
    parse_json(&body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, ClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(ClientError::Json)
}

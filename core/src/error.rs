use reqwest::StatusCode;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("connection error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("session expired or unauthorized; please sign in again")]
    Unauthorized,
    #[error("unexpected response from server: {0}")]
    Protocol(String),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

/// Derives a human-readable message from a failed response.
///
/// Preference order: a `message`/`error`/`detail` string in a JSON body, the
/// raw body text, then a generic message carrying the status code.
pub fn message_from_body(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = json_message(&value) {
            return message;
        }
    }
    if body.is_empty() {
        format!("HTTP error! status: {}", status.as_u16())
    } else {
        body.to_owned()
    }
}

fn json_message(value: &Value) -> Option<String> {
    ["message", "error", "detail", "title"]
        .iter()
        .filter_map(|key| value.get(key))
        .find_map(|field| match field {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
            Value::Object(_) => json_message(field),
            _ => None,
        })
}

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_json::Value;

/// Failure taxonomy surfaced to the conversation as inline system messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Network blips and rate limits; safe to retry.
    Transient,
    /// Quota or credits exhausted; retry is pointless until the user acts.
    UserAction,
    /// Generic application error; surfaced but not auto-retried.
    Persistent,
    /// Unrecoverable, session-ending.
    Fatal,
}

impl ErrorCategory {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "transient" => Self::Transient,
            "user-action" | "user_action" => Self::UserAction,
            "persistent" => Self::Persistent,
            "fatal" => Self::Fatal,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::UserAction => "user-action",
            Self::Persistent => "persistent",
            Self::Fatal => "fatal",
        }
    }
}

/// Category plus retry affordance derived for one error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub retryable: bool,
}

fn user_action_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)credit.?balance|insufficient credit|quota exceeded|billing|payment required")
            .expect("user-action regex must compile")
    })
}

fn transient_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(
            r"(?i)rate.?limit|overloaded|service.?unavailable|bad.?gateway|gateway.?timeout|internal.?server.?error|timed?.?out|network|connection.?(reset|refused|closed)|\b50[0-4]\b",
        )
        .expect("transient regex must compile")
    })
}

/// Classify human-readable provider error text.
///
/// Matches on substrings of upstream wording; the protocol exposes no
/// structured error-code channel, so this runs over the final message text
/// regardless of which layer produced it.
pub fn classify_error(message: &str) -> ErrorClassification {
    if user_action_regex().is_match(message) {
        return ErrorClassification {
            category: ErrorCategory::UserAction,
            retryable: false,
        };
    }

    if transient_regex().is_match(message) {
        return ErrorClassification {
            category: ErrorCategory::Transient,
            retryable: true,
        };
    }

    ErrorClassification {
        category: ErrorCategory::Persistent,
        retryable: false,
    }
}

#[derive(Debug)]
pub enum AgentApiError {
    InvalidBaseUrl(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    Serde(JsonError),
    RetryExhausted {
        status: Option<StatusCode>,
        last_error: Option<String>,
    },
    StreamFailed {
        message: String,
    },
    Cancelled,
    Unknown(String),
}

impl fmt::Display for AgentApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::RetryExhausted { status, last_error } => {
                let status = status
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "n/a".to_owned());
                write!(
                    f,
                    "retry exhausted after max attempts (status: {status}, last_error: {last_error:?})"
                )
            }
            Self::StreamFailed { message } => write!(f, "stream failed: {message}"),
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for AgentApiError {}

impl From<reqwest::Error> for AgentApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for AgentApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a display message from a non-2xx response body.
///
/// The backend reports failures as `{"error": "..."}` (occasionally with a
/// nested `{"error": {"message": "..."}}` object); anything else falls back
/// to the raw body, then to the status canonical reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        if let Some(error) = payload.get("error") {
            if let Some(message) = error.as_str().filter(|value| !value.is_empty()) {
                return message.to_string();
            }
            if let Some(message) = error
                .get("message")
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
            {
                return message.to_string();
            }
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_text_classifies_transient_retryable() {
        let classification = classify_error("429: rate limit exceeded, slow down");
        assert_eq!(classification.category, ErrorCategory::Transient);
        assert!(classification.retryable);
    }

    #[test]
    fn credit_balance_text_classifies_user_action_not_retryable() {
        let classification = classify_error("Your credit balance is too low to run this agent.");
        assert_eq!(classification.category, ErrorCategory::UserAction);
        assert!(!classification.retryable);

        let classification = classify_error("insufficient credit balance");
        assert_eq!(classification.category, ErrorCategory::UserAction);
        assert!(!classification.retryable);
    }

    #[test]
    fn server_and_network_phrasing_classifies_transient() {
        for message in [
            "502 Bad Gateway",
            "upstream service unavailable",
            "request timed out after 30s",
            "network connection reset by peer",
        ] {
            let classification = classify_error(message);
            assert_eq!(classification.category, ErrorCategory::Transient, "{message}");
            assert!(classification.retryable, "{message}");
        }
    }

    #[test]
    fn unmatched_text_classifies_persistent_not_retryable() {
        let classification = classify_error("workspace not found");
        assert_eq!(classification.category, ErrorCategory::Persistent);
        assert!(!classification.retryable);
    }

    #[test]
    fn quota_wins_over_rate_limit_wording() {
        // Provider quota messages sometimes also mention rate limits; the
        // user-action policy is checked first so retry is not offered.
        let classification = classify_error("quota exceeded: monthly rate limit for your plan");
        assert_eq!(classification.category, ErrorCategory::UserAction);
        assert!(!classification.retryable);
    }

    #[test]
    fn parse_error_message_prefers_structured_error_body() {
        let message = parse_error_message(
            StatusCode::BAD_REQUEST,
            r#"{"error":"session is not active"}"#,
        );
        assert_eq!(message, "session is not active");

        let message = parse_error_message(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"nested detail"}}"#,
        );
        assert_eq!(message, "nested detail");
    }

    #[test]
    fn parse_error_message_falls_back_to_body_then_status() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, "upstream exploded"),
            "upstream exploded"
        );
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, ""),
            "Bad Gateway"
        );
    }

    #[test]
    fn category_round_trips_through_parse_and_as_str() {
        for category in [
            ErrorCategory::Transient,
            ErrorCategory::UserAction,
            ErrorCategory::Persistent,
            ErrorCategory::Fatal,
        ] {
            assert_eq!(ErrorCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(ErrorCategory::parse("mystery"), None);
    }
}

//! Command gateway client.
//!
//! Sends the user's command to the remote Alris API and interprets the
//! tagged response envelope. The two failure kinds stay distinguishable:
//! an explicit error envelope carries the service's own message, while
//! connectivity failures, unexpected statuses, and malformed bodies all
//! collapse into one generic delivery failure.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Fixed user-facing text for delivery failures.
pub const DELIVERY_FAILURE_TEXT: &str =
    "Failed to send message. Please check your internet connection and try again.";

/// Fallback text when an error envelope carries no message.
pub const GENERIC_ERROR_TEXT: &str = "An error occurred while processing your request.";

/// A successful reply from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// Full assistant text.
    pub text: String,
    /// Video URLs attached to the reply.
    pub video_urls: Vec<String>,
}

/// Failure surfaced to the transcript and banner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The service handled the request and reported a failure itself.
    #[error("{0}")]
    Application(String),

    /// The request never produced a usable reply.
    #[error("{DELIVERY_FAILURE_TEXT}")]
    Delivery,
}

/// Tagged response envelope from the gateway.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Envelope {
    Response {
        data: String,
        #[serde(default)]
        video_urls: Vec<String>,
    },
    Error {
        message: Option<String>,
    },
}

/// HTTP client for the command endpoint.
pub struct CommandGateway {
    http: reqwest::Client,
    base_url: String,
}

impl CommandGateway {
    /// Create a gateway client for the given base endpoint.
    ///
    /// Commands can legitimately run long upstream (browser automation,
    /// video retrieval), so the request timeout is generous: 10 s to
    /// connect, 120 s total, one attempt, no automatic retry.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Send one command and interpret the reply.
    ///
    /// The caller guarantees `command` is non-empty after trimming; the
    /// chat session enforces this before a request is ever built.
    pub async fn send(&self, command: &str) -> Result<CommandReply, GatewayError> {
        let url = format!("{}/command", self.base_url);
        let body = serde_json::json!({ "command": command });

        let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
            tracing::warn!(error = %e, "command request failed to send");
            GatewayError::Delivery
        })?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(%status, "command request returned an unexpected status");
            return Err(GatewayError::Delivery);
        }

        let body = resp.text().await.map_err(|e| {
            tracing::warn!(error = %e, "failed to read command response body");
            GatewayError::Delivery
        })?;

        interpret_body(&body)
    }
}

/// Interpret a response body as a gateway envelope.
fn interpret_body(body: &str) -> Result<CommandReply, GatewayError> {
    match serde_json::from_str::<Envelope>(body) {
        Ok(Envelope::Response { data, video_urls }) => Ok(CommandReply {
            text: data,
            video_urls,
        }),
        Ok(Envelope::Error { message }) => Err(GatewayError::Application(
            message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| GENERIC_ERROR_TEXT.to_string()),
        )),
        Err(e) => {
            tracing::warn!(error = %e, "command response was not a known envelope");
            Err(GatewayError::Delivery)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_envelope_with_videos() {
        let body = r#"{"type":"response","data":"Here you go","video_urls":["https://youtu.be/a","https://youtu.be/b"]}"#;
        let reply = interpret_body(body).unwrap();
        assert_eq!(reply.text, "Here you go");
        assert_eq!(reply.video_urls.len(), 2);
    }

    #[test]
    fn response_envelope_without_videos() {
        let body = r#"{"type":"response","data":"Hello"}"#;
        let reply = interpret_body(body).unwrap();
        assert_eq!(reply.text, "Hello");
        assert!(reply.video_urls.is_empty());
    }

    #[test]
    fn error_envelope_carries_service_message() {
        let body = r#"{"type":"error","message":"rate limited upstream"}"#;
        let err = interpret_body(body).unwrap_err();
        assert_eq!(
            err,
            GatewayError::Application("rate limited upstream".to_string())
        );
        assert_eq!(err.to_string(), "rate limited upstream");
    }

    #[test]
    fn error_envelope_without_message_uses_fallback() {
        let body = r#"{"type":"error"}"#;
        let err = interpret_body(body).unwrap_err();
        assert_eq!(err.to_string(), GENERIC_ERROR_TEXT);
    }

    #[test]
    fn unknown_tag_is_a_delivery_failure() {
        let body = r#"{"type":"status","data":"warming up"}"#;
        assert_eq!(interpret_body(body).unwrap_err(), GatewayError::Delivery);
    }

    #[test]
    fn malformed_body_is_a_delivery_failure() {
        assert_eq!(
            interpret_body("<html>bad gateway</html>").unwrap_err(),
            GatewayError::Delivery
        );
        assert_eq!(interpret_body("").unwrap_err(), GatewayError::Delivery);
    }

    #[test]
    fn delivery_failure_text_is_fixed() {
        assert_eq!(GatewayError::Delivery.to_string(), DELIVERY_FAILURE_TEXT);
    }
}

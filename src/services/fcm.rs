//! Push Delivery Client
//!
//! FCM HTTP v1 implementation of the push-provider collaborator. The
//! v1 API takes one message per request, so a multicast fans out into
//! sequential single-token sends and reports per-token outcomes; dead
//! tokens are classified here so the fanout pipeline can prune them.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::services::auth::GoogleAuthenticator;

/// Provider-rendered notification content (alert payload style)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAlert {
    pub title: String,
    pub body: String,
}

/// One multicast push: a token list plus a shared payload
#[derive(Debug, Clone, PartialEq)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    /// App-side routing metadata, delivered on both channels
    pub data: BTreeMap<String, String>,
    /// Visible notification content; `None` means data-only delivery
    pub alert: Option<PushAlert>,
}

/// Per-token delivery failure classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushErrorKind {
    /// Token registration no longer exists (app uninstalled)
    Unregistered,
    /// Token is structurally invalid
    InvalidToken,
    /// Transient or unclassified failure; provider semantics govern
    Other(String),
}

impl PushErrorKind {
    /// Dead tokens are pruned from user records; everything else is
    /// left for the provider's own delivery semantics.
    pub fn is_dead_token(&self) -> bool {
        matches!(self, PushErrorKind::Unregistered | PushErrorKind::InvalidToken)
    }
}

/// Delivery result for a single token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub token: String,
    pub success: bool,
    pub error: Option<PushErrorKind>,
}

/// Aggregated multicast result
#[derive(Debug, Clone, Default)]
pub struct MulticastOutcome {
    pub responses: Vec<SendOutcome>,
}

impl MulticastOutcome {
    pub fn success_count(&self) -> usize {
        self.responses.iter().filter(|r| r.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.responses.len() - self.success_count()
    }

    /// Tokens whose failure marks them permanently undeliverable
    pub fn dead_tokens(&self) -> Vec<String> {
        self.responses
            .iter()
            .filter(|r| r.error.as_ref().is_some_and(PushErrorKind::is_dead_token))
            .map(|r| r.token.clone())
            .collect()
    }
}

/// Push-delivery provider collaborator
#[async_trait]
pub trait PushClient: Send + Sync {
    /// Send one payload to many tokens, returning per-token outcomes.
    ///
    /// Only transport-level failures (provider unreachable, broken
    /// credentials) return `Err`; rejected tokens come back as failed
    /// outcomes.
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastOutcome>;
}

#[derive(Debug, Deserialize)]
struct FcmErrorBody {
    error: Option<FcmErrorStatus>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorStatus {
    status: Option<String>,
    message: Option<String>,
}

/// Firebase Cloud Messaging client (HTTP v1)
pub struct FcmClient {
    project_id: String,
    auth: Arc<GoogleAuthenticator>,
    http_client: reqwest::Client,
}

impl FcmClient {
    pub fn new(project_id: String, auth: Arc<GoogleAuthenticator>) -> Self {
        Self {
            project_id,
            auth,
            http_client: reqwest::Client::new(),
        }
    }

    fn send_url(&self) -> String {
        format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.project_id
        )
    }

    /// Build the v1 message body for one token.
    ///
    /// High-priority delivery is requested on both channels. Data-only
    /// messages carry `content-available` so the app wakes to render
    /// the notification itself; alert messages let the provider render
    /// and add a default sound.
    fn build_message(&self, message: &MulticastMessage, token: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "message": {
                "token": token,
                "data": &message.data,
                "android": { "priority": "HIGH" },
                "apns": {
                    "headers": { "apns-priority": "10" },
                    "payload": { "aps": { "content-available": 1 } }
                }
            }
        });

        if let Some(alert) = &message.alert {
            body["message"]["notification"] = serde_json::json!({
                "title": &alert.title,
                "body": &alert.body,
            });
            body["message"]["apns"]["payload"]["aps"] = serde_json::json!({
                "sound": "default",
            });
        }

        body
    }
}

/// Short token prefix for logs; full tokens never hit the log stream
fn token_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

/// Classify a rejected send from the provider's error status/message
fn classify_error(status: Option<&str>, message: &str) -> PushErrorKind {
    match status {
        Some("UNREGISTERED") | Some("NOT_FOUND") => return PushErrorKind::Unregistered,
        Some("INVALID_ARGUMENT") => return PushErrorKind::InvalidToken,
        _ => {}
    }

    // Legacy error-code strings still show up in error messages
    let lower = message.to_lowercase();
    if lower.contains("registration-token-not-registered") || lower.contains("unregistered") {
        PushErrorKind::Unregistered
    } else if lower.contains("invalid-registration-token")
        || (lower.contains("invalid") && lower.contains("token"))
    {
        PushErrorKind::InvalidToken
    } else {
        PushErrorKind::Other(message.to_string())
    }
}

#[async_trait]
impl PushClient for FcmClient {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastOutcome> {
        let access_token = self.auth.access_token().await?;
        let url = self.send_url();

        let mut outcome = MulticastOutcome::default();

        for token in &message.tokens {
            let body = self.build_message(message, token);

            // A transport failure here means the provider itself is
            // unreachable; abort and let the event framework retry.
            let response = self
                .http_client
                .post(&url)
                .header("Authorization", format!("Bearer {}", access_token))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                debug!("push delivered to token {}…", token_prefix(token));
                outcome.responses.push(SendOutcome {
                    token: token.clone(),
                    success: true,
                    error: None,
                });
                continue;
            }

            let http_status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let parsed: FcmErrorBody =
                serde_json::from_str(&error_text).unwrap_or(FcmErrorBody { error: None });
            let (status, detail) = match parsed.error {
                Some(e) => (e.status, e.message.unwrap_or(error_text)),
                None => (None, error_text),
            };

            let kind = classify_error(status.as_deref(), &detail);
            warn!(
                "push rejected (http {}): {} for token {}…",
                http_status,
                detail,
                token_prefix(token)
            );
            outcome.responses.push(SendOutcome {
                token: token.clone(),
                success: false,
                error: Some(kind),
            });
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::ServiceAccountKey;

    fn test_client() -> FcmClient {
        let key = ServiceAccountKey {
            project_id: "test-project".to_string(),
            private_key_id: "key-id".to_string(),
            private_key: "private-key".to_string(),
            client_email: "test@test.iam.gserviceaccount.com".to_string(),
            client_id: "123456".to_string(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        };
        FcmClient::new(
            "test-project".to_string(),
            Arc::new(GoogleAuthenticator::new(key)),
        )
    }

    #[test]
    fn test_classify_unregistered() {
        assert_eq!(
            classify_error(Some("UNREGISTERED"), "Requested entity was not found."),
            PushErrorKind::Unregistered
        );
        assert_eq!(
            classify_error(None, "messaging/registration-token-not-registered"),
            PushErrorKind::Unregistered
        );
    }

    #[test]
    fn test_classify_invalid_token() {
        assert_eq!(
            classify_error(Some("INVALID_ARGUMENT"), "The registration token is not valid"),
            PushErrorKind::InvalidToken
        );
        assert_eq!(
            classify_error(None, "messaging/invalid-registration-token"),
            PushErrorKind::InvalidToken
        );
    }

    #[test]
    fn test_classify_transient_is_not_dead() {
        let kind = classify_error(Some("UNAVAILABLE"), "quota exceeded, retry later");
        assert!(!kind.is_dead_token());

        let kind = classify_error(None, "internal server error");
        assert!(!kind.is_dead_token());
    }

    #[test]
    fn test_build_data_only_message() {
        let client = test_client();
        let mut data = BTreeMap::new();
        data.insert("kind".to_string(), "dm".to_string());
        data.insert("body".to_string(), "hello".to_string());

        let message = MulticastMessage {
            tokens: vec!["t1".to_string()],
            data,
            alert: None,
        };

        let body = client.build_message(&message, "t1");
        assert_eq!(body["message"]["token"], "t1");
        assert_eq!(body["message"]["data"]["kind"], "dm");
        assert_eq!(body["message"]["android"]["priority"], "HIGH");
        assert_eq!(body["message"]["apns"]["headers"]["apns-priority"], "10");
        assert_eq!(
            body["message"]["apns"]["payload"]["aps"]["content-available"],
            1
        );
        assert!(body["message"].get("notification").is_none());
    }

    #[test]
    fn test_build_alert_message() {
        let client = test_client();
        let message = MulticastMessage {
            tokens: vec!["t1".to_string()],
            data: BTreeMap::new(),
            alert: Some(PushAlert {
                title: "adi".to_string(),
                body: "hello world".to_string(),
            }),
        };

        let body = client.build_message(&message, "t1");
        assert_eq!(body["message"]["notification"]["title"], "adi");
        assert_eq!(body["message"]["notification"]["body"], "hello world");
        assert_eq!(
            body["message"]["apns"]["payload"]["aps"]["sound"],
            "default"
        );
    }

    #[test]
    fn test_multicast_outcome_counts() {
        let outcome = MulticastOutcome {
            responses: vec![
                SendOutcome {
                    token: "t1".to_string(),
                    success: true,
                    error: None,
                },
                SendOutcome {
                    token: "t2".to_string(),
                    success: false,
                    error: Some(PushErrorKind::Unregistered),
                },
                SendOutcome {
                    token: "t3".to_string(),
                    success: false,
                    error: Some(PushErrorKind::Other("unavailable".to_string())),
                },
            ],
        };

        assert_eq!(outcome.success_count(), 1);
        assert_eq!(outcome.failure_count(), 2);
        assert_eq!(outcome.dead_tokens(), vec!["t2".to_string()]);
    }
}

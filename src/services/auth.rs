use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::{AppError, Result};

/// Google Service Account Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    pub client_id: String,
    pub auth_uri: String,
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read credentials {}: {}", path, e)))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// OAuth2 Token Cache
#[derive(Debug, Clone)]
struct TokenCache {
    access_token: String,
    expires_at: i64,
}

/// JWT Claims for Google OAuth2
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    sub: String,
    scope: String,
    aud: String,
    exp: i64,
    iat: i64,
}

/// Google OAuth2 Token Response
#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Service-account OAuth2 authenticator
///
/// Signs an RS256 JWT with the service-account key, exchanges it for a
/// bearer token at the key's `token_uri`, and caches the result until
/// shortly before expiry. One instance is shared by the document-store
/// and push-provider clients; the `cloud-platform` scope covers both.
pub struct GoogleAuthenticator {
    credentials: Arc<ServiceAccountKey>,
    token_cache: Arc<Mutex<Option<TokenCache>>>,
    http_client: reqwest::Client,
}

const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

impl GoogleAuthenticator {
    pub fn new(credentials: ServiceAccountKey) -> Self {
        Self {
            credentials: Arc::new(credentials),
            token_cache: Arc::new(Mutex::new(None)),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.credentials.project_id
    }

    /// Get a bearer token, refreshing via the OAuth2 JWT grant when
    /// the cached one is within 60 seconds of expiry.
    pub async fn access_token(&self) -> Result<String> {
        {
            let cache = self
                .token_cache
                .lock()
                .map_err(|_| AppError::Auth("token cache lock poisoned".to_string()))?;
            if let Some(cached) = cache.as_ref() {
                let now = Utc::now().timestamp();
                if cached.expires_at > now + 60 {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let now = Utc::now();
        let claims = JwtClaims {
            iss: self.credentials.client_email.clone(),
            sub: self.credentials.client_email.clone(),
            scope: OAUTH_SCOPE.to_string(),
            aud: self.credentials.token_uri.clone(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| AppError::Auth(format!("failed to parse private key: {}", e)))?;

        let assertion = encode(
            &Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &encoding_key,
        )
        .map_err(|e| AppError::Auth(format!("failed to encode JWT: {}", e)))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.credentials.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Auth(format!(
                "token request failed with status: {}",
                response.status()
            )));
        }

        let token_response: GoogleTokenResponse = response.json().await?;

        let expires_at = Utc::now().timestamp() + token_response.expires_in;
        {
            let mut cache = self
                .token_cache
                .lock()
                .map_err(|_| AppError::Auth("token cache lock poisoned".to_string()))?;
            *cache = Some(TokenCache {
                access_token: token_response.access_token.clone(),
                expires_at,
            });
        }

        Ok(token_response.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_key_deserialization() {
        let key: ServiceAccountKey = serde_json::from_value(serde_json::json!({
            "project_id": "test-project",
            "private_key_id": "key-id",
            "private_key": "private-key",
            "client_email": "test@test.iam.gserviceaccount.com",
            "client_id": "123456",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token"
        }))
        .unwrap();

        assert_eq!(key.project_id, "test-project");
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_authenticator_creation() {
        let key = ServiceAccountKey {
            project_id: "test-project".to_string(),
            private_key_id: "key-id".to_string(),
            private_key: "private-key".to_string(),
            client_email: "test@test.iam.gserviceaccount.com".to_string(),
            client_id: "123456".to_string(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        };

        let auth = GoogleAuthenticator::new(key);
        assert_eq!(auth.project_id(), "test-project");
    }
}

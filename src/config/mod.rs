use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub firebase: FirebaseConfig,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseConfig {
    pub project_id: String,
    /// Path to the service-account key JSON
    pub credentials_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Group-room collection and its default room kind
    pub group_collection: String,
    /// DM-room collection and its default room kind
    pub dm_collection: String,
    pub users_collection: String,
    /// User-record field holding push tokens
    pub token_field: String,
    /// Room-id prefix marking direct conversations
    pub dm_prefix: String,
    /// "data" (app-rendered) or "alert" (provider-rendered)
    pub payload_style: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: std::env::var("APP_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .context("APP_PORT must be a port number")?,
            },
            firebase: FirebaseConfig {
                project_id: std::env::var("FIREBASE_PROJECT_ID")
                    .context("FIREBASE_PROJECT_ID is required")?,
                credentials_path: std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
                    .context("GOOGLE_APPLICATION_CREDENTIALS is required")?,
            },
            fanout: FanoutConfig {
                group_collection: std::env::var("GROUP_ROOMS_COLLECTION")
                    .unwrap_or_else(|_| "rooms".to_string()),
                dm_collection: std::env::var("DM_ROOMS_COLLECTION")
                    .unwrap_or_else(|_| "dm_rooms".to_string()),
                users_collection: std::env::var("USERS_COLLECTION")
                    .unwrap_or_else(|_| "users".to_string()),
                token_field: std::env::var("TOKEN_FIELD")
                    .unwrap_or_else(|_| "fcmTokens".to_string()),
                dm_prefix: std::env::var("DM_ROOM_PREFIX").unwrap_or_else(|_| "dm_".to_string()),
                payload_style: std::env::var("PAYLOAD_STYLE")
                    .unwrap_or_else(|_| "data".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config {
            app: AppConfig {
                env: "test".to_string(),
                port: 8080,
            },
            firebase: FirebaseConfig {
                project_id: "test-project".to_string(),
                credentials_path: "/tmp/key.json".to_string(),
            },
            fanout: FanoutConfig {
                group_collection: "rooms".to_string(),
                dm_collection: "dm_rooms".to_string(),
                users_collection: "users".to_string(),
                token_field: "fcmTokens".to_string(),
                dm_prefix: "dm_".to_string(),
                payload_style: "data".to_string(),
            },
        };

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.fanout.group_collection, "rooms");
        assert_eq!(deserialized.app.port, 8080);
    }
}

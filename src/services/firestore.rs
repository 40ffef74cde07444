//! Document Store Client
//!
//! Firestore REST implementation of the document-store collaborator:
//! read-one-by-id for rooms, membership-filtered user lookup, and a
//! batched array-remove commit for token cleanup.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{Document, Room, UserRecord};
use crate::services::auth::GoogleAuthenticator;

/// Firestore caps `IN` membership filters at 10 values per query;
/// callers with larger recipient sets shard their lookups.
pub const MAX_IN_FILTER_VALUES: usize = 10;

/// Document-store collaborator used by the fanout pipeline
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a room by id; `None` when the document no longer exists.
    async fn fetch_room(&self, collection: &str, room_id: &str) -> Result<Option<Room>>;

    /// Fetch the user records whose `appUserId` is in the given set.
    /// At most [`MAX_IN_FILTER_VALUES`] ids per call.
    async fn users_by_app_ids(&self, app_user_ids: &[String]) -> Result<Vec<UserRecord>>;

    /// Remove tokens from every listed user document in one batched
    /// write (array-remove semantics: absent tokens are a no-op).
    async fn remove_tokens(&self, user_doc_names: &[String], tokens: &[String]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct RunQueryEntry {
    // Entries carrying only readTime have no document
    document: Option<Document>,
}

/// Firestore REST client
pub struct FirestoreClient {
    project_id: String,
    users_collection: String,
    token_field: String,
    auth: Arc<GoogleAuthenticator>,
    http_client: reqwest::Client,
}

impl FirestoreClient {
    pub fn new(
        project_id: String,
        users_collection: String,
        token_field: String,
        auth: Arc<GoogleAuthenticator>,
    ) -> Self {
        Self {
            project_id,
            users_collection,
            token_field,
            auth,
            http_client: reqwest::Client::new(),
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/(default)/documents",
            self.project_id
        )
    }

    /// `appUserId IN [...]` structured query over the users collection
    fn build_users_query(&self, app_user_ids: &[String]) -> serde_json::Value {
        let values: Vec<serde_json::Value> = app_user_ids
            .iter()
            .map(|id| serde_json::json!({ "stringValue": id }))
            .collect();

        serde_json::json!({
            "structuredQuery": {
                "from": [{ "collectionId": &self.users_collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "appUserId" },
                        "op": "IN",
                        "value": { "arrayValue": { "values": values } }
                    }
                }
            }
        })
    }

    /// Batched commit removing the tokens from each document's token
    /// array, one transform write per document.
    fn build_remove_commit(
        &self,
        user_doc_names: &[String],
        tokens: &[String],
    ) -> serde_json::Value {
        let values: Vec<serde_json::Value> = tokens
            .iter()
            .map(|t| serde_json::json!({ "stringValue": t }))
            .collect();

        let writes: Vec<serde_json::Value> = user_doc_names
            .iter()
            .map(|name| {
                serde_json::json!({
                    "transform": {
                        "document": name,
                        "fieldTransforms": [{
                            "fieldPath": &self.token_field,
                            "removeAllFromArray": { "values": &values }
                        }]
                    }
                })
            })
            .collect();

        serde_json::json!({ "writes": writes })
    }

    async fn authorized_post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let access_token = self.auth.access_token().await?;
        Ok(self
            .http_client
            .post(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?)
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn fetch_room(&self, collection: &str, room_id: &str) -> Result<Option<Room>> {
        let access_token = self.auth.access_token().await?;
        let url = format!("{}/{}/{}", self.documents_root(), collection, room_id);

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("room {}/{} not found", collection, room_id);
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!(
                "room fetch failed with {}: {}",
                status, text
            )));
        }

        let doc: Document = response.json().await?;
        Ok(Some(Room::from_fields(&doc.fields)))
    }

    async fn users_by_app_ids(&self, app_user_ids: &[String]) -> Result<Vec<UserRecord>> {
        debug_assert!(app_user_ids.len() <= MAX_IN_FILTER_VALUES);

        if app_user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}:runQuery", self.documents_root());
        let body = self.build_users_query(app_user_ids);
        let response = self.authorized_post(&url, &body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!(
                "user lookup failed with {}: {}",
                status, text
            )));
        }

        let entries: Vec<RunQueryEntry> = response.json().await?;
        let records = entries
            .into_iter()
            .filter_map(|e| e.document)
            .map(|doc| UserRecord::from_document(&doc, &self.token_field))
            .collect();

        Ok(records)
    }

    async fn remove_tokens(&self, user_doc_names: &[String], tokens: &[String]) -> Result<()> {
        if user_doc_names.is_empty() || tokens.is_empty() {
            return Ok(());
        }

        let url = format!("{}:commit", self.documents_root());
        let body = self.build_remove_commit(user_doc_names, tokens);
        let response = self.authorized_post(&url, &body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!(
                "token cleanup commit failed with {}: {}",
                status, text
            )));
        }

        debug!(
            "removed {} dead token(s) across {} user document(s)",
            tokens.len(),
            user_doc_names.len()
        );
        Ok(())
    }
}

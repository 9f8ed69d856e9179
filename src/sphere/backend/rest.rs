//! Hosted backend over HTTP
//!
//! Talks to the platform's REST surfaces: the PostgREST data API
//! (`/rest/v1`), the auth API (`/auth/v1`) and object storage
//! (`/storage/v1`). Realtime goes through [`RealtimeFeed`].

use crate::sphere::backend::query::{is_identifier, Filter, Query};
use crate::sphere::backend::realtime::RealtimeFeed;
use crate::sphere::backend::{
    ChangeFeed, IdentityProvider, ObjectStorage, RemoteStore, Topic, UserIdentity,
};
use crate::sphere::live::subscription::Subscription;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    user: UserIdentity,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserIdentity,
}

/// REST client for the hosted backend
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    realtime: RealtimeFeed,
}

impl RestBackend {
    /// Creates a client; the anon key is sent as `apikey` on every request
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(
                    HeaderName::from_static("apikey"),
                    HeaderValue::from_str(anon_key).context("invalid anon key")?,
                );
                headers
            })
            .build()
            .context("failed to build HTTP client")?;

        info!("[Rest] backend client for {}", base_url);
        Ok(Self {
            realtime: RealtimeFeed::new(&base_url, anon_key),
            client,
            base_url,
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
        })
    }

    async fn bearer(&self) -> String {
        match self.session.read().await.as_ref() {
            Some(s) => format!("Bearer {}", s.access_token),
            None => format!("Bearer {}", self.anon_key),
        }
    }

    fn table_url(&self, table: &str) -> Result<String> {
        if !is_identifier(table) {
            return Err(anyhow::anyhow!("invalid table name: {}", table));
        }
        Ok(format!("{}/rest/v1/{}", self.base_url, table))
    }

    /// Public URL for an object in a public bucket
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            bucket,
            path.trim_start_matches('/')
        )
    }

    async fn send_rows(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<Vec<Value>>> {
        let response = request
            .header("Authorization", self.bearer().await)
            .send()
            .await
            .with_context(|| format!("{} request failed", operation))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .context("failed to read response body")?;
        let body_str = String::from_utf8_lossy(&body);

        if !status.is_success() {
            error!(
                "[Rest] {} failed, HTTP status: {}, body: {}",
                operation, status, body_str
            );
            return Err(anyhow::anyhow!("HTTP error {}: {}", status, body_str));
        }
        debug!("[Rest] {} ok, HTTP status: {}", operation, status);

        if body.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice::<Value>(&body).map_err(|e| {
            error!("[Rest] {} decode failed: {:?}\nbody: {}", operation, e, body_str);
            anyhow::anyhow!("failed to decode response: {:?}", e)
        })? {
            Value::Array(rows) => Ok(Some(rows)),
            Value::Null => Ok(None),
            single @ Value::Object(_) => Ok(Some(vec![single])),
            other => Err(anyhow::anyhow!("unexpected response shape: {}", other)),
        }
    }
}

#[async_trait]
impl IdentityProvider for RestBackend {
    async fn current_user(&self) -> Option<UserIdentity> {
        let token = self.session.read().await.as_ref()?.access_token.clone();
        let url = format!("{}/auth/v1/user", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => r.json::<UserIdentity>().await.ok(),
            Ok(r) => {
                warn!("[Auth] session rejected, HTTP status: {}", r.status());
                *self.session.write().await = None;
                None
            }
            Err(e) => {
                // keep the cached user so a flaky network does not sign people out
                warn!("[Auth] session check failed: {}", e);
                self.session.read().await.as_ref().map(|s| s.user.clone())
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserIdentity> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        info!("[Auth] 🔐 signing in {}", email);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .context("sign-in request failed")?;

        let status = response.status();
        let text = response.text().await.context("failed to read sign-in response")?;
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP error {}: {}", status, text));
        }

        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to decode sign-in response: {}", e))?;
        self.realtime.set_access_token(Some(token.access_token.clone())).await;
        let user = token.user.clone();
        *self.session.write().await = Some(Session {
            access_token: token.access_token,
            user: token.user,
        });
        info!("[Auth] ✅ signed in as {}", user.id);
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        self.realtime.set_access_token(None).await;
        let url = format!("{}/auth/v1/logout", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await
            .context("sign-out request failed")?;
        if !response.status().is_success() {
            // the local session is already gone, the server token will expire on its own
            warn!("[Auth] sign-out returned HTTP {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RestBackend {
    async fn select(&self, query: &Query) -> Result<Option<Vec<Value>>> {
        let url = self.table_url(&query.table)?;
        let request = self.client.get(&url).query(&query.to_postgrest());
        self.send_rows(&format!("select {}", query.table), request).await
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let url = self.table_url(table)?;
        let request = self
            .client
            .post(&url)
            .header("Prefer", "return=representation")
            .json(&rows);
        Ok(self
            .send_rows(&format!("insert {}", table), request)
            .await?
            .unwrap_or_default())
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> Result<Vec<Value>> {
        if filter.is_empty() {
            return Err(anyhow::anyhow!("refusing unfiltered update on {}", table));
        }
        let url = self.table_url(table)?;
        let request = self
            .client
            .patch(&url)
            .query(&filter.to_postgrest())
            .header("Prefer", "return=representation")
            .json(&patch);
        Ok(self
            .send_rows(&format!("update {}", table), request)
            .await?
            .unwrap_or_default())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<Vec<Value>> {
        if filter.is_empty() {
            return Err(anyhow::anyhow!("refusing unfiltered delete on {}", table));
        }
        let url = self.table_url(table)?;
        let request = self
            .client
            .delete(&url)
            .query(&filter.to_postgrest())
            .header("Prefer", "return=representation");
        Ok(self
            .send_rows(&format!("delete {}", table), request)
            .await?
            .unwrap_or_default())
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Vec<Value>> {
        let url = self.table_url(table)?;
        let request = self
            .client
            .post(&url)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&vec![row]);
        Ok(self
            .send_rows(&format!("upsert {}", table), request)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChangeFeed for RestBackend {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        self.realtime.subscribe(topic).await
    }
}

#[async_trait]
impl ObjectStorage for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let path = path.trim_start_matches('/');
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        info!("[Storage] ⬆️ uploading {} bytes to {}/{}", bytes.len(), bucket, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer().await)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .context("upload request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("[Storage] upload failed, HTTP status: {}, body: {}", status, text);
            return Err(anyhow::anyhow!("HTTP error {}: {}", status, text));
        }
        Ok(self.public_url(bucket, path))
    }
}

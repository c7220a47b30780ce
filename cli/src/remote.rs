use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use stride_core::models::{Entity, EntityKind, Goal, ProgressEntry};
use stride_core::store::RemoteStore;

use crate::server::SoftDeleteRequest;

/// `RemoteStore` backed by a `stride serve` instance.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Goal => "goals",
        EntityKind::ProgressEntry => "progress",
    }
}

impl HttpRemote {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid server URL '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            bail!("Invalid server URL '{base_url}'");
        }
        let client = reqwest::Client::builder()
            .user_agent(format!("stride/{} (goal tracker)", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("Invalid server URL '{}'", self.base_url))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach sync server at {}", self.base_url))?;
        check_status(response).await
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<T>> {
        let url = self.url(&[collection(kind)])?;
        let since = since.to_rfc3339_opts(SecondsFormat::Micros, true);
        let request = self
            .client
            .get(url)
            .query(&[("owner", owner_id), ("since", since.as_str())]);
        let response = self.send(request).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {kind} list from sync server"))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    bail!("Sync server returned {status}: {message}")
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn upsert(&self, entity: &Entity) -> Result<()> {
        let request = match entity {
            Entity::Goal(goal) => self.client.put(self.url(&["goals", &goal.id])?).json(goal),
            Entity::ProgressEntry(entry) => self
                .client
                .put(self.url(&["progress", &entry.id])?)
                .json(entry),
        };
        self.send(request).await?;
        Ok(())
    }

    async fn soft_delete(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<()> {
        let url = self.url(&[collection(kind), id, "delete"])?;
        let request = self
            .client
            .post(url)
            .json(&SoftDeleteRequest { deleted_at: at });
        self.send(request).await?;
        Ok(())
    }

    async fn fetch_goals_since(&self, owner_id: &str, since: DateTime<Utc>) -> Result<Vec<Goal>> {
        self.fetch(EntityKind::Goal, owner_id, since).await
    }

    async fn fetch_progress_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProgressEntry>> {
        self.fetch(EntityKind::ProgressEntry, owner_id, since).await
    }
}

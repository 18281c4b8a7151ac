use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::config::{self, Config};
use crate::notion::model::{Block, Page, QueryResponse, RetrieveDatabaseResp, User};

pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";
const BLOCK_CHILDREN_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// The remote calls the content pipeline depends on.
#[async_trait]
pub trait NotionService: Send + Sync {
    /// One page of database rows for a prepared query body.
    async fn query_database(&self, database_id: &str, body: &Value) -> Result<QueryResponse<Page>>;

    /// One page of the direct children of a block (or page).
    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<QueryResponse<Block>>;

    async fn retrieve_user(&self, user_id: &str) -> Result<User>;
}

impl NotionClient {
    pub fn new(token: String, version: String) -> Result<Self> {
        let base_url = Url::parse(NOTION_API_BASE).context("invalid default Notion URL")?;
        Self::with_base_url(token, version, base_url)
    }

    pub fn with_base_url(token: String, version: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("notion-blog/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
            version,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.notion.token.clone(), cfg.notion.version.clone())
    }

    pub fn build_request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let mut builder = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version);
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        builder.build().context("failed to build Notion request")
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid Notion endpoint {path}"))
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        let url = request.url().clone();
        debug!(method=%request.method(), %url, "sending notion request");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach Notion at {url}"))?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(%url, "rate limited by Notion");
            return Err(anyhow!("received 429 from Notion: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%url, %status, "notion API error");
            return Err(anyhow!("notion error {}: {}", status, body));
        }

        res.json::<T>()
            .await
            .with_context(|| format!("invalid Notion response from {url}"))
    }

    pub async fn query_database(
        &self,
        database_id: &str,
        body: &Value,
    ) -> Result<QueryResponse<Page>> {
        let url = self.endpoint(&format!("v1/databases/{}/query", database_id))?;
        let request = self.build_request(Method::POST, url, Some(body))?;
        self.execute(request).await
    }

    pub async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<QueryResponse<Block>> {
        let mut url = self.endpoint(&format!("v1/blocks/{}/children", block_id))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("page_size", &BLOCK_CHILDREN_PAGE_SIZE.to_string());
            if let Some(cursor) = cursor {
                pairs.append_pair("start_cursor", cursor);
            }
        }
        let request = self.build_request(Method::GET, url, None)?;
        self.execute(request).await
    }

    pub async fn retrieve_user(&self, user_id: &str) -> Result<User> {
        let url = self.endpoint(&format!("v1/users/{}", user_id))?;
        let request = self.build_request(Method::GET, url, None)?;
        self.execute(request).await
    }

    pub async fn retrieve_database(&self, database_id: &str) -> Result<RetrieveDatabaseResp> {
        let url = self.endpoint(&format!("v1/databases/{}", database_id))?;
        let request = self.build_request(Method::GET, url, None)?;
        self.execute(request).await
    }
}

#[async_trait]
impl NotionService for NotionClient {
    async fn query_database(&self, database_id: &str, body: &Value) -> Result<QueryResponse<Page>> {
        NotionClient::query_database(self, database_id, body).await
    }

    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<QueryResponse<Block>> {
        NotionClient::list_block_children(self, block_id, cursor).await
    }

    async fn retrieve_user(&self, user_id: &str) -> Result<User> {
        NotionClient::retrieve_user(self, user_id).await
    }
}

/// Body of the "published posts" database query: rows carrying the publish
/// tag, newest publish date first, then newest creation time first.
pub fn build_query_request(notion: &config::Notion, cursor: Option<&str>) -> Value {
    let props = &notion.properties;
    let mut body = Map::new();
    body.insert(
        "filter".into(),
        json!({
            "or": [
                {
                    "property": props.publishing_tag,
                    "multi_select": { "contains": notion.publish_tag },
                }
            ]
        }),
    );
    body.insert(
        "sorts".into(),
        json!([
            { "property": props.published_at, "direction": "descending" },
            { "timestamp": "created_time", "direction": "descending" },
        ]),
    );
    body.insert("page_size".into(), json!(notion.page_size));
    if let Some(cursor) = cursor {
        body.insert("start_cursor".into(), json!(cursor));
    }
    Value::Object(body)
}

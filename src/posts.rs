//! Lazy, pull-driven sequence of published posts.

use anyhow::{Context, Result};
use futures::stream::{self, Stream, TryStreamExt};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::asset::{AssetResolver, HttpFetcher};
use crate::cache::DiskCache;
use crate::config::{self, Config};
use crate::content::ContentAssembler;
use crate::notion::model::{Page, QueryResponse};
use crate::notion::{build_query_request, NotionClient, NotionService};
use crate::record::{AuthorCache, Post, PostSummary, RecordRenderer};

/// One item of a paginated walk. `cursor` is the start cursor of the remote
/// page the item came from (`None` for the first page) and `offset` its index
/// within that page, so `(cursor, offset)` resumes exactly at this item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paged<T> {
    pub item: T,
    pub cursor: Option<String>,
    pub offset: usize,
}

pub struct PostSource {
    notion: Arc<dyn NotionService>,
    settings: config::Notion,
    records: RecordRenderer,
    content: ContentAssembler,
    /// Query responses seen during this run, keyed by start cursor ("" for
    /// the first page).
    pages: Mutex<HashMap<String, QueryResponse<Page>>>,
}

impl PostSource {
    pub fn new(
        notion: Arc<dyn NotionService>,
        settings: config::Notion,
        records: RecordRenderer,
        content: ContentAssembler,
    ) -> Self {
        Self {
            notion,
            settings,
            records,
            content,
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the pipeline from its parts with a fresh author cache.
    pub fn with_service(
        notion: Arc<dyn NotionService>,
        assets: AssetResolver,
        settings: config::Notion,
    ) -> Self {
        let records = RecordRenderer::new(
            Arc::clone(&notion),
            assets.clone(),
            Arc::new(AuthorCache::new()),
            settings.properties.clone(),
        );
        let content = ContentAssembler::new(Arc::clone(&notion), assets);
        Self::new(notion, settings, records, content)
    }

    /// Production wiring: HTTP Notion client, HTTP asset fetcher, disk cache.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let notion: Arc<dyn NotionService> = Arc::new(NotionClient::from_config(cfg)?);
        let cache = DiskCache::new(cfg.cache_dir(), cfg.site_root())?;
        let assets = AssetResolver::new(cache, Arc::new(HttpFetcher::new()?));
        Ok(Self::with_service(notion, assets, cfg.notion.clone()))
    }

    /// One page of published rows. Responses are memoized per cursor for the
    /// lifetime of this source.
    #[instrument(skip(self))]
    pub async fn query_database(&self, cursor: Option<&str>) -> Result<QueryResponse<Page>> {
        let key = cursor.unwrap_or_default().to_string();
        if let Some(hit) = self.pages.lock().await.get(&key) {
            debug!("query cursor cache hit");
            return Ok(hit.clone());
        }

        let body = build_query_request(&self.settings, cursor);
        let response = self
            .notion
            .query_database(&self.settings.database_id, &body)
            .await
            .with_context(|| format!("failed to query database at cursor {cursor:?}"))?;
        info!(rows = response.results.len(), has_more = response.has_more, "queried database");
        self.pages.lock().await.insert(key, response.clone());
        Ok(response)
    }

    /// Summaries of published rows in query order: skips `offset` leading
    /// rows (counted from `cursor`), then yields at most `limit` items.
    pub fn summaries(
        &self,
        limit: Option<usize>,
        cursor: Option<String>,
        offset: usize,
    ) -> impl Stream<Item = Result<Paged<PostSummary>>> + '_ {
        let walk = Walk {
            cursor,
            next_cursor: None,
            started: false,
            has_more: false,
            rows: VecDeque::new(),
            skip: offset,
            remaining: limit,
        };

        stream::try_unfold(walk, move |walk| self.advance(walk))
    }

    async fn advance(&self, mut walk: Walk) -> Result<Option<(Paged<PostSummary>, Walk)>> {
        loop {
            if walk.remaining == Some(0) {
                return Ok(None);
            }

            if let Some((index, page)) = walk.rows.pop_front() {
                if walk.skip > 0 {
                    walk.skip -= 1;
                    continue;
                }
                let summary = self.records.render(&page).await?;
                if let Some(remaining) = walk.remaining.as_mut() {
                    *remaining -= 1;
                }
                let paged = Paged {
                    item: summary,
                    cursor: walk.cursor.clone(),
                    offset: index,
                };
                return Ok(Some((paged, walk)));
            }

            if walk.started {
                match walk.next_cursor.take() {
                    Some(next) if walk.has_more => walk.cursor = Some(next),
                    _ => return Ok(None),
                }
            }

            let response = self.query_database(walk.cursor.as_deref()).await?;
            walk.started = true;
            walk.has_more = response.has_more;
            walk.next_cursor = response.next_cursor;
            walk.rows = response.results.into_iter().enumerate().collect();
        }
    }

    /// Fully populated posts; each row's body is fetched (or read from the
    /// content cache) just before the row is yielded.
    pub fn posts(
        &self,
        limit: Option<usize>,
        cursor: Option<String>,
        offset: usize,
    ) -> impl Stream<Item = Result<Paged<Post>>> + '_ {
        self.summaries(limit, cursor, offset)
            .and_then(move |paged| self.attach_content(paged))
    }

    async fn attach_content(&self, paged: Paged<PostSummary>) -> Result<Paged<Post>> {
        let content = self
            .content
            .page_content(&paged.item.id, paged.item.last_modified)
            .await?;
        Ok(Paged {
            item: Post {
                summary: paged.item,
                content,
            },
            cursor: paged.cursor,
            offset: paged.offset,
        })
    }
}

struct Walk {
    /// Start cursor of the page currently buffered in `rows`.
    cursor: Option<String>,
    next_cursor: Option<String>,
    started: bool,
    has_more: bool,
    rows: VecDeque<(usize, Page)>,
    skip: usize,
    remaining: Option<usize>,
}

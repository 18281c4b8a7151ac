use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use notion_blog::asset::{AssetResolver, Fetcher};
use notion_blog::cache::DiskCache;
use notion_blog::config;
use notion_blog::content::ContentAssembler;
use notion_blog::notion::model::{Block, Page, QueryResponse, User};
use notion_blog::notion::NotionService;
use notion_blog::posts::PostSource;
use notion_blog::record::RecordError;
use notion_blog::site;
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::sync::Mutex;

/// In-memory database that pages rows and block children by numeric cursor
/// (`"c{index}"`) and records every call.
#[derive(Default)]
struct RecordingNotion {
    rows: Vec<Value>,
    children: HashMap<String, Vec<Value>>,
    children_page_size: usize,
    users: HashMap<String, Value>,
    query_bodies: Mutex<Vec<Value>>,
    children_calls: Mutex<Vec<(String, Option<String>)>>,
    user_calls: Mutex<Vec<String>>,
}

impl RecordingNotion {
    fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            children_page_size: 100,
            ..Default::default()
        }
    }

    fn child_blocks(mut self, parent: &str, blocks: Vec<Value>) -> Self {
        self.children.insert(parent.to_string(), blocks);
        self
    }

    fn user(mut self, user: Value) -> Self {
        let id = user["id"].as_str().unwrap().to_string();
        self.users.insert(id, user);
        self
    }

    async fn query_cursors(&self) -> Vec<Option<String>> {
        self.query_bodies
            .lock()
            .await
            .iter()
            .map(|b| b["start_cursor"].as_str().map(str::to_string))
            .collect()
    }

    async fn children_calls(&self) -> Vec<(String, Option<String>)> {
        self.children_calls.lock().await.clone()
    }

    async fn user_calls(&self) -> Vec<String> {
        self.user_calls.lock().await.clone()
    }
}

fn page_of<T: serde::de::DeserializeOwned>(
    items: &[Value],
    cursor: Option<&str>,
    size: usize,
) -> Result<QueryResponse<T>> {
    let start = match cursor {
        Some(c) => c
            .strip_prefix('c')
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| anyhow!("bad cursor {c}"))?,
        None => 0,
    };
    let end = (start + size).min(items.len());
    let has_more = end < items.len();
    let next_cursor = has_more.then(|| format!("c{end}"));
    Ok(serde_json::from_value(json!({
        "results": items[start..end].to_vec(),
        "has_more": has_more,
        "next_cursor": next_cursor,
    }))?)
}

#[async_trait]
impl NotionService for RecordingNotion {
    async fn query_database(&self, _database_id: &str, body: &Value) -> Result<QueryResponse<Page>> {
        self.query_bodies.lock().await.push(body.clone());
        let size = body["page_size"].as_u64().unwrap_or(10) as usize;
        page_of(&self.rows, body["start_cursor"].as_str(), size)
    }

    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<QueryResponse<Block>> {
        self.children_calls
            .lock()
            .await
            .push((block_id.to_string(), cursor.map(str::to_string)));
        let blocks = self.children.get(block_id).cloned().unwrap_or_default();
        page_of(&blocks, cursor, self.children_page_size)
    }

    async fn retrieve_user(&self, user_id: &str) -> Result<User> {
        self.user_calls.lock().await.push(user_id.to_string());
        let user = self
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| anyhow!("no user {user_id}"))?;
        Ok(serde_json::from_value(user)?)
    }
}

#[derive(Default)]
struct CountingFetcher {
    heads: AtomicUsize,
    downloads: AtomicUsize,
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn content_type(&self, _url: &Url) -> Result<Option<String>> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        Ok(Some("image/png".into()))
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(dest, url.as_str()).await?;
        Ok(())
    }
}

fn spans(text: &str) -> Value {
    json!([ { "type": "text", "text": { "content": text }, "plain_text": text } ])
}

fn row(n: usize) -> Value {
    json!({
        "object": "page",
        "id": format!("page-{n}"),
        "created_time": format!("2024-01-{:02}T08:30:00.000Z", n + 1),
        "last_edited_time": "2024-02-01T10:00:00.000Z",
        "cover": null,
        "icon": null,
        "properties": {
            "Name": { "id": "title", "type": "title", "title": spans(&format!("Post {n}")) },
            "Author": { "id": "a", "type": "people", "people": [ { "object": "user", "id": "u1", "name": "Ada" } ] },
            "Published At": { "id": "p", "type": "date", "date": { "start": "2024-03-01", "end": null } },
            "Excerpt": { "id": "e", "type": "rich_text", "rich_text": spans("short") },
            "Publishing Tag": { "id": "t", "type": "multi_select", "multi_select": [ { "name": "Website: Published" } ] }
        }
    })
}

fn block(id: &str, kind: &str, text: &str, has_children: bool) -> Value {
    json!({
        "object": "block",
        "id": id,
        "type": kind,
        "has_children": has_children,
        kind: { "rich_text": spans(text) }
    })
}

fn settings(page_size: u32) -> config::Notion {
    config::Notion {
        token: "secret".into(),
        database_id: "db".into(),
        page_size,
        ..Default::default()
    }
}

struct Harness {
    _td: TempDir,
    cache_root: std::path::PathBuf,
    notion: Arc<RecordingNotion>,
    fetcher: Arc<CountingFetcher>,
    source: PostSource,
}

fn harness(notion: RecordingNotion, page_size: u32) -> Harness {
    let td = tempdir().unwrap();
    let cache_root = td.path().join("cache");
    let cache = DiskCache::new(&cache_root, td.path()).unwrap();
    let notion = Arc::new(notion);
    let fetcher = Arc::new(CountingFetcher::default());
    let assets = AssetResolver::new(cache, fetcher.clone());
    let source = PostSource::with_service(notion.clone(), assets, settings(page_size));
    Harness {
        _td: td,
        cache_root,
        notion,
        fetcher,
        source,
    }
}

#[tokio::test]
async fn limit_and_offset_cross_page_boundary() {
    let h = harness(RecordingNotion::with_rows((0..10).map(row).collect()), 4);

    let got: Vec<_> = h.source.summaries(Some(3), None, 2).try_collect().await.unwrap();
    let ids: Vec<_> = got.iter().map(|p| p.item.id.as_str()).collect();
    assert_eq!(ids, ["page-2", "page-3", "page-4"]);

    assert_eq!((got[1].cursor.as_deref(), got[1].offset), (None, 3));
    assert_eq!((got[2].cursor.as_deref(), got[2].offset), (Some("c4"), 0));
    assert_eq!(h.notion.query_cursors().await, [None, Some("c4".to_string())]);
}

#[tokio::test]
async fn full_walk_has_no_duplicates_and_reuses_seen_pages() {
    let h = harness(RecordingNotion::with_rows((0..10).map(row).collect()), 4);

    let first: Vec<_> = h.source.summaries(Some(5), None, 0).try_collect().await.unwrap();
    assert_eq!(first.len(), 5);

    let all: Vec<_> = h.source.summaries(None, None, 0).try_collect().await.unwrap();
    let ids: Vec<_> = all.iter().map(|p| p.item.id.clone()).collect();
    let expected: Vec<_> = (0..10).map(|n| format!("page-{n}")).collect();
    assert_eq!(ids, expected);

    // The first two pages came from the per-cursor memo.
    assert_eq!(
        h.notion.query_cursors().await,
        [None, Some("c4".to_string()), Some("c8".to_string())]
    );
}

#[tokio::test]
async fn resumes_from_cursor_and_offset() {
    let h = harness(RecordingNotion::with_rows((0..10).map(row).collect()), 4);

    let all: Vec<_> = h.source.summaries(None, None, 0).try_collect().await.unwrap();
    let mark = &all[5];
    let rest: Vec<_> = h
        .source
        .summaries(Some(2), mark.cursor.clone(), mark.offset)
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<_> = rest.iter().map(|p| p.item.id.as_str()).collect();
    assert_eq!(ids, ["page-5", "page-6"]);
}

#[tokio::test]
async fn zero_limit_yields_nothing_without_querying() {
    let h = harness(RecordingNotion::with_rows((0..3).map(row).collect()), 4);
    let got: Vec<_> = h.source.summaries(Some(0), None, 0).try_collect().await.unwrap();
    assert!(got.is_empty());
    assert!(h.notion.query_cursors().await.is_empty());
}

#[tokio::test]
async fn query_body_filters_on_publish_tag() {
    let h = harness(RecordingNotion::with_rows(vec![row(0)]), 10);
    h.source.query_database(None).await.unwrap();

    let body = h.notion.query_bodies.lock().await[0].clone();
    assert_eq!(body["page_size"], 10);
    assert_eq!(body["filter"]["or"][0]["property"], "Publishing Tag");
    assert_eq!(body["filter"]["or"][0]["multi_select"]["contains"], "Website: Published");
    assert_eq!(body["sorts"][0]["property"], "Published At");
    assert_eq!(body["sorts"][0]["direction"], "descending");
    assert!(body.get("start_cursor").is_none());
}

#[tokio::test]
async fn record_shape_title_slug_and_dates() {
    let mut r = row(4);
    r["icon"] = json!({ "type": "emoji", "emoji": "🚀" });
    r["properties"]["Name"]["title"] = spans("Hello World");
    r["properties"]["Published At"] = json!({ "id": "p", "type": "date", "date": null });
    let h = harness(RecordingNotion::with_rows(vec![r]), 10);

    let got: Vec<_> = h.source.summaries(None, None, 0).try_collect().await.unwrap();
    let post = &got[0].item;
    assert_eq!(post.title, "🚀 Hello World");
    assert_eq!(post.path, "hello-world-2024-01-05");
    let created: DateTime<Utc> = "2024-01-05T08:30:00Z".parse().unwrap();
    assert_eq!(post.published_at, created);
    assert_eq!(post.excerpt, "short");
    assert_eq!(post.author[0].name.as_deref(), Some("Ada"));
    assert_eq!(post.cover, None);
}

#[tokio::test]
async fn missing_required_property_fails_the_walk() {
    let mut r = row(0);
    r["properties"].as_object_mut().unwrap().remove("Author");
    let h = harness(RecordingNotion::with_rows(vec![row(1), r]), 10);

    let err = h
        .source
        .summaries(None, None, 0)
        .try_collect::<Vec<_>>()
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<RecordError>(),
        Some(&RecordError::MissingProperty {
            page_id: "page-0".into(),
            name: "Author".into(),
        })
    );
}

#[tokio::test]
async fn nameless_authors_are_looked_up_once() {
    let rows: Vec<_> = (0..3)
        .map(|n| {
            let mut r = row(n);
            r["properties"]["Author"]["people"] = json!([ { "object": "user", "id": "u9" } ]);
            r
        })
        .collect();
    let notion = RecordingNotion::with_rows(rows).user(json!({
        "object": "user",
        "id": "u9",
        "name": "Grace",
        "avatar_url": "https://cdn.example.com/g.png"
    }));
    let h = harness(notion, 10);

    let got: Vec<_> = h.source.summaries(None, None, 0).try_collect().await.unwrap();
    assert_eq!(h.notion.user_calls().await, ["u9"]);
    for paged in &got {
        let author = &paged.item.author[0];
        assert_eq!(author.name.as_deref(), Some("Grace"));
        let avatar = author.avatar.as_deref().unwrap();
        assert!(avatar.starts_with("/cache/fileCache/external/cdn.example.com/"));
        assert!(avatar.ends_with(".png"));
    }
    assert_eq!(h.fetcher.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn re_signed_covers_share_one_download() {
    let rows: Vec<_> = (0..2)
        .map(|n| {
            let mut r = row(n);
            r["cover"] = json!({
                "type": "file",
                "file": {
                    "url": format!("https://s3.example.com/ws/cover.jpg?X-Amz-Signature={n}"),
                    "expiry_time": "2024-02-01T11:00:00.000Z"
                }
            });
            r
        })
        .collect();
    let h = harness(RecordingNotion::with_rows(rows), 10);

    let got: Vec<_> = h.source.summaries(None, None, 0).try_collect().await.unwrap();
    let a = got[0].item.cover.as_deref().unwrap();
    let b = got[1].item.cover.as_deref().unwrap();
    assert_eq!(a, b);
    assert!(a.starts_with("/cache/fileCache/notion/s3.example.com/"));
    assert!(a.ends_with(".jpg"));
    assert_eq!(h.fetcher.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(h.fetcher.heads.load(Ordering::SeqCst), 0);
}

fn nested_page() -> RecordingNotion {
    RecordingNotion::with_rows(vec![row(0)])
        .child_blocks(
            "page-0",
            vec![
                block("b1", "heading_1", "Intro", false),
                block("b2", "bulleted_list_item", "item", true),
                json!({ "object": "block", "id": "b3", "type": "divider", "has_children": false, "divider": {} }),
                block("b4", "quote", "quoted", true),
            ],
        )
        .child_blocks("b2", vec![block("b2a", "paragraph", "nested", false)])
        .child_blocks(
            "b4",
            vec![
                block("b4a", "paragraph", "first", false),
                block("b4b", "paragraph", "second", false),
            ],
        )
}

const NESTED_MARKDOWN: &str =
    "# Intro\n\n- item\n\n    nested\n\n> quoted\n>\n> first\n>\n> second";

#[tokio::test]
async fn posts_carry_rendered_nested_content() {
    let h = harness(nested_page(), 10);

    let got: Vec<_> = h.source.posts(None, None, 0).try_collect().await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].item.content, NESTED_MARKDOWN);
    assert_eq!(got[0].item.summary.path, "post-0-2024-01-01");

    let mut visited: Vec<_> = h
        .notion
        .children_calls()
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    visited.sort();
    // The divider has no children and is never expanded.
    assert_eq!(visited, ["b2", "b4", "page-0"]);
}

#[tokio::test]
async fn child_listing_follows_cursors() {
    let mut notion = nested_page();
    notion.children_page_size = 1;
    let h = harness(notion, 10);

    let got: Vec<_> = h.source.posts(None, None, 0).try_collect().await.unwrap();
    assert_eq!(got[0].item.content, NESTED_MARKDOWN);

    let top: Vec<_> = h
        .notion
        .children_calls()
        .await
        .into_iter()
        .filter(|(id, _)| id == "page-0")
        .map(|(_, cursor)| cursor)
        .collect();
    assert_eq!(
        top,
        [None, Some("c1".to_string()), Some("c2".to_string()), Some("c3".to_string())]
    );
}

#[tokio::test]
async fn page_content_is_recomputed_only_after_an_edit() {
    let td = tempdir().unwrap();
    let cache = DiskCache::new(td.path().join("cache"), td.path()).unwrap();
    let notion = Arc::new(nested_page());
    let assets = AssetResolver::new(cache, Arc::new(CountingFetcher::default()));
    let content = ContentAssembler::new(notion.clone(), assets);

    let edited: DateTime<Utc> = "2024-02-01T10:00:00Z".parse().unwrap();
    assert_eq!(content.page_content("page-0", edited).await.unwrap(), NESTED_MARKDOWN);
    let calls = notion.children_calls().await.len();

    assert_eq!(content.page_content("page-0", edited).await.unwrap(), NESTED_MARKDOWN);
    assert_eq!(notion.children_calls().await.len(), calls);

    let stored: Value = serde_json::from_str(
        &std::fs::read_to_string(td.path().join("cache/jsonCache/notion/page/page-0")).unwrap(),
    )
    .unwrap();
    assert_eq!(stored["lastModified"], "2024-02-01T10:00:00.000Z");

    let later: DateTime<Utc> = "2024-02-02T09:00:00Z".parse().unwrap();
    content.page_content("page-0", later).await.unwrap();
    assert_eq!(notion.children_calls().await.len(), calls * 2);
}

#[tokio::test]
async fn failed_child_listing_leaves_no_cache_entry() {
    struct Broken;

    #[async_trait]
    impl NotionService for Broken {
        async fn query_database(&self, _db: &str, _body: &Value) -> Result<QueryResponse<Page>> {
            Err(anyhow!("unreachable"))
        }

        async fn list_block_children(
            &self,
            _block_id: &str,
            _cursor: Option<&str>,
        ) -> Result<QueryResponse<Block>> {
            Err(anyhow!("notion error 500 Internal Server Error"))
        }

        async fn retrieve_user(&self, _user_id: &str) -> Result<User> {
            Err(anyhow!("unreachable"))
        }
    }

    let td = tempdir().unwrap();
    let cache = DiskCache::new(td.path().join("cache"), td.path()).unwrap();
    let assets = AssetResolver::new(cache, Arc::new(CountingFetcher::default()));
    let content = ContentAssembler::new(Arc::new(Broken), assets);

    let edited: DateTime<Utc> = "2024-02-01T10:00:00Z".parse().unwrap();
    assert!(content.page_content("page-0", edited).await.is_err());
    assert!(!td.path().join("cache/jsonCache/notion/page/page-0").exists());
}

#[tokio::test]
async fn build_writes_routes_and_index() {
    let h = harness(nested_page(), 10);
    let posts: Vec<_> = h
        .source
        .posts(None, None, 0)
        .map_ok(|paged| paged.item)
        .try_collect()
        .await
        .unwrap();

    let out = h.cache_root.parent().unwrap().join("generated");
    site::write_site(&out, &posts).await.unwrap();

    let route = std::fs::read_to_string(out.join("posts/post-0-2024-01-01.md")).unwrap();
    assert!(route.contains("title: Post 0\n"));
    assert!(route.ends_with(&format!("{}\n", NESTED_MARKDOWN)));

    let index: Vec<site::PostExcerpt> =
        serde_json::from_str(&std::fs::read_to_string(out.join("index.json")).unwrap()).unwrap();
    assert_eq!(index[0].path, "/posts/post-0-2024-01-01");
    assert_eq!(index[0].date, "03/01/2024");
}

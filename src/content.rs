//! Assembles the Markdown body of a page from its block tree.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::asset::AssetResolver;
use crate::markdown::{child_indent, transform_block};
use crate::notion::model::Block;
use crate::notion::NotionService;

/// Persisted form of a rendered page body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContent {
    pub last_modified: String,
    pub content: String,
}

#[derive(Clone)]
pub struct ContentAssembler {
    notion: Arc<dyn NotionService>,
    assets: AssetResolver,
}

impl ContentAssembler {
    pub fn new(notion: Arc<dyn NotionService>, assets: AssetResolver) -> Self {
        Self { notion, assets }
    }

    /// Rendered body of `page_id`, recomputed only when `last_modified`
    /// differs from the timestamp stored alongside the cached copy.
    #[instrument(skip(self))]
    pub async fn page_content(&self, page_id: &str, last_modified: DateTime<Utc>) -> Result<String> {
        let stamp = iso_timestamp(last_modified);
        let stamp_ref = stamp.as_str();
        let key = format!("notion/page/{}", page_id);

        let cached = self
            .assets
            .cache()
            .json(
                &key,
                |stored: &CachedContent| stored.last_modified != stamp,
                move || async move {
                    info!(page_id, "rendering page content");
                    let content = self.render_page(page_id).await?;
                    Ok(CachedContent {
                        last_modified: stamp_ref.to_string(),
                        content,
                    })
                },
            )
            .await
            .with_context(|| format!("failed to assemble content of page {page_id}"))?;
        Ok(cached.content)
    }

    /// Render every child block of `page_id`, bypassing the cache.
    pub async fn render_page(&self, page_id: &str) -> Result<String> {
        let fragments = self.render_children(page_id).await?;
        Ok(join_fragments(&fragments, "\n\n"))
    }

    /// Rendered fragments of the direct children of `block_id`, in order.
    /// Pages through the listing; siblings on a page render concurrently.
    fn render_children<'a>(&'a self, block_id: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        async move {
            let mut fragments = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let page = self
                    .notion
                    .list_block_children(block_id, cursor.as_deref())
                    .await
                    .with_context(|| format!("failed to list children of {block_id}"))?;
                debug!(block_id, count = page.results.len(), has_more = page.has_more, "fetched block children");

                let rendered = try_join_all(page.results.iter().map(|b| self.render_block(b))).await?;
                fragments.extend(rendered);

                match page.next_cursor {
                    Some(next) if page.has_more => cursor = Some(next),
                    _ => break,
                }
            }
            Ok(fragments)
        }
        .boxed()
    }

    fn render_block<'a>(&'a self, block: &'a Block) -> BoxFuture<'a, Result<String>> {
        async move {
            let own = transform_block(block, &self.assets)
                .await
                .with_context(|| format!("failed to render block {}", block.id))?;
            let indent = match child_indent(&block.kind) {
                Some(indent) if block.has_children => indent,
                _ => return Ok(own),
            };

            let children = self.render_children(&block.id).await?;
            let separator = format!("\n{}\n", indent.trim_end());
            let nested = indent_lines(&join_fragments(&children, "\n\n"), indent);
            Ok(match (own.is_empty(), nested.is_empty()) {
                (_, true) => own,
                (true, false) => nested,
                (false, false) => format!("{}{}{}", own, separator, nested),
            })
        }
        .boxed()
    }
}

/// Notion's own timestamp format, e.g. `2024-01-06T10:00:00.000Z`.
pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn join_fragments(fragments: &[String], separator: &str) -> String {
    fragments
        .iter()
        .filter(|f| !f.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

fn indent_lines(text: &str, prefix: &str) -> String {
    if prefix.is_empty() || text.is_empty() {
        return text.to_string();
    }
    text.lines()
        .map(|line| {
            if line.is_empty() {
                prefix.trim_end().to_string()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

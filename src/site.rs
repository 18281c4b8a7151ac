//! Output consumed by the static site build: one Markdown route per post and
//! an excerpt list for the index page.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{info, instrument};

use crate::record::{Author, Post, PostSummary};

/// Number of posts listed on the index page.
pub const INDEX_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostExcerpt {
    pub title: String,
    /// `/posts/{slug}`
    pub path: String,
    pub excerpt: String,
    /// `MM/DD/YYYY`
    pub date: String,
    pub authors: Vec<Author>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
}

impl From<&PostSummary> for PostExcerpt {
    fn from(s: &PostSummary) -> Self {
        Self {
            title: s.title.clone(),
            path: format!("/posts/{}", s.path),
            excerpt: s.excerpt.clone(),
            date: s.published_at.format("%m/%d/%Y").to_string(),
            authors: s.author.clone(),
            cover: s.cover.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteParams {
    /// The post slug.
    pub id: String,
    pub title: String,
    pub authors: Vec<Author>,
    pub date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRoute {
    pub params: RouteParams,
    pub content: String,
}

impl From<&Post> for PostRoute {
    fn from(post: &Post) -> Self {
        let s = &post.summary;
        Self {
            params: RouteParams {
                id: s.path.clone(),
                title: s.title.clone(),
                authors: s.author.clone(),
                date: s.published_at,
                cover: s.cover.clone(),
                excerpt: s.excerpt.clone(),
            },
            content: post.content.clone(),
        }
    }
}

impl PostRoute {
    /// Markdown document with the params as YAML front matter.
    pub fn to_markdown(&self) -> Result<String> {
        let front = serde_yaml::to_string(&self.params).context("failed to serialize front matter")?;
        Ok(format!("---\n{}---\n\n{}\n", front, self.content))
    }
}

/// Excerpts of the first [`INDEX_LIMIT`] summaries.
pub fn excerpts<'a>(summaries: impl IntoIterator<Item = &'a PostSummary>) -> Vec<PostExcerpt> {
    summaries
        .into_iter()
        .take(INDEX_LIMIT)
        .map(PostExcerpt::from)
        .collect()
}

/// `{slug}.md`, provided the slug names a single file inside `posts/`.
fn route_file_name(page_id: &str, slug: &str) -> Result<String> {
    let mut components = Path::new(slug).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !slug.contains(['/', '\\']) => Ok(format!("{slug}.md")),
        _ => bail!("page {page_id} has slug {slug:?}, which is not a single file name; rename its title"),
    }
}

/// Write `posts/{slug}.md` for every post and `index.json` with the excerpt
/// list. Returns the paths written.
#[instrument(skip_all, fields(out_dir = %out_dir.display(), posts = posts.len()))]
pub async fn write_site(out_dir: &Path, posts: &[Post]) -> Result<Vec<PathBuf>> {
    let posts_dir = out_dir.join("posts");
    tokio::fs::create_dir_all(&posts_dir)
        .await
        .with_context(|| format!("failed to create {}", posts_dir.display()))?;

    let mut written = Vec::with_capacity(posts.len() + 1);
    for post in posts {
        let route = PostRoute::from(post);
        let dest = posts_dir.join(route_file_name(&post.summary.id, &route.params.id)?);
        tokio::fs::write(&dest, route.to_markdown()?)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;
        written.push(dest);
    }

    let index = excerpts(posts.iter().map(|p| &p.summary));
    let index_path = out_dir.join("index.json");
    let body = serde_json::to_string_pretty(&index).context("failed to serialize index")?;
    tokio::fs::write(&index_path, body)
        .await
        .with_context(|| format!("failed to write {}", index_path.display()))?;
    written.push(index_path);

    info!(files = written.len(), "site written");
    Ok(written)
}

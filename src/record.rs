//! Maps raw database rows into the blog's post records.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::future::try_join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::asset::{AssetResolver, Origin};
use crate::config::Properties;
use crate::markdown::plain_text;
use crate::notion::model::{Icon, Page, PropertyValue, User};
use crate::notion::NotionService;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("page {page_id} has no property named {name:?}")]
    MissingProperty { page_id: String, name: String },
    #[error("property {name:?} of page {page_id} is {found}, expected {expected}")]
    WrongPropertyType {
        page_id: String,
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid date {0:?}")]
    InvalidDate(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Locally shaped summary of one database row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    /// Slug, `{title-with-dashes}-{YYYY-MM-DD of creation}`.
    pub path: String,
    pub cover: Option<String>,
    pub author: Vec<Author>,
    /// Explicit publish date, or the row's creation time when unset.
    pub published_at: DateTime<Utc>,
    pub excerpt: String,
    pub last_modified: DateTime<Utc>,
}

/// A summary together with its rendered body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(flatten)]
    pub summary: PostSummary,
    pub content: String,
}

/// Process-lifetime lookup of workspace users by id.
#[derive(Debug, Default)]
pub struct AuthorCache {
    users: Mutex<HashMap<String, User>>,
}

impl AuthorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(users: impl IntoIterator<Item = User>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: Mutex::new(users),
        }
    }

    pub async fn get(&self, id: &str) -> Option<User> {
        self.users.lock().await.get(id).cloned()
    }

    /// Complete a people entry. Entries that already carry a name are used as
    /// is; nameless ones are looked up once per id.
    pub async fn resolve(&self, notion: &dyn NotionService, partial: &User) -> Result<User> {
        if partial.name.is_some() {
            self.users
                .lock()
                .await
                .entry(partial.id.clone())
                .or_insert_with(|| partial.clone());
            return Ok(partial.clone());
        }
        if let Some(user) = self.get(&partial.id).await {
            return Ok(user);
        }
        debug!(user_id = %partial.id, "looking up author");
        let user = notion
            .retrieve_user(&partial.id)
            .await
            .with_context(|| format!("failed to retrieve user {}", partial.id))?;
        self.users
            .lock()
            .await
            .insert(partial.id.clone(), user.clone());
        Ok(user)
    }
}

#[derive(Clone)]
pub struct RecordRenderer {
    notion: Arc<dyn NotionService>,
    assets: AssetResolver,
    authors: Arc<AuthorCache>,
    properties: Properties,
}

impl RecordRenderer {
    pub fn new(
        notion: Arc<dyn NotionService>,
        assets: AssetResolver,
        authors: Arc<AuthorCache>,
        properties: Properties,
    ) -> Self {
        Self {
            notion,
            assets,
            authors,
            properties,
        }
    }

    #[instrument(skip_all, fields(page_id = %page.id))]
    pub async fn render(&self, page: &Page) -> Result<PostSummary> {
        let props = &self.properties;

        let title_text = match required(page, &props.title)? {
            PropertyValue::Title { title } => plain_text(title),
            other => return Err(wrong_type(page, &props.title, "title", other).into()),
        };
        let path = slugify(&title_text, page.created_time);
        let title = match &page.icon {
            Some(Icon::Emoji { emoji }) => format!("{} {}", emoji, title_text),
            _ => title_text,
        };

        let people = match required(page, &props.author)? {
            PropertyValue::People { people } => people,
            other => return Err(wrong_type(page, &props.author, "people", other).into()),
        };

        let published_at = match page.properties.get(&props.published_at) {
            None | Some(PropertyValue::Date { date: None }) => page.created_time,
            Some(PropertyValue::Date { date: Some(range) }) => parse_notion_date(&range.start)?,
            Some(other) => return Err(wrong_type(page, &props.published_at, "date", other).into()),
        };

        let excerpt = match page.properties.get(&props.excerpt) {
            None => String::new(),
            Some(PropertyValue::RichText { rich_text }) => plain_text(rich_text),
            Some(other) => return Err(wrong_type(page, &props.excerpt, "rich_text", other).into()),
        };

        let cover = async {
            match &page.cover {
                Some(file) => self.assets.resolve(file).await.context("failed to cache cover"),
                None => Ok(None),
            }
        };
        let author = try_join_all(people.iter().map(|p| self.render_author(p)));
        let (cover, author) = futures::try_join!(cover, author)?;

        Ok(PostSummary {
            id: page.id.clone(),
            title,
            path,
            cover,
            author,
            published_at,
            excerpt,
            last_modified: page.last_edited_time,
        })
    }

    async fn render_author(&self, partial: &User) -> Result<Author> {
        let user = self.authors.resolve(self.notion.as_ref(), partial).await?;
        let avatar = match user.avatar_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => Some(
                self.assets
                    .resolve_url(url, Origin::External)
                    .await
                    .with_context(|| format!("failed to cache avatar of user {}", user.id))?,
            ),
            None => None,
        };
        Ok(Author {
            name: user.name,
            avatar,
        })
    }
}

/// `lowercase(title with whitespace runs → "-")-YYYY-MM-DD`.
pub fn slugify(title: &str, created: DateTime<Utc>) -> String {
    let dashed = WHITESPACE.replace_all(title, "-").to_lowercase();
    format!("{}-{}", dashed, created.format("%Y-%m-%d"))
}

/// Accepts both date-only (`2024-01-05`) and full RFC 3339 values.
pub fn parse_notion_date(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| RecordError::InvalidDate(raw.to_string()))
}

fn required<'a>(page: &'a Page, name: &str) -> Result<&'a PropertyValue, RecordError> {
    page.properties
        .get(name)
        .ok_or_else(|| RecordError::MissingProperty {
            page_id: page.id.clone(),
            name: name.to_string(),
        })
}

fn wrong_type(page: &Page, name: &str, expected: &'static str, found: &PropertyValue) -> RecordError {
    RecordError::WrongPropertyType {
        page_id: page.id.clone(),
        name: name.to_string(),
        expected,
        found: found.type_name(),
    }
}

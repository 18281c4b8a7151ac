//! Typed shapes of the Notion API responses the pipeline consumes.
//!
//! Only the fields the blog actually reads are modelled; everything else in
//! the payload is ignored by serde. Kinds we do not render deserialize into an
//! explicit catch-all variant instead of failing.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Deserialize, Debug)]
pub struct DatabaseProperty {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Deserialize, Debug)]
pub struct RetrieveDatabaseResp {
    pub id: String,
    pub title: Vec<Value>,
    pub properties: HashMap<String, DatabaseProperty>,
}

/// One page of a cursor-paginated listing.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct QueryResponse<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A database row.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Page {
    pub id: String,
    pub created_time: DateTime<Utc>,
    pub last_edited_time: DateTime<Utc>,
    #[serde(default)]
    pub cover: Option<FileRef>,
    #[serde(default)]
    pub icon: Option<Icon>,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title {
        title: Vec<RichText>,
    },
    RichText {
        rich_text: Vec<RichText>,
    },
    People {
        people: Vec<User>,
    },
    Date {
        date: Option<DateRange>,
    },
    MultiSelect {
        multi_select: Vec<SelectOption>,
    },
    #[serde(other)]
    Other,
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Title { .. } => "title",
            PropertyValue::RichText { .. } => "rich_text",
            PropertyValue::People { .. } => "people",
            PropertyValue::Date { .. } => "date",
            PropertyValue::MultiSelect { .. } => "multi_select",
            PropertyValue::Other => "other",
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DateRange {
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Icon {
    Emoji {
        emoji: String,
    },
    #[serde(other)]
    Other,
}

/// Reference to a remote file: either an arbitrary external URL or a
/// Notion-hosted object whose URL carries an expiring signature.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileRef {
    External {
        external: ExternalFile,
    },
    File {
        file: HostedFile,
    },
    #[serde(other)]
    Unsupported,
}

impl FileRef {
    pub fn external(url: impl Into<String>) -> Self {
        FileRef::External {
            external: ExternalFile { url: url.into() },
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ExternalFile {
    pub url: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HostedFile {
    pub url: String,
    #[serde(default)]
    pub expiry_time: Option<DateTime<Utc>>,
}

/// One inline span of rich text.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: String,
    #[serde(flatten)]
    pub kind: RichTextKind,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RichTextKind {
    Text {
        text: TextSpan,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub content: String,
    #[serde(default)]
    pub link: Option<Link>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Link {
    pub url: String,
}

/// One content block of a page.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    pub kind: BlockKind,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum BlockKind {
    #[serde(rename = "heading_1")]
    Heading1 { heading_1: TextBlock },
    #[serde(rename = "heading_2")]
    Heading2 { heading_2: TextBlock },
    #[serde(rename = "heading_3")]
    Heading3 { heading_3: TextBlock },
    #[serde(rename = "paragraph")]
    Paragraph { paragraph: TextBlock },
    #[serde(rename = "bulleted_list_item")]
    BulletedListItem { bulleted_list_item: TextBlock },
    #[serde(rename = "numbered_list_item")]
    NumberedListItem { numbered_list_item: TextBlock },
    #[serde(rename = "quote")]
    Quote { quote: TextBlock },
    #[serde(rename = "image")]
    Image { image: MediaBlock },
    #[serde(rename = "video")]
    Video { video: MediaBlock },
    #[serde(rename = "file")]
    File { file: MediaBlock },
    #[serde(rename = "pdf")]
    Pdf { pdf: MediaBlock },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TextBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MediaBlock {
    #[serde(default)]
    pub caption: Vec<RichText>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub source: FileRef,
}

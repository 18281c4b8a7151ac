//! Notion database → Markdown blog content pipeline.

pub mod asset;
pub mod cache;
pub mod config;
pub mod content;
pub mod markdown;
pub mod notion;
pub mod posts;
pub mod record;
pub mod site;

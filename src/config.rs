//! Configuration loader and validator for the Notion→blog content pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_API_KEY: &str = "NOTION_API_KEY";
pub const ENV_DATABASE_ID: &str = "NOTION_DATABASE_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error(".env error: {0}")]
    EnvFile(#[from] dotenvy::Error),
    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub notion: Notion,
}

/// Local filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    /// Root of the on-disk cache (`fileCache/` and `jsonCache/` live below it).
    pub cache_dir: String,
    /// Directory that site-relative asset paths are computed against.
    pub site_root: String,
    /// Where `build` writes the generated posts and index.
    pub out_dir: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            cache_dir: ".vitepress/cache".into(),
            site_root: ".".into(),
            out_dir: ".vitepress/generated".into(),
        }
    }
}

/// Notion API settings and the blog database mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Notion {
    pub token: String,
    pub version: String,
    pub database_id: String,
    pub publish_tag: String,
    pub page_size: u32,
    pub properties: Properties,
}

impl Default for Notion {
    fn default() -> Self {
        Self {
            token: String::new(),
            version: "2022-06-28".into(),
            database_id: String::new(),
            publish_tag: "Website: Published".into(),
            page_size: 10,
            properties: Properties::default(),
        }
    }
}

/// Column names of the blog database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Properties {
    pub title: String,
    pub author: String,
    pub published_at: String,
    pub excerpt: String,
    pub publishing_tag: String,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            title: "Name".into(),
            author: "Author".into(),
            published_at: "Published At".into(),
            excerpt: "Excerpt".into(),
            publishing_tag: "Publishing Tag".into(),
        }
    }
}

impl Config {
    /// Ensure the cache and output directories exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.cache_dir)?;
        fs::create_dir_all(&self.app.out_dir)
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.cache_dir)
    }

    pub fn site_root(&self) -> PathBuf {
        PathBuf::from(&self.app.site_root)
    }

    pub fn out_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.out_dir)
    }

    /// Overlay credentials from the given lookup (normally the process env).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.notion.token = token;
        }
        if let Some(db) = lookup(ENV_DATABASE_ID).filter(|v| !v.trim().is_empty()) {
            self.notion.database_id = db;
        }
    }
}

/// Load configuration and validate it.
/// - `.env` in the working directory is loaded into the process env first.
/// - If `path` is None, uses `config.yaml` when present, defaults otherwise.
/// - `NOTION_API_KEY` / `NOTION_DATABASE_ID` override the file.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    env_file(dotenvy::dotenv())?;

    let mut cfg = match path {
        Some(p) => from_file(p)?,
        None => {
            let default = Path::new("config.yaml");
            if default.exists() {
                from_file(default)?
            } else {
                Config::default()
            }
        }
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn env_file<T>(loaded: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
    match loaded {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::EnvFile(err)),
    }
}

fn from_file(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.cache_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.cache_dir must be non-empty"));
    }
    if cfg.app.out_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.out_dir must be non-empty"));
    }

    if cfg.notion.token.trim().is_empty() {
        return Err(ConfigError::MissingEnv(ENV_API_KEY));
    }
    if cfg.notion.database_id.trim().is_empty() {
        return Err(ConfigError::MissingEnv(ENV_DATABASE_ID));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if cfg.notion.publish_tag.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.publish_tag must be non-empty"));
    }
    if cfg.notion.page_size == 0 || cfg.notion.page_size > 100 {
        return Err(ConfigError::Invalid("notion.page_size must be within 1..=100"));
    }

    let p = &cfg.notion.properties;
    for (value, msg) in [
        (&p.title, "notion.properties.title must be non-empty"),
        (&p.author, "notion.properties.author must be non-empty"),
        (&p.published_at, "notion.properties.published_at must be non-empty"),
        (&p.excerpt, "notion.properties.excerpt must be non-empty"),
        (&p.publishing_tag, "notion.properties.publishing_tag must be non-empty"),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(msg));
        }
    }

    Ok(())
}

/// Example configuration; credentials normally come from the environment.
pub fn example() -> &'static str {
    r#"app:
  cache_dir: ".vitepress/cache"
  site_root: "."
  out_dir: ".vitepress/generated"

notion:
  token: "YOUR_NOTION_INTEGRATION_TOKEN"
  version: "2022-06-28"
  database_id: "NOTION_DATABASE_ID"
  publish_tag: "Website: Published"
  page_size: 10
  properties:
    title: "Name"
    author: "Author"
    published_at: "Published At"
    excerpt: "Excerpt"
    publishing_tag: "Publishing Tag"
"#
}

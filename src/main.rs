use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use std::path::PathBuf;
use tracing::info;

use notion_blog::config;
use notion_blog::posts::PostSource;
use notion_blog::site::{self, INDEX_LIMIT};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render every published post and write the site output
    Build,
    /// Print the index excerpt list as JSON
    Index {
        #[arg(long, default_value_t = INDEX_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    cfg.ensure_dirs()?;
    let source = PostSource::from_config(&cfg)?;

    match args.command {
        Command::Build => {
            let posts: Vec<_> = source
                .posts(None, None, 0)
                .map_ok(|paged| paged.item)
                .try_collect()
                .await
                .context("failed to generate posts")?;
            let written = site::write_site(&cfg.out_dir(), &posts).await?;
            info!(posts = posts.len(), files = written.len(), "build finished");
        }
        Command::Index { limit } => {
            let summaries: Vec<_> = source
                .summaries(Some(limit), None, 0)
                .map_ok(|paged| paged.item)
                .try_collect()
                .await
                .context("failed to list posts")?;
            let list: Vec<_> = summaries.iter().map(site::PostExcerpt::from).collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
    }

    Ok(())
}

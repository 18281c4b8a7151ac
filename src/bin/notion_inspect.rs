use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use notion_blog::config;
use notion_blog::notion::model::RetrieveDatabaseResp;
use notion_blog::notion::NotionClient;

#[derive(Parser, Debug)]
#[command(about = "Print the blog database schema and check the columns the pipeline reads")]
struct Args {
    /// Path to YAML config (defaults to ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,
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
    let client = NotionClient::from_config(&cfg)?;

    let db = client.retrieve_database(&cfg.notion.database_id).await?;
    println!("Database ID: {}", db.id);
    println!("Properties:");
    let mut names: Vec<_> = db.properties.keys().collect();
    names.sort();
    for name in names {
        let prop = &db.properties[name];
        println!("  {} -> {{ id: {}, type: {} }}", name, prop.id, prop.typ);
    }

    let p = &cfg.notion.properties;
    let problems = check_columns(
        &db,
        &[
            (p.title.as_str(), "title", true),
            (p.author.as_str(), "people", true),
            (p.publishing_tag.as_str(), "multi_select", true),
            (p.published_at.as_str(), "date", false),
            (p.excerpt.as_str(), "rich_text", false),
        ],
    );
    if problems.is_empty() {
        println!("All columns present.");
        return Ok(());
    }
    for problem in &problems {
        println!("  ! {}", problem);
    }
    bail!("{} column problem(s) found", problems.len())
}

/// `(name, expected type, required)` triples checked against the schema.
fn check_columns(db: &RetrieveDatabaseResp, columns: &[(&str, &str, bool)]) -> Vec<String> {
    let mut problems = Vec::new();
    for &(name, expected, required) in columns {
        match db.properties.get(name) {
            None if required => problems.push(format!("missing required column {:?} ({})", name, expected)),
            None => {}
            Some(prop) if prop.typ != expected => problems.push(format!(
                "column {:?} is {}, expected {}",
                name, prop.typ, expected
            )),
            Some(_) => {}
        }
    }
    problems
}

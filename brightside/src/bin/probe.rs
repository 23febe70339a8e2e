//! Manual smoke test: run both handlers against the configured upstream.
//!
//!   OPENAI_API_KEY=sk-... cargo run --bin probe -- --articles feed.json --question "Any good news?"

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use serde_json::{json, Value};
use std::path::PathBuf;

use brightside::handlers::{chat, scoring, ApiReply};
use brightside::server::context_from_config;

#[derive(Parser, Debug)]
#[command(name = "probe", about = "Send an article list through the scoring and chat handlers")]
struct Args {
    /// JSON file holding an array of articles
    #[arg(long, value_name = "FILE")]
    articles: PathBuf,

    /// Also ask this question through the chat handler
    #[arg(long)]
    question: Option<String>,

    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn print_reply(label: &str, reply: &ApiReply) {
    println!("\n{}", "=".repeat(60));
    println!("[{}] HTTP {}", label, reply.status.code);
    match &reply.body {
        Some(body) => println!(
            "{}",
            serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())
        ),
        None => println!("(empty body)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    dotenv::dotenv().ok();

    let config = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    let ctx = context_from_config(&config.llm)?;

    let raw = tokio::fs::read_to_string(&args.articles)
        .await
        .with_context(|| format!("Failed to read articles file: {}", args.articles.display()))?;
    let articles: Value = serde_json::from_str(&raw).context("Articles file is not valid JSON")?;

    println!("Endpoint model: {}", ctx.model);

    let reply = scoring::handle(&ctx, Some(json!({ "articles": articles.clone() }))).await;
    print_reply("positivity-score", &reply);

    if let Some(question) = args.question {
        let body = json!({ "question": question, "articles": articles });
        let reply = chat::handle(&ctx, Some(body)).await;
        print_reply("news-chat", &reply);
    }

    Ok(())
}

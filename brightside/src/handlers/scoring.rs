use anyhow::{Context, Result};
use rocket::http::Status;
use serde::Serialize;
use serde_json::{json, Number, Value};
use tracing::{error, info, warn};

use super::{field_value, is_truthy, js_string, ApiContext, ApiReply};
use crate::llm::CompletionRequest;

/// Articles beyond this are dropped, for cost and latency
pub const MAX_ARTICLES: usize = 40;

const SYSTEM_PROMPT: &str = "You are a careful, structured assistant that returns ONLY valid JSON.";

/// One article as submitted for scoring
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringArticle {
    pub index: usize,
    pub title: Value,
    pub description: Value,
    pub content: Value,
    pub category: Value,
    pub source: Value,
    pub source_key: Value,
}

impl ScoringArticle {
    fn from_value(index: usize, article: &Value) -> Result<Self> {
        if article.is_null() {
            anyhow::bail!("article {} is null", index);
        }
        Ok(Self {
            index,
            title: field_value(article, "title"),
            description: field_value(article, "description"),
            content: field_value(article, "content"),
            category: field_value(article, "category"),
            source: field_value(article, "source"),
            source_key: field_value(article, "sourceKey"),
        })
    }
}

pub fn scoring_articles(articles: &[Value]) -> Result<Vec<ScoringArticle>> {
    articles
        .iter()
        .take(MAX_ARTICLES)
        .enumerate()
        .map(|(i, a)| ScoringArticle::from_value(i, a))
        .collect()
}

/// Scoring prompt with the -5..5 rubric and the strict `{ "scores": [...] }` output contract.
pub fn build_prompt(articles: &[ScoringArticle]) -> Result<String> {
    let articles_json =
        serde_json::to_string_pretty(articles).context("Failed to serialize scoring articles")?;

    Ok(format!(
        r#"You are an assistant that scores news stories for *positive impact*.

For each article, return a number between -5 and 5:
- 5  = very positive, uplifting, constructive impact
- 2  = somewhat positive / progress / solutions
- 0  = neutral / purely informational
- -2 = somewhat negative, but not panic-level
- -5 = strongly negative, fear-inducing, about harm, conflict, disaster

Guidelines:
- Penalize stories about death, violence, war, scams, corruption, layoffs, disasters.
- Reward stories about innovation, solutions, people being helped, sustainability, collaboration.
- Politics is allowed, but only score it positive if it clearly improves people's lives in a tangible way.

Return ONLY valid JSON of the form:
{{ "scores": [s0, s1, s2, ...] }}

Where scores[i] is the score for articles[i].

Here are the articles (array of objects):
{}"#,
        articles_json
    ))
}

/// One score per submitted article: `raw[i]` when it is a number, otherwise 0.
///
/// The model's array is never trusted for length. Extra entries are ignored and missing
/// ones become 0. Position `i` is assumed to belong to article `i`.
pub fn align_scores(raw: &[Value], expected: usize) -> Vec<Number> {
    (0..expected)
        .map(|i| match raw.get(i) {
            Some(Value::Number(n)) => n.clone(),
            _ => Number::from(0),
        })
        .collect()
}

/// `POST /positivity-score`: score each article for positive impact.
pub async fn handle(ctx: &ApiContext, body: Option<Value>) -> ApiReply {
    let api_key = match ctx.require_api_key() {
        Ok(key) => key,
        Err(reply) => return reply,
    };

    let articles = body
        .as_ref()
        .and_then(|b| b.get("articles"))
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty());

    let Some(articles) = articles else {
        return ApiReply::error(
            Status::BadRequest,
            "Body must include non-empty 'articles' array",
        );
    };

    match score(ctx, api_key, articles).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(error = ?e, "Error in /positivity-score");
            ApiReply::internal()
        }
    }
}

async fn score(ctx: &ApiContext, api_key: &str, articles: &[Value]) -> Result<ApiReply> {
    let limited = scoring_articles(articles)?;
    info!(
        received = articles.len(),
        forwarded = limited.len(),
        "positivity-score request"
    );

    let prompt = build_prompt(&limited)?;
    let request = CompletionRequest::new(&ctx.model, SYSTEM_PROMPT, prompt).json_object();

    let upstream = ctx.provider.send_completion(api_key, &request).await?;
    if !upstream.is_success() {
        error!(status = upstream.status, body = %upstream.body, "OpenAI error");
        return Ok(ApiReply::upstream_failure(upstream.status));
    }

    let completion = upstream.completion()?;
    completion.log_usage();

    let raw_content = match completion.first_content() {
        Some(content) if is_truthy(content) => js_string(content),
        _ => "{}".to_string(),
    };

    let parsed: Value = match serde_json::from_str(&raw_content) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, content = %raw_content, "Failed to parse AI JSON");
            return Ok(ApiReply::error(
                Status::InternalServerError,
                "AI response parsing failed",
            ));
        }
    };

    let Some(raw_scores) = parsed.get("scores").and_then(Value::as_array) else {
        return Ok(ApiReply::error(
            Status::InternalServerError,
            "AI did not return scores[]",
        ));
    };

    if raw_scores.len() != limited.len() {
        warn!(
            expected = limited.len(),
            returned = raw_scores.len(),
            "model returned a score count that does not match the article count"
        );
    }

    let scores = align_scores(raw_scores, limited.len());
    Ok(ApiReply::ok(json!({ "scores": scores })))
}

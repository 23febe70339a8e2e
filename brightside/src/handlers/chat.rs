use anyhow::{Context, Result};
use rocket::http::Status;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use super::{field_value, is_truthy, js_string, ApiContext, ApiReply};
use crate::llm::CompletionRequest;

/// Articles beyond this are dropped before prompting, to bound prompt size
pub const MAX_ARTICLES: usize = 15;

const SYSTEM_PROMPT: &str = "You are a calm, structured assistant for summarising a news feed. \
Keep answers short and grounded in the provided articles.";

/// One article as the model sees it. Fields keep the JSON type the caller sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextArticle {
    pub index: usize,
    pub title: Value,
    pub description: Value,
    pub category: Value,
    pub source: Value,
    pub url: Value,
}

impl ContextArticle {
    fn from_value(index: usize, article: &Value) -> Result<Self> {
        if article.is_null() {
            anyhow::bail!("article {} is null", index);
        }
        Ok(Self {
            index,
            title: field_value(article, "title"),
            description: field_value(article, "description"),
            category: field_value(article, "category"),
            source: field_value(article, "source"),
            url: field_value(article, "url"),
        })
    }
}

/// Keep the first [`MAX_ARTICLES`] entries, normalized and indexed.
///
/// Fails on a `null` entry within that window.
pub fn context_articles(articles: &[Value]) -> Result<Vec<ContextArticle>> {
    articles
        .iter()
        .take(MAX_ARTICLES)
        .enumerate()
        .map(|(i, a)| ContextArticle::from_value(i, a))
        .collect()
}

/// Grounding prompt: the question verbatim plus the article list as pretty JSON.
pub fn build_prompt(question: &str, articles: &[ContextArticle]) -> Result<String> {
    let articles_json =
        serde_json::to_string_pretty(articles).context("Failed to serialize chat articles")?;

    Ok(format!(
        r#"You are a calm, concise news assistant.

You receive:
- A list of recent news articles (title, brief description, category, source, URL)
- A question from the user

Your job:
1. Answer ONLY using information that could reasonably come from these articles.
2. If the user asks something outside these articles, say briefly that you only know about "today's feed" shown on the page.
3. Be clear and structured. Prefer short bullet points (3–6 bullets) or a short paragraph.
4. If relevant, mention source names (like "Indian Express", "TechCrunch") in a natural way.
5. If the question is broad (e.g., "What are today's highlights?"), summarise key themes in 3–5 bullets.
6. If articles show both positive and negative aspects, keep a balanced and non-alarming tone.

User question:
"{}"

Articles context (array of objects):
{}"#,
        question, articles_json
    ))
}

/// `POST /news-chat`: answer a question grounded in the supplied articles.
pub async fn handle(ctx: &ApiContext, body: Option<Value>) -> ApiReply {
    let api_key = match ctx.require_api_key() {
        Ok(key) => key,
        Err(reply) => return reply,
    };

    let body = body.unwrap_or_else(|| json!({}));
    let question = body.get("question").filter(|q| is_truthy(q));
    let articles = body.get("articles").and_then(Value::as_array);

    let (Some(question), Some(articles)) = (question, articles) else {
        return ApiReply::error(
            Status::BadRequest,
            "Body must include 'question' (string) and 'articles' (array)",
        );
    };

    match answer(ctx, api_key, &js_string(question), articles).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(error = ?e, "Error in /news-chat");
            ApiReply::internal()
        }
    }
}

async fn answer(
    ctx: &ApiContext,
    api_key: &str,
    question: &str,
    articles: &[Value],
) -> Result<ApiReply> {
    let limited = context_articles(articles)?;
    info!(
        received = articles.len(),
        forwarded = limited.len(),
        "news-chat request"
    );

    let prompt = build_prompt(question, &limited)?;
    let request = CompletionRequest::new(&ctx.model, SYSTEM_PROMPT, prompt);

    let upstream = ctx.provider.send_completion(api_key, &request).await?;
    if !upstream.is_success() {
        error!(status = upstream.status, body = %upstream.body, "OpenAI chat error");
        return Ok(ApiReply::upstream_failure(upstream.status));
    }

    let completion = upstream.completion()?;
    completion.log_usage();

    let answer = match completion.first_content() {
        None => "",
        Some(Value::String(text)) => text.trim(),
        Some(other) => anyhow::bail!("model content is not text: {}", other),
    };
    Ok(ApiReply::ok(json!({ "answer": answer })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, context_without_key, FakeProvider};

    fn articles(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({ "title": format!("Story {}", i), "source": "Wire" }))
            .collect()
    }

    #[tokio::test]
    async fn answers_with_trimmed_content() {
        let provider = FakeProvider::with_content("  Two stories stand out.\n");
        let ctx = context(provider.clone());

        let reply = handle(
            &ctx,
            Some(json!({ "question": "What happened?", "articles": articles(2) })),
        )
        .await;

        assert_eq!(reply, ApiReply::ok(json!({ "answer": "Two stories stand out." })));

        let seen = provider.requests();
        assert_eq!(seen.len(), 1);
        let (key, request) = &seen[0];
        assert_eq!(key, "test-key");
        assert_eq!(request.model, "gpt-4.1-mini");
        assert!(request.response_format.is_none());
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.user_prompt().unwrap().contains("\"What happened?\""));
    }

    #[tokio::test]
    async fn missing_question_is_bad_request() {
        let provider = FakeProvider::with_content("unused");
        let ctx = context(provider.clone());

        for body in [
            Some(json!({ "articles": [] })),
            Some(json!({ "question": "", "articles": [] })),
            Some(json!({ "question": "why?", "articles": "nope" })),
            Some(json!({ "question": "why?" })),
            None,
        ] {
            let reply = handle(&ctx, body).await;
            assert_eq!(reply.status, Status::BadRequest);
        }
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_article_list_is_accepted() {
        let provider = FakeProvider::with_content("I only know about today's feed.");
        let ctx = context(provider.clone());

        let reply = handle(&ctx, Some(json!({ "question": "Hi", "articles": [] }))).await;
        assert_eq!(reply.status, Status::Ok);
        assert!(provider.requests()[0].1.user_prompt().unwrap().ends_with("[]"));
    }

    #[tokio::test]
    async fn forwards_only_first_fifteen_articles() {
        let provider = FakeProvider::with_content("ok");
        let ctx = context(provider.clone());

        let reply = handle(
            &ctx,
            Some(json!({ "question": "Highlights?", "articles": articles(20) })),
        )
        .await;
        assert_eq!(reply.status, Status::Ok);

        let prompt = provider.requests()[0].1.user_prompt().unwrap().to_string();
        let json_start = prompt.find('[').unwrap();
        let forwarded: Vec<Value> = serde_json::from_str(&prompt[json_start..]).unwrap();
        assert_eq!(forwarded.len(), MAX_ARTICLES);
        assert_eq!(forwarded[14]["title"], "Story 14");
        assert_eq!(forwarded[14]["index"], 14);
        assert!(!prompt.contains("Story 15"));
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let provider = FakeProvider::with_content("unused");
        let ctx = context_without_key(provider.clone());

        let reply = handle(&ctx, Some(json!({ "question": "q", "articles": [] }))).await;
        assert_eq!(reply.status, Status::InternalServerError);
        assert_eq!(reply.body, Some(json!({ "error": "OPENAI_API_KEY is not set" })));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn upstream_error_status_is_reported() {
        let provider = FakeProvider::responding(429, r#"{"error":{"message":"Rate limit"}}"#);
        let ctx = context(provider);

        let reply = handle(&ctx, Some(json!({ "question": "q", "articles": [] }))).await;
        assert_eq!(reply, ApiReply::upstream_failure(429));
    }

    #[tokio::test]
    async fn transport_and_payload_failures_are_internal_errors() {
        let ctx = context(FakeProvider::unreachable());
        let reply = handle(&ctx, Some(json!({ "question": "q", "articles": [] }))).await;
        assert_eq!(reply, ApiReply::internal());

        let ctx = context(FakeProvider::responding(200, "not json"));
        let reply = handle(&ctx, Some(json!({ "question": "q", "articles": [] }))).await;
        assert_eq!(reply, ApiReply::internal());
    }

    #[tokio::test]
    async fn absent_content_yields_empty_answer() {
        let ctx = context(FakeProvider::responding(200, r#"{"choices": []}"#));
        let reply = handle(&ctx, Some(json!({ "question": "q", "articles": [] }))).await;
        assert_eq!(reply, ApiReply::ok(json!({ "answer": "" })));
    }

    #[tokio::test]
    async fn null_choice_yields_empty_answer() {
        let ctx = context(FakeProvider::responding(200, r#"{"choices": [null]}"#));
        let reply = handle(&ctx, Some(json!({ "question": "q", "articles": [] }))).await;
        assert_eq!(reply, ApiReply::ok(json!({ "answer": "" })));
    }

    #[tokio::test]
    async fn non_text_content_is_an_internal_error() {
        let body = r#"{"choices": [{"message": {"content": {"answer": "hi"}}}]}"#;
        let ctx = context(FakeProvider::responding(200, body));
        let reply = handle(&ctx, Some(json!({ "question": "q", "articles": [] }))).await;
        assert_eq!(reply, ApiReply::internal());
    }

    #[tokio::test]
    async fn non_string_question_is_rendered_as_joined_text() {
        let provider = FakeProvider::with_content("ok");
        let ctx = context(provider.clone());

        let reply = handle(&ctx, Some(json!({ "question": ["a", "b"], "articles": [] }))).await;
        assert_eq!(reply.status, Status::Ok);
        let prompt = provider.requests()[0].1.user_prompt().unwrap().to_string();
        assert!(prompt.contains("User question:\n\"a,b\""));
    }

    #[tokio::test]
    async fn null_article_is_an_internal_error() {
        let provider = FakeProvider::with_content("unused");
        let ctx = context(provider.clone());

        let reply = handle(
            &ctx,
            Some(json!({ "question": "q", "articles": [{ "title": "A" }, null] })),
        )
        .await;
        assert_eq!(reply, ApiReply::internal());
        assert!(provider.requests().is_empty());
    }

    #[test]
    fn normalizes_missing_fields_to_empty() {
        let normalized =
            context_articles(&[json!({ "title": "A", "url": "https://x" }), json!("loose")])
                .unwrap();
        assert_eq!(
            normalized[0],
            ContextArticle {
                index: 0,
                title: json!("A"),
                description: json!(""),
                category: json!(""),
                source: json!(""),
                url: json!("https://x"),
            }
        );
        assert_eq!(normalized[1].index, 1);
        assert_eq!(normalized[1].title, json!(""));
    }

    #[test]
    fn truthy_non_string_fields_keep_their_json_type() {
        let normalized = context_articles(&[json!({ "title": 42, "category": ["x"] })]).unwrap();
        let value = serde_json::to_value(&normalized[0]).unwrap();
        assert_eq!(value["title"], json!(42));
        assert_eq!(value["category"], json!(["x"]));
        assert_eq!(value["source"], json!(""));

        let prompt = build_prompt("q", &normalized).unwrap();
        assert!(prompt.contains("\"title\": 42"));
    }

    #[test]
    fn null_entry_beyond_the_window_is_ignored() {
        let mut list = articles(MAX_ARTICLES);
        list.push(Value::Null);
        assert_eq!(context_articles(&list).unwrap().len(), MAX_ARTICLES);
        assert!(context_articles(&[Value::Null]).is_err());
    }
}

use std::sync::Arc;

use anyhow::{anyhow, Result};
use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::figment::Figment;
use rocket::http::{Header, Status};
use rocket::request::{FromParam, Request};
use rocket::serde::json::{self, Json};
use rocket::{delete, get, options, patch, post, put, routes, Build, Response, Rocket, State};
use serde_json::Value;

use common::{Config, LlmConfig, ServerConfig};

use crate::handlers::{chat, scoring, ApiContext, ApiReply};
use crate::llm::remote::RemoteLlmProvider;

/// Response fairing that stamps the permissive CORS headers on every response,
/// including Rocket's own 404s.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        res.set_header(Header::new("Access-Control-Allow-Methods", "POST, OPTIONS"));
        res.set_header(Header::new("Access-Control-Allow-Headers", "Content-Type"));
    }
}

/// The two public endpoints. Any other path segment forwards to a 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    NewsChat,
    PositivityScore,
}

impl<'a> FromParam<'a> for Endpoint {
    type Error = &'a str;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        match param {
            "news-chat" => Ok(Endpoint::NewsChat),
            "positivity-score" => Ok(Endpoint::PositivityScore),
            other => Err(other),
        }
    }
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

type JsonBody<'r> = Result<Json<Value>, json::Error<'r>>;

/// Unwrap the JSON data guard.
///
/// A body that does not parse is handed on as absent, so the handler answers with its 400.
/// A body over the `json` limit is cut short by Rocket and answered here with 413.
fn json_body(body: JsonBody<'_>) -> Result<Option<Value>, ApiReply> {
    match body {
        Ok(Json(value)) => Ok(Some(value)),
        Err(json::Error::Parse(_, e)) => {
            tracing::debug!(error = %e, "request body is not valid JSON");
            Ok(None)
        }
        Err(json::Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            tracing::warn!(error = %e, "request body exceeds the json limit");
            Err(ApiReply::error(
                Status::PayloadTooLarge,
                "Request body too large",
            ))
        }
        Err(json::Error::Io(e)) => {
            tracing::error!(error = %e, "failed to read request body");
            Err(ApiReply::internal())
        }
    }
}

#[post("/news-chat", data = "<body>")]
async fn news_chat(ctx: &State<ApiContext>, body: JsonBody<'_>) -> ApiReply {
    match json_body(body) {
        Ok(body) => chat::handle(ctx.inner(), body).await,
        Err(reply) => reply,
    }
}

#[post("/positivity-score", data = "<body>")]
async fn positivity_score(ctx: &State<ApiContext>, body: JsonBody<'_>) -> ApiReply {
    match json_body(body) {
        Ok(body) => scoring::handle(ctx.inner(), body).await,
        Err(reply) => reply,
    }
}

#[options("/<endpoint>")]
fn preflight(endpoint: Endpoint) -> ApiReply {
    tracing::debug!(?endpoint, "preflight");
    ApiReply::preflight()
}

fn not_allowed(endpoint: Endpoint, method: &str) -> ApiReply {
    tracing::debug!(?endpoint, method, "method not allowed");
    ApiReply::method_not_allowed()
}

#[get("/<endpoint>")]
fn get_not_allowed(endpoint: Endpoint) -> ApiReply {
    not_allowed(endpoint, "GET")
}

#[put("/<endpoint>")]
fn put_not_allowed(endpoint: Endpoint) -> ApiReply {
    not_allowed(endpoint, "PUT")
}

#[delete("/<endpoint>")]
fn delete_not_allowed(endpoint: Endpoint) -> ApiReply {
    not_allowed(endpoint, "DELETE")
}

#[patch("/<endpoint>")]
fn patch_not_allowed(endpoint: Endpoint) -> ApiReply {
    not_allowed(endpoint, "PATCH")
}

/// Build the handler context from the `[llm]` section.
///
/// A missing API key is not fatal: it is logged here and reported on each request.
pub fn context_from_config(llm: &LlmConfig) -> Result<ApiContext> {
    let endpoint = llm.endpoint()?;
    let api_key = llm.read_api_key();
    if api_key.is_none() {
        tracing::warn!(
            "LLM API key env var '{}' not set; POST requests will fail",
            llm.api_key_env()
        );
    }

    let provider = RemoteLlmProvider::new(endpoint.as_str()).with_timeout(llm.timeout_seconds);
    tracing::info!(
        "LLM provider initialized: remote ({}) at {}",
        llm.model(),
        provider.base_url()
    );

    Ok(ApiContext {
        api_key,
        api_key_env: llm.api_key_env().to_string(),
        model: llm.model().to_string(),
        provider: Arc::new(provider),
    })
}

/// Rocket's default figment with `[server]` bind, port and body limit merged in.
pub fn server_figment(server: &ServerConfig) -> Figment {
    let limits = Limits::default().limit("json", server.body_limit_mib().mebibytes());
    let mut fig = rocket::Config::figment().merge(("limits", limits));
    if let Some(bind) = &server.bind {
        fig = fig.merge(("address", bind.clone()));
    }
    if let Some(port) = server.port {
        fig = fig.merge(("port", port));
    }
    fig
}

/// Assemble the Rocket instance without launching it (tests drive it with a local client).
pub fn build_rocket(figment: Figment, ctx: ApiContext) -> Rocket<Build> {
    rocket::custom(figment).manage(ctx).attach(Cors).mount(
        "/",
        routes![
            health,
            news_chat,
            positivity_score,
            preflight,
            get_not_allowed,
            put_not_allowed,
            delete_not_allowed,
            patch_not_allowed,
        ],
    )
}

/// Build and launch the Rocket server.
///
/// This function blocks until the Rocket server shuts down (it awaits `rocket.launch().await`)
/// and returns an error if Rocket fails to start.
pub async fn launch_rocket(config: &Config) -> Result<()> {
    let ctx = context_from_config(&config.llm)?;
    let rocket = build_rocket(server_figment(&config.server), ctx);

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_param_accepts_only_known_paths() {
        assert_eq!(Endpoint::from_param("news-chat"), Ok(Endpoint::NewsChat));
        assert_eq!(
            Endpoint::from_param("positivity-score"),
            Ok(Endpoint::PositivityScore)
        );
        assert_eq!(Endpoint::from_param("admin"), Err("admin"));
    }

    #[test]
    fn figment_merges_server_section() {
        let fig = server_figment(&ServerConfig {
            bind: Some("127.0.0.1".to_string()),
            port: Some(9123),
            body_limit_mib: None,
        });
        let cfg: rocket::Config = fig.extract().expect("extract rocket config");
        assert_eq!(cfg.port, 9123);
        assert_eq!(cfg.address.to_string(), "127.0.0.1");
        assert_eq!(cfg.limits.get("json"), Some(5.mebibytes()));
    }

    #[test]
    fn figment_applies_configured_body_limit() {
        let fig = server_figment(&ServerConfig {
            body_limit_mib: Some(12),
            ..Default::default()
        });
        let cfg: rocket::Config = fig.extract().expect("extract rocket config");
        assert_eq!(cfg.limits.get("json"), Some(12.mebibytes()));
        assert_eq!(cfg.limits.get("form"), Limits::default().get("form"));
    }

    #[test]
    fn context_from_config_rejects_bad_url() {
        let llm = LlmConfig {
            api_url: Some("::nope::".to_string()),
            ..Default::default()
        };
        assert!(context_from_config(&llm).is_err());
    }

    #[test]
    fn context_from_config_without_key_still_builds() {
        let llm = LlmConfig {
            api_key_env: Some("BRIGHTSIDE_TEST_KEY_UNSET".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            ..Default::default()
        };
        std::env::remove_var("BRIGHTSIDE_TEST_KEY_UNSET");

        let ctx = context_from_config(&llm).expect("context");
        assert!(ctx.api_key.is_none());
        assert_eq!(ctx.api_key_env, "BRIGHTSIDE_TEST_KEY_UNSET");
        assert_eq!(ctx.model, "gpt-4o-mini");
    }
}

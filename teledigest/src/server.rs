use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use common::ServerConfig;
use rocket::futures::SinkExt;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::stream::{Event, EventStream};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, FromForm, Rocket, State};
use rocket_ws::{Channel, Message, WebSocket};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{error, info};

use crate::image_proxy::{
    parse_target, Fallback, ImageOutcome, ImageProxy, ImageRequest, Placeholder, ProxyRejection,
};
use crate::llm::remote::is_timeout;
use crate::llm::{LlmProvider, LlmRequest};
use crate::pipeline::{spawn_run, DigestRunner};
use crate::progress::ProgressEvent;

/// Deadline of one `/api/generate` call.
const GENERATE_TIMEOUT_SECS: u64 = 25;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    /// `None` when no LLM is configured; runs then fail immediately
    pub runner: Option<Arc<DigestRunner>>,
    pub llm_provider: Option<Arc<dyn LlmProvider>>,
    /// Models accepted by `/api/generate`
    pub supported_models: Vec<String>,
    pub image_proxy: Arc<ImageProxy>,
}

impl AppState {
    /// Start a digest run and hand back its events.
    fn start_run(&self) -> UnboundedReceiver<ProgressEvent> {
        match &self.runner {
            Some(runner) => spawn_run(runner.clone()),
            None => {
                let (tx, rx) = unbounded_channel();
                let _ = tx.send(ProgressEvent::error("LLM provider is not configured"));
                rx
            }
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    llm_configured: bool,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        llm_configured: state.llm_provider.is_some(),
    })
}

/// Runs the full digest and streams its events as SSE. The run keeps going if the client
/// disconnects.
#[get("/api/process-all")]
fn process_all(state: &State<AppState>) -> EventStream![] {
    let mut events = state.start_run();
    info!("server: digest run requested over SSE");
    EventStream! {
        while let Some(ev) = events.recv().await {
            yield Event::json(&ev.payload()).event(ev.name());
        }
    }
}

/// Same events as `/api/process-all`, one `{"type": ..}` JSON text frame each.
#[get("/progress")]
fn progress_websocket(ws: WebSocket, state: &State<AppState>) -> Channel<'static> {
    let mut events = state.start_run();
    info!("server: digest run requested over websocket");

    ws.channel(move |mut stream| {
        Box::pin(async move {
            while let Some(ev) = events.recv().await {
                if stream.send(Message::Text(ev.to_tagged_json().to_string())).await.is_err() {
                    info!("server: websocket closed, run continues in background");
                    break;
                }
            }
            Ok(())
        })
    })
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    contents: Option<String>,
    model: Option<String>,
}

fn api_error(status: Status, message: impl Into<String>) -> (Status, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

/// Free-form generation with an explicitly chosen model.
#[post("/api/generate", data = "<body>")]
async fn generate(body: Json<GenerateRequest>, state: &State<AppState>) -> (Status, Json<Value>) {
    let body = body.into_inner();

    let Some(contents) = body.contents.filter(|c| !c.trim().is_empty()) else {
        return api_error(Status::BadRequest, "Contents must not be empty");
    };
    let Some(model) = body.model.filter(|m| !m.is_empty()) else {
        return api_error(Status::BadRequest, "Model is not specified");
    };
    if !state.supported_models.iter().any(|m| *m == model) {
        return api_error(Status::BadRequest, "The specified model is not supported");
    }
    let Some(provider) = state.llm_provider.clone() else {
        return api_error(Status::InternalServerError, "LLM provider is not configured");
    };

    let request = LlmRequest {
        prompt: contents,
        model: Some(model),
        timeout_seconds: Some(GENERATE_TIMEOUT_SECS),
        ..Default::default()
    };
    match provider.generate(request).await {
        Ok(response) => (Status::Ok, Json(json!({ "text": response.content }))),
        Err(e) if is_timeout(&e) => {
            error!("server: generate timed out: {:#}", e);
            api_error(Status::RequestTimeout, "Timed out waiting for the model response")
        }
        Err(e) => {
            error!("server: generate failed: {:#}", e);
            api_error(Status::InternalServerError, format!("API error: {:#}", e))
        }
    }
}

/// Response of `/api/image`.
pub enum ImageResponse {
    Image {
        bytes: Vec<u8>,
        content_type: String,
        upstream_status: Option<u16>,
        fallback: Option<(&'static str, String)>,
    },
    NoContent,
    Rejected(Status, String),
}

impl<'r> Responder<'r, 'static> for ImageResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Self::Image {
                bytes,
                content_type,
                upstream_status,
                fallback,
            } => {
                let mut builder = Response::build();
                builder
                    .status(Status::Ok)
                    .raw_header("content-type", content_type)
                    .raw_header("cache-control", "no-store");
                if let Some(status) = upstream_status {
                    builder.raw_header("x-upstream-status", status.to_string());
                }
                if let Some((kind, label)) = fallback {
                    builder
                        .raw_header("x-fallback", kind)
                        .raw_header("x-fallback-label", label);
                }
                builder.sized_body(bytes.len(), Cursor::new(bytes)).ok()
            }
            Self::NoContent => Response::build()
                .status(Status::NoContent)
                .raw_header("cache-control", "no-store")
                .ok(),
            Self::Rejected(status, message) => Response::build()
                .status(status)
                .sized_body(message.len(), Cursor::new(message))
                .ok(),
        }
    }
}

/// Query string of `/api/image`.
#[derive(Debug, FromForm)]
struct ImageQuery {
    url: Option<String>,
    timeout: Option<u64>,
    #[field(name = "ref")]
    referer: Option<String>,
    fallback: Option<String>,
    w: Option<u32>,
    h: Option<u32>,
    label: Option<String>,
}

impl ImageQuery {
    fn request(&self) -> ImageRequest {
        ImageRequest {
            referer: self.referer.clone().filter(|r| !r.trim().is_empty()),
            timeout: self.timeout.map(Duration::from_millis),
            fallback: Fallback::parse(self.fallback.as_deref()),
            placeholder: Placeholder::new(self.w, self.h, self.label.clone()),
        }
    }
}

/// Image proxy for documents built from the digest. JPEG and PNG pass through, other formats
/// come back as PNG, failures as a placeholder PNG or `204` with `fallback=empty`.
#[get("/api/image?<query..>")]
async fn image(query: ImageQuery, state: &State<AppState>) -> ImageResponse {
    let proxy = &state.image_proxy;
    let target = match parse_target(query.url.as_deref(), &proxy.settings().allowlist) {
        Ok(t) => t,
        Err(rejection) => {
            let status = match rejection {
                ProxyRejection::ForbiddenHost => Status::Forbidden,
                _ => Status::BadRequest,
            };
            return ImageResponse::Rejected(status, rejection.to_string());
        }
    };

    let request = query.request();
    match proxy.fetch(&target, &request).await {
        ImageOutcome::Image {
            bytes,
            content_type,
            upstream_status,
            fallback,
        } => {
            let label = match fallback {
                Some("too-large") => "Too large".to_string(),
                _ => request.placeholder.label,
            };
            ImageResponse::Image {
                bytes,
                content_type,
                upstream_status,
                fallback: fallback.map(|kind| (kind, label)),
            }
        }
        ImageOutcome::Empty { .. } => ImageResponse::NoContent,
    }
}

/// Assemble the Rocket instance; split out of [`launch_rocket`] for local-client tests.
pub fn build_rocket(state: AppState, server: Option<&ServerConfig>) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = server {
        if let Some(address) = &server.address {
            fig = fig.merge(("address", address.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    rocket::custom(fig)
        .manage(state)
        .mount("/", routes![health, status, process_all, generate, image])
        .mount("/ws", routes![progress_websocket])
}

pub async fn launch_rocket(state: AppState, server: Option<&ServerConfig>) -> Result<()> {
    info!("Starting Rocket HTTP server");
    build_rocket(state, server)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    info!("Rocket HTTP server has shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_proxy::ImageProxySettings;
    use crate::llm::{LlmResponse, UsageMetadata};
    use rocket::http::ContentType;
    use rocket::local::asynchronous::Client;

    struct EchoProvider;

    #[async_trait::async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content: format!("echo: {}", request.prompt),
                usage: UsageMetadata::default(),
                model: request.model.unwrap_or_default(),
            })
        }
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl LlmProvider for SlowProvider {
        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
            tokio::time::timeout(Duration::from_millis(1), std::future::pending::<LlmResponse>())
                .await
                .map_err(anyhow::Error::from)
        }
    }

    fn state(provider: Option<Arc<dyn LlmProvider>>) -> AppState {
        AppState {
            started_at: Utc::now(),
            runner: None,
            llm_provider: provider,
            supported_models: vec!["gpt-4o-mini".to_string()],
            image_proxy: Arc::new(ImageProxy::new(ImageProxySettings::default()).unwrap()),
        }
    }

    async fn test_client(provider: Option<Arc<dyn LlmProvider>>) -> Client {
        Client::tracked(build_rocket(state(provider), None)).await.unwrap()
    }

    async fn post_generate(client: &Client, body: Value) -> (Status, Value) {
        let resp = client
            .post("/api/generate")
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await;
        let status = resp.status();
        let json: Value = resp.into_json().await.unwrap();
        (status, json)
    }

    #[rocket::async_test]
    async fn generate_validates_and_answers() {
        let client = test_client(Some(Arc::new(EchoProvider))).await;

        let (status, _) = post_generate(&client, json!({"model": "gpt-4o-mini"})).await;
        assert_eq!(status, Status::BadRequest);
        let (status, _) = post_generate(&client, json!({"contents": "hi"})).await;
        assert_eq!(status, Status::BadRequest);
        let (status, _) = post_generate(&client, json!({"contents": "hi", "model": "other"})).await;
        assert_eq!(status, Status::BadRequest);

        let (status, body) =
            post_generate(&client, json!({"contents": "hi", "model": "gpt-4o-mini"})).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body, json!({"text": "echo: hi"}));
    }

    #[rocket::async_test]
    async fn generate_without_provider_or_in_time() {
        let request = json!({"contents": "hi", "model": "gpt-4o-mini"});

        let client = test_client(None).await;
        let (status, _) = post_generate(&client, request.clone()).await;
        assert_eq!(status, Status::InternalServerError);

        let client = test_client(Some(Arc::new(SlowProvider))).await;
        let (status, _) = post_generate(&client, request).await;
        assert_eq!(status, Status::RequestTimeout);
    }

    #[rocket::async_test]
    async fn process_all_without_llm_streams_one_error() {
        let client = test_client(None).await;
        let resp = client.get("/api/process-all").dispatch().await;
        assert_eq!(resp.status(), Status::Ok);
        let body = resp.into_string().await.unwrap();
        assert!(body.contains("LLM provider is not configured"));
        assert!(!body.contains("final_data"));
    }

    #[rocket::async_test]
    async fn image_rejects_bad_requests() {
        let client = test_client(None).await;
        assert_eq!(client.get("/api/image").dispatch().await.status(), Status::BadRequest);
        assert_eq!(
            client.get("/api/image?url=nonsense").dispatch().await.status(),
            Status::BadRequest
        );
    }

    #[rocket::async_test]
    async fn image_failure_defaults_to_placeholder() {
        let mut server = mockito::Server::new_async().await;
        let referer = server
            .mock("GET", "/gone.jpg")
            .match_header("referer", "https://t.me/")
            .with_status(404)
            .expect(2)
            .create_async()
            .await;

        let client = test_client(None).await;
        let target = format!("{}/gone.jpg", server.url());

        let resp = client
            .get(format!("/api/image?url={}&ref=https://t.me/&w=20&h=10&label=gone", target))
            .dispatch()
            .await;
        assert_eq!(resp.status(), Status::Ok);
        assert_eq!(resp.content_type(), Some(ContentType::PNG));
        assert_eq!(resp.headers().get_one("x-fallback"), Some("placeholder"));
        assert_eq!(resp.headers().get_one("x-fallback-label"), Some("gone"));
        assert_eq!(resp.headers().get_one("x-upstream-status"), Some("404"));
        let png = resp.into_bytes().await.unwrap();
        let decoded = ::image::load_from_memory(&png).unwrap();
        assert_eq!(::image::GenericImageView::dimensions(&decoded), (20, 10));

        let resp = client
            .get(format!("/api/image?url={}&ref=https://t.me/&fallback=empty", target))
            .dispatch()
            .await;
        assert_eq!(resp.status(), Status::NoContent);

        referer.assert_async().await;
    }
}

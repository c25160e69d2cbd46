//! Wire contract of the LLM and RAG clients against an in-process server.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uplifter::config::{Config, LlmConfig, RagConfig};
use uplifter::engine::CancelFlag;
use uplifter::error::RemoteFailure;
use uplifter::events::EventBus;
use uplifter::llm::HttpCompletionBackend;
use uplifter::pipeline::{Collaborators, Pipeline};
use uplifter::rag::RagClient;
use uplifter::traits::{CompletionBackend, CompletionRequest, FindingsSource, GuidanceSource};
use uplifter_core::guidance::NO_GUIDANCE;
use uplifter_core::language::Language;
use uplifter_core::models::{Decision, ModernizationJob};

/// Requests seen by the server: authorization header and JSON body.
#[derive(Clone, Default)]
struct Seen(Arc<Mutex<Vec<(String, Value)>>>);

impl Seen {
    fn push(&self, headers: &HeaderMap, body: Value) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.0.lock().unwrap().push((auth, body));
    }

    fn all(&self) -> Vec<(String, Value)> {
        self.0.lock().unwrap().clone()
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn request(prompt: &str) -> CompletionRequest {
    CompletionRequest {
        prompt: prompt.to_string(),
        max_new_tokens: 1500,
        read_timeout: Duration::from_secs(5),
    }
}

fn llm_config(base: &str, path: &str) -> LlmConfig {
    LlmConfig {
        url: Some(format!("{base}{path}")),
        ..LlmConfig::default()
    }
}

fn rag_config(base: &str) -> RagConfig {
    RagConfig {
        query_url: Some(format!("{base}/query")),
        filters_url: Some(format!("{base}/filters")),
        ..RagConfig::default()
    }
}

async fn record_completion(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    seen.push(&headers, body);
    Json(json!({ "completions": [{ "text": "  modernized  " }] }))
}

async fn choices_shape() -> Json<Value> {
    Json(json!({ "choices": [{ "message": { "content": "from choices" } }] }))
}

async fn unknown_shape() -> Json<Value> {
    Json(json!({ "result": "nope" }))
}

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "upstream down")
}

// ═══════════════════════════════════════════════════════════════════════
// LLM
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_llm_payload_and_bearer_token() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/complete", post(record_completion))
        .with_state(seen.clone());
    let base = serve(app).await;

    let backend = HttpCompletionBackend::new(&llm_config(&base, "/complete"), "tok-123".into()).unwrap();
    let text = backend.complete(&request("Modernize this")).await.unwrap();
    assert_eq!(text, "modernized");

    let calls = seen.all();
    assert_eq!(calls.len(), 1);
    let (auth, body) = &calls[0];
    assert_eq!(auth, "Bearer tok-123");
    assert_eq!(body["prompt"], "Modernize this");
    assert_eq!(body["model"], "Mistral-12b");
    assert_eq!(body["max_new_tokens"], 1500);
    assert_eq!(body["client"], "uplifter");
    assert_eq!(body["stream"], false);
    assert!(body.get("temperature").is_some());
    assert!(body.get("top_p").is_some());
}

#[tokio::test]
async fn test_llm_response_shapes() {
    let app = Router::new()
        .route("/choices", post(choices_shape))
        .route("/unknown", post(unknown_shape))
        .route("/down", post(unavailable));
    let base = serve(app).await;

    let choices = HttpCompletionBackend::new(&llm_config(&base, "/choices"), "t".into()).unwrap();
    assert_eq!(choices.complete(&request("p")).await.unwrap(), "from choices");

    let unknown = HttpCompletionBackend::new(&llm_config(&base, "/unknown"), "t".into()).unwrap();
    assert!(matches!(
        unknown.complete(&request("p")).await,
        Err(RemoteFailure::Decode { .. })
    ));

    let down = HttpCompletionBackend::new(&llm_config(&base, "/down"), "t".into()).unwrap();
    let err = down.complete(&request("p")).await.unwrap_err();
    assert_eq!(err.label(), "http 503");
    assert!(matches!(err, RemoteFailure::Status { code: 503, ref body } if body == "upstream down"));
}

// ═══════════════════════════════════════════════════════════════════════
// RAG
// ═══════════════════════════════════════════════════════════════════════

async fn rag_query(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let filtered = body["cpi_library_id"].as_array().is_some_and(|ids| !ids.is_empty());
    seen.push(&headers, body);
    if filtered {
        return Json(json!({ "evidences": [], "answer": "" }));
    }
    Json(json!({
        "answer": "Use f-strings.",
        "evidences": [{
            "cpi_library_title": "Python Coding Guidelines",
            "section_title": "Formatting",
            "doc_text": "Prefer f-strings over % formatting in new code.",
            "score": 0.91
        }]
    }))
}

async fn filters(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    if params.get("user_id").map(String::as_str) != Some("system") || !params.contains_key("customer_profile_id") {
        return (StatusCode::BAD_REQUEST, Json(json!({}))).into_response();
    }
    Json(json!({
        "search_filters": {
            "Coding": { "py-guide": "Python Coding Guidelines", "java-guide": "Java Style" },
            "Platform": { "chg-1": "Charging OAM handbook" }
        }
    }))
    .into_response()
}

#[tokio::test]
async fn test_rag_query_payload_and_tier_widening() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/query", post(rag_query))
        .with_state(seen.clone());
    let base = serve(app).await;

    let mut config = rag_config(&base);
    config.selected_library_ids = vec!["py-guide".into()];
    config.max_queries = 1;
    let client = RagClient::new(&config, Some("tok".into())).unwrap();

    let job = ModernizationJob::new("a.py", Language::Python, "3.9").with_findings("- % string formatting");
    let bundle = client.fetch(&job).await;
    assert!(bundle.found);
    assert_eq!(bundle.evidences.len(), 1);
    assert_eq!(bundle.evidences[0].source(), "Python Coding Guidelines - Formatting");

    let calls = seen.all();
    assert_eq!(calls.len(), 2, "selected libraries first, then unfiltered");
    let (auth, first) = &calls[0];
    assert_eq!(auth, "Bearer tok");
    assert_eq!(first["index_name"], "*");
    assert_eq!(first["cpi_library_id"], json!(["py-guide"]));
    assert_eq!(first["rerank"], true);
    assert_eq!(first["user_id"], "system");
    assert_eq!(calls[1].1["cpi_library_id"], json!([]));
}

#[tokio::test]
async fn test_rag_filters_catalog() {
    let app = Router::new().route("/filters", get(filters));
    let base = serve(app).await;
    let client = RagClient::new(&rag_config(&base), Some("tok".into())).unwrap();

    let catalog = client.list_libraries().await.unwrap();
    assert_eq!(catalog["Coding"]["py-guide"], "Python Coding Guidelines");
    assert_eq!(catalog["Platform"].len(), 1);
}

#[tokio::test]
async fn test_rag_outage_yields_not_found() {
    let app = Router::new().route("/query", post(unavailable));
    let base = serve(app).await;
    let client = RagClient::new(&rag_config(&base), Some("tok".into())).unwrap();

    let job = ModernizationJob::new("a.py", Language::Python, "3.9");
    let bundle = client.fetch(&job).await;
    assert!(!bundle.found);
    assert_eq!(bundle.summary, "RAG guidance unavailable (http 503)");
    assert_eq!(bundle.render(), NO_GUIDANCE);

    let report = client.check_connection().await;
    assert!(!report.reachable);
}

// ═══════════════════════════════════════════════════════════════════════
// Full run with RAG down
// ═══════════════════════════════════════════════════════════════════════

struct NoFindings;

#[async_trait::async_trait]
impl FindingsSource for NoFindings {
    fn name(&self) -> &str {
        "none"
    }

    async fn analyze(&self, _path: &Path, _code: &str, _target_version: &str) -> String {
        "Code appears to be compatible with Python 3.9".to_string()
    }
}

/// Echoes the prompt's code back in the tagged reply format.
async fn echo_model(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    seen.push(&headers, body);
    let start = prompt.rfind("```python\n").map(|i| i + "```python\n".len()).unwrap_or(0);
    let rest = &prompt[start..];
    let code = &rest[..rest.rfind("\n```").unwrap_or(rest.len())];
    let reply = format!(
        "<change_summary>\nNo changes required.\n</change_summary>\n<updated_code>\n```python\n{code}\n```\n</updated_code>"
    );
    Json(json!({ "completions": [reply] }))
}

#[tokio::test]
async fn test_run_completes_when_rag_is_down() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/query", post(unavailable))
        .route("/complete", post(echo_model))
        .with_state(seen.clone());
    let base = serve(app).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ok.py");
    let source = "def add(a, b):\n    return a + b\n";
    std::fs::write(&path, source).unwrap();

    let mut config = Config::minimal("3.9", Language::Python);
    config.run.root = dir.path().to_path_buf();
    config.llm = llm_config(&base, "/complete");
    config.rag = rag_config(&base);
    let collaborators = Collaborators {
        findings: Arc::new(NoFindings),
        guidance: Arc::new(RagClient::new(&config.rag, Some("tok".into())).unwrap()),
        completion: Arc::new(HttpCompletionBackend::new(&config.llm, "tok".into()).unwrap()),
    };
    let pipeline = Pipeline::new(config, collaborators, EventBus::default(), CancelFlag::new()).unwrap();
    let report = pipeline.run().await.unwrap();

    let outcome = &report.outcomes[0];
    assert!(!outcome.guidance_found);
    assert_eq!(outcome.decision, Decision::Unchanged);
    assert!(report.halted.is_none());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), source);

    let prompts = seen.all();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].1["prompt"].as_str().unwrap().contains(NO_GUIDANCE));
}

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyzer::{self, AnalysisContext};
use crate::archive;
use crate::config::ServiceConfig;
use crate::embedding::embed_text;
use crate::extract::{self, PolicyKind};
use crate::llm::{self, CompletionAgent};
use crate::models::{AnalyzeResponse, ChatRequest, ChatResponse, InvoiceResult};
use crate::prompts::render_chat_prompt;
use crate::store::{SearchFilter, VectorStore};

type ApiResult<T> = Result<Json<T>, ApiError>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "message": message.into() })),
    )
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": message.into() })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<VectorStore>,
    pub agent: Arc<CompletionAgent>,
}

/// Construct every external handle explicitly and wire up the router.
pub async fn create_app(config: ServiceConfig) -> anyhow::Result<Router> {
    let store = VectorStore::connect(&config.database_url).await?;
    store.initialize().await?;

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let agent = llm::completion_agent(&config.openrouter_api_key, &config.completion_model);

    let state = AppState {
        config: Arc::new(config),
        store: Arc::new(store),
        agent: Arc::new(agent),
    };
    Ok(build_router(state))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/analyze-invoices/", post(analyze_invoices))
        .route("/chatbot/", post(chatbot))
        // Policy + invoice archives can easily exceed axum's 2 MB default.
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// GET / - the static frontend page.
async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let path = state.config.static_dir.join("index.html");
    let page = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| internal_error(format!("Failed to read {}: {e}", path.display())))?;
    Ok(Html(page))
}

struct UploadForm {
    policy_filename: String,
    policy_bytes: Vec<u8>,
    invoices_filename: String,
    invoices_bytes: Vec<u8>,
    employee_name: String,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut policy: Option<(String, Vec<u8>)> = None;
    let mut invoices: Option<(String, Vec<u8>)> = None;
    let mut employee_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Failed to read multipart field: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "policy" => {
                let filename = field.file_name().unwrap_or("policy").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read policy file: {e}")))?;
                policy = Some((filename, bytes.to_vec()));
            }
            "invoices" => {
                let filename = field.file_name().unwrap_or("invoices").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read invoices file: {e}")))?;
                invoices = Some((filename, bytes.to_vec()));
            }
            "employee_name" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read employee_name: {e}")))?;
                employee_name = Some(text);
            }
            _ => {}
        }
    }

    let (policy_filename, policy_bytes) =
        policy.ok_or_else(|| bad_request("Missing multipart field: policy"))?;
    let (invoices_filename, invoices_bytes) =
        invoices.ok_or_else(|| bad_request("Missing multipart field: invoices"))?;
    let employee_name =
        employee_name.ok_or_else(|| bad_request("Missing multipart field: employee_name"))?;

    Ok(UploadForm {
        policy_filename,
        policy_bytes,
        invoices_filename,
        invoices_bytes,
        employee_name,
    })
}

/// POST /analyze-invoices/ - classify every invoice in the archive against
/// the policy and persist the results.
async fn analyze_invoices(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<AnalyzeResponse> {
    let form = read_upload_form(multipart).await?;

    info!(employee = %form.employee_name, "Received request to analyze invoices");

    // File-type validation happens before anything touches disk.
    let policy_kind = PolicyKind::from_filename(&form.policy_filename).ok_or_else(|| {
        warn!(filename = %form.policy_filename, "Invalid policy file type");
        bad_request("Invalid policy file type. Please upload a PDF or DOCX.")
    })?;
    if !extract::is_zip(&form.invoices_filename) {
        warn!(filename = %form.invoices_filename, "Invalid invoices file type");
        return Err(bad_request(
            "Invalid invoices file type. Please upload a ZIP file.",
        ));
    }
    if form.employee_name.trim().is_empty() {
        return Err(bad_request("employee_name must not be empty"));
    }

    // Policy handling: scratch file, extract, unconditional cleanup.
    let policy_path = state
        .config
        .data_dir
        .join(scratch_name(&form.policy_filename));
    tokio::fs::write(&policy_path, &form.policy_bytes)
        .await
        .map_err(|e| internal_error(format!("Failed to save policy file: {e}")))?;
    let policy_result = extract::extract_policy_text(&policy_path, policy_kind).await;
    if let Err(e) = tokio::fs::remove_file(&policy_path).await {
        warn!(path = %policy_path.display(), error = %e, "Failed to remove policy scratch file");
    }
    let policy_text = policy_result.map_err(|e| {
        error!(error = %e, "Failed to process policy file");
        bad_request(format!("Failed to process policy file: {e}"))
    })?;
    info!("Policy text extracted successfully");

    // Invoice archive: scratch ZIP, extract into the per-employee directory.
    let zip_path = state
        .config
        .data_dir
        .join(scratch_name(&form.invoices_filename));
    tokio::fs::write(&zip_path, &form.invoices_bytes)
        .await
        .map_err(|e| internal_error(format!("Failed to save invoices file: {e}")))?;
    let extract_dir = state
        .config
        .data_dir
        .join(sanitize_component(&form.employee_name));
    let unpack_result = archive::unpack_invoices(&zip_path, &extract_dir).await;
    if let Err(e) = tokio::fs::remove_file(&zip_path).await {
        warn!(path = %zip_path.display(), error = %e, "Failed to remove invoice archive");
    }
    let invoice_paths = unpack_result
        .map_err(|e| internal_error(format!("Failed to unpack invoice archive: {e}")))?;

    if invoice_paths.is_empty() {
        warn!(employee = %form.employee_name, "No PDF files found in ZIP");
        return Err(bad_request("No PDF files found in the uploaded ZIP."));
    }
    info!(
        count = invoice_paths.len(),
        employee = %form.employee_name,
        "Found invoices to analyze"
    );

    let ctx = AnalysisContext {
        agent: state.agent.clone(),
        store: state.store.clone(),
        llm_timeout: state.config.llm_timeout,
        embed_timeout: state.config.embed_timeout,
    };
    let results =
        run_analysis_batch(ctx, invoice_paths, policy_text, form.employee_name.clone()).await?;

    info!(
        count = results.len(),
        employee = %form.employee_name,
        "Finished analyzing invoices"
    );
    Ok(Json(AnalyzeResponse {
        status: "success".to_string(),
        results,
    }))
}

/// Fan one analyzer task per invoice onto the runtime, bounded by host
/// parallelism, and collect results in discovery order.
async fn run_analysis_batch(
    ctx: AnalysisContext,
    invoice_paths: Vec<std::path::PathBuf>,
    policy_text: String,
    employee_name: String,
) -> Result<Vec<InvoiceResult>, ApiError> {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let semaphore = Arc::new(Semaphore::new(parallelism));

    let policy_text = Arc::new(policy_text);
    let employee_name = Arc::new(employee_name);

    let mut set = JoinSet::new();
    for (idx, path) in invoice_paths.into_iter().enumerate() {
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        let policy_text = policy_text.clone();
        let employee_name = employee_name.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let result = analyzer::analyze_invoice(&ctx, &path, &policy_text, &employee_name).await;
            (idx, result)
        });
    }

    let mut indexed = Vec::with_capacity(set.len());
    let mut task_failure: Option<String> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(pair) => indexed.push(pair),
            Err(e) => {
                error!(error = %e, "Invoice analysis task panicked");
                // Keep draining so sibling tasks run to completion and clean
                // up their invoice files instead of being aborted mid-flight.
                task_failure = Some(e.to_string());
            }
        }
    }
    if let Some(e) = task_failure {
        return Err(internal_error(format!("An unexpected error occurred: {e}")));
    }
    indexed.sort_by_key(|(idx, _)| *idx);
    Ok(indexed.into_iter().map(|(_, result)| result).collect())
}

/// POST /chatbot/ - retrieval-augmented answer over stored invoice data.
async fn chatbot(
    State(state): State<AppState>,
    Query(params): Query<ChatRequest>,
) -> ApiResult<ChatResponse> {
    info!(
        query = %params.query,
        employee = ?params.employee_name,
        status = ?params.reimbursement_status,
        date = ?params.invoice_date,
        "Chatbot query received"
    );

    let filter = SearchFilter {
        employee_name: params.employee_name,
        reimbursement_status: params.reimbursement_status,
        invoice_date: params.invoice_date,
    };

    let embedding = embed_text(&params.query, state.config.embed_timeout)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    let docs = state
        .store
        .search(&embedding, &filter, state.config.retrieval_top_k)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    info!(count = docs.len(), "Retrieved documents for chat context");

    let context = docs
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = render_chat_prompt(&context, &params.query);
    let response = llm::complete(&state.agent, &prompt, state.config.llm_timeout)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    info!("Chatbot response generated");
    Ok(Json(ChatResponse { response }))
}

/// Only the final path component of an uploaded filename is trusted.
fn basename(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string()
}

/// Scratch files get a unique prefix so concurrent uploads sharing a client
/// filename cannot collide on write or removal.
fn scratch_name(filename: &str) -> String {
    format!("{}_{}", Uuid::new_v4(), basename(filename))
}

/// Employee names become directory names; strip anything path-like.
fn sanitize_component(name: &str) -> String {
    let cleaned = name.trim().replace(['/', '\\'], "_");
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_drops_directories() {
        assert_eq!(basename("policy.pdf"), "policy.pdf");
        assert_eq!(basename("../../etc/policy.pdf"), "policy.pdf");
        assert_eq!(basename(""), "upload");
    }

    #[test]
    fn scratch_names_are_unique_per_upload() {
        let a = scratch_name("invoices.zip");
        let b = scratch_name("invoices.zip");
        assert_ne!(a, b);
        assert!(a.ends_with("_invoices.zip"));
        assert!(!scratch_name("../../etc/x.zip").contains('/'));
    }

    #[test]
    fn sanitize_component_neutralizes_path_tricks() {
        assert_eq!(sanitize_component("Jane Doe"), "Jane Doe");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("  "), "_");
    }

    #[test]
    fn error_bodies_use_the_message_key() {
        let (status, Json(body)) = bad_request("nope");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "nope");

        let (status, Json(body)) = internal_error("boom");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "boom");
    }
}

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::embedding::embed_text;
use crate::extract::extract_pdf_text;
use crate::llm::{self, CompletionAgent};
use crate::models::{AnalysisOutcome, AnalysisRecord, InvoiceResult, RawAnalysis};
use crate::prompts::render_analysis_prompt;
use crate::store::{EntryMetadata, EntryType, StoredEntry, VectorStore, entry_id};

/// Shared handles for analyzer tasks. One agent and one store pool serve all
/// concurrent invoices; the operations behind them are I/O-bound.
#[derive(Clone)]
pub struct AnalysisContext {
    pub agent: Arc<CompletionAgent>,
    pub store: Arc<VectorStore>,
    pub llm_timeout: Duration,
    pub embed_timeout: Duration,
}

/// Why one invoice's analysis failed. These are reported per invoice and
/// never abort sibling tasks.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invoice text extraction failed: {0}")]
    Extraction(String),
    #[error("{0}")]
    Completion(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector store write failed: {0}")]
    Store(String),
}

/// Deletes a scratch file when dropped. Invoice files are request-scoped;
/// tying removal to drop covers success, failure, and task cancellation.
struct RemoveOnDrop {
    path: PathBuf,
}

impl RemoveOnDrop {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove invoice file");
        }
    }
}

/// Analyze a single invoice against the policy and persist the outcome.
///
/// The invoice file is scratch state: it is removed on every exit path,
/// whether analysis succeeded, the model answered garbage, or a dependency
/// failed.
pub async fn analyze_invoice(
    ctx: &AnalysisContext,
    invoice_path: &Path,
    policy_text: &str,
    employee_name: &str,
) -> InvoiceResult {
    let invoice_name = invoice_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    let _cleanup = RemoveOnDrop::new(invoice_path.to_path_buf());

    let outcome = run_analysis(ctx, invoice_path, policy_text, employee_name).await;

    match outcome {
        Ok(outcome) => InvoiceResult {
            invoice: invoice_name,
            outcome,
        },
        Err(e) => {
            error!(invoice = %invoice_name, error = %e, "Invoice analysis failed");
            InvoiceResult {
                invoice: invoice_name,
                outcome: AnalysisOutcome::Failed {
                    error: e.to_string(),
                },
            }
        }
    }
}

async fn run_analysis(
    ctx: &AnalysisContext,
    invoice_path: &Path,
    policy_text: &str,
    employee_name: &str,
) -> Result<AnalysisOutcome, AnalysisError> {
    let invoice_text = extract_pdf_text(invoice_path)
        .await
        .map_err(|e| AnalysisError::Extraction(e.to_string()))?;

    let prompt = render_analysis_prompt(policy_text, &invoice_text, employee_name);
    let raw_output = llm::complete(&ctx.agent, &prompt, ctx.llm_timeout)
        .await
        .map_err(|e| AnalysisError::Completion(e.to_string()))?;

    let Some(record) = parse_model_output(&raw_output) else {
        warn!(
            invoice = %invoice_path.display(),
            "Model did not return valid JSON"
        );
        return Ok(AnalysisOutcome::Unparseable {
            analysis: "LLM output was not valid JSON.".to_string(),
            raw_output,
        });
    };

    let metadata = EntryMetadata {
        employee_name: employee_name.to_string(),
        reimbursement_status: Some(record.reimbursement_status.as_str().to_string()),
        reason: record.reason.clone(),
        invoice_date: record.invoice_date.clone(),
        invoice_filename: invoice_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string(),
    };

    // Two independently addressable entries per invoice: its raw text and
    // the raw model response, both under the same metadata.
    let entries = [
        (invoice_text, EntryType::InvoiceText),
        (raw_output.clone(), EntryType::AnalysisResult),
    ];
    for (content, entry_type) in entries {
        let embedding = embed_text(&content, ctx.embed_timeout)
            .await
            .map_err(|e| AnalysisError::Embedding(e.to_string()))?;
        ctx.store
            .upsert(&StoredEntry {
                id: entry_id(invoice_path, entry_type),
                content,
                embedding,
                metadata: metadata.clone(),
                entry_type,
            })
            .await
            .map_err(|e| AnalysisError::Store(e.to_string()))?;
    }

    info!(
        invoice = %invoice_path.display(),
        status = record.reimbursement_status.as_str(),
        "Invoice analyzed and stored"
    );
    Ok(AnalysisOutcome::Analyzed { analysis: record })
}

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\s*([\s\S]*?)```").unwrap());

/// Locate a fenced ```json block; fall back to the whole response.
fn extract_json_block(raw: &str) -> &str {
    match JSON_FENCE.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw).trim(),
        None => raw.trim(),
    }
}

/// Parse the model's JSON payload into a record, or None if it is not JSON.
/// Missing fields become None; an unknown status maps to `Unclassified`.
pub(crate) fn parse_model_output(raw: &str) -> Option<AnalysisRecord> {
    serde_json::from_str::<RawAnalysis>(extract_json_block(raw))
        .ok()
        .map(AnalysisRecord::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReimbursementStatus;

    #[test]
    fn fenced_json_is_extracted() {
        let raw = "Here you go:\n```json\n{\"reimbursement_status\": \"Declined\"}\n```\nDone.";
        assert_eq!(
            extract_json_block(raw),
            "{\"reimbursement_status\": \"Declined\"}"
        );
    }

    #[test]
    fn unfenced_response_is_used_whole() {
        let raw = "  {\"reimbursement_status\": \"Declined\"}  ";
        assert_eq!(
            extract_json_block(raw),
            "{\"reimbursement_status\": \"Declined\"}"
        );
    }

    #[test]
    fn parse_full_payload() {
        let raw = r#"```json
{
  "reimbursement_status": "Partially Reimbursed",
  "reason": "Alcohol is excluded from meal reimbursement.",
  "invoice_date": "2025-02-14"
}
```"#;
        let record = parse_model_output(raw).unwrap();
        assert_eq!(
            record.reimbursement_status,
            ReimbursementStatus::PartiallyReimbursed
        );
        assert_eq!(record.invoice_date.as_deref(), Some("2025-02-14"));
    }

    #[test]
    fn missing_fields_become_none() {
        let record = parse_model_output("{\"reason\": \"no status given\"}").unwrap();
        assert_eq!(
            record.reimbursement_status,
            ReimbursementStatus::Unclassified
        );
        assert!(record.invoice_date.is_none());
    }

    #[test]
    fn unknown_status_maps_to_unclassified() {
        let record =
            parse_model_output("{\"reimbursement_status\": \"Approved with caveats\"}").unwrap();
        assert_eq!(
            record.reimbursement_status,
            ReimbursementStatus::Unclassified
        );
    }

    #[test]
    fn non_json_output_is_rejected() {
        assert!(parse_model_output("I cannot analyze this invoice.").is_none());
        assert!(parse_model_output("```json\nnot json either\n```").is_none());
    }

    fn offline_context() -> AnalysisContext {
        AnalysisContext {
            agent: Arc::new(llm::completion_agent("test-key", "openai/gpt-4o-mini")),
            store: Arc::new(
                VectorStore::connect_lazy("postgres://postgres@localhost:1/unused").unwrap(),
            ),
            llm_timeout: Duration::from_secs(1),
            embed_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn invoice_file_is_removed_when_extraction_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();

        let ctx = offline_context();
        let result = analyze_invoice(&ctx, &path, "policy text", "Jane Doe").await;

        assert_eq!(result.invoice, "broken.pdf");
        assert!(matches!(result.outcome, AnalysisOutcome::Failed { .. }));
        assert!(!path.exists(), "invoice file must be deleted on failure");
        assert!(tmp.path().exists());
    }

    #[tokio::test]
    async fn cleanup_guard_survives_task_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("inflight.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let guard_path = path.clone();
        let handle = tokio::spawn(async move {
            let _cleanup = RemoveOnDrop::new(guard_path);
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        // Let the task run up to its await point before cancelling it.
        tokio::task::yield_now().await;
        handle.abort();
        let _ = handle.await;

        assert!(!path.exists(), "cancelled task must still delete its file");
    }
}

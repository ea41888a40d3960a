use serde::{Deserialize, Serialize};

/// Reimbursement decision for one invoice, as classified by the model.
///
/// The model is instructed to answer with one of the three policy statuses;
/// anything else is mapped to `Unclassified` rather than trusted verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReimbursementStatus {
    #[serde(rename = "Fully Reimbursed")]
    FullyReimbursed,
    #[serde(rename = "Partially Reimbursed")]
    PartiallyReimbursed,
    #[serde(rename = "Declined")]
    Declined,
    #[serde(rename = "Unclassified")]
    Unclassified,
}

impl ReimbursementStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Fully Reimbursed" => Self::FullyReimbursed,
            "Partially Reimbursed" => Self::PartiallyReimbursed,
            "Declined" => Self::Declined,
            _ => Self::Unclassified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyReimbursed => "Fully Reimbursed",
            Self::PartiallyReimbursed => "Partially Reimbursed",
            Self::Declined => "Declined",
            Self::Unclassified => "Unclassified",
        }
    }
}

/// Structured decision for one invoice. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub reimbursement_status: ReimbursementStatus,
    pub reason: Option<String>,
    pub invoice_date: Option<String>,
}

/// Lenient mirror of the model's JSON payload: missing fields become None,
/// the status string is validated separately.
#[derive(Debug, Deserialize)]
pub struct RawAnalysis {
    pub reimbursement_status: Option<String>,
    pub reason: Option<String>,
    pub invoice_date: Option<String>,
}

impl From<RawAnalysis> for AnalysisRecord {
    fn from(raw: RawAnalysis) -> Self {
        Self {
            reimbursement_status: raw
                .reimbursement_status
                .as_deref()
                .map(ReimbursementStatus::parse)
                .unwrap_or(ReimbursementStatus::Unclassified),
            reason: raw.reason,
            invoice_date: raw.invoice_date,
        }
    }
}

/// Per-invoice entry in the `results` array of the analyze response.
#[derive(Debug, Serialize)]
pub struct InvoiceResult {
    pub invoice: String,
    #[serde(flatten)]
    pub outcome: AnalysisOutcome,
}

/// How an invoice's analysis ended. A failed invoice is reported, not
/// silently dropped, so the caller knows which invoices were skipped and why.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    Analyzed {
        analysis: AnalysisRecord,
    },
    /// The model answered with something that was not JSON. Kept as a flagged
    /// partial result carrying the raw text for diagnostics.
    Unparseable {
        analysis: String,
        raw_output: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: String,
    pub results: Vec<InvoiceResult>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub employee_name: Option<String>,
    pub reimbursement_status: Option<String>,
    pub invoice_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_parse_accepts_the_three_policy_values() {
        assert_eq!(
            ReimbursementStatus::parse("Fully Reimbursed"),
            ReimbursementStatus::FullyReimbursed
        );
        assert_eq!(
            ReimbursementStatus::parse(" Partially Reimbursed "),
            ReimbursementStatus::PartiallyReimbursed
        );
        assert_eq!(
            ReimbursementStatus::parse("Declined"),
            ReimbursementStatus::Declined
        );
    }

    #[test]
    fn status_parse_falls_back_to_unclassified() {
        assert_eq!(
            ReimbursementStatus::parse("Approved"),
            ReimbursementStatus::Unclassified
        );
        assert_eq!(
            ReimbursementStatus::parse(""),
            ReimbursementStatus::Unclassified
        );
    }

    #[test]
    fn raw_analysis_with_missing_fields_becomes_nulls() {
        let raw: RawAnalysis = serde_json::from_value(json!({
            "reimbursement_status": "Declined"
        }))
        .unwrap();
        let record = AnalysisRecord::from(raw);
        assert_eq!(record.reimbursement_status, ReimbursementStatus::Declined);
        assert!(record.reason.is_none());
        assert!(record.invoice_date.is_none());
    }

    #[test]
    fn analyzed_result_serializes_with_nested_analysis() {
        let result = InvoiceResult {
            invoice: "taxi.pdf".to_string(),
            outcome: AnalysisOutcome::Analyzed {
                analysis: AnalysisRecord {
                    reimbursement_status: ReimbursementStatus::FullyReimbursed,
                    reason: Some("Within policy".to_string()),
                    invoice_date: Some("2025-03-01".to_string()),
                },
            },
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["invoice"], "taxi.pdf");
        assert_eq!(
            value["analysis"]["reimbursement_status"],
            "Fully Reimbursed"
        );
    }

    #[test]
    fn unparseable_result_keeps_the_legacy_shape() {
        let result = InvoiceResult {
            invoice: "hotel.pdf".to_string(),
            outcome: AnalysisOutcome::Unparseable {
                analysis: "LLM output was not valid JSON.".to_string(),
                raw_output: "not json".to_string(),
            },
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["analysis"], "LLM output was not valid JSON.");
        assert_eq!(value["raw_output"], "not json");
    }

    #[test]
    fn failed_result_carries_an_error_message() {
        let result = InvoiceResult {
            invoice: "meal.pdf".to_string(),
            outcome: AnalysisOutcome::Failed {
                error: "model call timed out".to_string(),
            },
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["error"], "model call timed out");
        assert!(value.get("analysis").is_none());
    }
}

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::embedding::EMBEDDING_DIM;

/// Type discriminator for the two entries written per invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    InvoiceText,
    AnalysisResult,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceText => "invoice_text",
            Self::AnalysisResult => "analysis_result",
        }
    }
}

/// Metadata attached to every stored entry.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub employee_name: String,
    pub reimbursement_status: Option<String>,
    pub reason: Option<String>,
    pub invoice_date: Option<String>,
    pub invoice_filename: String,
}

/// One row to upsert: deterministic id, text content, its embedding, and
/// the shared metadata plus entry type.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: EntryMetadata,
    pub entry_type: EntryType,
}

/// Deterministic entry id: same invoice path + entry type always maps to the
/// same row, so re-analysis overwrites instead of duplicating.
pub fn entry_id(invoice_path: &std::path::Path, entry_type: EntryType) -> String {
    format!("{}_{}", invoice_path.display(), entry_type.as_str())
}

/// Equality-conjunction metadata filter; absent fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub employee_name: Option<String>,
    pub reimbursement_status: Option<String>,
    pub invoice_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub content: String,
    pub distance: f64,
}

/// pgvector-backed document store. Indexing/ANN internals belong to
/// Postgres; this wrapper only does upsert-by-id and filtered top-k search.
pub struct VectorStore {
    pool: PgPool,
}

impl VectorStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Like `connect`, but connections are only established on first use.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Enable the pgvector extension and create the documents table and its
    /// cosine index if they do not exist yet.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS invoice_documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding vector({EMBEDDING_DIM}) NOT NULL,
                employee_name TEXT NOT NULL,
                reimbursement_status TEXT,
                reason TEXT,
                invoice_date TEXT,
                invoice_filename TEXT NOT NULL,
                entry_type TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP
            )"
        );
        sqlx::query(&create_sql).execute(&self.pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS invoice_documents_embedding_idx
             ON invoice_documents USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
        )
        .execute(&self.pool)
        .await?;

        info!("Vector store initialized");
        Ok(())
    }

    /// Insert or overwrite one entry, keyed by its deterministic id.
    pub async fn upsert(&self, entry: &StoredEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO invoice_documents
                 (id, content, embedding, employee_name, reimbursement_status,
                  reason, invoice_date, invoice_filename, entry_type)
             VALUES ($1, $2, $3::vector, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                 content = EXCLUDED.content,
                 embedding = EXCLUDED.embedding,
                 employee_name = EXCLUDED.employee_name,
                 reimbursement_status = EXCLUDED.reimbursement_status,
                 reason = EXCLUDED.reason,
                 invoice_date = EXCLUDED.invoice_date,
                 invoice_filename = EXCLUDED.invoice_filename,
                 entry_type = EXCLUDED.entry_type,
                 created_at = CURRENT_TIMESTAMP",
        )
        .bind(&entry.id)
        .bind(&entry.content)
        .bind(vector_literal(&entry.embedding))
        .bind(&entry.metadata.employee_name)
        .bind(&entry.metadata.reimbursement_status)
        .bind(&entry.metadata.reason)
        .bind(&entry.metadata.invoice_date)
        .bind(&entry.metadata.invoice_filename)
        .bind(entry.entry_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cosine-ordered top-k search under the metadata filter.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        filter: &SearchFilter,
        k: usize,
    ) -> anyhow::Result<Vec<RetrievedDocument>> {
        let (where_sql, params) = build_filter_clause(filter);
        let sql = format!(
            "SELECT content, embedding <=> $1::vector AS distance
             FROM invoice_documents{where_sql}
             ORDER BY distance
             LIMIT {k}"
        );

        let mut query = sqlx::query(&sql).bind(vector_literal(query_embedding));
        for param in &params {
            query = query.bind(param);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let docs = rows
            .iter()
            .map(|row| RetrievedDocument {
                content: row.get("content"),
                distance: row.get("distance"),
            })
            .collect();
        Ok(docs)
    }
}

/// pgvector literal representation of an embedding, e.g. `[0.1,0.2]`.
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Build the WHERE clause for the provided filter fields only. Placeholders
/// start at `$2` because `$1` is the query embedding.
fn build_filter_clause(filter: &SearchFilter) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    let fields = [
        ("employee_name", &filter.employee_name),
        ("reimbursement_status", &filter.reimbursement_status),
        ("invoice_date", &filter.invoice_date),
    ];
    for (column, value) in fields {
        if let Some(value) = value {
            params.push(value.clone());
            conditions.push(format!("{} = ${}", column, params.len() + 1));
        }
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn entry_ids_are_deterministic_per_path_and_type() {
        let path = Path::new("data/Jane Doe/taxi.pdf");
        assert_eq!(
            entry_id(path, EntryType::InvoiceText),
            "data/Jane Doe/taxi.pdf_invoice_text"
        );
        assert_eq!(
            entry_id(path, EntryType::AnalysisResult),
            "data/Jane Doe/taxi.pdf_analysis_result"
        );
        assert_eq!(
            entry_id(path, EntryType::InvoiceText),
            entry_id(path, EntryType::InvoiceText)
        );
    }

    #[test]
    fn empty_filter_builds_no_where_clause() {
        let (sql, params) = build_filter_clause(&SearchFilter::default());
        assert!(sql.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn single_field_filter_binds_one_param() {
        let filter = SearchFilter {
            employee_name: Some("Jane Doe".to_string()),
            ..Default::default()
        };
        let (sql, params) = build_filter_clause(&filter);
        assert_eq!(sql, " WHERE employee_name = $2");
        assert_eq!(params, vec!["Jane Doe".to_string()]);
    }

    #[test]
    fn full_filter_is_an_equality_conjunction() {
        let filter = SearchFilter {
            employee_name: Some("Jane Doe".to_string()),
            reimbursement_status: Some("Declined".to_string()),
            invoice_date: Some("2025-03-01".to_string()),
        };
        let (sql, params) = build_filter_clause(&filter);
        assert_eq!(
            sql,
            " WHERE employee_name = $2 AND reimbursement_status = $3 AND invoice_date = $4"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn vector_literal_formats_like_pgvector() {
        assert_eq!(vector_literal(&[0.5, -1.0]), "[0.5,-1]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}

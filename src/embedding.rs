use std::time::Duration;

use anyhow::anyhow;
use tracing::debug;

/// Dimensionality of AllMiniLM-L6-v2 vectors; must match the store schema.
pub const EMBEDDING_DIM: usize = 384;

/// Generate an embedding for one text.
///
/// ONNX inference is CPU-bound, so it is off-loaded to a blocking thread and
/// bounded by a timeout like every other external dependency of the pipeline.
pub async fn embed_text(text: &str, timeout: Duration) -> anyhow::Result<Vec<f32>> {
    let input = text.to_owned();

    let task = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<f32>> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let mut model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )?;
        let embeddings = model.embed(vec![input], None)?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding model returned no vector"))
    });

    let embedding = tokio::time::timeout(timeout, task)
        .await
        .map_err(|_| anyhow!("embedding timed out after {}s", timeout.as_secs()))???;

    debug!(dim = embedding.len(), "Text embedded");
    Ok(embedding)
}

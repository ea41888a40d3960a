use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

/// Accepted policy document formats, sniffed from the uploaded filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Pdf,
    Docx,
}

impl PolicyKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".pdf") {
            Some(Self::Pdf)
        } else if lower.ends_with(".docx") {
            Some(Self::Docx)
        } else {
            None
        }
    }
}

pub fn is_pdf(filename: &str) -> bool {
    filename.to_lowercase().ends_with(".pdf")
}

pub fn is_zip(filename: &str) -> bool {
    filename.to_lowercase().ends_with(".zip")
}

/// Extract plain text from a policy file of a known kind.
pub async fn extract_policy_text(path: &Path, kind: PolicyKind) -> anyhow::Result<String> {
    match kind {
        PolicyKind::Pdf => extract_pdf_text(path).await,
        PolicyKind::Docx => extract_docx_text(path).await,
    }
}

/// Extract text from a PDF. The parser is synchronous, so it runs on a
/// blocking thread.
pub async fn extract_pdf_text(path: &Path) -> anyhow::Result<String> {
    let path: PathBuf = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read PDF file {}", path.display()))?;
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| anyhow!("failed to extract text from {}: {}", path.display(), e))?;
        if text.trim().is_empty() {
            return Err(anyhow!(
                "PDF {} contains no extractable text (may be image-based)",
                path.display()
            ));
        }
        Ok(text)
    })
    .await??;
    Ok(text)
}

/// Extract text from a DOCX by walking the paragraph → run → text tree.
pub async fn extract_docx_text(path: &Path) -> anyhow::Result<String> {
    let path: PathBuf = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read DOCX file {}", path.display()))?;
        let docx = docx_rs::read_docx(&bytes)
            .map_err(|e| anyhow!("failed to parse DOCX {}: {:?}", path.display(), e))?;

        let mut paragraphs: Vec<String> = Vec::new();
        for child in &docx.document.children {
            if let docx_rs::DocumentChild::Paragraph(para) = child {
                let para_text = paragraph_text(para);
                if !para_text.trim().is_empty() {
                    paragraphs.push(para_text);
                }
            }
        }
        Ok(paragraphs.join("\n"))
    })
    .await??;
    Ok(text)
}

fn paragraph_text(para: &docx_rs::Paragraph) -> String {
    let mut parts = Vec::new();
    for child in &para.children {
        if let docx_rs::ParagraphChild::Run(run) = child {
            for rc in &run.children {
                if let docx_rs::RunChild::Text(t) = rc {
                    parts.push(t.text.clone());
                }
            }
        }
    }
    parts.join("")
}

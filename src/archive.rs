use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;
use walkdir::WalkDir;

use crate::extract::is_pdf;

/// Extract a ZIP archive into `extract_dir` and return the paths of every
/// contained PDF, recursively.
///
/// Entry names are sanitized through `enclosed_name` so a crafted archive
/// cannot write outside the extraction directory. The directory itself is
/// created if missing and persists after analysis; only invoice files are
/// removed later.
pub async fn unpack_invoices(zip_path: &Path, extract_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let zip_path = zip_path.to_path_buf();
    let extract_dir = extract_dir.to_path_buf();

    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PathBuf>> {
        fs::create_dir_all(&extract_dir)
            .with_context(|| format!("failed to create {}", extract_dir.display()))?;

        let file = fs::File::open(&zip_path)
            .with_context(|| format!("failed to open {}", zip_path.display()))?;
        let mut archive =
            zip::ZipArchive::new(file).context("failed to read ZIP archive")?;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            // Skip entries whose names escape the target directory.
            let out_path = match entry.enclosed_name() {
                Some(rel) => extract_dir.join(rel),
                None => continue,
            };

            if entry.name().ends_with('/') {
                fs::create_dir_all(&out_path)?;
            } else {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut out_file = fs::File::create(&out_path)?;
                io::copy(&mut entry, &mut out_file)?;
            }
        }

        let pdf_paths = find_pdfs(&extract_dir);
        info!(
            count = pdf_paths.len(),
            dir = %extract_dir.display(),
            "Extracted invoice archive"
        );
        Ok(pdf_paths)
    })
    .await?
}

/// Recursively enumerate PDF files under a directory, in a stable order.
pub fn find_pdfs(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(is_pdf)
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

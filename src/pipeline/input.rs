//! Input discovery: list the PDFs of the input directory and load them.
//!
//! Discovery is non-recursive and sorted by path so repeated runs over the
//! same folder schedule documents in the same order. Each file's `%PDF`
//! magic bytes are checked when it is read, so a stray `.pdf` that is really
//! a ZIP or HTML error page is reported as a skipped document instead of a
//! pdfium crash.

use crate::error::{DatasetError, ExtractionError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A PDF waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
}

/// List `*.pdf` files (case-insensitive extension) directly inside `dir`.
///
/// An empty directory is not an error; a missing one is.
pub async fn discover_documents(dir: &Path) -> Result<Vec<SourceDocument>, DatasetError> {
    let meta = match tokio::fs::metadata(dir).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DatasetError::InputDirNotFound {
                path: dir.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(DatasetError::InputListFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };
    if !meta.is_dir() {
        return Err(DatasetError::InputNotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let list_err = |e| DatasetError::InputListFailed {
        path: dir.to_path_buf(),
        source: e,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    let mut documents = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let path = entry.path();
        if is_pdf_path(&path) && entry.file_type().await.map_err(list_err)?.is_file() {
            documents.push(SourceDocument { path });
        }
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Discovered {} PDFs in {}", documents.len(), dir.display());
    Ok(documents)
}

fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Read a document into memory, validating its PDF magic bytes.
pub async fn read_document(path: &Path) -> Result<Arc<[u8]>, ExtractionError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ExtractionError::Unreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractionError::NotAPdf {
            path: path.to_path_buf(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }

    Ok(Arc::from(bytes))
}

//! Document upload and permission-gated retrieval.
//!
//! Upload writes the blob first, then the metadata record; retrieval walks
//! the ladder access check -> record lookup -> blob open, with a distinct
//! error at each rung so a permission miss is never reported as "not found"
//! and a dangling blob reference is logged as a data-integrity anomaly.

use tracing::{info, warn};
use uuid::Uuid;

use crate::access;
use crate::blob::{BlobReader, BlobStore};
use crate::error::{AppError, AppResult};
use crate::store::{Document, Store};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// A granted document ready to stream.
pub struct DocumentContent {
    pub document: Document,
    pub reader: BlobReader,
}

impl std::fmt::Debug for DocumentContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentContent")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

/// Store an uploaded PDF: blob under a fresh `<uuid>.pdf` key, then the
/// Document record. Non-PDF content types are rejected before anything is
/// written.
pub async fn store_document(
    store: &dyn Store,
    blobs: &dyn BlobStore,
    original_name: &str,
    content_type: &str,
    bytes: &[u8],
) -> AppResult<Document> {
    if content_type != PDF_CONTENT_TYPE {
        return Err(AppError::validation("Only PDF files are allowed."));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::validation("File exceeds the 50 MB upload limit."));
    }

    let id = Uuid::new_v4().to_string();
    let stored_ref = format!("{id}.pdf");
    blobs.put(&stored_ref, bytes).await?;

    let doc = Document {
        id,
        original_name: original_name.to_string(),
        stored_ref,
    };
    store.insert_document(doc.clone()).await?;
    info!("Document uploaded: id={} name={:?}", doc.id, doc.original_name);
    Ok(doc)
}

/// Resolve a document for the given user, enforcing the grant first.
pub async fn fetch_document(
    store: &dyn Store,
    blobs: &dyn BlobStore,
    email: &str,
    document_id: &str,
) -> AppResult<DocumentContent> {
    if !access::can_access(store, email, document_id).await? {
        return Err(AppError::AccessDenied);
    }

    let Some(document) = store.find_document(document_id).await? else {
        return Err(AppError::not_found("Document not found."));
    };

    let Some(reader) = blobs.open(&document.stored_ref).await? else {
        // Record exists but its bytes are gone: dangling reference, not a
        // clean miss. Same 404 to the caller, different log signal.
        warn!(
            "Dangling blob reference: document {} points at missing blob {}",
            document.id, document.stored_ref
        );
        return Err(AppError::content_missing("Document file is missing."));
    };

    Ok(DocumentContent { document, reader })
}

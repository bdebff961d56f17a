//! Persistence seam for the three record collections: documents, permissions
//! and login tokens.
//!
//! The HTTP layer and the service modules only ever talk to the `Store` trait,
//! so backends are replaceable. Two are provided:
//! - `MemStore`: plain in-memory maps, used by tests and as a dev default.
//! - `FileStore`: whole-state JSON flat file, rewritten on every mutation.
//!
//! Emails inside Permission and LoginToken rows are stored already normalized
//! (trimmed, lowercased); every lookup here is plain equality.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppResult;

/// Metadata for one uploaded PDF. Immutable after upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    #[serde(rename = "originalName")]
    pub original_name: String,
    /// Blob-store key for the raw bytes.
    #[serde(rename = "storedRef")]
    pub stored_ref: String,
}

/// One grant: `email` may view `document_id`. At most one row per pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub email: String,
    #[serde(rename = "documentId")]
    pub document_id: String,
}

/// A pending one-time login code. At most one live row per email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginToken {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_document(&self, doc: Document) -> AppResult<()>;
    async fn find_document(&self, id: &str) -> AppResult<Option<Document>>;
    async fn list_documents(&self) -> AppResult<Vec<Document>>;
    async fn find_documents_by_ids(&self, ids: &[String]) -> AppResult<Vec<Document>>;

    /// Insert-if-absent. Returns false when the `(email, document_id)` pair
    /// already exists, so grants are idempotent without a caller-side check.
    async fn insert_permission(&self, perm: Permission) -> AppResult<bool>;
    async fn find_permission(&self, email: &str, document_id: &str) -> AppResult<Option<Permission>>;
    async fn list_permissions(&self) -> AppResult<Vec<Permission>>;
    async fn permissions_for_email(&self, email: &str) -> AppResult<Vec<Permission>>;

    async fn insert_token(&self, token: LoginToken) -> AppResult<()>;
    async fn find_token(&self, email: &str, code: &str) -> AppResult<Option<LoginToken>>;
    async fn delete_tokens_for_email(&self, email: &str) -> AppResult<usize>;
    async fn delete_token(&self, email: &str, code: &str) -> AppResult<bool>;
}

pub type SharedStore = Arc<dyn Store>;

/// Everything the store holds, in one serializable shape shared by both
/// backends. Documents are keyed by id; the other collections are small and
/// scanned linearly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    documents: HashMap<String, Document>,
    permissions: Vec<Permission>,
    tokens: Vec<LoginToken>,
}

impl StoreState {
    fn insert_permission(&mut self, perm: Permission) -> bool {
        let exists = self
            .permissions
            .iter()
            .any(|p| p.email == perm.email && p.document_id == perm.document_id);
        if exists {
            return false;
        }
        self.permissions.push(perm);
        true
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemStore {
    state: Mutex<StoreState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_document(&self, doc: Document) -> AppResult<()> {
        self.state.lock().documents.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn find_document(&self, id: &str) -> AppResult<Option<Document>> {
        Ok(self.state.lock().documents.get(id).cloned())
    }

    async fn list_documents(&self) -> AppResult<Vec<Document>> {
        let mut docs: Vec<Document> = self.state.lock().documents.values().cloned().collect();
        docs.sort_by(|a, b| a.original_name.cmp(&b.original_name));
        Ok(docs)
    }

    async fn find_documents_by_ids(&self, ids: &[String]) -> AppResult<Vec<Document>> {
        let guard = self.state.lock();
        Ok(ids.iter().filter_map(|id| guard.documents.get(id).cloned()).collect())
    }

    async fn insert_permission(&self, perm: Permission) -> AppResult<bool> {
        Ok(self.state.lock().insert_permission(perm))
    }

    async fn find_permission(&self, email: &str, document_id: &str) -> AppResult<Option<Permission>> {
        Ok(self
            .state
            .lock()
            .permissions
            .iter()
            .find(|p| p.email == email && p.document_id == document_id)
            .cloned())
    }

    async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        Ok(self.state.lock().permissions.clone())
    }

    async fn permissions_for_email(&self, email: &str) -> AppResult<Vec<Permission>> {
        Ok(self
            .state
            .lock()
            .permissions
            .iter()
            .filter(|p| p.email == email)
            .cloned()
            .collect())
    }

    async fn insert_token(&self, token: LoginToken) -> AppResult<()> {
        self.state.lock().tokens.push(token);
        Ok(())
    }

    async fn find_token(&self, email: &str, code: &str) -> AppResult<Option<LoginToken>> {
        Ok(self
            .state
            .lock()
            .tokens
            .iter()
            .find(|t| t.email == email && t.code == code)
            .cloned())
    }

    async fn delete_tokens_for_email(&self, email: &str) -> AppResult<usize> {
        let mut guard = self.state.lock();
        let before = guard.tokens.len();
        guard.tokens.retain(|t| t.email != email);
        Ok(before - guard.tokens.len())
    }

    async fn delete_token(&self, email: &str, code: &str) -> AppResult<bool> {
        let mut guard = self.state.lock();
        let before = guard.tokens.len();
        guard.tokens.retain(|t| !(t.email == email && t.code == code));
        Ok(guard.tokens.len() < before)
    }
}

// ---------------------------------------------------------------------------
// Flat-file backend
// ---------------------------------------------------------------------------

/// JSON flat-file store. The whole state is held in memory under a mutex and
/// rewritten to disk after each mutation; reads never touch the file after
/// open. Adequate for the low write volume this service sees.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            StoreState::default()
        };
        info!("Opened file store at {:?}", path);
        Ok(Self { path, state: Mutex::new(state) })
    }

    pub fn open_shared(path: impl AsRef<Path>) -> AppResult<SharedStore> {
        Ok(Arc::new(Self::open(path)?))
    }

    /// Run a mutation under the lock and persist the resulting state.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> AppResult<T> {
        let mut guard = self.state.lock();
        let out = f(&mut guard);
        let raw = serde_json::to_string_pretty(&*guard)?;
        std::fs::write(&self.path, raw)?;
        Ok(out)
    }
}

#[async_trait]
impl Store for FileStore {
    async fn insert_document(&self, doc: Document) -> AppResult<()> {
        self.mutate(|s| {
            s.documents.insert(doc.id.clone(), doc);
        })
    }

    async fn find_document(&self, id: &str) -> AppResult<Option<Document>> {
        Ok(self.state.lock().documents.get(id).cloned())
    }

    async fn list_documents(&self) -> AppResult<Vec<Document>> {
        let mut docs: Vec<Document> = self.state.lock().documents.values().cloned().collect();
        docs.sort_by(|a, b| a.original_name.cmp(&b.original_name));
        Ok(docs)
    }

    async fn find_documents_by_ids(&self, ids: &[String]) -> AppResult<Vec<Document>> {
        let guard = self.state.lock();
        Ok(ids.iter().filter_map(|id| guard.documents.get(id).cloned()).collect())
    }

    async fn insert_permission(&self, perm: Permission) -> AppResult<bool> {
        self.mutate(|s| s.insert_permission(perm))
    }

    async fn find_permission(&self, email: &str, document_id: &str) -> AppResult<Option<Permission>> {
        Ok(self
            .state
            .lock()
            .permissions
            .iter()
            .find(|p| p.email == email && p.document_id == document_id)
            .cloned())
    }

    async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        Ok(self.state.lock().permissions.clone())
    }

    async fn permissions_for_email(&self, email: &str) -> AppResult<Vec<Permission>> {
        Ok(self
            .state
            .lock()
            .permissions
            .iter()
            .filter(|p| p.email == email)
            .cloned()
            .collect())
    }

    async fn insert_token(&self, token: LoginToken) -> AppResult<()> {
        self.mutate(|s| s.tokens.push(token))
    }

    async fn find_token(&self, email: &str, code: &str) -> AppResult<Option<LoginToken>> {
        Ok(self
            .state
            .lock()
            .tokens
            .iter()
            .find(|t| t.email == email && t.code == code)
            .cloned())
    }

    async fn delete_tokens_for_email(&self, email: &str) -> AppResult<usize> {
        self.mutate(|s| {
            let before = s.tokens.len();
            s.tokens.retain(|t| t.email != email);
            before - s.tokens.len()
        })
    }

    async fn delete_token(&self, email: &str, code: &str) -> AppResult<bool> {
        self.mutate(|s| {
            let before = s.tokens.len();
            s.tokens.retain(|t| !(t.email == email && t.code == code));
            s.tokens.len() < before
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn doc(id: &str, name: &str) -> Document {
        Document {
            id: id.to_string(),
            original_name: name.to_string(),
            stored_ref: format!("{id}.pdf"),
        }
    }

    #[tokio::test]
    async fn permission_insert_is_conditional() {
        let store = MemStore::new();
        let perm = Permission { email: "a@b.c".into(), document_id: "d1".into() };
        assert!(store.insert_permission(perm.clone()).await.unwrap());
        assert!(!store.insert_permission(perm).await.unwrap());
        assert_eq!(store.list_permissions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn token_delete_by_email_and_exact_pair() {
        let store = MemStore::new();
        let exp = Utc::now() + Duration::minutes(5);
        for code in ["111111", "222222"] {
            store
                .insert_token(LoginToken { email: "a@b.c".into(), code: code.into(), expires_at: exp })
                .await
                .unwrap();
        }
        store
            .insert_token(LoginToken { email: "z@b.c".into(), code: "333333".into(), expires_at: exp })
            .await
            .unwrap();

        assert!(store.delete_token("a@b.c", "111111").await.unwrap());
        assert!(!store.delete_token("a@b.c", "111111").await.unwrap());
        assert_eq!(store.delete_tokens_for_email("a@b.c").await.unwrap(), 1);
        assert!(store.find_token("z@b.c", "333333").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn documents_by_ids_skips_unknown() {
        let store = MemStore::new();
        store.insert_document(doc("d1", "one.pdf")).await.unwrap();
        store.insert_document(doc("d2", "two.pdf")).await.unwrap();
        let found = store
            .find_documents_by_ids(&["d2".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "d2");
    }

    #[tokio::test]
    async fn file_store_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docgate.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.insert_document(doc("d1", "report.pdf")).await.unwrap();
            store
                .insert_permission(Permission { email: "a@b.c".into(), document_id: "d1".into() })
                .await
                .unwrap();
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.find_document("d1").await.unwrap().unwrap().original_name, "report.pdf");
        assert!(store.find_permission("a@b.c", "d1").await.unwrap().is_some());
    }
}

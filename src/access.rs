//! Permission evaluation and grants.
//!
//! A grant is an `(email, document_id)` pair in the permissions collection.
//! Emails are normalized at write time, so every check here is an exact
//! equality lookup against the store. No caching: each check is fresh.

use tracing::info;

use crate::error::{AppError, AppResult};
use crate::store::{Document, Permission, Store};
use crate::token::normalize_email;

/// True iff a permission row exists for the pair.
pub async fn can_access(store: &dyn Store, email: &str, document_id: &str) -> AppResult<bool> {
    let email = normalize_email(email);
    Ok(store.find_permission(&email, document_id).await?.is_some())
}

/// Idempotent grant. Returns true when a new row was created, false when the
/// grant already existed. Uniqueness is enforced by the store's conditional
/// insert, not by a separate check here.
pub async fn grant_access(store: &dyn Store, email: &str, document_id: &str) -> AppResult<bool> {
    let email = normalize_email(email);
    if email.is_empty() || document_id.trim().is_empty() {
        return Err(AppError::validation("Email and document id are required."));
    }
    let created = store
        .insert_permission(Permission { email: email.clone(), document_id: document_id.to_string() })
        .await?;
    if created {
        info!("Access granted for {} to document {}", email, document_id);
    }
    Ok(created)
}

/// Documents the given user was granted, for the dashboard listing.
pub async fn documents_for(store: &dyn Store, email: &str) -> AppResult<Vec<Document>> {
    let email = normalize_email(email);
    let perms = store.permissions_for_email(&email).await?;
    if perms.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = perms.into_iter().map(|p| p.document_id).collect();
    store.find_documents_by_ids(&ids).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    async fn seed_doc(store: &MemStore, id: &str) {
        store
            .insert_document(Document {
                id: id.to_string(),
                original_name: format!("{id}.pdf"),
                stored_ref: format!("{id}.stored.pdf"),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn grant_twice_yields_one_row() {
        let store = MemStore::new();
        assert!(grant_access(&store, "User@Example.com", "d1").await.unwrap());
        assert!(!grant_access(&store, "user@example.com ", "d1").await.unwrap());
        assert_eq!(store.list_permissions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn grant_requires_both_fields() {
        let store = MemStore::new();
        assert!(matches!(
            grant_access(&store, "", "d1").await.unwrap_err(),
            AppError::Validation { .. }
        ));
        assert!(matches!(
            grant_access(&store, "a@b.c", "  ").await.unwrap_err(),
            AppError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn can_access_matches_exact_pair_only() {
        let store = MemStore::new();
        grant_access(&store, "a@b.c", "d1").await.unwrap();
        assert!(can_access(&store, "A@B.C", "d1").await.unwrap());
        assert!(!can_access(&store, "a@b.c", "d2").await.unwrap());
        assert!(!can_access(&store, "other@b.c", "d1").await.unwrap());
    }

    #[tokio::test]
    async fn documents_for_returns_granted_docs() {
        let store = MemStore::new();
        seed_doc(&store, "d1").await;
        seed_doc(&store, "d2").await;
        grant_access(&store, "a@b.c", "d1").await.unwrap();

        let docs = documents_for(&store, "a@b.c").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "d1");
        assert!(documents_for(&store, "nobody@b.c").await.unwrap().is_empty());
    }
}

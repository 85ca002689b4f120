use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;
use serde_json::Value;

use super::{GigRepository, ListHint, RepositoryError};
use crate::normalize::RawRecord;

/// Raw documents held in memory. Ignores list hints, like a store without
/// query support would.
#[derive(Default)]
pub struct MemoryRepository {
    records: Mutex<Vec<RawRecord>>,
    offline: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemoryRepository {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Builds a repository from a JSON array of documents.
    pub fn from_json(text: &str) -> Result<Self, RepositoryError> {
        let documents: Vec<Value> =
            serde_json::from_str(text).map_err(|err| RepositoryError::Decode(err.to_string()))?;
        let records = documents
            .into_iter()
            .filter_map(|doc| match doc {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        Ok(Self::new(records))
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn replace(&self, records: Vec<RawRecord>) -> Result<(), RepositoryError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("record store poisoned".into()))?;
        *guard = records;
        Ok(())
    }

    fn check_online(&self) -> Result<(), RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("network unreachable".into()))
        } else {
            Ok(())
        }
    }
}

fn document_id(record: &RawRecord) -> Option<&str> {
    record
        .get("$id")
        .or_else(|| record.get("id"))
        .and_then(Value::as_str)
}

#[async_trait]
impl GigRepository for MemoryRepository {
    async fn list_gigs(&self, _hint: &ListHint) -> Result<Vec<RawRecord>, RepositoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let guard = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("record store poisoned".into()))?;
        Ok(guard.clone())
    }

    async fn delete_gig(&self, id: &str) -> Result<(), RepositoryError> {
        self.check_online()?;
        let mut guard = self
            .records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("record store poisoned".into()))?;
        let before = guard.len();
        guard.retain(|record| document_id(record) != Some(id));
        if guard.len() == before {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCS: &str = r#"[
        {"$id": "g1", "title": "Organist"},
        {"$id": "g2", "Title": "Guitarist"},
        "not a document"
    ]"#;

    #[tokio::test]
    async fn lists_and_deletes_documents() {
        let repo = MemoryRepository::from_json(DOCS).expect("parse docs");
        let listed = repo.list_gigs(&ListHint::default()).await.expect("list");
        assert_eq!(listed.len(), 2);

        repo.delete_gig("g1").await.expect("delete");
        assert_eq!(
            repo.delete_gig("g1").await,
            Err(RepositoryError::NotFound("g1".to_string()))
        );
        let listed = repo.list_gigs(&ListHint::default()).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(repo.list_calls(), 2);
    }

    #[tokio::test]
    async fn offline_repository_is_unavailable() {
        let repo = MemoryRepository::from_json(DOCS).expect("parse docs");
        repo.set_offline(true);
        assert!(matches!(
            repo.list_gigs(&ListHint::default()).await,
            Err(RepositoryError::Unavailable(_))
        ));
    }
}

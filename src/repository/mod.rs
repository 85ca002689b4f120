pub mod appwrite;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Gig;
use crate::normalize::RawRecord;

pub use appwrite::{AppwriteRepository, AppwriteSettings};
pub use memory::MemoryRepository;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("gig service unavailable: {0}")]
    Unavailable(String),
    #[error("unreadable gig service response: {0}")]
    Decode(String),
    #[error("gig not found: {0}")]
    NotFound(String),
    #[error("not permitted: {0}")]
    Forbidden(String),
}

/// Optional server-side narrowing. Stores may ignore it, so callers still
/// check [`ListHint::admits`] on what comes back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListHint {
    pub open_only: bool,
    pub organizer_id: Option<String>,
}

impl ListHint {
    pub fn open_gigs() -> Self {
        Self {
            open_only: true,
            organizer_id: None,
        }
    }

    pub fn for_organizer(organizer_id: impl Into<String>) -> Self {
        Self {
            open_only: false,
            organizer_id: Some(organizer_id.into()),
        }
    }

    pub fn admits(&self, gig: &Gig) -> bool {
        if self.open_only && !gig.is_open() {
            return false;
        }
        match &self.organizer_id {
            Some(organizer) => &gig.organizer_id == organizer,
            None => true,
        }
    }
}

/// Remote source of raw gig documents.
#[async_trait]
pub trait GigRepository: Send + Sync {
    async fn list_gigs(&self, hint: &ListHint) -> Result<Vec<RawRecord>, RepositoryError>;

    async fn delete_gig(&self, id: &str) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrganizationType, ZipCode};

    fn gig(organizer: &str, accepted_by: Option<&str>) -> Gig {
        Gig {
            id: "g".to_string(),
            title: "Gig".to_string(),
            description: String::new(),
            pay_amount: 0,
            instrument: String::new(),
            organization_type: OrganizationType::Church,
            event_at: None,
            posted_at: None,
            location_zip: ZipCode::parse("12180").expect("zip"),
            organizer_id: organizer.to_string(),
            created_by_name: String::new(),
            accepted_by: accepted_by.map(str::to_string),
        }
    }

    #[test]
    fn hint_scope_matches_open_and_owned_gigs() {
        assert!(ListHint::default().admits(&gig("a", Some("m"))));
        assert!(ListHint::open_gigs().admits(&gig("a", None)));
        assert!(!ListHint::open_gigs().admits(&gig("a", Some("m"))));
        assert!(ListHint::for_organizer("a").admits(&gig("a", Some("m"))));
        assert!(!ListHint::for_organizer("a").admits(&gig("b", None)));
    }
}

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::GigCache;
use crate::filter::{FilterEngine, FilterPatch, InvalidFilterCriteria, DEFAULT_RADIUS_OPTIONS};
use crate::models::{FilterCriteria, Gig};
use crate::normalize::{Normalizer, RawRecord};
use crate::repository::{GigRepository, ListHint, RepositoryError};

/// What the listing view should show.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingState {
    Idle,
    Loading,
    Ready {
        gigs: Vec<Gig>,
        criteria: FilterCriteria,
    },
    /// `stale` is the last result shown before the failure.
    Error { message: String, stale: Vec<Gig> },
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("gig {gig_id} is not owned by {organizer_id}")]
    NotOwner { gig_id: String, organizer_id: String },
    #[error("gig {0} is not in the current listing")]
    UnknownGig(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Issue-order tag of a fetch. Only the latest issued ticket may land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

struct Inner {
    phase: Phase,
    criteria: FilterCriteria,
    latest_request: u64,
    collection: Option<Vec<Gig>>,
    visible: Vec<Gig>,
}

pub struct ListingController {
    repository: Arc<dyn GigRepository>,
    normalizer: Normalizer,
    engine: FilterEngine,
    hint: ListHint,
    radius_options: Vec<u32>,
    cache: Option<Mutex<GigCache>>,
    inner: Mutex<Inner>,
}

impl ListingController {
    pub fn new(repository: Arc<dyn GigRepository>, engine: FilterEngine) -> Self {
        Self {
            repository,
            normalizer: Normalizer::default(),
            engine,
            hint: ListHint::default(),
            radius_options: DEFAULT_RADIUS_OPTIONS.to_vec(),
            cache: None,
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                criteria: FilterCriteria::default(),
                latest_request: 0,
                collection: None,
                visible: Vec::new(),
            }),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_hint(mut self, hint: ListHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_radius_options(mut self, radius_options: Vec<u32>) -> Self {
        self.radius_options = radius_options;
        self
    }

    /// Starting criteria. Not validated against the radius options.
    pub fn with_criteria(self, criteria: FilterCriteria) -> Self {
        self.lock().criteria = criteria;
        self
    }

    pub fn with_cache(mut self, cache: GigCache) -> Self {
        self.cache = Some(Mutex::new(cache));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_state(&self) -> ListingState {
        let inner = self.lock();
        match &inner.phase {
            Phase::Idle => ListingState::Idle,
            Phase::Loading => ListingState::Loading,
            Phase::Ready => ListingState::Ready {
                gigs: inner.visible.clone(),
                criteria: inner.criteria.clone(),
            },
            Phase::Failed(message) => ListingState::Error {
                message: message.clone(),
                stale: inner.visible.clone(),
            },
        }
    }

    pub fn criteria(&self) -> FilterCriteria {
        self.lock().criteria.clone()
    }

    /// Last filtered result, kept across loading and errors.
    pub fn visible(&self) -> Vec<Gig> {
        self.lock().visible.clone()
    }

    /// Size of the held canonical collection before filtering.
    pub fn collection_len(&self) -> usize {
        self.lock().collection.as_ref().map_or(0, Vec::len)
    }

    /// Re-filters the held collection. Never fetches.
    pub fn set_filter(&self, patch: FilterPatch) -> Result<(), InvalidFilterCriteria> {
        let mut inner = self.lock();
        inner.criteria.apply_patch(patch, &self.radius_options)?;
        self.refilter(&mut inner);
        debug!(criteria = ?inner.criteria, visible = inner.visible.len(), "filters changed");
        Ok(())
    }

    pub async fn refresh(&self) {
        let ticket = self.begin_refresh();
        let result = self.repository.list_gigs(&self.hint).await;
        self.complete_refresh(ticket, result);
    }

    pub fn begin_refresh(&self) -> FetchTicket {
        let mut inner = self.lock();
        inner.latest_request += 1;
        inner.phase = Phase::Loading;
        debug!(request = inner.latest_request, "fetching gigs");
        FetchTicket(inner.latest_request)
    }

    /// Applies a fetch result unless a newer fetch was issued. Returns whether it was applied.
    pub fn complete_refresh(
        &self,
        ticket: FetchTicket,
        result: Result<Vec<RawRecord>, RepositoryError>,
    ) -> bool {
        let canonical = result.map(|records| self.canonicalize(&records));

        let mut inner = self.lock();
        if ticket.0 != inner.latest_request {
            debug!(
                request = ticket.0,
                latest = inner.latest_request,
                "dropping superseded gig fetch"
            );
            return false;
        }

        match canonical {
            Ok(gigs) => {
                info!(request = ticket.0, gigs = gigs.len(), "gig listing refreshed");
                self.store_snapshot(&gigs);
                inner.collection = Some(gigs);
                self.refilter(&mut inner);
                inner.phase = Phase::Ready;
            }
            Err(err) => {
                warn!(request = ticket.0, "gig fetch failed: {err}");
                if inner.collection.is_none() {
                    inner.collection = self.load_snapshot();
                    self.refilter(&mut inner);
                }
                inner.phase = Phase::Failed(format!("Could not load gigs: {err}"));
            }
        }
        true
    }

    /// Deletes a gig owned by `organizer_id` and drops it from the listing.
    /// A gig the store no longer has is dropped locally as well.
    pub async fn delete_gig(&self, organizer_id: &str, gig_id: &str) -> Result<(), ListingError> {
        {
            let inner = self.lock();
            let gig = inner
                .collection
                .as_ref()
                .and_then(|gigs| gigs.iter().find(|gig| gig.id == gig_id))
                .ok_or_else(|| ListingError::UnknownGig(gig_id.to_string()))?;
            if gig.organizer_id != organizer_id {
                return Err(ListingError::NotOwner {
                    gig_id: gig_id.to_string(),
                    organizer_id: organizer_id.to_string(),
                });
            }
        }

        match self.repository.delete_gig(gig_id).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound(_)) => {
                info!(gig = gig_id, "gig already removed from store");
            }
            Err(err) => return Err(err.into()),
        }

        let mut inner = self.lock();
        if let Some(gigs) = inner.collection.as_mut() {
            gigs.retain(|gig| gig.id != gig_id);
        }
        if let Some(gigs) = inner.collection.as_deref() {
            self.store_snapshot(gigs);
        }
        self.refilter(&mut inner);
        info!(gig = gig_id, "gig deleted");
        Ok(())
    }

    fn refilter(&self, inner: &mut Inner) {
        if let Some(gigs) = inner.collection.as_deref() {
            inner.visible = self.engine.apply(gigs, &inner.criteria);
        }
    }

    fn canonicalize(&self, records: &[RawRecord]) -> Vec<Gig> {
        let mut seen = HashSet::new();
        let mut gigs = Vec::with_capacity(records.len());
        let mut malformed = 0usize;
        let mut out_of_scope = 0usize;

        for raw in records {
            match self.normalizer.normalize(raw) {
                Ok(gig) if !self.hint.admits(&gig) => out_of_scope += 1,
                Ok(gig) => {
                    if seen.insert(gig.id.clone()) {
                        gigs.push(gig);
                    } else {
                        warn!(gig = %gig.id, "duplicate gig id, keeping first");
                    }
                }
                Err(err) => {
                    malformed += 1;
                    debug!("{err}");
                }
            }
        }

        if malformed > 0 {
            warn!(malformed, kept = gigs.len(), "skipped malformed gig records");
        }
        if out_of_scope > 0 {
            debug!(out_of_scope, "store ignored list hint");
        }
        gigs
    }

    fn store_snapshot(&self, gigs: &[Gig]) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = cache.store_snapshot(gigs) {
            warn!("failed to cache gig snapshot: {err}");
        }
    }

    fn load_snapshot(&self) -> Option<Vec<Gig>> {
        let cache = self.cache.as_ref()?;
        let cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.load_snapshot() {
            Ok(gigs) if !gigs.is_empty() => {
                info!(gigs = gigs.len(), "showing cached gigs");
                Some(gigs.into_iter().filter(|gig| self.hint.admits(gig)).collect())
            }
            Ok(_) => None,
            Err(err) => {
                warn!("failed to read gig snapshot: {err}");
                None
            }
        }
    }
}

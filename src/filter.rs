use std::{collections::BTreeSet, sync::Arc};

use thiserror::Error;
use tracing::debug;

use crate::geo::ProximityResolver;
use crate::models::{active_text, FilterCriteria, Gig, OrganizationType, ZipCode};

pub const DEFAULT_RADIUS_OPTIONS: [u32; 3] = [5, 10, 20];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidFilterCriteria {
    #[error("unsupported radius {requested} mi (choose one of {allowed:?})")]
    UnsupportedRadius { requested: u32, allowed: Vec<u32> },
    #[error("unknown organization type: {0}")]
    UnknownOrganizationType(String),
}

/// Partial update of [`FilterCriteria`]. `None` leaves a criterion alone,
/// `Some(None)` deactivates it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPatch {
    pub radius_miles: Option<Option<u32>>,
    pub instrument: Option<Option<String>>,
    pub organization_type: Option<Option<String>>,
    pub search_text: Option<Option<String>>,
}

impl FilterPatch {
    pub fn radius(mut self, radius_miles: Option<u32>) -> Self {
        self.radius_miles = Some(radius_miles);
        self
    }

    pub fn instrument(mut self, instrument: Option<&str>) -> Self {
        self.instrument = Some(instrument.map(str::to_string));
        self
    }

    pub fn organization_type(mut self, organization_type: Option<&str>) -> Self {
        self.organization_type = Some(organization_type.map(str::to_string));
        self
    }

    pub fn search(mut self, search_text: Option<&str>) -> Self {
        self.search_text = Some(search_text.map(str::to_string));
        self
    }
}

impl FilterCriteria {
    /// Validates the whole patch before touching any field.
    pub fn apply_patch(
        &mut self,
        patch: FilterPatch,
        radius_options: &[u32],
    ) -> Result<(), InvalidFilterCriteria> {
        if let Some(Some(requested)) = patch.radius_miles {
            if !radius_options.contains(&requested) {
                return Err(InvalidFilterCriteria::UnsupportedRadius {
                    requested,
                    allowed: radius_options.to_vec(),
                });
            }
        }
        let organization_type = match patch.organization_type {
            Some(Some(tag)) => Some(Some(
                tag.parse::<OrganizationType>()
                    .map_err(InvalidFilterCriteria::UnknownOrganizationType)?,
            )),
            Some(None) => Some(None),
            None => None,
        };

        if let Some(radius_miles) = patch.radius_miles {
            self.radius_miles = radius_miles;
        }
        if let Some(instrument) = patch.instrument {
            self.instrument = instrument;
        }
        if let Some(organization_type) = organization_type {
            self.organization_type = organization_type;
        }
        if let Some(search_text) = patch.search_text {
            self.search_text = search_text;
        }
        Ok(())
    }
}

/// Stable, side-effect free view over an already fetched gig collection.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    resolver: Arc<ProximityResolver>,
    home_zip: Option<ZipCode>,
}

struct Predicate {
    nearby: Option<BTreeSet<ZipCode>>,
    instrument: Option<String>,
    organization_type: Option<OrganizationType>,
    search_text: Option<String>,
}

impl Predicate {
    fn matches(&self, gig: &Gig) -> bool {
        let matches_zip = self
            .nearby
            .as_ref()
            .map_or(true, |nearby| nearby.contains(&gig.location_zip));
        let matches_instrument = self
            .instrument
            .as_ref()
            .map_or(true, |needle| gig.instrument.to_lowercase().contains(needle));
        let matches_type = self
            .organization_type
            .map_or(true, |kind| gig.organization_type == kind);
        let matches_search = self
            .search_text
            .as_ref()
            .map_or(true, |needle| gig.title.to_lowercase().contains(needle));

        matches_zip && matches_instrument && matches_type && matches_search
    }
}

impl FilterEngine {
    pub fn new(resolver: Arc<ProximityResolver>, home_zip: Option<ZipCode>) -> Self {
        Self { resolver, home_zip }
    }

    pub fn home_zip(&self) -> Option<&ZipCode> {
        self.home_zip.as_ref()
    }

    pub fn apply(&self, gigs: &[Gig], criteria: &FilterCriteria) -> Vec<Gig> {
        if criteria.is_identity() {
            return gigs.to_vec();
        }
        let predicate = self.predicate(criteria);
        gigs.iter()
            .filter(|gig| predicate.matches(gig))
            .cloned()
            .collect()
    }

    fn predicate(&self, criteria: &FilterCriteria) -> Predicate {
        let nearby = match (criteria.radius_miles, self.home_zip.as_ref()) {
            (Some(radius), Some(home)) => Some(self.resolver.nearby(home, radius)),
            (Some(radius), None) => {
                debug!(radius, "no home zip configured, ignoring radius filter");
                None
            }
            (None, _) => None,
        };
        Predicate {
            nearby,
            instrument: active_text(criteria.instrument.as_deref()).map(str::to_lowercase),
            organization_type: criteria.organization_type,
            search_text: active_text(criteria.search_text.as_deref()).map(str::to_lowercase),
        }
    }
}

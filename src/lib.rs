pub mod config;
pub mod controller;
pub mod db;
pub mod filter;
pub mod geo;
pub mod models;
pub mod normalize;
pub mod repository;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{AppConfig, ConfigStore};
use controller::{ListingController, ListingState};
use db::GigCache;
use filter::{FilterEngine, FilterPatch};
use geo::ProximityResolver;
use models::{FilterCriteria, Gig, ZipCode};
use normalize::Normalizer;
use repository::{AppwriteRepository, GigRepository, ListHint, MemoryRepository};

pub use controller::{FetchTicket, ListingError};
pub use filter::InvalidFilterCriteria;
pub use normalize::{MalformedRecordError, RawRecord};
pub use repository::RepositoryError;

/// Browse posted gigs near you.
#[derive(Parser, Debug)]
#[command(name = "gig-finder")]
#[command(version)]
struct Args {
    /// Home zip code used for radius filtering
    #[arg(long, env = "GIG_FINDER_HOME_ZIP")]
    zip: Option<String>,

    /// Radius in miles (must be one of the configured options)
    #[arg(long, conflicts_with = "any_distance")]
    radius: Option<u32>,

    /// Do not filter by distance
    #[arg(long)]
    any_distance: bool,

    /// Instrument substring, e.g. "organ"
    #[arg(long)]
    instrument: Option<String>,

    /// Church, Bar or Other
    #[arg(long = "org-type")]
    org_type: Option<String>,

    /// Text to look for in gig titles
    #[arg(long)]
    search: Option<String>,

    /// Only gigs posted by this organizer
    #[arg(long)]
    organizer: Option<String>,

    /// Read gig documents from a JSON file instead of the remote store
    #[arg(long, value_name = "FILE")]
    offline: Option<PathBuf>,
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gig_finder_lib=info,gig_finder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn build_repository(args: &Args, config: &AppConfig) -> Result<Arc<dyn GigRepository>> {
    if let Some(path) = &args.offline {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read gig documents from {}", path.display()))?;
        let repository = MemoryRepository::from_json(&text)?;
        return Ok(Arc::new(repository));
    }
    let settings = config.appwrite_settings().ok_or_else(|| {
        anyhow!("no gig store configured; set GIG_FINDER_ENDPOINT, GIG_FINDER_PROJECT, GIG_FINDER_DATABASE and GIG_FINDER_COLLECTION or pass --offline")
    })?;
    Ok(Arc::new(AppwriteRepository::new(settings)?))
}

fn build_resolver(config: &AppConfig) -> ProximityResolver {
    match &config.centroids_path {
        Some(path) => match ProximityResolver::from_path(path) {
            Ok(resolver) => resolver,
            Err(err) => {
                warn!("failed to read centroids from {:?}, using built-in table: {err}", path);
                ProximityResolver::default()
            }
        },
        None => ProximityResolver::default(),
    }
}

fn build_patch(args: &Args) -> FilterPatch {
    let mut patch = FilterPatch::default();
    if args.any_distance {
        patch = patch.radius(None);
    } else if let Some(radius) = args.radius {
        patch = patch.radius(Some(radius));
    }
    if let Some(instrument) = &args.instrument {
        patch = patch.instrument(Some(instrument.as_str()));
    }
    if let Some(kind) = &args.org_type {
        patch = patch.organization_type(Some(kind.as_str()));
    }
    if let Some(search) = &args.search {
        patch = patch.search(Some(search.as_str()));
    }
    patch
}

fn render_gig(gig: &Gig) -> String {
    let when = gig
        .event_at
        .map(|dt| dt.format("%b %-d, %Y %H:%M UTC").to_string())
        .unwrap_or_else(|| "date TBD".to_string());
    let instrument = if gig.instrument.is_empty() {
        "any instrument"
    } else {
        gig.instrument.as_str()
    };
    format!(
        "{title} [{kind}] - {instrument} - ${pay} - {when} - {zip}",
        title = gig.title,
        kind = gig.organization_type,
        pay = gig.pay_amount,
        zip = gig.location_zip,
    )
}

async fn list(args: Args, config: AppConfig) -> Result<()> {
    let home_zip = match &args.zip {
        Some(text) => Some(ZipCode::parse(text).ok_or_else(|| anyhow!("invalid zip code: {text}"))?),
        None => config.home_zip.clone(),
    };
    let repository = build_repository(&args, &config)?;
    let engine = FilterEngine::new(Arc::new(build_resolver(&config)), home_zip);
    let hint = match &args.organizer {
        Some(organizer) => ListHint::for_organizer(organizer.clone()),
        None if config.open_gigs_only => ListHint::open_gigs(),
        None => ListHint::default(),
    };

    let mut controller = ListingController::new(repository, engine)
        .with_normalizer(Normalizer::new(config.instrument_vocabulary.clone()))
        .with_radius_options(config.radius_options.clone())
        .with_hint(hint)
        .with_criteria(FilterCriteria::with_radius(config.initial_radius()));
    match GigCache::open_default() {
        Ok(cache) => controller = controller.with_cache(cache),
        Err(err) => warn!("gig cache unavailable: {err}"),
    }

    controller.set_filter(build_patch(&args))?;
    controller.refresh().await;

    match controller.current_state() {
        ListingState::Ready { gigs, criteria } => {
            info!(criteria = ?criteria, "listing ready");
            if gigs.is_empty() {
                println!("No gigs found.");
            }
            for gig in &gigs {
                println!("{}", render_gig(gig));
            }
            Ok(())
        }
        ListingState::Error { message, stale } => {
            if !stale.is_empty() {
                println!("Showing {} saved gigs:", stale.len());
                for gig in &stale {
                    println!("{}", render_gig(gig));
                }
            }
            Err(anyhow!(message))
        }
        ListingState::Idle | ListingState::Loading => Err(anyhow!("listing did not finish loading")),
    }
}

pub fn run() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = ConfigStore::load().read().with_env_overrides();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(list(args, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrganizationType;

    #[test]
    fn cli_flags_become_filter_patch() {
        let args = Args::parse_from([
            "gig-finder",
            "--radius",
            "20",
            "--instrument",
            "organ",
            "--org-type",
            "church",
        ]);
        let mut criteria = FilterCriteria::with_radius(Some(10));
        criteria
            .apply_patch(build_patch(&args), &filter::DEFAULT_RADIUS_OPTIONS)
            .expect("valid patch");
        assert_eq!(criteria.radius_miles, Some(20));
        assert_eq!(criteria.instrument.as_deref(), Some("organ"));
        assert_eq!(criteria.organization_type, Some(OrganizationType::Church));
        assert_eq!(criteria.search_text, None);

        let args = Args::parse_from(["gig-finder", "--any-distance"]);
        assert_eq!(build_patch(&args), FilterPatch::default().radius(None));
    }

    #[test]
    fn renders_gig_line() {
        let gig = Gig {
            id: "1".to_string(),
            title: "Sunday Organist".to_string(),
            description: String::new(),
            pay_amount: 150,
            instrument: "Organ".to_string(),
            organization_type: OrganizationType::Church,
            event_at: None,
            posted_at: None,
            location_zip: ZipCode::parse("12180").expect("zip"),
            organizer_id: "c".to_string(),
            created_by_name: String::new(),
            accepted_by: None,
        };
        assert_eq!(
            render_gig(&gig),
            "Sunday Organist [Church] - Organ - $150 - date TBD - 12180"
        );
    }
}

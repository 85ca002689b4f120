use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
};

use tracing::{debug, warn};

use crate::models::ZipCode;

const EARTH_RADIUS_MILES: f64 = 3958.8;
const EMBEDDED_CENTROIDS: &str = include_str!("../data/zip_centroids.csv");

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub latitude: f64,
    pub longitude: f64,
}

impl Centroid {
    pub fn distance_miles(&self, other: &Centroid) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_MILES * a.sqrt().min(1.0).asin()
    }
}

/// Resolves the set of zip codes within a radius of a home zip using centroid distances.
#[derive(Debug, Clone)]
pub struct ProximityResolver {
    centroids: HashMap<ZipCode, Centroid>,
}

impl Default for ProximityResolver {
    fn default() -> Self {
        Self::from_csv(EMBEDDED_CENTROIDS)
    }
}

impl ProximityResolver {
    /// Parses `zip,latitude,longitude` rows. A header row and malformed rows are skipped.
    pub fn from_csv(text: &str) -> Self {
        let mut centroids = HashMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_row(line) {
                Some((zip, centroid)) => {
                    centroids.insert(zip, centroid);
                }
                None if index == 0 => {}
                None => warn!(line = index + 1, row = %line, "skipping malformed centroid row"),
            }
        }
        Self { centroids }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_csv(&text))
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn knows(&self, zip: &ZipCode) -> bool {
        self.centroids.contains_key(zip)
    }

    pub fn distance_miles(&self, from: &ZipCode, to: &ZipCode) -> Option<f64> {
        let from = self.centroids.get(from)?;
        let to = self.centroids.get(to)?;
        Some(from.distance_miles(to))
    }

    /// Every known zip within `radius_miles` of `home`, always including `home`.
    /// An unknown home zip yields just itself.
    pub fn nearby(&self, home: &ZipCode, radius_miles: u32) -> BTreeSet<ZipCode> {
        let mut nearby = BTreeSet::new();
        nearby.insert(home.clone());

        let Some(origin) = self.centroids.get(home) else {
            debug!(zip = %home, "home zip has no centroid, not expanding");
            return nearby;
        };

        let limit = f64::from(radius_miles);
        nearby.extend(
            self.centroids
                .iter()
                .filter(|(_, centroid)| origin.distance_miles(centroid) <= limit)
                .map(|(zip, _)| zip.clone()),
        );
        nearby
    }
}

fn parse_row(line: &str) -> Option<(ZipCode, Centroid)> {
    let mut fields = line.split(',').map(str::trim);
    let zip = ZipCode::parse(fields.next()?)?;
    let latitude = fields.next()?.parse::<f64>().ok()?;
    let longitude = fields.next()?.parse::<f64>().ok()?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some((zip, Centroid { latitude, longitude }))
}

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{5})(?:-[0-9]{4})?$").expect("valid zip regex"));

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Gig {
    pub id: String,
    pub title: String,
    pub description: String,
    pub pay_amount: u32, // whole dollars
    pub instrument: String,
    pub organization_type: OrganizationType,
    pub event_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub location_zip: ZipCode,
    pub organizer_id: String,
    pub created_by_name: String,
    pub accepted_by: Option<String>,
}

impl Gig {
    pub fn is_open(&self) -> bool {
        self.accepted_by.is_none()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrganizationType {
    Church,
    Bar,
    Other,
}

impl OrganizationType {
    pub const ALL: [OrganizationType; 3] = [Self::Church, Self::Bar, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Church => "Church",
            Self::Bar => "Bar",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for OrganizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| trimmed.to_string())
    }
}

/// Five digit US postal code. Leading zeros are significant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ZipCode(String);

impl ZipCode {
    pub fn parse(text: &str) -> Option<Self> {
        ZIP_RE
            .captures(text.trim())
            .and_then(|caps| caps.get(1))
            .map(|digits| Self(digits.as_str().to_string()))
    }

    pub fn from_number(value: u64) -> Option<Self> {
        if value > 99_999 {
            return None;
        }
        Some(Self(format!("{value:05}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ZipCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid zip code: {value}"))
    }
}

impl From<ZipCode> for String {
    fn from(zip: ZipCode) -> Self {
        zip.0
    }
}

/// Ephemeral listing filters. `None` means the dimension is not constrained.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub radius_miles: Option<u32>,
    pub instrument: Option<String>,
    pub organization_type: Option<OrganizationType>,
    pub search_text: Option<String>,
}

impl FilterCriteria {
    pub fn with_radius(radius_miles: Option<u32>) -> Self {
        Self {
            radius_miles,
            ..Self::default()
        }
    }

    pub fn is_identity(&self) -> bool {
        self.radius_miles.is_none()
            && active_text(self.instrument.as_deref()).is_none()
            && self.organization_type.is_none()
            && active_text(self.search_text.as_deref()).is_none()
    }
}

/// Trimmed text when non-blank.
pub fn active_text(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

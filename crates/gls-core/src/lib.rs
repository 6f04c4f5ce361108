//! Core domain model for the GLS tracker.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "gls-core";

/// Date rendering used in workbook cells, matching the source site's style.
pub const CELL_DATE_FORMAT: &str = "%d/%m/%Y";

/// Tender status as shown in the listing table's Status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteStatus {
    Awarded,
    NotAwarded,
    Unknown,
}

impl SiteStatus {
    /// Normalize free-text status. Case-insensitive substring match; the
    /// "not awarded" check runs first since it contains "awarded".
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.contains("not awarded") {
            SiteStatus::NotAwarded
        } else if lower.contains("awarded") {
            SiteStatus::Awarded
        } else {
            SiteStatus::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Awarded => "Awarded",
            SiteStatus::NotAwarded => "Not Awarded",
            SiteStatus::Unknown => "Unknown",
        }
    }
}

/// One row of the listing table. Ephemeral: produced fresh each run and
/// never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub site_no: String,
    pub location: String,
    pub site_area_ha: String,
    pub gross_plot_ratio: String,
    pub status: SiteStatus,
    pub detail_url: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Fields scraped from a per-project detail page. Every field is extracted
/// independently; a selector miss leaves its field `None` rather than
/// failing the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub tenure: Option<String>,
    pub site_area_sqm: Option<f64>,
    pub allowable_development: Option<String>,
    pub date_of_launch: Option<NaiveDate>,
    pub date_of_tender_closing: Option<NaiveDate>,
    pub date_of_award: Option<NaiveDate>,
    pub successful_tenderer: Option<String>,
    pub tender_price: Option<f64>,
}

/// Persisted unit of the awarded-sites sheet: listing identity plus detail
/// enrichment plus run-spanning bookkeeping. At most one row per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardedRow {
    pub site_no: String,
    pub location: String,
    pub site_area_ha: String,
    pub gross_plot_ratio: String,
    pub status: SiteStatus,
    pub detail_url: Option<String>,
    pub tenure: Option<String>,
    pub site_area_sqm: Option<f64>,
    pub allowable_development: Option<String>,
    pub date_of_launch: Option<NaiveDate>,
    pub date_of_tender_closing: Option<NaiveDate>,
    pub date_of_award: Option<NaiveDate>,
    pub successful_tenderer: Option<String>,
    pub tender_price: Option<f64>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl AwardedRow {
    pub fn from_listing(record: &ListingRecord, detail: ProjectDetail, now: DateTime<Utc>) -> Self {
        Self {
            site_no: record.site_no.clone(),
            location: record.location.clone(),
            site_area_ha: record.site_area_ha.clone(),
            gross_plot_ratio: record.gross_plot_ratio.clone(),
            status: record.status,
            detail_url: record.detail_url.clone(),
            tenure: detail.tenure,
            site_area_sqm: detail.site_area_sqm,
            allowable_development: detail.allowable_development,
            date_of_launch: detail.date_of_launch,
            date_of_tender_closing: detail.date_of_tender_closing,
            date_of_award: detail.date_of_award,
            successful_tenderer: detail.successful_tenderer,
            tender_price: detail.tender_price,
            first_seen: now,
            last_updated: now,
        }
    }
}

/// One row of the vacant-sites sheet. No detail-page enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VacantSite {
    pub location: String,
    pub date_of_launch: Option<NaiveDate>,
    pub date_of_award: Option<NaiveDate>,
    pub allowable_development: Option<String>,
    pub lease_years: Option<u32>,
    pub site_area_sqm: Option<f64>,
    pub successful_tenderer: Option<String>,
    pub tender_price: Option<f64>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Persisted row contract used by the merger: a stable identity plus enough
/// structure to tell content changes apart from bookkeeping churn.
pub trait TableRow: Clone {
    fn key(&self) -> String;

    /// Compares persisted fields, ignoring `first_seen`/`last_updated`.
    fn same_fields(&self, other: &Self) -> bool;

    /// Carry run-spanning bookkeeping over from the prior version of this
    /// row: `first_seen` always, `last_updated` only when nothing changed.
    fn inherit_history(&mut self, prior: &Self);
}

impl TableRow for AwardedRow {
    fn key(&self) -> String {
        site_key(&self.location, self.detail_url.as_deref())
    }

    fn same_fields(&self, other: &Self) -> bool {
        let normalized = Self {
            first_seen: other.first_seen,
            last_updated: other.last_updated,
            ..self.clone()
        };
        normalized == *other
    }

    fn inherit_history(&mut self, prior: &Self) {
        self.first_seen = prior.first_seen;
        if self.same_fields(prior) {
            self.last_updated = prior.last_updated;
        }
    }
}

impl TableRow for VacantSite {
    fn key(&self) -> String {
        let launch = self
            .date_of_launch
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_default();
        format!("loc:{}:{launch}", normalize_key_fragment(&self.location))
    }

    fn same_fields(&self, other: &Self) -> bool {
        let normalized = Self {
            first_seen: other.first_seen,
            last_updated: other.last_updated,
            ..self.clone()
        };
        normalized == *other
    }

    fn inherit_history(&mut self, prior: &Self) {
        self.first_seen = prior.first_seen;
        if self.same_fields(prior) {
            self.last_updated = prior.last_updated;
        }
    }
}

pub fn normalize_key_fragment(input: &str) -> String {
    input
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Stable key for a tracked site. The detail URL wins when the listing links
/// one (location text gets renamed; project paths do not), with the location
/// text as fallback.
pub fn site_key(location: &str, detail_url: Option<&str>) -> String {
    match detail_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            let lowered = url.to_ascii_lowercase();
            let stripped = lowered
                .strip_prefix("https://")
                .or_else(|| lowered.strip_prefix("http://"))
                .unwrap_or(&lowered);
            format!("url:{}", stripped.trim_end_matches('/'))
        }
        None => format!("loc:{}", normalize_key_fragment(location)),
    }
}

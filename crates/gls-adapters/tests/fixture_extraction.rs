//! Extraction against the saved fixture pages, the way a selector update
//! gets validated before touching the live site.

use chrono::{NaiveDate, TimeZone, Utc};
use gls_adapters::{parse_detail, parse_listing, parse_vacant_sites};
use gls_core::SiteStatus;

const LISTING: &str = include_str!("../fixtures/gls_listing.html");
const DETAIL_MARINA_SOUTH: &str = include_str!("../fixtures/detail_marina_south.html");
const VACANT_SITES: &str = include_str!("../fixtures/vacant_sites.html");

#[test]
fn awarded_records_are_identifiable_from_the_listing_fixture() {
    let seen_at = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).single().unwrap();
    let records = parse_listing(LISTING, "https://www.ura.gov.sg/Corporate", seen_at).unwrap();

    let awarded: Vec<_> = records
        .iter()
        .filter(|r| r.status == SiteStatus::Awarded)
        .collect();
    assert_eq!(awarded.len(), 2);
    assert!(awarded.iter().all(|r| r.detail_url.is_some()));
    assert!(records
        .iter()
        .any(|r| r.location == "Punggol Walk" && r.status == SiteStatus::NotAwarded));
}

#[test]
fn marina_south_detail_fixture_extracts_every_field() {
    let detail = parse_detail(DETAIL_MARINA_SOUTH).unwrap();
    assert_eq!(detail.tenure.as_deref(), Some("99-year leasehold"));
    assert_eq!(detail.site_area_sqm, Some(13_411.9));
    assert_eq!(detail.date_of_launch, NaiveDate::from_ymd_opt(2025, 10, 15));
    assert_eq!(
        detail.date_of_tender_closing,
        NaiveDate::from_ymd_opt(2026, 1, 20)
    );
    assert_eq!(detail.date_of_award, NaiveDate::from_ymd_opt(2026, 2, 5));
    assert_eq!(
        detail.successful_tenderer.as_deref(),
        Some("GuocoLand (Singapore) Pte Ltd")
    );
    assert_eq!(detail.tender_price, Some(770_460_000.0));
}

#[test]
fn vacant_sites_fixture_parses_one_record_per_row() {
    let seen_at = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).single().unwrap();
    let sites = parse_vacant_sites(VACANT_SITES, seen_at).unwrap();

    assert_eq!(sites.len(), 3);
    assert_eq!(sites[0].location, "Holland Drive");
    assert_eq!(sites[0].lease_years, Some(99));
    assert_eq!(sites[0].site_area_sqm, Some(15_623.0));
    assert_eq!(sites[0].tender_price, Some(805_390_000.0));
    assert_eq!(sites[0].date_of_award, NaiveDate::from_ymd_opt(2025, 8, 12));

    // Un-awarded parcel: empty cells degrade to None, row still present.
    assert_eq!(sites[2].location, "Bayshore Road");
    assert!(sites[2].date_of_award.is_none());
    assert!(sites[2].successful_tenderer.is_none());
    assert!(sites[2].tender_price.is_none());
}

//! HTML extraction for the GLS listing, project detail, and vacant-sites pages.
//!
//! Field lookups go through narrow per-field helpers, replayable against the
//! saved pages under `fixtures/` when the source markup drifts.

use chrono::{DateTime, NaiveDate, Utc};
use gls_core::{ListingRecord, ProjectDetail, SiteStatus, VacantSite};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "gls-adapters";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid selector {0}")]
    Selector(String),
}

fn selector(css: &str) -> Result<Selector, ParseError> {
    Selector::parse(css).map_err(|e| ParseError::Selector(format!("{css}: {e}")))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn element_text(el: ElementRef) -> Option<String> {
    text_or_none(el.text().collect::<String>())
}

/// Scheme plus host of a URL, for absolutizing relative links.
fn origin(base_url: &str) -> &str {
    let after_scheme = base_url.find("://").map(|i| i + 3).unwrap_or(0);
    match base_url[after_scheme..].find('/') {
        Some(i) => &base_url[..after_scheme + i],
        None => base_url,
    }
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", origin(base_url), href.trim_start_matches('/'))
    }
}

/// Header texts of a table, lowercased. Falls back to the first row's cells
/// when the table has no `th` elements.
fn table_headers(table: ElementRef) -> Result<Vec<String>, ParseError> {
    let th = selector("thead th, tr th")?;
    let headers: Vec<String> = table
        .select(&th)
        .filter_map(element_text)
        .map(|t| t.to_lowercase())
        .collect();
    if !headers.is_empty() {
        return Ok(headers);
    }

    let tr = selector("tr")?;
    let td = selector("td")?;
    Ok(table
        .select(&tr)
        .next()
        .map(|row| {
            row.select(&td)
                .filter_map(element_text)
                .map(|t| t.to_lowercase())
                .collect()
        })
        .unwrap_or_default())
}

/// Data rows of a table: `tbody tr` when present, otherwise every `tr` after
/// the header row.
fn table_rows(table: ElementRef) -> Result<Vec<ElementRef>, ParseError> {
    let tbody_tr = selector("tbody tr")?;
    let rows: Vec<ElementRef> = table.select(&tbody_tr).collect();
    if !rows.is_empty() {
        return Ok(rows);
    }
    let tr = selector("tr")?;
    Ok(table.select(&tr).skip(1).collect())
}

fn header_index(headers: &[String], needles: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| needles.iter().any(|n| h.contains(n)))
}

/// A category banner like "Residential Sites" rendered as one spanning cell.
fn is_category_row(cells: &[ElementRef]) -> bool {
    cells.len() == 1 && cells[0].value().attr("colspan").is_some()
}

fn cell_text(cells: &[ElementRef], index: Option<usize>) -> String {
    index
        .and_then(|i| cells.get(i).copied())
        .and_then(element_text)
        .unwrap_or_default()
}

/// Parse the GLS listing page into one record per site row.
///
/// Finds the first table carrying Location and Status columns, maps the
/// remaining columns by header text, and walks its rows. A row missing its
/// location is malformed and skipped with a warning; the rest of the table
/// still parses.
pub fn parse_listing(
    html: &str,
    base_url: &str,
    seen_at: DateTime<Utc>,
) -> Result<Vec<ListingRecord>, ParseError> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let td = selector("td")?;
    let anchor = selector("a[href]")?;

    for table in document.select(&table_sel) {
        let headers = table_headers(table)?;
        let location_col = header_index(&headers, &["location"]);
        let status_col = header_index(&headers, &["status"]);
        if location_col.is_none() || status_col.is_none() {
            continue;
        }
        let no_col = headers.iter().position(|h| h == "no" || h == "no.");
        let area_col = header_index(&headers, &["site area", "area"]);
        let gpr_col = header_index(&headers, &["gross plot ratio", "plot ratio"]);

        let mut records = Vec::new();
        for row in table_rows(table)? {
            let cells: Vec<ElementRef> = row.select(&td).collect();
            if is_category_row(&cells) {
                continue;
            }
            if cells.len() < 3 {
                continue;
            }

            let location = cell_text(&cells, location_col);
            if location.is_empty() {
                warn!("skipping listing row without a location");
                continue;
            }

            let detail_url = location_col
                .and_then(|i| cells.get(i).copied())
                .and_then(|cell| cell.select(&anchor).next())
                .and_then(|a| a.value().attr("href"))
                .map(|href| absolutize(base_url, href));

            records.push(ListingRecord {
                site_no: cell_text(&cells, no_col),
                location,
                site_area_ha: cell_text(&cells, area_col),
                gross_plot_ratio: cell_text(&cells, gpr_col),
                status: SiteStatus::parse(&cell_text(&cells, status_col)),
                detail_url,
                seen_at,
            });
        }

        if !records.is_empty() {
            return Ok(records);
        }
    }

    warn!("no site table found in listing page");
    Ok(Vec::new())
}

/// Value cell of the first row whose label cell matches one of `labels`,
/// case-insensitively. Detail pages render attributes as label/value rows.
fn labeled_text(document: &Html, labels: &[&str]) -> Result<Option<String>, ParseError> {
    let tr = selector("tr")?;
    let cell = selector("th, td")?;
    for row in document.select(&tr) {
        let cells: Vec<ElementRef> = row.select(&cell).collect();
        if cells.len() < 2 {
            continue;
        }
        let Some(label) = element_text(cells[0]) else {
            continue;
        };
        let label = label.to_lowercase();
        if labels.iter().any(|needle| label.contains(needle)) {
            return Ok(element_text(cells[1]));
        }
    }
    Ok(None)
}

/// First number in a string, tolerating thousands separators, currency
/// prefixes, and trailing units.
pub fn extract_number(text: &str) -> Option<f64> {
    let cleaned: String = text.replace(',', "");
    let mut current = String::new();
    let mut seen_dot = false;
    for ch in cleaned.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == '.' && !seen_dot && !current.is_empty() {
            current.push(ch);
            seen_dot = true;
            continue;
        }
        if !current.is_empty() {
            break;
        }
    }
    current.parse::<f64>().ok()
}

/// Parse a date cell in any of the forms the source has been seen to use.
pub fn parse_cell_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    for format in [
        gls_core::CELL_DATE_FORMAT,
        "%Y-%m-%d",
        "%d-%m-%Y",
        "%d %b %Y",
        "%d %B %Y",
    ] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

fn labeled_date(document: &Html, labels: &[&str]) -> Result<Option<NaiveDate>, ParseError> {
    Ok(labeled_text(document, labels)?
        .as_deref()
        .and_then(parse_cell_date))
}

fn labeled_number(document: &Html, labels: &[&str]) -> Result<Option<f64>, ParseError> {
    Ok(labeled_text(document, labels)?
        .as_deref()
        .and_then(extract_number))
}

/// Extract the fixed field set from a project detail page. Every lookup is
/// independent; a missing label leaves its field `None` and the record is
/// still returned.
pub fn parse_detail(html: &str) -> Result<ProjectDetail, ParseError> {
    let document = Html::parse_document(html);

    Ok(ProjectDetail {
        tenure: labeled_text(&document, &["tenure", "lease period"])?,
        site_area_sqm: labeled_number(&document, &["site area"])?,
        allowable_development: labeled_text(
            &document,
            &["type of development", "allowable development"],
        )?,
        date_of_launch: labeled_date(&document, &["date of launch"])?,
        date_of_tender_closing: labeled_date(&document, &["date of tender closing"])?,
        date_of_award: labeled_date(&document, &["date of award"])?,
        successful_tenderer: labeled_text(&document, &["successful tenderer"])?,
        tender_price: labeled_number(&document, &["tender price", "tendered price"])?,
    })
}

/// Parse the vacant-sites listing into one flat record per row.
pub fn parse_vacant_sites(
    html: &str,
    seen_at: DateTime<Utc>,
) -> Result<Vec<VacantSite>, ParseError> {
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let td = selector("td")?;

    for table in document.select(&table_sel) {
        let headers = table_headers(table)?;
        let location_col = header_index(&headers, &["location"]);
        let launch_col = header_index(&headers, &["date of launch"]);
        if location_col.is_none() || launch_col.is_none() {
            continue;
        }
        let award_col = header_index(&headers, &["date of award"]);
        let development_col = header_index(&headers, &["development"]);
        let lease_col = header_index(&headers, &["lease"]);
        let area_col = header_index(&headers, &["site area"]);
        let tenderer_col = header_index(&headers, &["tenderer"]);
        let price_col = header_index(&headers, &["price"]);

        let mut sites = Vec::new();
        for row in table_rows(table)? {
            let cells: Vec<ElementRef> = row.select(&td).collect();
            if is_category_row(&cells) || cells.len() < 2 {
                continue;
            }

            let location = cell_text(&cells, location_col);
            if location.is_empty() {
                warn!("skipping vacant-sites row without a location");
                continue;
            }

            sites.push(VacantSite {
                location,
                date_of_launch: parse_cell_date(&cell_text(&cells, launch_col)),
                date_of_award: parse_cell_date(&cell_text(&cells, award_col)),
                allowable_development: text_or_none(cell_text(&cells, development_col)),
                lease_years: extract_number(&cell_text(&cells, lease_col)).map(|n| n as u32),
                site_area_sqm: extract_number(&cell_text(&cells, area_col)),
                successful_tenderer: text_or_none(cell_text(&cells, tenderer_col)),
                tender_price: extract_number(&cell_text(&cells, price_col)),
                first_seen: seen_at,
                last_updated: seen_at,
            });
        }

        if !sites.is_empty() {
            return Ok(sites);
        }
    }

    warn!("no site table found in vacant-sites page");
    Ok(Vec::new())
}

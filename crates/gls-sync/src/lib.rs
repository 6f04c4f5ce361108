//! Run pipeline: fetch, parse, merge, and persist the tracker workbook.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use gls_adapters::{extract_number, parse_detail, parse_listing, parse_vacant_sites};
use gls_core::{
    AwardedRow, ListingRecord, ProjectDetail, SiteStatus, TableRow, VacantSite, CELL_DATE_FORMAT,
};
use gls_storage::{
    FetchError, HttpClientConfig, HttpFetcher, PageArchive, RetryPolicy,
};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gls-sync";

pub const AWARDED_SHEET: &str = "Awarded Sites";
pub const VACANT_SHEET: &str = "Vacant Sites";

const AWARDED_COLUMNS: &[&str] = &[
    "No",
    "Location",
    "Site Area (Ha)",
    "Gross Plot Ratio",
    "Status",
    "Link",
    "Tenure",
    "Site Area (m2)",
    "Type of Development Allowed",
    "Date of Launch",
    "Date of Tender Closing",
    "Date of Award",
    "Successful Tenderer",
    "Successful Tender Price",
    "First Seen",
    "Last Updated",
];

const VACANT_COLUMNS: &[&str] = &[
    "Location",
    "Date of Launch",
    "Date of Award",
    "Type of Development Allowed",
    "Lease (years)",
    "Site Area (m2)",
    "Successful Tenderer",
    "Successful Tender Price",
    "First Seen",
    "Last Updated",
];

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub listing_url: String,
    pub vacant_url: String,
    pub output_path: PathBuf,
    pub archive_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub request_interval_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://www.ura.gov.sg/Corporate/Land-Sales/Current-URA-GLS-Sites"
                .to_string(),
            vacant_url: "https://www.ura.gov.sg/Corporate/Land-Sales/Past-Sale-Sites".to_string(),
            output_path: PathBuf::from("ura_land_sales.xlsx"),
            archive_dir: PathBuf::from("archive"),
            reports_dir: PathBuf::from("reports"),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
            http_timeout_secs: 20,
            request_interval_ms: 2000,
            max_retries: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl TrackerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listing_url: std::env::var("GLS_LISTING_URL").unwrap_or(defaults.listing_url),
            vacant_url: std::env::var("GLS_VACANT_URL").unwrap_or(defaults.vacant_url),
            output_path: std::env::var("GLS_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_path),
            archive_dir: std::env::var("GLS_ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
            reports_dir: std::env::var("GLS_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reports_dir),
            user_agent: std::env::var("GLS_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("GLS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            request_interval_ms: std::env::var("GLS_REQUEST_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_interval_ms),
            max_retries: std::env::var("GLS_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay_ms: std::env::var("GLS_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome<R> {
    pub rows: Vec<R>,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Merge this run's records into the persisted table. Existing keys are
/// overwritten in place (last-write-wins), new keys are appended at the end,
/// and rows absent from `incoming` are retained: dropping off today's listing
/// does not mean the site stopped existing.
pub fn merge<R: TableRow>(existing: Vec<R>, incoming: Vec<R>) -> MergeOutcome<R> {
    let mut rows = existing;
    let mut index: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.key(), i))
        .collect();

    let mut added = 0usize;
    let mut updated = 0usize;
    let mut unchanged = 0usize;

    for mut record in incoming {
        match index.get(&record.key()) {
            Some(&i) => {
                if record.same_fields(&rows[i]) {
                    unchanged += 1;
                } else {
                    updated += 1;
                }
                record.inherit_history(&rows[i]);
                rows[i] = record;
            }
            None => {
                index.insert(record.key(), rows.len());
                rows.push(record);
                added += 1;
            }
        }
    }

    MergeOutcome {
        rows,
        added,
        updated,
        unchanged,
    }
}

enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

fn text_cell(value: &str) -> Cell {
    if value.trim().is_empty() {
        Cell::Empty
    } else {
        Cell::Text(value.trim().to_string())
    }
}

fn opt_text_cell(value: Option<&str>) -> Cell {
    value.map(text_cell).unwrap_or(Cell::Empty)
}

fn number_cell(value: Option<f64>) -> Cell {
    value.map(Cell::Number).unwrap_or(Cell::Empty)
}

fn date_cell(value: Option<NaiveDate>) -> Cell {
    value
        .map(|d| Cell::Text(d.format(CELL_DATE_FORMAT).to_string()))
        .unwrap_or(Cell::Empty)
}

fn timestamp_cell(value: DateTime<Utc>) -> Cell {
    Cell::Text(value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn awarded_cells(row: &AwardedRow) -> Vec<Cell> {
    vec![
        text_cell(&row.site_no),
        text_cell(&row.location),
        text_cell(&row.site_area_ha),
        text_cell(&row.gross_plot_ratio),
        Cell::Text(row.status.as_str().to_string()),
        opt_text_cell(row.detail_url.as_deref()),
        opt_text_cell(row.tenure.as_deref()),
        number_cell(row.site_area_sqm),
        opt_text_cell(row.allowable_development.as_deref()),
        date_cell(row.date_of_launch),
        date_cell(row.date_of_tender_closing),
        date_cell(row.date_of_award),
        opt_text_cell(row.successful_tenderer.as_deref()),
        number_cell(row.tender_price),
        timestamp_cell(row.first_seen),
        timestamp_cell(row.last_updated),
    ]
}

fn vacant_cells(site: &VacantSite) -> Vec<Cell> {
    vec![
        text_cell(&site.location),
        date_cell(site.date_of_launch),
        date_cell(site.date_of_award),
        opt_text_cell(site.allowable_development.as_deref()),
        number_cell(site.lease_years.map(f64::from)),
        number_cell(site.site_area_sqm),
        opt_text_cell(site.successful_tenderer.as_deref()),
        number_cell(site.tender_price),
        timestamp_cell(site.first_seen),
        timestamp_cell(site.last_updated),
    ]
}

fn write_sheet<I>(sheet: &mut Worksheet, columns: &[&str], rows: I) -> Result<(), XlsxError>
where
    I: Iterator<Item = Vec<Cell>>,
{
    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::Silver)
        .set_align(FormatAlign::Center);

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for (col, title) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header_format)?;
    }

    let mut row_no = 1u32;
    for cells in rows {
        for (col, cell) in cells.iter().enumerate() {
            match cell {
                Cell::Text(text) => {
                    widths[col] = widths[col].max(text.len());
                    sheet.write_string(row_no, col as u16, text.as_str())?;
                }
                Cell::Number(value) => {
                    widths[col] = widths[col].max(format!("{value}").len());
                    sheet.write_number(row_no, col as u16, *value)?;
                }
                Cell::Empty => {}
            }
        }
        row_no += 1;
    }

    for (col, width) in widths.iter().enumerate() {
        sheet.set_column_width(col as u16, (*width).min(50) as f64 + 2.0)?;
    }

    Ok(())
}

/// Render both tables to the workbook and replace the destination atomically
/// (write to a temp path, then rename over the target).
pub fn write_workbook(path: &Path, awarded: &[AwardedRow], vacant: &[VacantSite]) -> Result<()> {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name(AWARDED_SHEET).context("naming awarded sheet")?;
    write_sheet(sheet, AWARDED_COLUMNS, awarded.iter().map(awarded_cells))
        .context("rendering awarded sheet")?;

    let sheet = workbook.add_worksheet();
    sheet.set_name(VACANT_SHEET).context("naming vacant sheet")?;
    write_sheet(sheet, VACANT_COLUMNS, vacant.iter().map(vacant_cells))
        .context("rendering vacant sheet")?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("creating output directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.xlsx.tmp", Uuid::new_v4()));
    workbook
        .save(&temp_path)
        .with_context(|| format!("writing temp workbook {}", temp_path.display()))?;

    match std::fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = std::fs::remove_file(&temp_path);
            Err(err).with_context(|| {
                format!(
                    "atomically renaming temp workbook {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            })
        }
    }
}

fn header_map(header: &[Data]) -> HashMap<String, usize> {
    header
        .iter()
        .enumerate()
        .filter_map(|(i, cell)| match cell {
            Data::String(s) => Some((s.trim().to_string(), i)),
            _ => None,
        })
        .collect()
}

fn cell_string(row: &[Data], col: Option<usize>) -> String {
    let Some(cell) = col.and_then(|i| row.get(i)) else {
        return String::new();
    };
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => format!("{f}"),
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn cell_number(row: &[Data], col: Option<usize>) -> Option<f64> {
    match col.and_then(|i| row.get(i))? {
        Data::Float(f) => Some(*f),
        Data::Int(n) => Some(*n as f64),
        Data::String(s) => extract_number(s),
        _ => None,
    }
}

fn cell_date(row: &[Data], col: Option<usize>) -> Option<NaiveDate> {
    match col.and_then(|i| row.get(i))? {
        Data::String(s) => gls_adapters::parse_cell_date(s),
        Data::DateTime(dt) => dt.as_datetime().map(|d| d.date()),
        _ => None,
    }
}

fn cell_timestamp(row: &[Data], col: Option<usize>) -> Option<DateTime<Utc>> {
    let text = cell_string(row, col);
    DateTime::parse_from_rfc3339(&text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn awarded_from_range(range: &Range<Data>, loaded_at: DateTime<Utc>) -> Vec<AwardedRow> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let columns = header_map(header);
    let col = |name: &str| columns.get(name).copied();

    let mut out = Vec::new();
    for row in rows {
        let location = cell_string(row, col("Location"));
        if location.is_empty() {
            warn!("skipping awarded sheet row without a location");
            continue;
        }
        out.push(AwardedRow {
            site_no: cell_string(row, col("No")),
            location,
            site_area_ha: cell_string(row, col("Site Area (Ha)")),
            gross_plot_ratio: cell_string(row, col("Gross Plot Ratio")),
            status: SiteStatus::parse(&cell_string(row, col("Status"))),
            detail_url: non_empty(cell_string(row, col("Link"))),
            tenure: non_empty(cell_string(row, col("Tenure"))),
            site_area_sqm: cell_number(row, col("Site Area (m2)")),
            allowable_development: non_empty(cell_string(row, col("Type of Development Allowed"))),
            date_of_launch: cell_date(row, col("Date of Launch")),
            date_of_tender_closing: cell_date(row, col("Date of Tender Closing")),
            date_of_award: cell_date(row, col("Date of Award")),
            successful_tenderer: non_empty(cell_string(row, col("Successful Tenderer"))),
            tender_price: cell_number(row, col("Successful Tender Price")),
            first_seen: cell_timestamp(row, col("First Seen")).unwrap_or(loaded_at),
            last_updated: cell_timestamp(row, col("Last Updated")).unwrap_or(loaded_at),
        });
    }
    out
}

fn vacant_from_range(range: &Range<Data>, loaded_at: DateTime<Utc>) -> Vec<VacantSite> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let columns = header_map(header);
    let col = |name: &str| columns.get(name).copied();

    let mut out = Vec::new();
    for row in rows {
        let location = cell_string(row, col("Location"));
        if location.is_empty() {
            warn!("skipping vacant sheet row without a location");
            continue;
        }
        out.push(VacantSite {
            location,
            date_of_launch: cell_date(row, col("Date of Launch")),
            date_of_award: cell_date(row, col("Date of Award")),
            allowable_development: non_empty(cell_string(row, col("Type of Development Allowed"))),
            lease_years: cell_number(row, col("Lease (years)")).map(|n| n as u32),
            site_area_sqm: cell_number(row, col("Site Area (m2)")),
            successful_tenderer: non_empty(cell_string(row, col("Successful Tenderer"))),
            tender_price: cell_number(row, col("Successful Tender Price")),
            first_seen: cell_timestamp(row, col("First Seen")).unwrap_or(loaded_at),
            last_updated: cell_timestamp(row, col("Last Updated")).unwrap_or(loaded_at),
        });
    }
    out
}

/// Load both tables from the workbook written by a previous run. A missing
/// file or sheet is an empty table, not an error: the first run starts from
/// nothing, and either job may run before the other has ever written its
/// sheet.
pub fn read_workbook(
    path: &Path,
    loaded_at: DateTime<Utc>,
) -> Result<(Vec<AwardedRow>, Vec<VacantSite>)> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut workbook: Xlsx<_> =
        open_workbook(path).with_context(|| format!("opening workbook {}", path.display()))?;

    let awarded = match workbook.worksheet_range(AWARDED_SHEET) {
        Ok(range) => awarded_from_range(&range, loaded_at),
        Err(_) => Vec::new(),
    };
    let vacant = match workbook.worksheet_range(VACANT_SHEET) {
        Ok(range) => vacant_from_range(&range, loaded_at),
        Err(_) => Vec::new(),
    };

    Ok((awarded, vacant))
}

/// Pair each awarded listing record with its detail fetch outcome. A failed
/// fetch keeps the listing fields (empty detail) and counts as a failure
/// rather than dropping the record or aborting the run.
pub fn assemble_awarded_rows(
    records: Vec<ListingRecord>,
    details: Vec<Result<ProjectDetail, FetchError>>,
    now: DateTime<Utc>,
) -> (Vec<AwardedRow>, usize) {
    let mut fetch_failures = 0usize;
    let rows = records
        .iter()
        .zip(details)
        .map(|(record, detail)| {
            let detail = detail.unwrap_or_else(|_| {
                fetch_failures += 1;
                ProjectDetail::default()
            });
            AwardedRow::from_listing(record, detail, now)
        })
        .collect();
    (rows, fetch_failures)
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub listed: usize,
    pub awarded: usize,
    pub enriched: usize,
    pub fetch_failures: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rows_total: usize,
    pub output_path: String,
}

pub struct TrackerPipeline {
    config: TrackerConfig,
    archive: PageArchive,
    http: HttpFetcher,
}

impl TrackerPipeline {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let archive = PageArchive::new(config.archive_dir.clone());
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            request_interval: Duration::from_millis(config.request_interval_ms),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                retry_delay: Duration::from_millis(config.retry_delay_ms),
            },
        })?;
        Ok(Self {
            config,
            archive,
            http,
        })
    }

    /// One pass of the GLS job. The listing fetch is the only fatal fetch:
    /// without it there is nothing to process.
    pub async fn run_gls_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, url = %self.config.listing_url, "fetching GLS listing page");

        let page = self
            .http
            .fetch(run_id, "gls-listing", &self.config.listing_url)
            .await
            .context("fetching the GLS listing page")?;
        self.archive
            .store_page(page.fetched_at, "gls-listing", &page.body)
            .await?;

        let records = parse_listing(&page.body_text(), &self.config.listing_url, page.fetched_at)
            .context("parsing the GLS listing page")?;
        let listed = records.len();
        let awarded_records: Vec<ListingRecord> = records
            .into_iter()
            .filter(|r| r.status == SiteStatus::Awarded)
            .collect();
        info!(listed, awarded = awarded_records.len(), "parsed GLS listing");

        let mut details = Vec::with_capacity(awarded_records.len());
        for record in &awarded_records {
            details.push(self.fetch_detail(run_id, record).await);
        }
        let awarded_count = awarded_records.len();
        let (incoming, fetch_failures) = assemble_awarded_rows(awarded_records, details, started_at);

        let (existing_awarded, existing_vacant) =
            read_workbook(&self.config.output_path, started_at)
                .context("loading the existing workbook")?;
        let outcome = merge(existing_awarded, incoming);
        write_workbook(&self.config.output_path, &outcome.rows, &existing_vacant)
            .context("writing the workbook")?;

        let summary = RunSummary {
            run_id,
            job: "gls".to_string(),
            started_at,
            finished_at: Utc::now(),
            listed,
            awarded: awarded_count,
            enriched: awarded_count - fetch_failures,
            fetch_failures,
            added: outcome.added,
            updated: outcome.updated,
            unchanged: outcome.unchanged,
            rows_total: outcome.rows.len(),
            output_path: self.config.output_path.display().to_string(),
        };
        self.write_run_report(&summary).await?;
        Ok(summary)
    }

    /// One pass of the vacant-sites job: a flat table, no detail stage.
    pub async fn run_vacant_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, url = %self.config.vacant_url, "fetching vacant-sites page");

        let page = self
            .http
            .fetch(run_id, "vacant-sites", &self.config.vacant_url)
            .await
            .context("fetching the vacant-sites page")?;
        self.archive
            .store_page(page.fetched_at, "vacant-sites", &page.body)
            .await?;

        let sites = parse_vacant_sites(&page.body_text(), page.fetched_at)
            .context("parsing the vacant-sites page")?;
        let listed = sites.len();
        info!(listed, "parsed vacant-sites listing");

        let (existing_awarded, existing_vacant) =
            read_workbook(&self.config.output_path, started_at)
                .context("loading the existing workbook")?;
        let outcome = merge(existing_vacant, sites);
        write_workbook(&self.config.output_path, &existing_awarded, &outcome.rows)
            .context("writing the workbook")?;

        let summary = RunSummary {
            run_id,
            job: "vacant-sites".to_string(),
            started_at,
            finished_at: Utc::now(),
            listed,
            awarded: 0,
            enriched: 0,
            fetch_failures: 0,
            added: outcome.added,
            updated: outcome.updated,
            unchanged: outcome.unchanged,
            rows_total: outcome.rows.len(),
            output_path: self.config.output_path.display().to_string(),
        };
        self.write_run_report(&summary).await?;
        Ok(summary)
    }

    async fn fetch_detail(
        &self,
        run_id: Uuid,
        record: &ListingRecord,
    ) -> Result<ProjectDetail, FetchError> {
        let Some(url) = record.detail_url.as_deref() else {
            warn!(site = %record.location, "awarded site has no detail link");
            return Ok(ProjectDetail::default());
        };

        match self.http.fetch(run_id, "gls-detail", url).await {
            Ok(page) => {
                if let Err(err) = self
                    .archive
                    .store_page(page.fetched_at, "gls-detail", &page.body)
                    .await
                {
                    warn!(site = %record.location, %err, "failed to archive detail page");
                }
                match parse_detail(&page.body_text()) {
                    Ok(detail) => Ok(detail),
                    Err(err) => {
                        warn!(site = %record.location, %err, "detail parse failed; keeping listing fields");
                        Ok(ProjectDetail::default())
                    }
                }
            }
            Err(err) => {
                error!(site = %record.location, %err, "detail fetch failed after retries; skipping enrichment");
                Err(err)
            }
        }
    }

    async fn write_run_report(&self, summary: &RunSummary) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.config.reports_dir)
            .await
            .with_context(|| format!("creating {}", self.config.reports_dir.display()))?;
        let path = self
            .config
            .reports_dir
            .join(format!("{}.json", summary.run_id));
        let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    const LISTING_FIXTURE: &str = include_str!("../../gls-adapters/fixtures/gls_listing.html");
    const DETAIL_MEDIA_CIRCLE: &str =
        include_str!("../../gls-adapters/fixtures/detail_media_circle.html");
    const DETAIL_MARINA_SOUTH: &str =
        include_str!("../../gls-adapters/fixtures/detail_marina_south.html");

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, day, 9, 0, 0).single().unwrap()
    }

    fn listing_record(location: &str, url: &str, now: DateTime<Utc>) -> ListingRecord {
        ListingRecord {
            site_no: "1".into(),
            location: location.into(),
            site_area_ha: "0.96".into(),
            gross_plot_ratio: "5.6".into(),
            status: SiteStatus::Awarded,
            detail_url: Some(url.into()),
            seen_at: now,
        }
    }

    fn awarded_row(location: &str, url: &str, tenderer: Option<&str>, now: DateTime<Utc>) -> AwardedRow {
        AwardedRow::from_listing(
            &listing_record(location, url, now),
            ProjectDetail {
                successful_tenderer: tenderer.map(str::to_string),
                ..ProjectDetail::default()
            },
            now,
        )
    }

    #[test]
    fn merge_on_empty_input_preserves_every_row() {
        let existing = vec![
            awarded_row("Site A", "https://example.gov/a", None, ts(1)),
            awarded_row("Site B", "https://example.gov/b", None, ts(1)),
        ];
        let outcome = merge(existing.clone(), Vec::new());
        assert_eq!(outcome.rows, existing);
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.updated, 0);
    }

    #[test]
    fn merge_overwrites_in_place_without_duplicating() {
        let existing = vec![awarded_row("Site A", "https://example.gov/a", None, ts(1))];
        let incoming = vec![awarded_row(
            "Site A",
            "https://example.gov/a",
            Some("Frasers Property"),
            ts(2),
        )];
        let outcome = merge(existing, incoming);

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.added, 0);
        let row = &outcome.rows[0];
        assert_eq!(row.successful_tenderer.as_deref(), Some("Frasers Property"));
        assert_eq!(row.first_seen, ts(1));
        assert_eq!(row.last_updated, ts(2));
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = vec![awarded_row("Site A", "https://example.gov/a", None, ts(1))];
        let incoming = vec![
            awarded_row("Site A", "https://example.gov/a", Some("Tenderer"), ts(2)),
            awarded_row("Site C", "https://example.gov/c", None, ts(2)),
        ];

        let once = merge(existing, incoming.clone());
        let twice = merge(once.rows.clone(), incoming);
        assert_eq!(once.rows, twice.rows);
        assert_eq!(twice.added, 0);
        assert_eq!(twice.updated, 0);
        assert_eq!(twice.unchanged, 2);
    }

    #[test]
    fn merge_appends_new_keys_after_retained_rows() {
        let existing = vec![
            awarded_row("Site A", "https://example.gov/a", None, ts(1)),
            awarded_row("Site B", "https://example.gov/b", None, ts(1)),
        ];
        let incoming = vec![
            awarded_row("Site C", "https://example.gov/c", None, ts(2)),
            awarded_row("Site B", "https://example.gov/b", Some("T"), ts(2)),
        ];
        let outcome = merge(existing, incoming);

        let locations: Vec<_> = outcome.rows.iter().map(|r| r.location.as_str()).collect();
        assert_eq!(locations, vec!["Site A", "Site B", "Site C"]);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.updated, 1);
    }

    #[test]
    fn workbook_round_trips_keys_and_field_values() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ura_land_sales.xlsx");

        let listing = listing_record(
            "Media Circle (Parcel A)",
            "https://example.gov/sites/media-circle",
            ts(1),
        );
        let awarded = vec![AwardedRow::from_listing(
            &listing,
            ProjectDetail {
                tenure: Some("99-year leasehold".into()),
                site_area_sqm: Some(9633.9),
                allowable_development: Some("Residential".into()),
                date_of_launch: NaiveDate::from_ymd_opt(2025, 6, 27),
                date_of_tender_closing: NaiveDate::from_ymd_opt(2026, 3, 4),
                date_of_award: NaiveDate::from_ymd_opt(2026, 3, 18),
                successful_tenderer: Some("Frasers Property Limited".into()),
                tender_price: Some(395_289_000.0),
            },
            ts(1),
        )];
        let vacant = vec![VacantSite {
            location: "Holland Drive".into(),
            date_of_launch: NaiveDate::from_ymd_opt(2025, 2, 28),
            date_of_award: NaiveDate::from_ymd_opt(2025, 8, 12),
            allowable_development: Some("Residential".into()),
            lease_years: Some(99),
            site_area_sqm: Some(15_623.0),
            successful_tenderer: Some("CDL Constellation Pte Ltd".into()),
            tender_price: Some(805_390_000.0),
            first_seen: ts(1),
            last_updated: ts(1),
        }];

        write_workbook(&path, &awarded, &vacant).expect("write workbook");
        let (read_awarded, read_vacant) = read_workbook(&path, ts(2)).expect("read workbook");

        assert_eq!(read_awarded, awarded);
        assert_eq!(read_vacant, vacant);
    }

    #[test]
    fn reading_a_missing_workbook_yields_empty_tables() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("never_written.xlsx");
        let (awarded, vacant) = read_workbook(&path, ts(1)).expect("read");
        assert!(awarded.is_empty());
        assert!(vacant.is_empty());
    }

    #[test]
    fn rewriting_the_workbook_replaces_the_previous_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ura_land_sales.xlsx");

        let first = vec![awarded_row("Site A", "https://example.gov/a", None, ts(1))];
        write_workbook(&path, &first, &[]).expect("first write");

        let second = vec![
            awarded_row("Site A", "https://example.gov/a", None, ts(1)),
            awarded_row("Site B", "https://example.gov/b", None, ts(2)),
        ];
        write_workbook(&path, &second, &[]).expect("second write");

        let (read_awarded, _) = read_workbook(&path, ts(3)).expect("read");
        assert_eq!(read_awarded.len(), 2);
    }

    #[test]
    fn fixture_pipeline_produces_one_enriched_row_per_awarded_site() {
        let now = ts(1);
        let records = parse_listing(
            LISTING_FIXTURE,
            "https://www.ura.gov.sg/Corporate/Land-Sales/Current-URA-GLS-Sites",
            now,
        )
        .expect("parse listing");
        assert_eq!(records.len(), 3);

        let awarded_records: Vec<ListingRecord> = records
            .into_iter()
            .filter(|r| r.status == SiteStatus::Awarded)
            .collect();
        assert_eq!(awarded_records.len(), 2);

        let details: Vec<Result<ProjectDetail, FetchError>> = vec![
            Ok(parse_detail(DETAIL_MEDIA_CIRCLE).expect("media circle fixture")),
            Ok(parse_detail(DETAIL_MARINA_SOUTH).expect("marina south fixture")),
        ];
        let (incoming, fetch_failures) = assemble_awarded_rows(awarded_records, details, now);
        assert_eq!(fetch_failures, 0);

        let outcome = merge(Vec::new(), incoming);
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.added, 2);
        assert!(outcome
            .rows
            .iter()
            .all(|r| r.location != "Punggol Walk"));
        for row in &outcome.rows {
            assert!(row.tenure.is_some());
            assert!(row.site_area_sqm.is_some());
            assert!(row.allowable_development.is_some());
            assert!(row.date_of_launch.is_some());
            assert!(row.date_of_tender_closing.is_some());
            assert!(row.date_of_award.is_some());
            assert!(row.successful_tenderer.is_some());
            assert!(row.tender_price.is_some());
        }

        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ura_land_sales.xlsx");
        write_workbook(&path, &outcome.rows, &[]).expect("write");
        let (read_awarded, _) = read_workbook(&path, ts(2)).expect("read");
        assert_eq!(read_awarded, outcome.rows);
    }

    #[test]
    fn one_failed_detail_fetch_does_not_abort_the_run() {
        let now = ts(1);
        let records = vec![
            listing_record("Media Circle (Parcel A)", "https://example.gov/a", now),
            listing_record("Marina South (Parcel B)", "https://example.gov/b", now),
        ];
        let details: Vec<Result<ProjectDetail, FetchError>> = vec![
            Ok(parse_detail(DETAIL_MEDIA_CIRCLE).expect("media circle fixture")),
            Err(FetchError::HttpStatus {
                status: 503,
                url: "https://example.gov/b".into(),
            }),
        ];

        let (rows, fetch_failures) = assemble_awarded_rows(records, details, now);
        assert_eq!(rows.len(), 2);
        assert_eq!(fetch_failures, 1);

        let enriched: Vec<_> = rows
            .iter()
            .filter(|r| r.successful_tenderer.is_some())
            .collect();
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].location, "Media Circle (Parcel A)");
    }
}

//! CSV persistence.
//!
//! One file per keyword (`results_<keyword>.csv`), append-only and keyed by
//! NAME: before a scrape the file's names pre-seed the collector's dedup
//! set, after it only the new records are appended. Files get a UTF-8 BOM on
//! creation so Excel renders non-ASCII place names correctly.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collector::ListingRecord;
use crate::error::ScrapeError;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// A record rendered for the CSV file and the SSE `data` payload: optional
/// fields become "N/A", website presence becomes "Yes"/"No". Column names
/// match what the dashboard and downstream sheets expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvRow {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "CONTACT NO")]
    pub contact: String,
    #[serde(rename = "GMAIL")]
    pub gmail: String,
    #[serde(rename = "WEBSITE")]
    pub website: String,
    #[serde(rename = "LOCATION")]
    pub location: String,
    #[serde(rename = "WHATSAPP")]
    pub whatsapp: String,
    #[serde(rename = "SCRAPED AT")]
    pub scraped_at: String,
}

impl From<&ListingRecord> for CsvRow {
    fn from(r: &ListingRecord) -> Self {
        let or_na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());
        Self {
            name: r.name.clone(),
            contact: or_na(&r.contact),
            gmail: or_na(&r.email),
            website: if r.has_website { "Yes" } else { "No" }.to_string(),
            location: or_na(&r.address),
            whatsapp: or_na(&r.whatsapp),
            scraped_at: Utc::now().to_rfc3339(),
        }
    }
}

/// `results_<keyword>.csv` under `dir`, with the keyword sanitized to a
/// filesystem-safe slug ("coffee shop, kathmandu" -> "coffee_shop_kathmandu").
pub fn output_path(dir: impl AsRef<Path>, keyword: &str) -> PathBuf {
    let safe: String = keyword
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_' || *c == '-')
        .collect::<String>()
        .trim()
        .replace(char::is_whitespace, "_");
    dir.as_ref().join(format!("results_{safe}.csv"))
}

/// Names already persisted for this keyword, for pre-seeding the dedup set.
/// A missing or unreadable file is an empty set, never an error - a corrupt
/// results file should not block a fresh scrape.
pub fn load_known_names(path: impl AsRef<Path>) -> HashSet<String> {
    let path = path.as_ref();
    if !path.exists() {
        return HashSet::new();
    }

    let mut reader = match csv::Reader::from_path(path) {
        Ok(r) => r,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read existing results, starting fresh");
            return HashSet::new();
        }
    };

    let name_idx = match reader.headers() {
        Ok(headers) => headers.iter().position(|h| h == "NAME"),
        Err(_) => None,
    };
    let Some(name_idx) = name_idx else {
        warn!(path = %path.display(), "results file has no NAME column, starting fresh");
        return HashSet::new();
    };

    reader
        .records()
        .filter_map(|rec| rec.ok())
        .filter_map(|rec| rec.get(name_idx).map(|s| s.to_string()))
        .collect()
}

/// Append records to the keyword's CSV, creating it (BOM + header) on first
/// write. Returns the number of rows written.
pub fn append_records(
    path: impl AsRef<Path>,
    records: &[ListingRecord],
) -> Result<usize, ScrapeError> {
    let path = path.as_ref();
    if records.is_empty() {
        return Ok(0);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let is_new = !path.exists();
    let file = if is_new {
        let mut f = File::create(path)?;
        f.write_all(UTF8_BOM)?;
        f
    } else {
        OpenOptions::new().append(true).open(path)?
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }
    writer.flush()?;

    Ok(records.len())
}

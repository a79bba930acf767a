//! Per-keyword scrape orchestration.
//!
//! The collector itself never retries: a driver fault (browser died, feed
//! never appeared, selector timeout) aborts the attempt and lands here. The
//! runner owns the recovery policy - mark the proxy, wait a jittered few
//! seconds, launch a fresh browser on the next proxy, and try the whole
//! collection again, a bounded number of times. A scrape that merely ran out
//! of listings is a success and is never retried.

use std::collections::HashSet;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::collector::{collect, ListingRecord, PageDriver};
use crate::error::ScrapeError;
use crate::maps::MapsDriver;
use crate::proxy::{Proxy, ProxyRotator};
use crate::store;

/// Knobs for a scrape run. `from_env` is what the server and CLI both use;
/// tests build the struct directly.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub headless: bool,
    pub output_dir: PathBuf,
    /// Attempts per keyword before giving up (driver faults only)
    pub max_attempts: u32,
    /// Consecutive no-progress scrolls before the feed counts as exhausted
    pub max_stall_polls: u32,
    /// Base wait between attempts; actual wait is base plus up to the same
    /// amount of jitter (5s base = the original's 5-10s window)
    pub retry_delay: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            headless: true,
            output_dir: PathBuf::from("."),
            max_attempts: 3,
            max_stall_polls: 50,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl ScrapeSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            headless: std::env::var("HEADLESS")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.headless),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            max_attempts: std::env::var("SCRAPE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            max_stall_polls: std::env::var("MAX_STALL_POLLS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_stall_polls),
            retry_delay: defaults.retry_delay,
        }
    }
}

/// Scrape one keyword end to end: pre-seed dedup from the keyword's CSV,
/// collect up to `target` new listings (retrying driver faults across
/// proxies), then append the new records to the CSV.
///
/// `on_record` fires once per new record as it is collected. A failed
/// attempt discards its partial result and the next attempt starts over
/// against the same pre-seeded dedup set; records already forwarded to
/// `on_record` by a failed attempt are re-collected but not re-forwarded.
pub fn scrape_keyword<F>(
    keyword: &str,
    target: usize,
    settings: &ScrapeSettings,
    rotator: &ProxyRotator,
    mut on_record: F,
) -> Result<Vec<ListingRecord>, ScrapeError>
where
    F: FnMut(&ListingRecord),
{
    let path = store::output_path(&settings.output_dir, keyword);
    let known = store::load_known_names(&path);
    println!(
        "🔎 Scraping '{}' (target {}, {} already on file)",
        keyword,
        target,
        known.len()
    );

    let records = run_attempts(
        |proxy| MapsDriver::open(keyword, proxy, settings.headless),
        target,
        &known,
        settings,
        rotator,
        &mut on_record,
    )?;

    let written = store::append_records(&path, &records)?;
    if written > 0 {
        println!("💾 Appended {} new results to {}", written, path.display());
    } else {
        println!("✗ No new results for '{keyword}'");
    }
    Ok(records)
}

/// The attempt loop, generic over driver construction so it is testable
/// without a browser.
fn run_attempts<D, MkD, F>(
    mut mk_driver: MkD,
    target: usize,
    known: &HashSet<String>,
    settings: &ScrapeSettings,
    rotator: &ProxyRotator,
    mut on_record: F,
) -> Result<Vec<ListingRecord>, ScrapeError>
where
    D: PageDriver,
    MkD: FnMut(Option<&Proxy>) -> Result<D, ScrapeError>,
    F: FnMut(&ListingRecord),
{
    let mut last_err = None;
    // Names already forwarded to the sink. A failed attempt discards its
    // partial Vec, so the next attempt re-collects the same listings; the
    // sink must not see them twice. Kept out of `known` on purpose: they
    // still belong in the final result and the CSV.
    let mut streamed: HashSet<String> = HashSet::new();
    for attempt in 1..=settings.max_attempts {
        if attempt > 1 {
            println!("🔄 Retry attempt {}/{}...", attempt, settings.max_attempts);
        }
        let proxy = rotator.next();

        let outcome = mk_driver(proxy.as_deref()).and_then(|mut driver| {
            collect(
                &mut driver,
                target,
                known,
                settings.max_stall_polls,
                |record: &ListingRecord| {
                    if streamed.insert(record.name.clone()) {
                        on_record(record);
                    }
                },
            )
        });

        match outcome {
            Ok(records) => {
                if let Some(proxy) = &proxy {
                    rotator.mark_success(proxy);
                }
                println!(
                    "✅ Attempt {}/{}: collected {} listings",
                    attempt,
                    settings.max_attempts,
                    records.len()
                );
                return Ok(records);
            }
            Err(e) if e.is_driver_fault() => {
                if let Some(proxy) = &proxy {
                    rotator.mark_failure(proxy);
                }
                warn!(attempt, error = %e, "attempt failed");
                println!("❌ Attempt {}/{}: {}", attempt, settings.max_attempts, e);
                if attempt < settings.max_attempts && !settings.retry_delay.is_zero() {
                    let jitter = settings
                        .retry_delay
                        .mul_f64(rand::thread_rng().gen_range(0.0..1.0));
                    let wait = settings.retry_delay + jitter;
                    println!("⏳ Waiting {:.1}s before retry...", wait.as_secs_f64());
                    thread::sleep(wait);
                }
                last_err = Some(e);
            }
            // Bad target, CSV trouble etc. - retrying cannot help
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| ScrapeError::Browser("no attempts were made".into())))
}

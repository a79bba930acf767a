//! Incremental listing collection.
//!
//! The feed on a maps search page loads lazily: each scroll reveals a few
//! more listings and re-renders the ones already on screen. `collect` keeps
//! scrolling and re-enumerating until it has `target` distinct listings or
//! the feed stops producing new ones for `max_stall_polls` consecutive
//! scrolls. Dedup is by the listing's accessible label (its `aria-label`),
//! which is also the key the CSV store merges on across runs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScrapeError;

/// One collected listing. Fields the page did not expose are `None`;
/// they only become "N/A" strings at the CSV / SSE boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Accessible label of the listing. Stable per place, used as dedup key.
    pub name: String,
    pub contact: Option<String>,
    pub email: Option<String>,
    pub has_website: bool,
    pub address: Option<String>,
    pub whatsapp: Option<String>,
}

/// Detail fields for a single listing, as extracted by the driver.
///
/// Extraction is best-effort per field: the driver converts its own partial
/// failures (missing button, unreadable panel) to `None` before this struct
/// crosses the trait boundary, so a bad field never drops the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDetails {
    pub contact: Option<String>,
    pub email: Option<String>,
    pub has_website: bool,
    pub address: Option<String>,
    pub whatsapp: Option<String>,
}

impl ListingRecord {
    pub fn new(name: String, details: ListingDetails) -> Self {
        Self {
            name,
            contact: details.contact,
            email: details.email,
            has_website: details.has_website,
            address: details.address,
            whatsapp: details.whatsapp,
        }
    }
}

/// Capability the collector needs from a results page.
///
/// Implementations own all browser/DOM specifics. Only `poll_feed` and
/// `visible_handles` may fail (navigation-level faults, surfaced to the
/// runner's retry loop); `identifier_of` and `details_of` are best-effort
/// and must not fail past this boundary.
pub trait PageDriver {
    type Handle;

    /// Perform one scroll/expand step on the results feed. May block while
    /// the page renders.
    fn poll_feed(&mut self) -> Result<(), ScrapeError>;

    /// Snapshot of the currently rendered listing handles, in display order.
    fn visible_handles(&mut self) -> Result<Vec<Self::Handle>, ScrapeError>;

    /// Stable identifier of a listing, if it has one. Listings without a
    /// label are skipped entirely.
    fn identifier_of(&self, handle: &Self::Handle) -> Option<String>;

    /// Open the listing's detail view and extract its fields.
    fn details_of(&mut self, handle: &Self::Handle) -> ListingDetails;
}

/// Collect up to `target` distinct listings from `driver`.
///
/// `known` pre-seeds the dedup set with identifiers from previous runs, so
/// re-running the same keyword only yields listings not already on disk.
/// `on_record` is invoked once per newly collected record, in discovery
/// order, before the final `Vec` is returned - the SSE endpoint streams from
/// it, the CLI prints progress from it.
///
/// Terminates when `target` is reached or when `max_stall_polls` consecutive
/// polls produced no new record (feed exhausted). The latter is normal
/// termination, not an error: the partial (possibly empty) result is
/// returned. Driver faults propagate unretried; retry policy lives in the
/// runner.
///
/// `target == 0` is rejected with [`ScrapeError::InvalidTarget`].
pub fn collect<D, F>(
    driver: &mut D,
    target: usize,
    known: &HashSet<String>,
    max_stall_polls: u32,
    mut on_record: F,
) -> Result<Vec<ListingRecord>, ScrapeError>
where
    D: PageDriver,
    F: FnMut(&ListingRecord),
{
    if target == 0 {
        return Err(ScrapeError::InvalidTarget);
    }

    let mut seen: HashSet<String> = known.clone();
    let mut collected: Vec<ListingRecord> = Vec::new();
    let mut stall: u32 = 0;

    while collected.len() < target && stall < max_stall_polls {
        driver.poll_feed()?;

        let before = collected.len();
        let handles = driver.visible_handles()?;
        debug!(visible = handles.len(), collected = before, "feed polled");

        for handle in &handles {
            if collected.len() >= target {
                break;
            }
            let name = match driver.identifier_of(handle) {
                Some(n) if !n.is_empty() => n,
                _ => continue,
            };
            if seen.contains(&name) {
                continue;
            }

            let record = ListingRecord::new(name.clone(), driver.details_of(handle));
            seen.insert(name);
            on_record(&record);
            collected.push(record);
        }

        if collected.len() == before {
            stall += 1;
            debug!(stall, max_stall_polls, "no new listings after scroll");
        } else {
            stall = 0;
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted driver: a fixed set of labelled listings, optionally growing
    /// by `reveal_per_poll` on every scroll, with call counting.
    struct FakeDriver {
        listings: Vec<(Option<String>, ListingDetails)>,
        revealed: usize,
        reveal_per_poll: usize,
        polls: u32,
    }

    impl FakeDriver {
        fn with_labels(labels: &[&str]) -> Self {
            let listings = labels
                .iter()
                .map(|l| {
                    (
                        Some(l.to_string()),
                        ListingDetails {
                            contact: Some(format!("phone-{l}")),
                            ..Default::default()
                        },
                    )
                })
                .collect::<Vec<_>>();
            let revealed = listings.len();
            Self {
                listings,
                revealed,
                reveal_per_poll: 0,
                polls: 0,
            }
        }

        fn growing(labels: &[&str], initial: usize, per_poll: usize) -> Self {
            let mut d = Self::with_labels(labels);
            d.revealed = initial;
            d.reveal_per_poll = per_poll;
            d
        }
    }

    impl PageDriver for FakeDriver {
        type Handle = usize;

        fn poll_feed(&mut self) -> Result<(), ScrapeError> {
            self.polls += 1;
            // Growing feeds reveal more only on every second poll, so the
            // stall counter gets exercised between reveals.
            if self.polls % 2 == 0 {
                self.revealed = (self.revealed + self.reveal_per_poll).min(self.listings.len());
            }
            Ok(())
        }

        fn visible_handles(&mut self) -> Result<Vec<usize>, ScrapeError> {
            Ok((0..self.revealed).collect())
        }

        fn identifier_of(&self, handle: &usize) -> Option<String> {
            self.listings[*handle].0.clone()
        }

        fn details_of(&mut self, handle: &usize) -> ListingDetails {
            self.listings[*handle].1.clone()
        }
    }

    fn names(records: &[ListingRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_collects_up_to_target() {
        let mut driver = FakeDriver::with_labels(&["a", "b", "c", "d", "e"]);
        let got = collect(&mut driver, 3, &HashSet::new(), 5, |_| {}).unwrap();
        assert_eq!(names(&got), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejects_zero_target() {
        let mut driver = FakeDriver::with_labels(&["a"]);
        let err = collect(&mut driver, 0, &HashSet::new(), 5, |_| {}).unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidTarget));
    }

    #[test]
    fn test_exhausted_feed_stops_after_stall_bound() {
        // 3 unique listings, target 10, stall bound 2: first poll yields 3,
        // the next two yield nothing, loop ends with exactly 3 records.
        let mut driver = FakeDriver::with_labels(&["a", "b", "c"]);
        let got = collect(&mut driver, 10, &HashSet::new(), 2, |_| {}).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(driver.polls, 3);
    }

    #[test]
    fn test_frozen_feed_polls_exactly_stall_bound_times() {
        // Every listing already known: every poll stalls, independent of target.
        let known: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let mut driver = FakeDriver::with_labels(&["a", "b"]);
        let got = collect(&mut driver, 100, &known, 4, |_| {}).unwrap();
        assert!(got.is_empty());
        assert_eq!(driver.polls, 4);
    }

    #[test]
    fn test_known_identifiers_skipped_and_not_counted() {
        let known: HashSet<String> = ["b"].iter().map(|s| s.to_string()).collect();
        let mut driver = FakeDriver::with_labels(&["a", "b", "c"]);
        let got = collect(&mut driver, 2, &known, 3, |_| {}).unwrap();
        assert_eq!(names(&got), vec!["a", "c"]);
    }

    #[test]
    fn test_duplicate_labels_collected_once() {
        let mut driver = FakeDriver::with_labels(&["a", "a", "b", "a"]);
        let got = collect(&mut driver, 10, &HashSet::new(), 1, |_| {}).unwrap();
        assert_eq!(names(&got), vec!["a", "b"]);
    }

    #[test]
    fn test_unlabelled_listings_skipped() {
        let mut driver = FakeDriver::with_labels(&["a", "b"]);
        driver.listings[0].0 = None;
        driver.listings.push((Some(String::new()), ListingDetails::default()));
        driver.revealed = 3;
        let got = collect(&mut driver, 10, &HashSet::new(), 1, |_| {}).unwrap();
        assert_eq!(names(&got), vec!["b"]);
    }

    #[test]
    fn test_stall_resets_when_feed_grows() {
        // Feed reveals one new listing every other poll; the intermediate
        // stalled polls must not accumulate past the bound.
        let mut driver = FakeDriver::growing(&["a", "b", "c", "d"], 1, 1);
        let got = collect(&mut driver, 4, &HashSet::new(), 2, |_| {}).unwrap();
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn test_all_absent_details_still_yields_record() {
        let mut driver = FakeDriver::with_labels(&["ghost"]);
        driver.listings[0].1 = ListingDetails::default();
        let got = collect(&mut driver, 1, &HashSet::new(), 1, |_| {}).unwrap();
        assert_eq!(got.len(), 1);
        let r = &got[0];
        assert_eq!(r.name, "ghost");
        assert_eq!(r.contact, None);
        assert_eq!(r.email, None);
        assert!(!r.has_website);
        assert_eq!(r.address, None);
        assert_eq!(r.whatsapp, None);
    }

    #[test]
    fn test_second_run_disjoint_from_first() {
        // Resumable append: seeding the second run with the first run's
        // names yields a disjoint result.
        let labels = ["a", "b", "c", "d", "e"];
        let mut driver = FakeDriver::with_labels(&labels);
        let first = collect(&mut driver, 2, &HashSet::new(), 2, |_| {}).unwrap();

        let known: HashSet<String> = first.iter().map(|r| r.name.clone()).collect();
        let mut driver = FakeDriver::with_labels(&labels);
        let second = collect(&mut driver, 10, &known, 2, |_| {}).unwrap();

        assert_eq!(names(&second), vec!["c", "d", "e"]);
        assert!(second.iter().all(|r| !known.contains(&r.name)));
    }

    #[test]
    fn test_sink_sees_records_in_discovery_order() {
        let mut driver = FakeDriver::with_labels(&["a", "b", "c"]);
        let mut streamed = Vec::new();
        let got = collect(&mut driver, 3, &HashSet::new(), 2, |r| {
            streamed.push(r.name.clone())
        })
        .unwrap();
        assert_eq!(streamed, vec!["a", "b", "c"]);
        assert_eq!(streamed.len(), got.len());
    }

    #[test]
    fn test_driver_fault_propagates() {
        struct FaultyDriver;
        impl PageDriver for FaultyDriver {
            type Handle = usize;
            fn poll_feed(&mut self) -> Result<(), ScrapeError> {
                Err(ScrapeError::Navigation("tab crashed".into()))
            }
            fn visible_handles(&mut self) -> Result<Vec<usize>, ScrapeError> {
                Ok(vec![])
            }
            fn identifier_of(&self, _: &usize) -> Option<String> {
                None
            }
            fn details_of(&mut self, _: &usize) -> ListingDetails {
                ListingDetails::default()
            }
        }
        let err = collect(&mut FaultyDriver, 5, &HashSet::new(), 3, |_| {}).unwrap_err();
        assert!(err.is_driver_fault());
    }
}

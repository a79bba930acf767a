//! Streaming Google Maps lead scraper.
//!
//! Drives headless Chrome through a maps keyword search, scroll-collects
//! listings with cross-run deduplication, extracts contact fields per
//! listing, and appends the results to a per-keyword CSV. Exposed two ways:
//! an SSE streaming HTTP API (`main`) and a batch CLI (`scrape`).

pub mod api;
pub mod collector;
pub mod error;
pub mod maps;
pub mod proxy;
pub mod runner;
pub mod stealth;
pub mod store;

pub use collector::{collect, ListingDetails, ListingRecord, PageDriver};
pub use error::ScrapeError;
pub use proxy::{Proxy, ProxyRotator, RotationStrategy};
pub use runner::{scrape_keyword, ScrapeSettings};

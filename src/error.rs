use thiserror::Error;

/// Crate-wide error type.
///
/// The `Browser` / `Navigation` / `FeedNotFound` variants form the
/// driver-fault class: fatal to the current scrape attempt and the only
/// errors the runner retries (with a fresh browser and the next proxy).
/// Everything else fails the run outright. A stalled feed is not an error
/// at all - the collector returns whatever it has.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("target must be greater than zero")]
    InvalidTarget,

    #[error("browser launch failed: {0}")]
    Browser(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("results feed never appeared: {0}")]
    FeedNotFound(String),

    #[error("proxy list error: {0}")]
    Proxy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl ScrapeError {
    /// Driver faults are the only retry trigger. A scrape that simply ran
    /// out of listings terminates normally and must not burn another proxy.
    pub fn is_driver_fault(&self) -> bool {
        matches!(
            self,
            ScrapeError::Browser(_) | ScrapeError::Navigation(_) | ScrapeError::FeedNotFound(_)
        )
    }
}

//! Browser launch hardening.
//!
//! Maps serves automation-flagged sessions a degraded page (or a consent
//! interstitial loop), so every session gets a randomized desktop
//! user-agent, the usual anti-detection launch args, and an init script that
//! masks `navigator.webdriver` before any page script runs.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;

pub static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/123.0.0.0 Safari/537.36",
    ]
});

/// Pick a random desktop user-agent for this session.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36")
}

/// Baseline Chrome args for a scraping session (user-agent, proxy and
/// headless args are appended by the driver).
pub const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-infobars",
    "--window-position=0,0",
    "--ignore-certificate-errors",
    "--incognito",
    "--lang=en-US",
];

/// Init script injected via `Page.addScriptToEvaluateOnNewDocument`, i.e.
/// before any page script can probe the environment.
pub fn get_stealth_script() -> String {
    r#"
        // Unmask: remove `navigator.webdriver`
        Object.defineProperty(navigator, 'webdriver', {
            get: () => undefined,
        });

        // Headless Chrome ships without `window.chrome`; real Chrome has it.
        if (!window.chrome) {
            window.chrome = { runtime: {}, app: { isInstalled: false } };
        }

        // Notification permission should reflect the real state, not 'prompt'
        const originalQuery = window.navigator.permissions.query;
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications' ?
            Promise.resolve({ state: Notification.permission }) :
            originalQuery(parameters)
        );

        // Empty plugin lists are a headless tell
        Object.defineProperty(navigator, 'plugins', {
            get: () => [1, 2, 3],
        });
        Object.defineProperty(navigator, 'languages', {
            get: () => ['en-US', 'en'],
        });
    "#
    .to_string()
}

//! Google Maps page driver.
//!
//! Owns every DOM-level detail of a maps search session: navigation, typing
//! the keyword, waiting for the results feed, scroll-polling, and per-listing
//! detail extraction. The collector only sees the [`PageDriver`] capability;
//! everything in here is free to change when Maps changes its markup.
//!
//! Detail extraction is best-effort per field. A missing phone button or an
//! unreadable panel yields `None` for that field and never fails the record,
//! matching how flaky the details pane is in practice.

use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::collector::{ListingDetails, PageDriver};
use crate::error::ScrapeError;
use crate::proxy::{generate_proxy_auth_extension, Proxy};
use crate::stealth;

const MAPS_URL: &str = "https://www.google.com/maps?hl=en";
const FEED_TIMEOUT: Duration = Duration::from_secs(10);

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w.\-]+@[\w.\-]+\.\w+").unwrap());
/// Strips the localized "Address: " style prefix from button labels.
static LABEL_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^:]+:\s*").unwrap());

/// One visible listing: its position in the feed snapshot plus the
/// `aria-label` captured at enumeration time.
#[derive(Debug, Clone)]
pub struct MapsHandle {
    index: usize,
    label: Option<String>,
}

/// A live maps search session.
pub struct MapsDriver {
    // Kept alive for the session; dropping it closes Chrome.
    _browser: Browser,
    tab: Arc<Tab>,
    render_delay: Duration,
}

impl MapsDriver {
    /// Launch a hardened Chrome session, run the keyword search and wait for
    /// the results feed. Any failure on this path is a driver fault: the
    /// runner reacts by rotating the proxy and starting over.
    pub fn open(keyword: &str, proxy: Option<&Proxy>, headless: bool) -> Result<Self, ScrapeError> {
        let user_agent = stealth::random_user_agent();
        debug!(user_agent, "launching browser");

        let mut args: Vec<&OsStr> = stealth::LAUNCH_ARGS.iter().map(OsStr::new).collect();
        let ua_arg = format!("--user-agent={user_agent}");
        args.push(OsStr::new(&ua_arg));
        if headless {
            args.push(OsStr::new("--headless=new"));
        }

        // Keep the strings alive for the duration of the args borrow
        let proxy_arg: String;
        let ext_arg: String;
        if let Some(proxy) = proxy {
            info!(proxy = %proxy.id, success_rate = proxy.success_rate(), "using proxy");
            proxy_arg = format!("--proxy-server={}", proxy.to_chrome_arg());
            args.push(OsStr::new(&proxy_arg));
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                ext_arg = format!(
                    "--load-extension={}",
                    generate_proxy_auth_extension(user, pass)
                );
                args.push(OsStr::new(&ext_arg));
            }
        }

        let browser = Browser::new(LaunchOptions {
            headless: false, // driven via --headless=new above
            window_size: Some((1920, 1080)),
            args,
            ..Default::default()
        })
        .map_err(|e| ScrapeError::Browser(e.to_string()))?;

        let tab = browser
            .new_tab()
            .map_err(|e| ScrapeError::Browser(e.to_string()))?;

        tab.call_method(
            headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument {
                source: stealth::get_stealth_script(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            },
        )
        .map_err(|e| ScrapeError::Browser(e.to_string()))?;

        let driver = Self {
            _browser: browser,
            tab,
            render_delay: Duration::from_secs(2),
        };
        driver.search(keyword)?;
        Ok(driver)
    }

    fn search(&self, keyword: &str) -> Result<(), ScrapeError> {
        info!(keyword, "opening maps search");
        self.tab
            .navigate_to(MAPS_URL)
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        // Some regions interpose a consent page before Maps loads
        let _ = self.tab.evaluate(
            r#"
            (() => {
                const selectors = ['button[aria-label*="Accept"]', 'form[action*="consent"] button'];
                for (const sel of selectors) {
                    const btn = document.querySelector(sel);
                    if (btn) { btn.click(); }
                }
            })();
            "#,
            false,
        );

        self.tab
            .wait_for_element("input#searchboxinput")
            .map_err(|e| ScrapeError::Navigation(format!("search box: {e}")))?;
        self.tab
            .evaluate(
                r#"
                const input = document.querySelector('input#searchboxinput');
                if (input) { input.click(); input.focus(); input.value = ''; }
                "#,
                false,
            )
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        // Type like a person: one char at a time with jitter
        for ch in keyword.chars() {
            self.tab
                .type_str(&ch.to_string())
                .map_err(|e| ScrapeError::Navigation(e.to_string()))?;
            thread::sleep(Duration::from_millis(
                40 + rand::thread_rng().gen_range(0..80),
            ));
        }
        self.tab
            .press_key("Enter")
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        self.tab
            .wait_for_element_with_custom_timeout("div[role='feed']", FEED_TIMEOUT)
            .map_err(|e| ScrapeError::FeedNotFound(e.to_string()))?;
        Ok(())
    }
}

impl PageDriver for MapsDriver {
    type Handle = MapsHandle;

    fn poll_feed(&mut self) -> Result<(), ScrapeError> {
        self.tab
            .evaluate(
                r#"
                (() => {
                    const feed = document.querySelector('div[role="feed"]');
                    if (feed) { feed.scrollBy(0, 5000); }
                })();
                "#,
                false,
            )
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;
        // Let the feed load the next page
        thread::sleep(self.render_delay + Duration::from_millis(rand::thread_rng().gen_range(0..500)));
        Ok(())
    }

    fn visible_handles(&mut self) -> Result<Vec<MapsHandle>, ScrapeError> {
        let result = self
            .tab
            .evaluate(
                r#"JSON.stringify(Array.from(document.querySelectorAll('div[role="article"]')).map(e => e.getAttribute('aria-label')))"#,
                false,
            )
            .map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        let labels: Vec<Option<String>> = result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();

        Ok(labels
            .into_iter()
            .enumerate()
            .map(|(index, label)| MapsHandle { index, label })
            .collect())
    }

    fn identifier_of(&self, handle: &MapsHandle) -> Option<String> {
        handle.label.clone().filter(|l| !l.is_empty())
    }

    fn details_of(&mut self, handle: &MapsHandle) -> ListingDetails {
        // Click the listing to open its details pane. The feed re-renders as
        // it loads more results, so the snapshot index can go stale; re-match
        // by the captured aria-label instead. Failure to click just means an
        // empty record body - the listing itself is still counted.
        let clicked = handle
            .label
            .as_deref()
            .filter(|l| !l.is_empty())
            .and_then(|label| {
                let selector = format!(
                    "div[role='article'][aria-label='{}']",
                    css_attr_escape(label)
                );
                self.tab.find_element(&selector).ok()
            })
            .map(|el| el.click().is_ok())
            .unwrap_or(false);
        if !clicked {
            debug!(index = handle.index, "could not click listing");
            return ListingDetails::default();
        }
        thread::sleep(self.render_delay);

        match self.tab.get_content() {
            Ok(html) => extract_details(&html),
            Err(_) => ListingDetails::default(),
        }
    }
}

/// Pull the detail fields out of the place panel's HTML. Separated from the
/// driver so the selector logic is testable without a browser.
pub fn extract_details(html: &str) -> ListingDetails {
    let document = Html::parse_document(html);

    let contact = document
        .select(&Selector::parse("button[data-item-id^='phone:']").unwrap())
        .next()
        .and_then(|el| el.value().attr("aria-label"))
        .and_then(clean_phone);

    let has_website = document
        .select(&Selector::parse("a[data-item-id='authority']").unwrap())
        .next()
        .is_some();

    let address = document
        .select(&Selector::parse("button[data-item-id='address']").unwrap())
        .next()
        .and_then(|el| el.value().attr("aria-label"))
        .map(|raw| LABEL_PREFIX_RE.replace(raw, "").trim().to_string())
        .filter(|a| !a.is_empty());

    let (email, mut whatsapp) = match document
        .select(&Selector::parse("div[role='main']").unwrap())
        .next()
    {
        Some(main) => {
            let text = main.text().collect::<Vec<_>>().join(" ");
            let email = EMAIL_RE.find(&text).map(|m| m.as_str().to_string());
            let whatsapp = text
                .to_lowercase()
                .contains("whatsapp")
                .then(|| "Yes (Found in text)".to_string());
            (email, whatsapp)
        }
        None => (None, None),
    };

    // Best-effort fallback: infer WhatsApp support from the phone number
    // when the panel never mentioned it
    if whatsapp.is_none() {
        if let Some(contact) = &contact {
            if has_whatsapp_prefix(contact) {
                whatsapp = Some(contact.clone());
            }
        }
    }

    ListingDetails {
        contact,
        email,
        has_website,
        address,
        whatsapp,
    }
}

/// Reduce a phone button label ("Phone: +977 98-1234-5678") to the number.
pub fn clean_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' '))
        .collect();
    let cleaned = cleaned.trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Escape a value for use inside a single-quoted CSS attribute selector.
/// Listing labels are free text and routinely contain apostrophes
/// ("Mike's Diner").
fn css_attr_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Heuristic: Nepali mobile numbers (98/97 ranges) are overwhelmingly on
/// WhatsApp. Locale-specific and deliberately not extended beyond these
/// prefixes - it is a hint, not a guarantee.
pub fn has_whatsapp_prefix(contact: &str) -> bool {
    let clean = contact.replace([' ', '-'], "");
    clean.starts_with("98")
        || clean.starts_with("97")
        || clean.starts_with("+97798")
        || clean.starts_with("+97797")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PANEL: &str = r#"
        <div role="main">
            <h1>Himalayan Java</h1>
            <button data-item-id="phone:tel:+9779812345678" aria-label="Phone: +977 981-234-5678"></button>
            <a data-item-id="authority" href="https://himalayanjava.com">Website</a>
            <button data-item-id="address" aria-label="Address: Tridevi Marg, Kathmandu 44600"></button>
            <div>Contact us at hello@himalayanjava.com or on WhatsApp</div>
        </div>
    "#;

    #[test]
    fn test_extract_full_panel() {
        let details = extract_details(FULL_PANEL);
        assert_eq!(details.contact.as_deref(), Some("+977 981-234-5678"));
        assert!(details.has_website);
        assert_eq!(
            details.address.as_deref(),
            Some("Tridevi Marg, Kathmandu 44600")
        );
        assert_eq!(details.email.as_deref(), Some("hello@himalayanjava.com"));
        // Explicit mention wins over the prefix inference
        assert_eq!(details.whatsapp.as_deref(), Some("Yes (Found in text)"));
    }

    #[test]
    fn test_css_attr_escape() {
        assert_eq!(css_attr_escape("Mike's Diner"), "Mike\\'s Diner");
        assert_eq!(css_attr_escape(r"a\b"), r"a\\b");
        assert_eq!(css_attr_escape("Himalayan Java"), "Himalayan Java");
    }

    #[test]
    fn test_extract_empty_panel_yields_all_absent() {
        let details = extract_details("<div><p>nothing here</p></div>");
        assert_eq!(details, ListingDetails::default());
    }

    #[test]
    fn test_whatsapp_inferred_from_phone_prefix() {
        let html = r#"
            <div role="main">
                <button data-item-id="phone:tel:9812345678" aria-label="Phone: 981-234-5678"></button>
            </div>
        "#;
        let details = extract_details(html);
        assert_eq!(details.whatsapp.as_deref(), Some("981-234-5678"));
    }

    #[test]
    fn test_no_whatsapp_for_landline() {
        let html = r#"
            <div role="main">
                <button data-item-id="phone:tel:+97714412345" aria-label="Phone: +977 1-441-2345"></button>
            </div>
        "#;
        let details = extract_details(html);
        assert_eq!(details.contact.as_deref(), Some("+977 1-441-2345"));
        assert_eq!(details.whatsapp, None);
    }

    #[test]
    fn test_clean_phone_strips_label_text() {
        assert_eq!(
            clean_phone("Phone: +977 981-234-5678").as_deref(),
            Some("+977 981-234-5678")
        );
        assert_eq!(clean_phone("Phone: ").is_some(), false);
    }

    #[test]
    fn test_whatsapp_prefixes() {
        assert!(has_whatsapp_prefix("98 1234 5678"));
        assert!(has_whatsapp_prefix("97-12-345678"));
        assert!(has_whatsapp_prefix("+977 98 123 45678"));
        assert!(has_whatsapp_prefix("+977 97 123 45678"));
        assert!(!has_whatsapp_prefix("+1 415 555 0100"));
        assert!(!has_whatsapp_prefix("01-4412345"));
    }

    #[test]
    fn test_address_prefix_stripped_whatever_the_locale() {
        let html = r#"
            <div role="main">
                <button data-item-id="address" aria-label="Adresse: 12 Rue de Rivoli, Paris"></button>
            </div>
        "#;
        let details = extract_details(html);
        assert_eq!(details.address.as_deref(), Some("12 Rue de Rivoli, Paris"));
    }
}

//! Per-run browsing session with an anti-bot request posture.
//!
//! A [`BrowserSession`] is launched when a sync run starts and closed when it
//! ends. Every request goes through a fresh [`Page`], which carries its own
//! randomized headers and is released on drop, so no request state leaks into
//! the next one.

use super::error::FetchError;
use super::CatalogSource;
use crate::config::FetchSettings;
use crate::server::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";
const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "en-GB,en;q=0.8", "en-US,en;q=0.7,de;q=0.3"];

const VIEWPORT_WIDTHS: std::ops::Range<u32> = 1280..1921;
const VIEWPORT_HEIGHTS: std::ops::Range<u32> = 720..1081;

/// Headers a page presents for every request it makes.
fn page_headers(user_agents: &[String], accept: &'static str) -> HeaderMap {
    let mut rng = rand::rng();
    let mut headers = HeaderMap::new();

    let user_agent = user_agents
        .choose(&mut rng)
        .map(String::as_str)
        .unwrap_or(DEFAULT_USER_AGENTS[0]);
    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    headers.insert(ACCEPT, HeaderValue::from_static(accept));
    if let Some(language) = ACCEPT_LANGUAGES.choose(&mut rng) {
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(*language));
    }

    let width = rng.random_range(VIEWPORT_WIDTHS);
    let height = rng.random_range(VIEWPORT_HEIGHTS);
    headers.insert("Viewport-Width", HeaderValue::from(width));
    headers.insert("Sec-CH-Viewport-Height", HeaderValue::from(height));
    headers
}

/// Cookie jar holding the operator-supplied session cookies and the
/// clearance token, scoped to the upstream. Cookies the upstream sets during
/// the run replace the seeded ones.
fn seed_cookie_jar(settings: &FetchSettings) -> Result<Arc<Jar>> {
    let url: Url = settings
        .base_url
        .parse()
        .with_context(|| format!("Invalid upstream base URL: {}", settings.base_url))?;
    let jar = Arc::new(Jar::default());

    let pairs = settings
        .cookie
        .as_deref()
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|pair| pair.contains('='));
    for pair in pairs {
        jar.add_cookie_str(pair, &url);
    }
    if let Some(token) = settings
        .clearance_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        jar.add_cookie_str(&format!("cf_clearance={}", token), &url);
    }
    Ok(jar)
}

pub struct BrowserSession {
    client: Client,
    user_agents: Vec<String>,
    open_pages: AtomicUsize,
    pages_opened: AtomicUsize,
    launched_at: Instant,
    closed: AtomicBool,
}

impl BrowserSession {
    /// Start a session: one HTTP client with its own cookie jar.
    pub fn launch(settings: &FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .cookie_provider(seed_cookie_jar(settings)?)
            .gzip(true)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let user_agents = if settings.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            settings.user_agents.clone()
        };

        debug!("Launched browser session ({} user agents)", user_agents.len());
        Ok(Self {
            client,
            user_agents,
            open_pages: AtomicUsize::new(0),
            pages_opened: AtomicUsize::new(0),
            launched_at: Instant::now(),
            closed: AtomicBool::new(false),
        })
    }

    /// Open a fresh page for a single request.
    pub fn open_page(&self, accept: &'static str) -> Result<Page<'_>, FetchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FetchError::Transient {
                url: String::new(),
                reason: "browser session already closed".to_string(),
            });
        }
        self.open_pages.fetch_add(1, Ordering::SeqCst);
        let id = self.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Page {
            session: self,
            headers: page_headers(&self.user_agents, accept),
            id,
        })
    }

    /// Pages currently open. Zero whenever no request is in flight.
    pub fn open_pages(&self) -> usize {
        self.open_pages.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let leaked = self.open_pages();
        if leaked > 0 {
            warn!("Closing browser session with {} pages still open", leaked);
        }
        info!(
            "Closed browser session after {} pages in {:?}",
            self.pages_opened(),
            self.launched_at.elapsed()
        );
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// One navigation. Closes itself when dropped, on success and error alike.
pub struct Page<'a> {
    session: &'a BrowserSession,
    headers: HeaderMap,
    id: usize,
}

impl Page<'_> {
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    async fn navigate(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        debug!("Page {} navigating to {}", self.id, url);
        let response = self
            .session
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        if let Some(err) = FetchError::from_status(url, response.status()) {
            return Err(err);
        }
        Ok(response)
    }

    async fn text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.navigate(url).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))
    }
}

impl Drop for Page<'_> {
    fn drop(&mut self) {
        self.session.open_pages.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogSource for BrowserSession {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let page = self.open_page(ACCEPT_JSON)?;
        let result = page.text(url).await.and_then(|body| {
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed {
                url: url.to_string(),
                reason: e.to_string(),
            })
        });
        drop(page);
        metrics::record_fetch(result.as_ref().err().map(FetchError::kind));
        result
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let page = self.open_page(ACCEPT_HTML)?;
        let result = page.text(url).await;
        drop(page);
        metrics::record_fetch(result.as_ref().err().map(FetchError::kind));
        result
    }
}

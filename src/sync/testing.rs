//! In-memory upstream for strategy tests.

use super::SyncResources;
use crate::catalog_store::SqliteCatalogStore;
use crate::fetch::{CatalogEndpoints, CatalogSource, FetchError, SourceFactory};
use crate::governor::{RateGovernor, RetryPolicy};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const BASE_URL: &str = "https://catalog.test";

#[derive(Clone)]
pub enum Reply {
    Json(Value),
    Html(String),
    Fail(fn(String) -> FetchError),
}

pub fn not_found(url: String) -> FetchError {
    FetchError::NotFound { url }
}

pub fn transient(url: String) -> FetchError {
    FetchError::Transient {
        url,
        reason: "connection reset".to_string(),
    }
}

/// Serves canned replies by URL. Unknown URLs are 404.
#[derive(Default)]
pub struct FakeSource {
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeSource {
    /// Replies for `url` are served in order; the last one repeats.
    pub fn on(&self, url: impl Into<String>, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push(reply);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == url)
            .count()
    }

    fn next(&self, url: &str) -> Result<Reply, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        let mut replies = self.replies.lock().unwrap();
        let Some(queue) = replies.get_mut(url) else {
            return Err(not_found(url.to_string()));
        };
        let reply = if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue[0].clone()
        };
        match reply {
            Reply::Fail(make) => Err(make(url.to_string())),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl CatalogSource for FakeSource {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        match self.next(url)? {
            Reply::Json(value) => Ok(value),
            _ => Err(FetchError::Malformed {
                url: url.to_string(),
                reason: "expected JSON".to_string(),
            }),
        }
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        match self.next(url)? {
            Reply::Html(html) => Ok(html),
            _ => Err(FetchError::Malformed {
                url: url.to_string(),
                reason: "expected HTML".to_string(),
            }),
        }
    }
}

/// Hands out the same fake source to every run.
pub struct FakeSourceFactory(pub Arc<FakeSource>);

impl SourceFactory for FakeSourceFactory {
    fn launch(&self) -> anyhow::Result<Arc<dyn CatalogSource>> {
        Ok(self.0.clone())
    }
}

pub fn fast_governor() -> Arc<RateGovernor> {
    let policy = RetryPolicy {
        max_rate_limit_attempts: 3,
        backoff_base: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        max_transient_attempts: 3,
        transient_base: Duration::from_millis(1),
    };
    Arc::new(RateGovernor::with_policy(Duration::ZERO, policy))
}

pub fn endpoints() -> CatalogEndpoints {
    CatalogEndpoints::new(BASE_URL)
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub catalog_store: Arc<SqliteCatalogStore>,
    pub resources: SyncResources,
    _temp_dir: TempDir,
}

pub fn harness() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let catalog_store = Arc::new(SqliteCatalogStore::new(temp_dir.path().join("catalog.db")).unwrap());
    let source = Arc::new(FakeSource::default());
    let resources = SyncResources {
        source: source.clone(),
        governor: fast_governor(),
        catalog_store: catalog_store.clone(),
        endpoints: endpoints(),
    };
    Harness {
        source,
        catalog_store,
        resources,
        _temp_dir: temp_dir,
    }
}

/// A listing payload with one row per entry.
pub fn listing(total: usize, rows: Vec<Vec<String>>) -> Value {
    serde_json::json!({
        "iTotalRecords": total,
        "iTotalDisplayRecords": total,
        "sEcho": 1,
        "aaData": rows,
    })
}

pub fn band_row(id: i64, name: &str, country: &str, genre: &str) -> Vec<String> {
    vec![
        format!("<a href='{}/bands/{}/{}'>{}</a>", BASE_URL, slug(name), id, name),
        country.to_string(),
        genre.to_string(),
        "<span class=\"active\">Active</span>".to_string(),
    ]
}

pub fn band_page(country: &str) -> String {
    format!(
        "<html><body><div id='band_stats'><dl><dt>Country of origin:</dt><dd>{}</dd></dl></div></body></html>",
        country
    )
}

pub fn slug(name: &str) -> String {
    name.replace(' ', "_")
}

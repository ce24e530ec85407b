//! In-memory upstream catalog.

use async_trait::async_trait;
use catalog_sync::fetch::{CatalogSource, FetchError, SourceFactory};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

enum Page {
    Json(Value),
    Html(String),
}

/// Serves registered pages by URL. Unknown URLs are 404.
#[derive(Default)]
pub struct FakeUpstream {
    pages: Mutex<HashMap<String, Page>>,
    requests: Mutex<Vec<String>>,
}

impl FakeUpstream {
    pub fn json(&self, url: String, body: Value) {
        self.pages.lock().unwrap().insert(url, Page::Json(body));
    }

    pub fn html(&self, url: String, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url, Page::Html(body.to_string()));
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == url)
            .count()
    }

    fn record(&self, url: &str) {
        self.requests.lock().unwrap().push(url.to_string());
    }

    fn malformed(url: &str, reason: &str) -> FetchError {
        FetchError::Malformed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CatalogSource for FakeUpstream {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        self.record(url);
        match self.pages.lock().unwrap().get(url) {
            Some(Page::Json(value)) => Ok(value.clone()),
            Some(Page::Html(_)) => Err(Self::malformed(url, "expected JSON")),
            None => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
        }
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.record(url);
        match self.pages.lock().unwrap().get(url) {
            Some(Page::Html(html)) => Ok(html.clone()),
            Some(Page::Json(_)) => Err(Self::malformed(url, "expected HTML")),
            None => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
        }
    }
}

pub(crate) struct FakeUpstreamFactory(pub Arc<FakeUpstream>);

impl SourceFactory for FakeUpstreamFactory {
    fn launch(&self) -> anyhow::Result<Arc<dyn CatalogSource>> {
        Ok(self.0.clone())
    }
}

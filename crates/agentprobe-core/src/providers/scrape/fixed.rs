use super::Scraper;
use crate::errors::ScrapeError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory scraper serving fixed pages. Unknown URLs fail to fetch.
#[derive(Default)]
pub struct StaticScraper {
    pages: HashMap<String, Result<String, ScrapeError>>,
    fetched: Mutex<Vec<String>>,
}

impl StaticScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), Ok(text.to_string()));
        self
    }

    pub fn failing(mut self, url: &str, err: ScrapeError) -> Self {
        self.pages.insert(url.to_string(), Err(err));
        self
    }

    /// URLs requested so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Scraper for StaticScraper {
    async fn fetch(
        &self,
        url: &str,
        _selector: Option<&str>,
        _timeout: Duration,
    ) -> Result<String, ScrapeError> {
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        match self.pages.get(url) {
            Some(res) => res.clone(),
            None => Err(ScrapeError::FetchFailed(format!("HTTP 404 Not Found: {}", url))),
        }
    }
}

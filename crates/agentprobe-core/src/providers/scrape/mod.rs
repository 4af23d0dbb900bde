use crate::errors::ScrapeError;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

pub mod fixed;
pub mod http;

pub use fixed::StaticScraper;
pub use http::HttpScraper;

/// Fetches a URL and reduces it to readable text.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        selector: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ScrapeError>;
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).expect("valid pattern"))
}

/// Distinct http(s) URLs in `text`, in order of first appearance.
/// Trailing sentence punctuation is not part of the URL.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in url_pattern().find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if !out.iter().any(|u| u == url) {
            out.push(url.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_distinct_urls_in_order() {
        let text = "See https://a.example/x, then http://b.example/y. Again https://a.example/x!";
        assert_eq!(
            extract_urls(text),
            vec!["https://a.example/x", "http://b.example/y"]
        );
    }

    #[test]
    fn ignores_non_http_schemes() {
        assert!(extract_urls("ftp://files.example mailto:x@y.z").is_empty());
    }

    #[test]
    fn stops_at_markdown_link_close() {
        assert_eq!(
            extract_urls("[docs](https://docs.example/page)"),
            vec!["https://docs.example/page"]
        );
    }
}

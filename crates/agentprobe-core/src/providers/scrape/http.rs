use super::Scraper;
use crate::errors::ScrapeError;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use std::time::Duration;

/// Fallback containers tried in order when no selector is configured or it
/// matches nothing.
const FALLBACK_SELECTORS: &[&str] = &["main", "article", "body"];
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript"];

pub struct HttpScraper {
    pub client: reqwest::Client,
}

impl HttpScraper {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn fetch(
        &self,
        url: &str,
        selector: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ScrapeError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::FetchFailed(format!("HTTP {}", status)));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();

        let body = resp.text().await.map_err(|e| map_reqwest(e, timeout))?;

        if content_type.contains("html") {
            extract_text(&body, selector)
        } else if content_type.starts_with("text/") {
            Ok(collapse_whitespace(&body))
        } else {
            Err(ScrapeError::Unsupported(content_type))
        }
    }
}

fn map_reqwest(e: reqwest::Error, timeout: Duration) -> ScrapeError {
    if e.is_timeout() {
        ScrapeError::Timeout(timeout)
    } else {
        ScrapeError::FetchFailed(e.to_string())
    }
}

/// Readable text of an HTML document. Script and style contents are dropped.
pub fn extract_text(html: &str, selector: Option<&str>) -> Result<String, ScrapeError> {
    let doc = Html::parse_document(html);

    if let Some(sel) = selector.map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = Selector::parse(sel)
            .map_err(|e| ScrapeError::Unsupported(format!("invalid selector '{}': {:?}", sel, e)))?;
        let text = doc
            .select(&parsed)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            return Ok(text);
        }
    }

    for fallback in FALLBACK_SELECTORS {
        let Ok(parsed) = Selector::parse(fallback) else {
            continue;
        };
        if let Some(el) = doc.select(&parsed).next() {
            let text = element_text(el);
            if !text.is_empty() {
                return Ok(text);
            }
        }
    }

    Ok(String::new())
}

fn element_text(el: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in el.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if skipped {
            continue;
        }
        let s: &str = text;
        let s = s.trim();
        if !s.is_empty() {
            parts.push(s);
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><style>.x{color:red}</style>
        <script>var secret = 1;</script></head>
        <body><nav>Menu</nav><main><h1>Pricing</h1>
        <p>The plan costs   <b>$10</b> per month.</p>
        <script>track()</script></main>
        <div class="faq">Refunds within 30 days.</div></body></html>"#;

    #[test]
    fn falls_back_to_main_and_skips_scripts() {
        let text = extract_text(PAGE, None).unwrap();
        assert_eq!(text, "Pricing The plan costs $10 per month.");
        assert!(!text.contains("track"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn selector_narrows_content() {
        let text = extract_text(PAGE, Some("div.faq")).unwrap();
        assert_eq!(text, "Refunds within 30 days.");
    }

    #[test]
    fn unmatched_selector_uses_fallback() {
        let text = extract_text(PAGE, Some("#nope")).unwrap();
        assert!(text.starts_with("Pricing"));
    }

    #[test]
    fn invalid_selector_is_unsupported() {
        let err = extract_text(PAGE, Some("div[")).unwrap_err();
        assert!(matches!(err, ScrapeError::Unsupported(_)));
    }

    #[test]
    fn body_fallback_without_main() {
        let text = extract_text("<html><body><p>Hello</p> <p>world</p></body></html>", None)
            .unwrap();
        assert_eq!(text, "Hello world");
    }
}

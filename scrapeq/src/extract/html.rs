use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;
use url::Url;

use super::{ExtractError, ExtractedContent, Extractor, PageMetadata};
use crate::config::ExtractorConfig;

/// Static tier: one HTTP GET, parsed without running scripts.
#[derive(Debug, Clone)]
pub struct StaticExtractor {
    client: reqwest::Client,
}

impl StaticExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(config.static_timeout())
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    async fn extract(&self, url: &Url) -> Result<ExtractedContent, ExtractError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(request_error)?;
        debug!(url = %url, bytes = body.len(), "fetched page");
        Ok(parse_document(&body, url))
    }
}

fn request_error(err: reqwest::Error) -> ExtractError {
    if err.is_builder() {
        ExtractError::InvalidUrl(err.to_string())
    } else {
        ExtractError::Request(err)
    }
}

/// Parse raw HTML into [`ExtractedContent`], resolving links against `base`.
pub fn parse_document(html: &str, base: &Url) -> ExtractedContent {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title").or_else(|| first_text(&document, "h1"));

    ExtractedContent {
        title,
        text: body_text(&document),
        links: absolute_urls(&document, "a[href]", "href", base),
        images: absolute_urls(&document, "img[src]", "src", base),
        metadata: PageMetadata {
            description: meta_content(&document, r#"meta[name="description"]"#),
            keywords: meta_content(&document, r#"meta[name="keywords"]"#)
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            author: meta_content(&document, r#"meta[name="author"]"#),
            published_date: meta_content(
                &document,
                r#"meta[property="article:published_time"]"#,
            ),
        },
    }
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn meta_content(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn body_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    collect_text(root, &mut text);
    collapse_whitespace(&text)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el)
                if matches!(el.name(), "script" | "style" | "noscript" | "template") => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn absolute_urls(document: &Html, css: &str, attr: &str, base: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .filter_map(|raw| base.join(raw.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(String::from)
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

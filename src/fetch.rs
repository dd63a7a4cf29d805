use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::model::{ImportSettings, RawEntry, Source};

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));
static OPTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("select option[value]").expect("option selector"));

/// Produces the current remote listing for a source.
///
/// An `Ok` with no entries means the listing was read and is empty; anything
/// that prevented reading it is an `Err`.
#[async_trait]
pub trait ListingFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpListingFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpListingFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl ListingFetcher for HttpListingFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>, FetchError> {
        let toc_url = Url::parse(&source.url)
            .map_err(|err| FetchError::Config(format!("toc url {:?}: {err}", source.url)))?;
        if toc_url.scheme() != "http" && toc_url.scheme() != "https" {
            return Err(FetchError::Config(format!(
                "toc url must be http/https: {toc_url}"
            )));
        }

        tracing::debug!(source_id = %source.id, url = %toc_url, "fetching listing");
        let response = self
            .client
            .get(toc_url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: toc_url.to_string(),
            });
        }

        let final_url = response.url().clone();
        let html = response.text().await?;
        let entries = parse_listing(&final_url, &html, &source.import_settings)?;
        tracing::debug!(source_id = %source.id, entries = entries.len(), "parsed listing");
        Ok(entries)
    }
}

/// Reads chapter entries out of a table of contents page.
pub fn parse_listing(
    toc_url: &Url,
    html: &str,
    settings: &ImportSettings,
) -> Result<Vec<RawEntry>, FetchError> {
    let document = Html::parse_document(html);
    match settings {
        ImportSettings::Toc {
            link_pattern,
            same_origin,
        } => {
            let pattern = link_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|err| FetchError::Config(format!("link_pattern: {err}")))?;

            let entries = document
                .select(&ANCHOR_SELECTOR)
                .filter_map(|anchor| {
                    let url = resolve_link(toc_url, anchor.value().attr("href")?)?;
                    if *same_origin && !is_same_origin(toc_url, &url) {
                        return None;
                    }
                    if is_same_page(toc_url, &url) {
                        return None;
                    }
                    if let Some(pattern) = &pattern
                        && !pattern.is_match(url.as_str())
                    {
                        return None;
                    }
                    Some(entry(anchor, url))
                })
                .collect();
            Ok(entries)
        }
        ImportSettings::Menu => {
            let entries = document
                .select(&OPTION_SELECTOR)
                .filter_map(|option| {
                    let url = resolve_link(toc_url, option.value().attr("value")?)?;
                    Some(entry(option, url))
                })
                .collect();
            Ok(entries)
        }
    }
}

fn entry(element: ElementRef<'_>, url: Url) -> RawEntry {
    let mut title = text_content(element);
    if title.is_empty() {
        title = url.to_string();
    }
    RawEntry {
        title,
        url: Some(url.to_string()),
        published_at: None,
    }
}

fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn is_same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port() == b.port()
}

fn is_same_page(toc_url: &Url, url: &Url) -> bool {
    let trim = |u: &Url| {
        let mut u = u.clone();
        u.set_fragment(None);
        u.as_str().trim_end_matches('/').to_owned()
    };
    trim(toc_url) == trim(url)
}

fn text_content(element: ElementRef<'_>) -> String {
    let text = element.text().collect::<String>();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

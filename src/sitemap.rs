//! Sitemap resolution: fetch and parse sitemap XML into a deduplicated URL
//! list, following nested sitemap indexes.
//!
//! Remote sitemaps are untrusted input, so recursion is bounded two ways: a
//! visited set keyed by normalized sitemap URL (cycles terminate) and a hard
//! depth cap. Child sitemap failures are logged and skipped; only a failure
//! of the root fetch/parse is surfaced to the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

use crate::error::{RagError, Result};

/// Max levels of sitemap-index nesting followed from the root.
const MAX_DEPTH: usize = 5;

/// Fetches one sitemap document by URL. The HTTP implementation is the only
/// one used in production; tests drive the resolver with canned documents.
#[async_trait]
pub trait SitemapFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

#[async_trait]
impl SitemapFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RagError::Fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RagError::SitemapNotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(RagError::Fetch(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| RagError::Fetch(format!("{url}: {e}")))
    }
}

/// Parsed shape of one sitemap document.
#[derive(Debug, PartialEq)]
enum SitemapXml {
    /// `<sitemapindex>`: locations of child sitemaps.
    Index(Vec<String>),
    /// `<urlset>`: page URLs.
    UrlSet(Vec<String>),
}

pub struct SitemapResolver {
    fetcher: Arc<dyn SitemapFetcher>,
}

impl SitemapResolver {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            fetcher: Arc::new(HttpFetcher { client, timeout }),
        }
    }

    pub fn with_fetcher(fetcher: Arc<dyn SitemapFetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve a domain or sitemap URL into the set of page URLs it lists.
    ///
    /// A bare domain gets an `https://` scheme and `/sitemap.xml` appended.
    /// The returned list is deduplicated; order is not guaranteed.
    pub async fn resolve_urls(&self, domain_or_url: &str) -> Result<Vec<String>> {
        let root = candidate_sitemap_url(domain_or_url)?;
        info!(sitemap = %root, "resolving sitemap");

        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: Vec<(String, usize)> = vec![(root.clone(), 0)];
        let mut urls: HashSet<String> = HashSet::new();

        while let Some((sitemap_url, depth)) = pending.pop() {
            let normalized = normalize_sitemap_url(&sitemap_url);
            if !visited.insert(normalized) {
                continue;
            }
            if depth > MAX_DEPTH {
                warn!(sitemap = %sitemap_url, "sitemap nesting exceeds depth cap, skipping");
                continue;
            }

            let is_root = depth == 0;
            let body = match self.fetcher.fetch(&sitemap_url).await {
                Ok(body) => body,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!(sitemap = %sitemap_url, error = %e, "child sitemap fetch failed, skipping");
                    continue;
                }
            };

            let parsed = match parse_sitemap_xml(&body) {
                Ok(parsed) => parsed,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!(sitemap = %sitemap_url, error = %e, "child sitemap parse failed, skipping");
                    continue;
                }
            };

            match parsed {
                SitemapXml::Index(children) => {
                    info!(
                        sitemap = %sitemap_url,
                        children = children.len(),
                        "sitemap index"
                    );
                    for child in children {
                        pending.push((child, depth + 1));
                    }
                }
                SitemapXml::UrlSet(locs) => {
                    for loc in locs {
                        urls.insert(loc);
                    }
                }
            }
        }

        info!(count = urls.len(), "sitemap resolution complete");
        Ok(urls.into_iter().collect())
    }
}

/// Normalize caller input to a sitemap URL: add a scheme to bare domains and
/// append `/sitemap.xml` unless the path already names an XML document.
fn candidate_sitemap_url(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RagError::Config("empty domain".into()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&with_scheme)
        .map_err(|e| RagError::Config(format!("invalid domain {input:?}: {e}")))?;

    if parsed.path().ends_with(".xml") {
        Ok(with_scheme)
    } else {
        Ok(format!("{with_scheme}/sitemap.xml"))
    }
}

/// Key for the visited set: scheme/host case folded, trailing slash dropped.
fn normalize_sitemap_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(u) => u.to_string().trim_end_matches('/').to_string(),
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

/// Parse one sitemap document, namespace-agnostic: elements are matched by
/// local name so both prefixed (`<sm:loc>`) and default-namespace (`<loc>`)
/// sitemaps work.
fn parse_sitemap_xml(xml: &str) -> Result<SitemapXml> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut is_index: Option<bool> = None;
    let mut in_loc = false;
    let mut locs: Vec<String> = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| RagError::SitemapParse(e.to_string()))?
        {
            quick_xml::events::Event::Start(e) => match e.local_name().as_ref() {
                b"sitemapindex" if is_index.is_none() => is_index = Some(true),
                b"urlset" if is_index.is_none() => is_index = Some(false),
                b"loc" => in_loc = true,
                _ => {}
            },
            quick_xml::events::Event::Text(te) if in_loc => {
                let loc = te
                    .unescape()
                    .map_err(|e| RagError::SitemapParse(e.to_string()))?
                    .trim()
                    .to_string();
                if !loc.is_empty() {
                    locs.push(loc);
                }
            }
            quick_xml::events::Event::End(e) => {
                if e.local_name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            quick_xml::events::Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match is_index {
        Some(true) => Ok(SitemapXml::Index(locs)),
        Some(false) => Ok(SitemapXml::UrlSet(locs)),
        None => Err(RagError::SitemapParse(
            "root element is neither urlset nor sitemapindex".into(),
        )),
    }
}

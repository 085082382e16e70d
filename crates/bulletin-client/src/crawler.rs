use std::sync::Arc;
use std::time::Duration;

use bulletin_core::error::AppError;
use bulletin_core::models::{CrawledPage, NewEntry};
use bulletin_core::traits::Crawler;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Default cap on the page count a listing may announce.
pub const DEFAULT_MAX_PAGES: u32 = 500;

/// CSS selectors locating notices on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorConfig {
    /// One match per notice.
    pub row: String,
    /// Title text, relative to the row.
    pub title: String,
    /// Element carrying the notice `href`, relative to the row.
    pub link: String,
    /// Publish date text, relative to the row.
    pub date: String,
    /// Page links of the pagination block, relative to the document.
    pub pagination: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            row: "table tbody tr".into(),
            title: "td.title a".into(),
            link: "td.title a".into(),
            date: "td.date".into(),
            pagination: ".pagination a".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Where and how to crawl the upstream notice board.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub listing_url: String,
    /// Query parameter carrying the 1-based page number.
    pub page_param: String,
    pub selectors: SelectorConfig,
    pub credentials: Option<BasicAuth>,
    pub user_agent: String,
    pub timeout: Duration,
    /// Upper bound on the page count read from the pagination block.
    pub max_pages: u32,
}

impl SourceConfig {
    pub fn new(listing_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            page_param: "page".into(),
            selectors: SelectorConfig::default(),
            credentials: None,
            user_agent: concat!("Bulletin/", env!("CARGO_PKG_VERSION")).into(),
            timeout: Duration::from_secs(30),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_page_param(mut self, param: impl Into<String>) -> Self {
        self.page_param = param.into();
        self
    }

    pub fn with_selectors(mut self, selectors: SelectorConfig) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

struct CompiledSelectors {
    row_css: String,
    row: Selector,
    title: Selector,
    link: Selector,
    date: Selector,
    pagination: Selector,
}

impl CompiledSelectors {
    fn compile(config: &SelectorConfig) -> Result<Self, AppError> {
        Ok(Self {
            row_css: config.row.clone(),
            row: parse_selector(&config.row)?,
            title: parse_selector(&config.title)?,
            link: parse_selector(&config.link)?,
            date: parse_selector(&config.date)?,
            pagination: parse_selector(&config.pagination)?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector, AppError> {
    Selector::parse(s).map_err(|e| AppError::ParseError(format!("Invalid selector '{s}': {e:?}")))
}

/// [`Crawler`] over a paginated HTML listing, using reqwest and scraper.
#[derive(Clone)]
pub struct HttpCrawler {
    client: Client,
    listing_url: Url,
    page_param: String,
    selectors: Arc<CompiledSelectors>,
    credentials: Option<BasicAuth>,
    timeout_secs: u64,
    max_pages: u32,
}

impl HttpCrawler {
    pub fn new(config: SourceConfig) -> Result<Self, AppError> {
        let listing_url = Url::parse(&config.listing_url).map_err(|e| {
            AppError::ConfigError(format!("Invalid listing URL '{}': {e}", config.listing_url))
        })?;
        match listing_url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::ConfigError(format!(
                    "URL scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }

        let selectors = CompiledSelectors::compile(&config.selectors)?;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            listing_url,
            page_param: config.page_param,
            selectors: Arc::new(selectors),
            credentials: config.credentials,
            timeout_secs: config.timeout.as_secs(),
            max_pages: config.max_pages.max(1),
        })
    }

    /// URL of listing page `page`, replacing any page number already in the listing URL.
    pub fn page_url(&self, page: u32) -> Url {
        let kept: Vec<(String, String)> = self
            .listing_url
            .query_pairs()
            .filter(|(name, _)| name != self.page_param.as_str())
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        let mut url = self.listing_url.clone();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(&self.page_param, &page.to_string());
        url
    }

    async fn download(&self, url: &Url) -> Result<String, AppError> {
        let mut request = self.client.get(url.clone());
        if let Some(auth) = &self.credentials {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }

    /// Extract notices and the page count from a listing document.
    ///
    /// Rows without a title or link are skipped, but a document with no
    /// matching rows, or with none usable, is a `ParseError`: login walls,
    /// error pages served as 200 and layout changes all look like that.
    /// The page count is the highest page number found in the pagination
    /// block (1 when absent), capped at `max_pages`.
    pub fn parse_listing(&self, html: &str) -> Result<CrawledPage, AppError> {
        let document = Html::parse_document(html);

        let rows: Vec<ElementRef> = document.select(&self.selectors.row).collect();
        if rows.is_empty() {
            return Err(AppError::ParseError(format!(
                "No rows match selector '{}'",
                self.selectors.row_css
            )));
        }

        let entries: Vec<NewEntry> = rows.iter().filter_map(|row| self.parse_row(row)).collect();
        if entries.is_empty() {
            return Err(AppError::ParseError(format!(
                "{} rows matched but none has a title and link",
                rows.len()
            )));
        }

        let announced = document
            .select(&self.selectors.pagination)
            .filter_map(|link| self.page_number_of(&link))
            .max()
            .unwrap_or(1)
            .max(1);
        let total_pages = if announced > self.max_pages {
            tracing::warn!(
                announced,
                max_pages = self.max_pages,
                "Pagination announces too many pages, capping"
            );
            self.max_pages
        } else {
            announced
        };

        Ok(CrawledPage::new(entries, total_pages))
    }

    fn parse_row(&self, row: &ElementRef) -> Option<NewEntry> {
        let title = collapse_whitespace(row.select(&self.selectors.title).next()?.text());
        if title.is_empty() {
            return None;
        }

        let href = row
            .select(&self.selectors.link)
            .next()?
            .value()
            .attr("href")?
            .trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            tracing::debug!(%title, %href, "Skipping row without a usable link");
            return None;
        }
        let url = self.listing_url.join(href).ok()?;

        let published_at = row
            .select(&self.selectors.date)
            .next()
            .map(|date| collapse_whitespace(date.text()))
            .unwrap_or_default();

        Some(NewEntry::new(title, url.as_str(), published_at))
    }

    fn page_number_of(&self, link: &ElementRef) -> Option<u32> {
        let from_text = collapse_whitespace(link.text()).parse::<u32>().ok();
        let from_href = link
            .value()
            .attr("href")
            .and_then(|href| self.listing_url.join(href).ok())
            .and_then(|url| {
                url.query_pairs()
                    .find(|(name, _)| name == self.page_param.as_str())
                    .and_then(|(_, value)| value.parse::<u32>().ok())
            });
        from_text.max(from_href)
    }
}

impl Crawler for HttpCrawler {
    async fn fetch_page(&self, page: u32) -> Result<CrawledPage, AppError> {
        let url = self.page_url(page.max(1));
        let html = self.download(&url).await?;
        let crawled = self
            .parse_listing(&html)
            .map_err(|e| e.context(format!("parse {url}")))?;
        tracing::debug!(
            %url,
            entries = crawled.entries.len(),
            total_pages = crawled.total_pages,
            "Crawled listing page"
        );
        Ok(crawled)
    }
}

fn collapse_whitespace<'a>(text: impl Iterator<Item = &'a str>) -> String {
    text.flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

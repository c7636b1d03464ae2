//! Generic pagination over forge list endpoints.
//!
//! Forges disagree on how "give me the next page" is spelled; [`PageWalker`]
//! normalizes the three styles in use behind one lazy sequence. Every page
//! fetch goes through the per-forge [`Fetcher`], so pacing and retry apply
//! uniformly.

use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::http::{HttpHeaders, HttpRequest, with_query};
use crate::retry::Fetcher;

/// Hard ceiling on pages walked per endpoint.
///
/// Hitting it yields [`FetchError::PaginationExhausted`]; pages already
/// fetched stay with the caller.
pub const DEFAULT_MAX_PAGES: u32 = 100;

/// Page size requested from every list endpoint.
pub const PAGE_SIZE: u32 = 100;

/// How a forge exposes pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStyle {
    /// `Link: <...>; rel="next"` response header (GitHub).
    LinkHeader,
    /// Monotonically increasing `page` query parameter, with an optional
    /// `X-Total-Pages` hint (GitLab).
    PageNumber,
    /// Opaque next-page URL in the body under `pagination.next` (Pagure).
    Cursor,
}

/// One fetched page of items.
#[derive(Debug)]
pub struct Page {
    /// 1-based position in the walk.
    pub number: u32,
    pub items: Vec<Value>,
}

/// Signal returned by a [`PageWalker::visit`] closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    /// Stop the walk early; sorted-by-recency endpoints use this once items
    /// fall out of the window.
    Stop,
}

/// Summary of a drained walk.
#[derive(Debug)]
pub struct WalkSummary {
    /// Pages fetched.
    pub pages: u32,
    /// Set when the walk hit the page safety bound with more pages left.
    pub truncation: Option<FetchError>,
}

enum NextPage {
    Url(String),
    Number(u32),
    Done,
}

/// Lazily walks one paginated endpoint, one request per page.
///
/// A walker is finite and not restartable: build a fresh one to re-read the
/// endpoint.
pub struct PageWalker<'a> {
    fetcher: &'a Fetcher,
    headers: HttpHeaders,
    style: PageStyle,
    /// First-page URL; page-number walks re-derive per-page URLs from it.
    base_url: String,
    /// Key holding the item array in each page body; `None` means the body
    /// itself is the array.
    items_key: Option<&'static str>,
    max_pages: u32,
    next: NextPage,
    fetched: u32,
    expected_pages: Option<u32>,
}

impl<'a> PageWalker<'a> {
    pub fn new(
        fetcher: &'a Fetcher,
        url: impl Into<String>,
        headers: HttpHeaders,
        style: PageStyle,
        items_key: Option<&'static str>,
    ) -> Self {
        let base_url = url.into();
        let next = match style {
            PageStyle::PageNumber => NextPage::Number(1),
            _ => NextPage::Url(base_url.clone()),
        };
        Self {
            fetcher,
            headers,
            style,
            base_url,
            items_key,
            max_pages: DEFAULT_MAX_PAGES,
            next,
            fetched: 0,
            expected_pages: None,
        }
    }

    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Fetch the next page.
    ///
    /// `None` once the sequence ends. An error ends the sequence too: either
    /// the safety bound (`PaginationExhausted`, prior pages remain valid) or
    /// a fetch failure.
    pub async fn next_page(&mut self) -> Option<Result<Page>> {
        let url = match &self.next {
            NextPage::Done => return None,
            NextPage::Url(url) => url.clone(),
            NextPage::Number(n) => with_query(&self.base_url, &[("page", &n.to_string())]),
        };

        if self.fetched >= self.max_pages {
            self.next = NextPage::Done;
            tracing::debug!(
                forge = %self.fetcher.forge(),
                pages = self.fetched,
                "pagination stopped at the safety bound"
            );
            return Some(Err(FetchError::PaginationExhausted {
                pages: self.fetched,
            }));
        }

        let request = HttpRequest {
            url,
            headers: self.headers.clone(),
        };
        let response = match self.fetcher.execute(&request).await {
            Ok(response) => response,
            Err(err) => {
                self.next = NextPage::Done;
                return Some(Err(err));
            }
        };

        let body: Value = match serde_json::from_slice(&response.body) {
            Ok(body) => body,
            Err(err) => {
                self.next = NextPage::Done;
                return Some(Err(FetchError::network(format!("invalid json page: {err}"))));
            }
        };
        let items = match extract_items(&body, self.items_key) {
            Ok(items) => items,
            Err(err) => {
                self.next = NextPage::Done;
                return Some(Err(err));
            }
        };
        self.fetched += 1;

        self.next = match self.style {
            PageStyle::LinkHeader => match parse_link_next(response.header("link")) {
                Some(next) => NextPage::Url(next),
                None => NextPage::Done,
            },
            PageStyle::PageNumber => {
                if let Some(total) = response
                    .header("x-total-pages")
                    .and_then(|v| v.trim().parse::<u32>().ok())
                {
                    self.expected_pages = Some(total);
                }
                let exhausted = items.is_empty()
                    || (items.len() as u32) < PAGE_SIZE
                    || self.expected_pages.is_some_and(|total| self.fetched >= total);
                if exhausted {
                    NextPage::Done
                } else {
                    NextPage::Number(self.fetched + 1)
                }
            }
            PageStyle::Cursor => match body
                .pointer("/pagination/next")
                .and_then(Value::as_str)
            {
                Some(next) => NextPage::Url(next.to_string()),
                None => NextPage::Done,
            },
        };

        if items.is_empty() {
            self.next = NextPage::Done;
            return None;
        }

        Some(Ok(Page {
            number: self.fetched,
            items,
        }))
    }

    /// Drain the walker, feeding each item to `visit`.
    ///
    /// Hitting the safety bound is folded into the summary as a truncation;
    /// any other failure aborts with the error (the caller keeps whatever it
    /// accumulated from earlier items).
    pub async fn visit<F>(mut self, mut visit: F) -> Result<WalkSummary>
    where
        F: FnMut(&Value) -> Walk,
    {
        while let Some(page) = self.next_page().await {
            match page {
                Ok(page) => {
                    for item in &page.items {
                        if visit(item) == Walk::Stop {
                            return Ok(WalkSummary {
                                pages: self.fetched,
                                truncation: None,
                            });
                        }
                    }
                }
                Err(err @ FetchError::PaginationExhausted { .. }) => {
                    return Ok(WalkSummary {
                        pages: self.fetched,
                        truncation: Some(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(WalkSummary {
            pages: self.fetched,
            truncation: None,
        })
    }
}

fn extract_items(body: &Value, items_key: Option<&'static str>) -> Result<Vec<Value>> {
    match items_key {
        Some(key) => match body.get(key) {
            Some(Value::Array(items)) => Ok(items.clone()),
            // Some endpoints omit the key entirely when there is nothing.
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(_) => Err(FetchError::network(format!(
                "expected an array under '{key}'"
            ))),
        },
        None => match body {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(FetchError::network("expected a json array page")),
        },
    }
}

/// Extract the `rel="next"` target from a `Link` header.
///
/// `<https://api.github.com/...&page=2>; rel="next", <...>; rel="last"`
fn parse_link_next(header: Option<&str>) -> Option<String> {
    let header = header?;
    for part in header.split(',') {
        let mut sections = part.split(';');
        let url = sections
            .next()
            .map(|u| u.trim().trim_start_matches('<').trim_end_matches('>'))?;
        if sections.any(|param| param.trim() == r#"rel="next""#) {
            return Some(url.to_string());
        }
    }
    None
}

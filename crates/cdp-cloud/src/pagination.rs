//! Continuation-token pagination.
//!
//! A [`Paginator`] drives a single-page fetch callback until the server
//! stops returning a continuation token, merging pages as it goes: list
//! fields are concatenated in fetch order, every other field keeps the
//! value from the last page.

use serde_json::{Map, Value};
use std::future::Future;

use crate::client::{CdpClient, Squelch};
use crate::error::CdpResult;

pub const NEXT_TOKEN: &str = "nextToken";
pub const STARTING_TOKEN: &str = "startingToken";
pub const NEXT_PAGE_TOKEN: &str = "nextPageToken";
pub const PAGE_TOKEN: &str = "pageToken";
pub const PAGE_SIZE: &str = "pageSize";

/// What the fetch callback needs to request one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// `None` for the first page.
    pub token: Option<String>,
    pub page_size: u32,
}

/// Follows continuation tokens and merges pages.
#[derive(Debug, Clone)]
pub struct Paginator {
    response_token: String,
    request_token: String,
    page_size: u32,
    max_pages: Option<usize>,
}

impl Paginator {
    /// `nextToken` in responses, `startingToken` in requests.
    pub fn new(page_size: u32) -> Self {
        Self {
            response_token: NEXT_TOKEN.to_string(),
            request_token: STARTING_TOKEN.to_string(),
            page_size,
            max_pages: None,
        }
    }

    /// Use different token field names.
    pub fn with_token_fields(mut self, response_token: &str, request_token: &str) -> Self {
        self.response_token = response_token.to_string();
        self.request_token = request_token.to_string();
        self
    }

    /// Stop after `max_pages` pages even if the server keeps returning tokens.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages.max(1));
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Copy of `body` with the page size and continuation token set.
    ///
    /// A page size already present in `body` is left alone.
    pub fn page_body(&self, body: &Value, page: &PageRequest) -> Value {
        let mut map = match body {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        map.entry(PAGE_SIZE.to_string())
            .or_insert_with(|| Value::from(page.page_size));
        match page.token {
            Some(ref token) => {
                map.insert(self.request_token.clone(), Value::String(token.clone()));
            }
            None => {
                map.remove(&self.request_token);
            }
        }
        Value::Object(map)
    }

    /// Fetch every page through `fetch` and return the merged response.
    ///
    /// A first response that is not an object, or has no continuation
    /// token, is returned unchanged.
    pub async fn collect<F, Fut>(&self, mut fetch: F) -> CdpResult<Option<Value>>
    where
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = CdpResult<Option<Value>>>,
    {
        let first = fetch(PageRequest {
            token: None,
            page_size: self.page_size,
        })
        .await?;

        let mut merged = match first {
            Some(Value::Object(map)) => map,
            other => return Ok(other),
        };
        let mut token = match self.take_token(&mut merged) {
            Some(token) => token,
            None => return Ok(Some(Value::Object(merged))),
        };

        let mut pages = 1usize;
        loop {
            if let Some(max) = self.max_pages {
                if pages >= max {
                    log::warn!(
                        "Stopped paginating after {} pages; more results were available",
                        pages
                    );
                    break;
                }
            }

            log::debug!("Fetching page {} ({}={})", pages + 1, self.request_token, token);
            let next = fetch(PageRequest {
                token: Some(token),
                page_size: self.page_size,
            })
            .await?;
            pages += 1;

            let mut page = match next {
                Some(Value::Object(map)) => map,
                _ => break,
            };
            let next_token = self.take_token(&mut page);
            merge_page(&mut merged, page);

            match next_token {
                Some(t) => token = t,
                None => break,
            }
        }

        Ok(Some(Value::Object(merged)))
    }

    fn take_token(&self, map: &mut Map<String, Value>) -> Option<String> {
        match map.remove(&self.response_token) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}

/// Concatenate list fields, overwrite everything else.
fn merge_page(merged: &mut Map<String, Value>, page: Map<String, Value>) {
    for (key, value) in page {
        match value {
            Value::Array(more) => match merged.get_mut(&key) {
                Some(Value::Array(existing)) => existing.extend(more),
                _ => {
                    merged.insert(key, Value::Array(more));
                }
            },
            other => {
                merged.insert(key, other);
            }
        }
    }
}

impl CdpClient {
    /// POST `body` to `path` once per page and merge the results.
    pub async fn post_paginated(
        &self,
        path: &str,
        body: &Value,
        paginator: &Paginator,
        squelch: &Squelch,
    ) -> CdpResult<Option<Value>> {
        paginator
            .collect(|page| {
                let page_body = paginator.page_body(body, &page);
                async move { self.post(path, Some(&page_body), squelch).await }
            })
            .await
    }

    /// Paginator using this client's default page size.
    pub fn paginator(&self) -> Paginator {
        Paginator::new(self.default_page_size())
    }
}

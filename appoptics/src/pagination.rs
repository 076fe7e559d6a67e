//! Lazy pagination over collection endpoints.
//!
//! List endpoints answer with an envelope:
//!
//! ```text
//! { "<resource>": [...], "query": { "offset": 0, "length": 100, "total": 250 } }
//! ```
//!
//! [`Paginated`] fetches one page at a time, yields its entities, and moves
//! the offset forward by the page length. It stops once the next offset
//! reaches `total`, or when a page reports `length == 0` (a server that
//! claims more results but stops returning them would otherwise loop
//! forever).

use std::collections::VecDeque;
use std::marker::PhantomData;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::connection::{Connection, decode};
use crate::error::{AppOpticsError, Result};
use crate::request::Params;
use crate::transport::Method;

/// The `query` block of a list response.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct PageInfo {
    /// Offset of the first entity in this page.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Number of entities in this page.
    #[serde(default)]
    pub length: Option<u64>,
    /// Total number of matching entities.
    #[serde(default)]
    pub total: Option<u64>,
    /// Number of entities found by the search.
    #[serde(default)]
    pub found: Option<u64>,
}

impl PageInfo {
    /// Offset of the page after this one, if there is one.
    ///
    /// `sent_offset` is the offset the page was requested with. A missing
    /// `length` counts as zero and a missing `total` as `length`.
    pub fn next_offset(&self, sent_offset: u64) -> Option<u64> {
        let length = self.length.unwrap_or(0);
        let total = self.total.unwrap_or(length);
        let next = sent_offset.saturating_add(length);
        (next < total && length > 0).then_some(next)
    }
}

/// Iterator over every entity of a collection, across pages.
///
/// Each `next` call that exhausts the current page blocks on the request for
/// the following one. An error ends the iteration after being yielded once;
/// start over by calling the list operation again.
pub struct Paginated<'c, T> {
    conn: &'c mut Connection,
    resource: String,
    params: Params,
    buffered: VecDeque<Value>,
    finished: bool,
    pages: usize,
    _entity: PhantomData<fn() -> T>,
}

impl<'c, T: DeserializeOwned> Paginated<'c, T> {
    pub(crate) fn new(conn: &'c mut Connection, resource: String, params: Params) -> Self {
        Self {
            conn,
            resource,
            params,
            buffered: VecDeque::new(),
            finished: false,
            pages: 0,
            _entity: PhantomData,
        }
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// The offset the next request will carry. Numeric strings are accepted
    /// and normalized to numbers.
    fn sent_offset(&mut self) -> Result<u64> {
        let offset = match self.params.get("offset") {
            None | Some(Value::Null) => return Ok(0),
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };
        let Some(offset) = offset else {
            return Err(AppOpticsError::invalid(format!(
                "'offset' must be a non-negative integer, got {}",
                self.params["offset"]
            )));
        };
        self.params.insert("offset".to_string(), Value::from(offset));
        Ok(offset)
    }

    fn fetch_page(&mut self) -> Result<()> {
        let sent = self.sent_offset()?;
        let envelope = self
            .conn
            .execute_value(&self.resource, Method::Get, &self.params)?;
        self.pages += 1;

        let Value::Object(mut envelope) = envelope else {
            return Err(AppOpticsError::unexpected(format!(
                "list response for '{}' is not an object",
                self.resource
            )));
        };

        match envelope.remove(&self.resource) {
            Some(Value::Array(items)) => self.buffered.extend(items),
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err(AppOpticsError::unexpected(format!(
                    "'{}' in list response is not an array",
                    self.resource
                )));
            }
        }

        let info: PageInfo = match envelope.remove("query") {
            Some(query) => decode(query)?,
            None => PageInfo::default(),
        };

        match info.next_offset(sent) {
            Some(next) => {
                debug!(resource = %self.resource, next, "advancing to next page");
                self.params.insert("offset".to_string(), Value::from(next));
            }
            None => self.finished = true,
        }
        Ok(())
    }
}

impl<T: DeserializeOwned> Iterator for Paginated<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(decode(item));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(offset: u64, length: Option<u64>, total: Option<u64>) -> PageInfo {
        PageInfo {
            offset: Some(offset),
            length,
            total,
            found: None,
        }
    }

    #[test]
    fn test_next_offset_advances_by_length() {
        assert_eq!(info(0, Some(5), Some(12)).next_offset(0), Some(5));
        assert_eq!(info(5, Some(5), Some(12)).next_offset(5), Some(10));
        assert_eq!(info(10, Some(2), Some(12)).next_offset(10), None);
    }

    #[test]
    fn test_zero_length_stops() {
        assert_eq!(info(5, Some(0), Some(12)).next_offset(5), None);
    }

    #[test]
    fn test_missing_fields_stop() {
        assert_eq!(PageInfo::default().next_offset(0), None);
        // total defaults to length, so a lone length never advances
        assert_eq!(info(0, Some(5), None).next_offset(0), None);
    }
}

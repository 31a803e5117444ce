//! Saved-item listing model and the source abstraction the collector reads from.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::RedditError;
use crate::rate_limit::RateLimit;

/// A saved link post (`t3`), with its full JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub created_utc: DateTime<Utc>,
    pub title: String,
    pub url: String,
    pub raw: serde_json::Value,
}

/// One entry of the saved listing
#[derive(Debug, Clone, PartialEq)]
pub enum SavedItem {
    Submission(Submission),
    Comment { id: String },
    Other { kind: String },
}

pub type SavedItems<'a> = Box<dyn Iterator<Item = Result<SavedItem, RedditError>> + 'a>;

/// Where saved items come from; `RedditClient` in production.
pub trait SavedItemSource {
    /// Authenticate if needed and return the account name.
    fn username(&mut self) -> Result<String, RedditError>;

    /// Budget reported by the most recent response, if any
    fn rate_limit(&self) -> Option<RateLimit>;

    /// Saved items newest first, fetched lazily.
    fn saved_items(&mut self, username: &str) -> SavedItems<'_>;
}

/// One page of `/user/{name}/saved`
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub items: Vec<SavedItem>,
    pub after: Option<String>,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    after: Option<String>,
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    kind: String,
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct SubmissionFields {
    id: String,
    created_utc: f64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
}

/// Parse a listing response body.
pub fn parse_listing(url: &str, body: &str) -> Result<ListingPage, RedditError> {
    let listing: Listing =
        serde_json::from_str(body).map_err(|e| RedditError::decode(url, e))?;
    let items = listing
        .data
        .children
        .into_iter()
        .map(|thing| parse_thing(url, thing))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ListingPage {
        items,
        after: listing.data.after.filter(|a| !a.is_empty()),
    })
}

fn parse_thing(url: &str, thing: Thing) -> Result<SavedItem, RedditError> {
    match thing.kind.as_str() {
        "t3" => {
            let fields: SubmissionFields = serde_json::from_value(thing.data.clone())
                .map_err(|e| RedditError::decode(url, format!("submission: {}", e)))?;
            let created_utc = timestamp(fields.created_utc).ok_or_else(|| {
                RedditError::decode(url, format!("bad created_utc {}", fields.created_utc))
            })?;
            Ok(SavedItem::Submission(Submission {
                id: fields.id,
                created_utc,
                title: fields.title,
                url: fields.url,
                raw: thing.data,
            }))
        }
        "t1" => {
            let id = thing
                .data
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(SavedItem::Comment { id })
        }
        _ => Ok(SavedItem::Other { kind: thing.kind }),
    }
}

fn timestamp(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.trunc();
    let nanos = ((seconds - whole) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos).single()
}

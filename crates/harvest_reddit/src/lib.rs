//! Reddit saved-posts collector for the harvest harness.

mod client;
mod collector;
mod config;
mod error;
mod rate_limit;
mod source;

pub use client::RedditClient;
pub use collector::{
    SavedPostsCollector, COLLECTOR_NAME, COLLECTOR_VERSION, SAVED_POST_TABLE, SUBMISSION_TABLE,
};
pub use config::{RedditCredentials, RedditSettings};
pub use error::RedditError;
pub use rate_limit::{describe as describe_rate_limit, RateLimit};
pub use source::{parse_listing, ListingPage, SavedItem, SavedItemSource, SavedItems, Submission};

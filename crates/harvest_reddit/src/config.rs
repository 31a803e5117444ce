use std::fmt;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::RedditError;

/// Script-app credentials for the password grant
#[derive(Clone, PartialEq, Eq)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("user_agent", &self.user_agent)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl RedditCredentials {
    /// Read `REDDIT_*` variables from the process environment.
    pub fn from_env() -> Result<Self, RedditError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `REDDIT_PASSWORD` is used as-is when set; otherwise
    /// `REDDIT_PASSWORD_BASE64` is decoded.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RedditError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RedditError::MissingEnv(key.to_string()))
        };

        let password = match lookup("REDDIT_PASSWORD").filter(|v| !v.is_empty()) {
            Some(plain) => plain,
            None => decode_password(&required("REDDIT_PASSWORD_BASE64")?)?,
        };

        Ok(Self {
            client_id: required("REDDIT_CLIENT_ID")?,
            client_secret: required("REDDIT_CLIENT_SECRET")?,
            user_agent: required("REDDIT_USER_AGENT")?,
            username: required("REDDIT_USERNAME")?,
            password,
        })
    }
}

fn decode_password(encoded: &str) -> Result<String, RedditError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| RedditError::InvalidPassword(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RedditError::InvalidPassword(e.to_string()))
}

/// Endpoints and paging for the Reddit API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditSettings {
    /// Host of `/api/v1/access_token`
    pub auth_url: String,
    /// Host of the OAuth API
    pub api_url: String,
    /// Listing page size (Reddit caps it at 100)
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for RedditSettings {
    fn default() -> Self {
        Self {
            auth_url: "https://www.reddit.com".to_string(),
            api_url: "https://oauth.reddit.com".to_string(),
            page_size: 100,
            timeout_secs: 30,
        }
    }
}

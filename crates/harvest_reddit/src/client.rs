//! Blocking Reddit API client (script-app password grant).

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::config::{RedditCredentials, RedditSettings};
use crate::error::RedditError;
use crate::rate_limit::RateLimit;
use crate::source::{parse_listing, ListingPage, SavedItem, SavedItemSource, SavedItems};

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Me {
    name: String,
}

/// Talks to Reddit over HTTPS. Authenticates on first use.
pub struct RedditClient {
    http: reqwest::blocking::Client,
    credentials: RedditCredentials,
    settings: RedditSettings,
    token: Option<String>,
    username: Option<String>,
    rate_limit: Option<RateLimit>,
}

impl RedditClient {
    pub fn new(credentials: RedditCredentials, settings: RedditSettings) -> Result<Self, RedditError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(credentials.user_agent.clone())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RedditError::http(&settings.auth_url, e))?;
        Ok(Self {
            http,
            credentials,
            settings,
            token: None,
            username: None,
            rate_limit: None,
        })
    }

    fn access_token(&mut self) -> Result<String, RedditError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        let url = format!(
            "{}/api/v1/access_token",
            self.settings.auth_url.trim_end_matches('/')
        );
        tracing::debug!(url = %url, user = %self.credentials.username, "requesting reddit token");
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .map_err(|e| RedditError::http(&url, e))?;
        let body = checked_body(&url, response)?;

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| RedditError::decode(&url, e))?;
        match (token.access_token, token.error) {
            (Some(access), _) => {
                self.token = Some(access.clone());
                Ok(access)
            }
            (None, Some(error)) => Err(RedditError::Auth(error)),
            (None, None) => Err(RedditError::Auth("no access token in response".to_string())),
        }
    }

    fn get(&mut self, path: &str, query: &[(&str, String)]) -> Result<String, RedditError> {
        let token = self.access_token()?;
        let url = format!("{}{}", self.settings.api_url.trim_end_matches('/'), path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .map_err(|e| RedditError::http(&url, e))?;
        if let Some(limit) = RateLimit::from_headers(response.headers(), Utc::now()) {
            self.rate_limit = Some(limit);
        }
        checked_body(&url, response)
    }

    /// Name of the authenticated account
    pub fn me(&mut self) -> Result<String, RedditError> {
        if let Some(name) = &self.username {
            return Ok(name.clone());
        }
        let body = self.get("/api/v1/me", &[])?;
        let me: Me = serde_json::from_str(&body).map_err(|e| RedditError::decode("/api/v1/me", e))?;
        self.username = Some(me.name.clone());
        Ok(me.name)
    }

    /// One page of the user's saved items, starting after `after`.
    pub fn saved_page(&mut self, username: &str, after: Option<&str>) -> Result<ListingPage, RedditError> {
        let path = format!("/user/{}/saved", username);
        let mut query = vec![
            ("limit", self.settings.page_size.min(100).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let body = self.get(&path, &query)?;
        parse_listing(&path, &body)
    }
}

impl SavedItemSource for RedditClient {
    fn username(&mut self) -> Result<String, RedditError> {
        self.me()
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    fn saved_items(&mut self, username: &str) -> SavedItems<'_> {
        Box::new(SavedPages {
            client: self,
            username: username.to_string(),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }
}

fn checked_body(url: &str, response: reqwest::blocking::Response) -> Result<String, RedditError> {
    let status = response.status();
    let body = response.text().map_err(|e| RedditError::http(url, e))?;
    if !status.is_success() {
        return Err(RedditError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        });
    }
    Ok(body)
}

/// Walks the `after` cursor one page at a time
struct SavedPages<'a> {
    client: &'a mut RedditClient,
    username: String,
    after: Option<String>,
    buffer: VecDeque<SavedItem>,
    exhausted: bool,
}

impl Iterator for SavedPages<'_> {
    type Item = Result<SavedItem, RedditError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }
            match self.client.saved_page(&self.username, self.after.as_deref()) {
                Ok(page) => {
                    tracing::debug!(items = page.items.len(), after = ?page.after, "fetched saved page");
                    self.exhausted = page.after.is_none() || page.items.is_empty();
                    self.after = page.after;
                    self.buffer.extend(page.items);
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

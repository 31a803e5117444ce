use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderMap;

/// Reddit's per-client request budget, from the `x-ratelimit-*` headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

impl RateLimit {
    /// `None` unless all three headers are present and numeric.
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Self> {
        let number = |name: &str| -> Option<f64> {
            headers
                .get(name)?
                .to_str()
                .ok()?
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
        };
        let remaining = number("x-ratelimit-remaining")?;
        let used = number("x-ratelimit-used")?;
        let reset_secs = number("x-ratelimit-reset")?;
        Some(Self {
            remaining: remaining as u64,
            used: used as u64,
            reset_at: now + Duration::seconds(reset_secs as i64),
        })
    }

    /// `<RateLimit remaining=R used=U reset_in=XmYs>` relative to `now`
    pub fn describe_at(&self, now: DateTime<Utc>) -> String {
        let until = (self.reset_at - now).num_seconds().max(0);
        format!(
            "<RateLimit remaining={} used={} reset_in={}m{}s>",
            self.remaining,
            self.used,
            until / 60,
            until % 60
        )
    }
}

/// Rate-limit text for the run log; `<RateLimit unknown>` before any API call.
pub fn describe(limit: Option<RateLimit>) -> String {
    match limit {
        Some(limit) => limit.describe_at(Utc::now()),
        None => "<RateLimit unknown>".to_string(),
    }
}

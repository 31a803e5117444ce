use std::collections::HashSet;

use anyhow::Context;
use harvest_core::{Batch, Collector, RunContext, SqlValue};

use crate::rate_limit;
use crate::source::{SavedItem, SavedItemSource, Submission};

pub const COLLECTOR_NAME: &str = "reddit_collector";
pub const COLLECTOR_VERSION: &str = "0.1";

pub const SUBMISSION_TABLE: &str = "reddit_submission";
pub const SAVED_POST_TABLE: &str = "reddit_saved_post";

const SEEN_POSTS_SQL: &str = "SELECT submission_id FROM reddit_saved_post";
const INSERT_SUBMISSIONS_SQL: &str = "INSERT INTO reddit_submission (id, created_utc, title, url, post_json) \
     VALUES %s ON CONFLICT DO NOTHING";
const INSERT_SAVED_POSTS_SQL: &str =
    "INSERT INTO reddit_saved_post (submission_id) VALUES %s ON CONFLICT DO NOTHING";

/// Paging stops once this many consecutive submissions are already stored.
const SEEN_STREAK: usize = 10;
const PROGRESS_EVERY: usize = 100;

/// Stores the user's saved submissions that are not stored yet
pub struct SavedPostsCollector<S> {
    source: S,
}

impl<S: SavedItemSource> SavedPostsCollector<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    fn rate_limit_line(&self) -> String {
        format!(
            "Current Rate Limit: {}",
            rate_limit::describe(self.source.rate_limit())
        )
    }
}

impl<S: SavedItemSource> Collector for SavedPostsCollector<S> {
    fn name(&self) -> &str {
        COLLECTOR_NAME
    }

    fn version(&self) -> &str {
        COLLECTOR_VERSION
    }

    fn collect(&mut self, ctx: &mut RunContext<'_>) -> anyhow::Result<Vec<Batch>> {
        let seen: HashSet<String> = ctx
            .query(SEEN_POSTS_SQL, &[])
            .context("reading already saved posts")?
            .rows
            .iter()
            .filter_map(|row| row.get_str("submission_id").map(str::to_string))
            .collect();

        let username = self.source.username().context("logging in to reddit")?;
        ctx.log(self.rate_limit_line());
        ctx.log(format!("Logged in as {}.", username));
        ctx.log("Fetching Saved Posts Now.");

        let mut posts: Vec<Submission> = Vec::new();
        let mut other_items = 0usize;
        for (idx, item) in self.source.saved_items(&username).enumerate() {
            match item.context("fetching saved items")? {
                SavedItem::Submission(post) => posts.push(post),
                SavedItem::Comment { .. } | SavedItem::Other { .. } => other_items += 1,
            }

            if recent_posts_all_seen(&posts, &seen) {
                ctx.log(format!(
                    "Seen {} items, and the last {} posts have already been seen, so not continuing further.",
                    idx + 1,
                    SEEN_STREAK
                ));
                break;
            }

            if idx % PROGRESS_EVERY == PROGRESS_EVERY - 1 {
                ctx.log(format!("Processed {} saved items so far.", idx + 1));
            }
        }
        tracing::debug!(posts = posts.len(), other_items, "saved listing read");

        let total = posts.len();
        let new_posts: Vec<Submission> = posts
            .into_iter()
            .filter(|post| !seen.contains(&post.id))
            .collect();
        ctx.log(format!(
            "Found {} saved posts, {} of which are new.",
            total,
            new_posts.len()
        ));

        let submission_rows = new_posts.iter().map(|post| {
            vec![
                SqlValue::from(post.id.as_str()),
                SqlValue::Timestamp(post.created_utc),
                SqlValue::from(post.title.as_str()),
                SqlValue::from(post.url.as_str()),
                SqlValue::Json(post.raw.clone()),
            ]
        });
        let saved_rows = new_posts.iter().map(|post| (post.id.as_str(),));

        let batches = vec![
            Batch::new(SUBMISSION_TABLE, INSERT_SUBMISSIONS_SQL, submission_rows)?,
            Batch::new(SAVED_POST_TABLE, INSERT_SAVED_POSTS_SQL, saved_rows)?,
        ];

        ctx.log(self.rate_limit_line());
        Ok(batches)
    }
}

fn recent_posts_all_seen(posts: &[Submission], seen: &HashSet<String>) -> bool {
    posts.len() >= SEEN_STREAK
        && posts[posts.len() - SEEN_STREAK..]
            .iter()
            .all(|post| seen.contains(&post.id))
}

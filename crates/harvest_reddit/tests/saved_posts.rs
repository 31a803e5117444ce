use std::cell::Cell;
use std::rc::Rc;

use chrono::{Duration, TimeZone, Utc};
use harvest_core::{with_session, Harness, RowsAddedEntry, RunReport, RunTables, SqlValue};
use harvest_reddit::{
    RateLimit, RedditError, SavedItem, SavedItemSource, SavedItems, SavedPostsCollector,
    Submission, SAVED_POST_TABLE, SUBMISSION_TABLE,
};
use harvest_sqlite::SqliteStore;

const RUN_TRACKING_SQL: &str = include_str!("../../../sql/sqlite/001_run_tracking.sql");
const REDDIT_SQL: &str = include_str!("../../../sql/sqlite/002_reddit.sql");

/// Serves a fixed listing, optionally failing at one position.
struct ScriptedSource {
    login: Result<String, String>,
    items: Vec<SavedItem>,
    fail_at: Option<usize>,
    pulled: Rc<Cell<usize>>,
}

impl ScriptedSource {
    fn new(items: Vec<SavedItem>) -> Self {
        Self {
            login: Ok("saver".to_string()),
            items,
            fail_at: None,
            pulled: Rc::new(Cell::new(0)),
        }
    }
}

impl SavedItemSource for ScriptedSource {
    fn username(&mut self) -> Result<String, RedditError> {
        self.login.clone().map_err(RedditError::Auth)
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        Some(RateLimit {
            remaining: 598,
            used: 2,
            reset_at: Utc::now() + Duration::seconds(90),
        })
    }

    fn saved_items(&mut self, _username: &str) -> SavedItems<'_> {
        let fail_at = self.fail_at;
        let pulled = Rc::clone(&self.pulled);
        Box::new(self.items.iter().cloned().enumerate().map(move |(idx, item)| {
            pulled.set(idx + 1);
            if Some(idx) == fail_at {
                Err(RedditError::Status {
                    url: "/user/saver/saved".to_string(),
                    status: 503,
                    body: "upstream unavailable".to_string(),
                })
            } else {
                Ok(item)
            }
        }))
    }
}

fn submission(id: &str) -> SavedItem {
    SavedItem::Submission(Submission {
        id: id.to_string(),
        created_utc: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        title: format!("post {}", id),
        url: format!("https://example.com/{}", id),
        raw: serde_json::json!({"id": id, "subreddit": "rust"}),
    })
}

fn comment(id: &str) -> SavedItem {
    SavedItem::Comment { id: id.to_string() }
}

fn reddit_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("open sqlite");
    store.execute_script(RUN_TRACKING_SQL).expect("run tracking schema");
    store.execute_script(REDDIT_SQL).expect("reddit schema");
    store
}

fn run(store: &SqliteStore, source: ScriptedSource) -> RunReport {
    let harness = Harness::new(store, RunTables::default()).expect("harness");
    harness
        .run(&mut SavedPostsCollector::new(source))
        .expect("run finalized")
}

fn count(store: &SqliteStore, table: &str) -> i64 {
    with_session(store, |s| s.query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[]))
        .expect("count")
        .first()
        .and_then(|row| row.get_i64("n"))
        .expect("count value")
}

fn has_line(report: &RunReport, needle: &str) -> bool {
    report.logs.iter().any(|line| line.contains(needle))
}

#[test]
fn first_run_stores_saved_submissions_and_skips_comments() {
    let store = reddit_store();
    let report = run(
        &store,
        ScriptedSource::new(vec![
            submission("a1"),
            comment("c1"),
            submission("a2"),
            submission("a3"),
        ]),
    );

    assert!(report.succeeded(), "error: {:?}", report.run.error);
    assert_eq!(report.run.collector_name, "reddit_collector");
    assert_eq!(report.run.collector_version, "0.1");
    assert_eq!(
        report.run.rows_added,
        vec![
            RowsAddedEntry::new(SUBMISSION_TABLE, 3),
            RowsAddedEntry::new(SAVED_POST_TABLE, 3)
        ]
    );
    assert!(has_line(&report, "Logged in as saver."));
    assert!(has_line(&report, "Fetching Saved Posts Now."));
    assert!(has_line(&report, "Found 3 saved posts, 3 of which are new."));
    assert!(has_line(&report, "Current Rate Limit: <RateLimit remaining=598 used=2 reset_in="));

    let stored = with_session(&store, |s| {
        s.query(
            "SELECT title, url, json_extract(post_json, '$.subreddit') AS subreddit \
             FROM reddit_submission WHERE id = ?1",
            &[SqlValue::from("a2")],
        )
    })
    .expect("stored submission");
    let row = stored.first().expect("a2 stored");
    assert_eq!(row.get_str("title"), Some("post a2"));
    assert_eq!(row.get_str("url"), Some("https://example.com/a2"));
    assert_eq!(row.get_str("subreddit"), Some("rust"));
}

#[test]
fn second_run_over_same_listing_adds_nothing() {
    let store = reddit_store();
    let listing = || vec![submission("a1"), submission("a2")];
    run(&store, ScriptedSource::new(listing()));

    let report = run(&store, ScriptedSource::new(listing()));

    assert!(report.succeeded());
    assert_eq!(
        report.run.rows_added,
        vec![
            RowsAddedEntry::new(SUBMISSION_TABLE, 0),
            RowsAddedEntry::new(SAVED_POST_TABLE, 0)
        ]
    );
    assert!(has_line(&report, "Found 2 saved posts, 0 of which are new."));
    assert!(has_line(&report, "0 rows inserted into reddit_submission"));
    assert_eq!(count(&store, "reddit_submission"), 2);
}

#[test]
fn paging_stops_after_ten_already_seen_posts() {
    let store = reddit_store();
    let seen: Vec<SavedItem> = (0..10).map(|i| submission(&format!("s{}", i))).collect();
    run(&store, ScriptedSource::new(seen.clone()));

    let mut listing = vec![submission("fresh")];
    listing.extend(seen);
    listing.push(submission("never_read_1"));
    listing.push(submission("never_read_2"));
    let source = ScriptedSource::new(listing);
    let pulled = Rc::clone(&source.pulled);

    let report = run(&store, source);

    assert_eq!(pulled.get(), 11);
    assert!(has_line(
        &report,
        "Seen 11 items, and the last 10 posts have already been seen, so not continuing further."
    ));
    assert!(has_line(&report, "Found 11 saved posts, 1 of which are new."));
    assert_eq!(
        report.run.rows_added,
        vec![
            RowsAddedEntry::new(SUBMISSION_TABLE, 1),
            RowsAddedEntry::new(SAVED_POST_TABLE, 1)
        ]
    );
    assert_eq!(count(&store, "reddit_saved_post"), 11);
}

#[test]
fn progress_is_logged_every_hundred_items() {
    let store = reddit_store();
    let listing: Vec<SavedItem> = (0..250).map(|i| submission(&format!("p{}", i))).collect();

    let report = run(&store, ScriptedSource::new(listing));

    assert!(has_line(&report, "Processed 100 saved items so far."));
    assert!(has_line(&report, "Processed 200 saved items so far."));
    assert!(!has_line(&report, "Processed 300 saved items so far."));
    assert_eq!(count(&store, "reddit_submission"), 250);
}

#[test]
fn listing_failure_is_recorded_and_nothing_is_inserted() {
    let store = reddit_store();
    let mut source = ScriptedSource::new(vec![submission("a1"), submission("a2"), submission("a3")]);
    source.fail_at = Some(1);

    let report = run(&store, source);

    assert!(!report.succeeded());
    let error = report.run.error.as_ref().expect("error recorded");
    assert!(error.message.starts_with("fetching saved items"));
    assert!(error.message.contains("503"));
    assert!(report.run.rows_added.is_empty());
    assert_eq!(count(&store, "reddit_submission"), 0);
    assert_eq!(count(&store, "collector_run_result"), 1);
}

#[test]
fn login_failure_is_recorded() {
    let store = reddit_store();
    let mut source = ScriptedSource::new(vec![submission("a1")]);
    source.login = Err("invalid_grant".to_string());

    let report = run(&store, source);

    let error = report.run.error.as_ref().expect("error recorded");
    assert_eq!(
        error.message,
        "logging in to reddit: authentication rejected: invalid_grant"
    );
    assert!(!has_line(&report, "Fetching Saved Posts Now."));
}

//! Integration tests for the harvest pipeline
//!
//! These tests use wiremock to serve listing and detail pages and run the
//! full fetch → extract → dedup → batch write cycle against an in-memory store.

use async_trait::async_trait;
use listing_harvester::config::{load_config, parse_config, Config};
use listing_harvester::storage::{
    RecordStore, RunRecord, SqliteStore, StorageError, StorageResult, UpsertReport,
};
use listing_harvester::{
    run_harvest, ConflictPolicy, HarvestError, Record, RunOutcome, RunState,
};
use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with no pacing and millisecond retries
fn create_test_config(start_url: &str, extra_harvest: &str, policy: ConflictPolicy) -> Config {
    parse_config(&test_config_toml(start_url, extra_harvest, policy))
        .expect("test config should be valid")
}

fn test_config_toml(start_url: &str, extra_harvest: &str, policy: ConflictPolicy) -> String {
    format!(
        r#"
[harvest]
start-url = "{start_url}"
concurrency = 3
{extra_harvest}

[pacing]
min-delay-ms = 0
max-delay-ms = 0

[retry]
max-attempts = 5
base-delay-ms = 1
max-delay-ms = 5
jitter = 0.0

[batch]
size = 2
flush-interval-ms = 50
conflict-policy = "{policy}"

[http]
timeout-secs = 5

[output]
database-path = ":memory:"
"#
    )
}

fn listing_page(items: &[&str], next: Option<&str>) -> String {
    let items: Vec<String> = items
        .iter()
        .map(|href| format!(r#"{{"linkToView":"{}"}}"#, href))
        .collect();
    let pagination = match next {
        Some(next) => format!(r#","pagination":{{"next":"{}"}}"#, next),
        None => r#","pagination":{"page":1,"pages":1}"#.to_string(),
    };
    format!(
        r#"<html><body><script id="__NEXT_DATA__" type="application/json">
        {{"props":{{"pageProps":{{"search":{{"items":[{}]}}{}}}}}}}
        </script></body></html>"#,
        items.join(","),
        pagination
    )
}

fn detail_page(title: &str, price: u32) -> String {
    format!(
        r#"<html><head><script>
        window.__INITIAL_STATE__ = {{"advert":{{
            "title":"{}",
            "price":{{"usd":{}}},
            "autoData":{{"raceInt":120}},
            "seller":{{"name":"Seller"}},
            "photos":[{{"url":"/p/1.jpg"}},{{"url":"/p/2.jpg"}}]
        }}}};
        </script></head><body></body></html>"#,
        title, price
    )
}

async fn mount_page(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Mounts a listing at /list with the given detail paths, each serving a detail page
async fn mount_site(server: &MockServer, details: &[&str]) {
    mount_page(server, "/list", listing_page(details, None)).await;
    for (i, detail) in details.iter().enumerate() {
        mount_page(server, detail, detail_page(&format!("Car {}", i), 10_000 + i as u32)).await;
    }
}

/// Server-rendered listing without embedded state
fn markup_listing(hrefs: &[&str]) -> String {
    let anchors: Vec<String> = hrefs
        .iter()
        .map(|href| format!(r#"<section><a class="address" href="{}">Car</a></section>"#, href))
        .collect();
    format!("<html><body>{}</body></html>", anchors.join("\n"))
}

/// A store that rejects every batch write with a transient error
struct RejectingStore {
    inner: SqliteStore,
    upserts: AtomicU64,
}

#[async_trait]
impl RecordStore for RejectingStore {
    async fn verify_schema(&self) -> StorageResult<()> {
        self.inner.verify_schema().await
    }

    async fn upsert_batch(
        &self,
        _records: Vec<Record>,
        _policy: ConflictPolicy,
    ) -> StorageResult<UpsertReport> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Task("disk unavailable".to_string()))
    }

    async fn existing_urls(&self, urls: Vec<String>) -> StorageResult<HashSet<String>> {
        self.inner.existing_urls(urls).await
    }

    async fn get_record(&self, url: &str) -> StorageResult<Option<Record>> {
        self.inner.get_record(url).await
    }

    async fn count_records(&self) -> StorageResult<u64> {
        self.inner.count_records().await
    }

    async fn begin_run(&self, start_url: &str, config_hash: &str) -> StorageResult<i64> {
        self.inner.begin_run(start_url, config_hash).await
    }

    async fn finish_run(&self, run_id: i64, outcome: &RunOutcome) -> StorageResult<()> {
        self.inner.finish_run(run_id, outcome).await
    }

    async fn recent_runs(&self, limit: u32) -> StorageResult<Vec<RunRecord>> {
        self.inner.recent_runs(limit).await
    }
}

async fn harvest(config: Config, store: &SqliteStore) -> Result<RunOutcome, HarvestError> {
    let store: Arc<dyn RecordStore> = Arc::new(store.clone());
    run_harvest(config, "test-hash", store, CancellationToken::new()).await
}

#[tokio::test]
async fn test_full_harvest_single_listing() {
    let server = MockServer::start().await;
    mount_site(&server, &["/auto_1.html", "/auto_2.html", "/auto_3.html"]).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.fetched, 4);
    assert_eq!(outcome.parsed, 4);
    assert_eq!(outcome.inserted, 3);
    assert_eq!(outcome.lost, 0);
    assert_eq!(outcome.failed(), 0);
    assert_eq!(store.count_records().await.unwrap(), 3);

    let record = store
        .get_record(&format!("{}/auto_2.html", server.uri()))
        .await
        .unwrap()
        .expect("record should be stored");
    assert_eq!(record.title.as_deref(), Some("Car 1"));
    assert_eq!(record.price_usd, Some(10_001));
    assert_eq!(record.odometer, Some(120_000));
    assert_eq!(record.images_count, 2);
    assert_eq!(
        record.image_url,
        Some(format!("{}/p/1.jpg", server.uri()))
    );

    let runs = store.recent_runs(1).await.unwrap();
    assert_eq!(runs[0].state, RunState::Done);
    assert_eq!(runs[0].inserted, 3);
    assert_eq!(runs[0].config_hash, "test-hash");
}

#[tokio::test]
async fn test_duplicate_links_fetched_once() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/list",
        listing_page(
            &["/auto_1.html", "/auto_1.html?utm_source=feed", "/auto_1.html#photos"],
            None,
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/auto_1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page("Only", 5_000)))
        .expect(1)
        .mount(&server)
        .await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.inserted, 1);
    assert_eq!(store.count_records().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rate_limited_detail_is_retried_until_success() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", listing_page(&["/auto_1.html"], None)).await;

    // Registered first, so it answers until exhausted
    Mock::given(method("GET"))
        .and(path("/auto_1.html"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(4)
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auto_1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page("Patient", 7_000)))
        .expect(1)
        .mount(&server)
        .await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.fetch_failures, 0);
    assert_eq!(outcome.inserted, 1);
}

#[tokio::test]
async fn test_server_errors_give_up_after_max_attempts() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/list",
        listing_page(&["/auto_ok.html", "/auto_down.html"], None),
    )
    .await;
    mount_page(&server, "/auto_ok.html", detail_page("Up", 3_000)).await;
    Mock::given(method("GET"))
        .and(path("/auto_down.html"))
        .respond_with(ResponseTemplate::new(503))
        .expect(5)
        .mount(&server)
        .await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    // One dead URL does not fail the run
    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.fetch_failures, 1);
    assert_eq!(outcome.inserted, 1);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", listing_page(&["/auto_gone.html"], None)).await;
    Mock::given(method("GET"))
        .and(path("/auto_gone.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.fetch_failures, 1);
    assert_eq!(outcome.inserted, 0);
}

#[tokio::test]
async fn test_unparseable_detail_is_counted_and_skipped() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/list",
        listing_page(&["/auto_1.html", "/auto_captcha.html"], None),
    )
    .await;
    mount_page(&server, "/auto_1.html", detail_page("Fine", 4_000)).await;
    mount_page(
        &server,
        "/auto_captcha.html",
        "<html><body><div>Are you human?</div></body></html>".to_string(),
    )
    .await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.parse_failures, 1);
    assert_eq!(outcome.inserted, 1);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let server = MockServer::start().await;
    mount_site(&server, &["/auto_1.html", "/auto_2.html"]).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let start_url = format!("{}/list", server.uri());

    let first = harvest(create_test_config(&start_url, "", ConflictPolicy::Ignore), &store)
        .await
        .unwrap();
    let second = harvest(create_test_config(&start_url, "", ConflictPolicy::Ignore), &store)
        .await
        .unwrap();

    assert_eq!(first.inserted, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.conflict_ignored, 2);
    assert_eq!(second.skipped_duplicates(), 2);
    assert_eq!(second.failed(), 0);
    assert_eq!(second.state, RunState::Done);
    assert_eq!(store.count_records().await.unwrap(), 2);
    let runs = store.recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].skipped, 2);
}

#[tokio::test]
async fn test_update_policy_refreshes_datetime_found() {
    let server = MockServer::start().await;
    mount_site(&server, &["/auto_1.html"]).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let start_url = format!("{}/list", server.uri());
    let detail_url = format!("{}/auto_1.html", server.uri());

    harvest(create_test_config(&start_url, "", ConflictPolicy::Ignore), &store)
        .await
        .unwrap();
    let original = store.get_record(&detail_url).await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let ignored = harvest(create_test_config(&start_url, "", ConflictPolicy::Ignore), &store)
        .await
        .unwrap();
    let after_ignore = store.get_record(&detail_url).await.unwrap().unwrap();
    assert_eq!(ignored.updated, 0);
    assert_eq!(after_ignore.datetime_found, original.datetime_found);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let updated = harvest(create_test_config(&start_url, "", ConflictPolicy::Update), &store)
        .await
        .unwrap();
    let after_update = store.get_record(&detail_url).await.unwrap().unwrap();
    assert_eq!(updated.updated, 1);
    assert_eq!(updated.inserted, 0);
    assert!(after_update.datetime_found > original.datetime_found);
}

#[tokio::test]
async fn test_skip_known_urls_avoids_refetch() {
    let server = MockServer::start().await;
    mount_page(&server, "/list", listing_page(&["/auto_1.html"], None)).await;
    Mock::given(method("GET"))
        .and(path("/auto_1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page("Known", 1_000)))
        .expect(1)
        .mount(&server)
        .await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let start_url = format!("{}/list", server.uri());

    harvest(create_test_config(&start_url, "", ConflictPolicy::Ignore), &store)
        .await
        .unwrap();
    let second = harvest(
        create_test_config(&start_url, "skip-known-urls = true", ConflictPolicy::Ignore),
        &store,
    )
    .await
    .unwrap();

    assert_eq!(second.fetched, 1);
    assert_eq!(second.ignored_existing, 1);
    assert_eq!(second.skipped_duplicates(), 1);
}

#[tokio::test]
async fn test_pagination_stops_at_max_listing_pages() {
    let server = MockServer::start().await;
    mount_page(&server, "/list/1", listing_page(&["/auto_1.html"], Some("/list/2"))).await;
    mount_page(&server, "/list/2", listing_page(&["/auto_2.html"], Some("/list/3"))).await;
    Mock::given(method("GET"))
        .and(path("/list/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["/auto_3.html"], None)))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/auto_1.html", detail_page("One", 1)).await;
    mount_page(&server, "/auto_2.html", detail_page("Two", 2)).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list/1", server.uri()),
        "max-listing-pages = 2",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.fetched, 4);
    assert_eq!(outcome.inserted, 2);
}

#[tokio::test]
async fn test_pagination_stops_on_empty_listing() {
    let server = MockServer::start().await;
    mount_page(&server, "/list/1", listing_page(&["/auto_1.html"], Some("/list/2"))).await;
    mount_page(&server, "/list/2", listing_page(&[], Some("/list/3"))).await;
    Mock::given(method("GET"))
        .and(path("/list/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[], None)))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/auto_1.html", detail_page("One", 1)).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list/1", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.inserted, 1);
}

#[tokio::test]
async fn test_schema_not_ready_fails_before_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[], None)))
        .expect(0)
        .mount(&server)
        .await;

    let store = SqliteStore::open_in_memory().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let result = harvest(config, &store).await;

    assert!(matches!(result, Err(HarvestError::SchemaNotReady(_))));
}

#[tokio::test]
async fn test_cancelled_run_drains_to_done() {
    let server = MockServer::start().await;
    mount_site(&server, &["/auto_1.html"]).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let shared: Arc<dyn RecordStore> = Arc::new(store.clone());
    let outcome = run_harvest(config, "test-hash", shared, cancel).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert!(outcome.cancelled);
    assert_eq!(outcome.fetched, 0);

    let runs = store.recent_runs(1).await.unwrap();
    assert!(runs[0].cancelled);
}

#[tokio::test]
async fn test_harvest_from_config_file() {
    let server = MockServer::start().await;
    mount_site(&server, &["/auto_1.html"]).await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[harvest]
start-url = "{}/list"
concurrency = 1

[pacing]
min-delay-ms = 0
max-delay-ms = 0

[retry]
max-attempts = 2
base-delay-ms = 1
max-delay-ms = 1

[batch]
size = 10
flush-interval-ms = 20

[output]
database-path = "unused.db"
"#,
        server.uri()
    )
    .unwrap();
    file.flush().unwrap();

    let config = load_config(file.path()).unwrap();
    let store = SqliteStore::in_memory_with_schema().unwrap();

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.inserted, 1);
}

#[tokio::test]
async fn test_markup_listing_walks_page_param() {
    let server = MockServer::start().await;
    // Page-specific mocks first: the bare /list mock matches any query
    mount_page_with_query(&server, "2", markup_listing(&["/auto_2.html"])).await;
    mount_page_with_query(&server, "3", "<html><body>No results</body></html>".to_string()).await;
    mount_page(&server, "/list", markup_listing(&["/auto_1.html"])).await;
    mount_page(&server, "/auto_1.html", detail_page("One", 1_000)).await;
    mount_page(&server, "/auto_2.html", detail_page("Two", 2_000)).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.state, RunState::Done);
    assert_eq!(outcome.fetched, 5);
    assert_eq!(outcome.parse_failures, 0);
    assert_eq!(outcome.inserted, 2);
}

#[tokio::test]
async fn test_markup_listing_walk_respects_max_listing_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(markup_listing(&["/auto_3.html"])))
        .expect(0)
        .mount(&server)
        .await;
    mount_page_with_query(&server, "2", markup_listing(&["/auto_2.html"])).await;
    mount_page(&server, "/list", markup_listing(&["/auto_1.html"])).await;
    mount_page(&server, "/auto_1.html", detail_page("One", 1_000)).await;
    mount_page(&server, "/auto_2.html", detail_page("Two", 2_000)).await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "max-listing-pages = 2",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.fetched, 4);
    assert_eq!(outcome.inserted, 2);
    assert_eq!(store.count_records().await.unwrap(), 2);
}

async fn mount_page_with_query(server: &MockServer, page: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/list"))
        .and(query_param("page", page))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_store_rejecting_every_batch_fails_the_run() {
    let server = MockServer::start().await;
    let details = [
        "/auto_1.html",
        "/auto_2.html",
        "/auto_3.html",
        "/auto_4.html",
        "/auto_5.html",
        "/auto_6.html",
    ];
    mount_site(&server, &details).await;

    let sqlite = SqliteStore::in_memory_with_schema().unwrap();
    let store = Arc::new(RejectingStore {
        inner: sqlite.clone(),
        upserts: AtomicU64::new(0),
    });
    let config = create_test_config(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = run_harvest(
        config,
        "test-hash",
        Arc::clone(&store) as Arc<dyn RecordStore>,
        CancellationToken::new(),
    )
    .await
    .expect("a failed run still reports its outcome");

    assert_eq!(outcome.state, RunState::Failed);
    assert!(!outcome.cancelled);
    assert!(outcome.lost > 0);
    assert_eq!(outcome.inserted, 0);
    assert!(outcome.failed() >= outcome.lost);
    // Each lost batch was retried before it was given up
    assert!(store.upserts.load(Ordering::SeqCst) >= 3 * 3);
    assert_eq!(sqlite.count_records().await.unwrap(), 0);

    let runs = sqlite.recent_runs(1).await.unwrap();
    assert_eq!(runs[0].state, RunState::Failed);
    assert_eq!(runs[0].lost, outcome.lost);
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_buffered_records() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/list",
        listing_page(&["/auto_1.html", "/auto_2.html", "/auto_slow.html"], None),
    )
    .await;
    mount_page(&server, "/auto_1.html", detail_page("Fast one", 1_000)).await;
    mount_page(&server, "/auto_2.html", detail_page("Fast two", 2_000)).await;
    Mock::given(method("GET"))
        .and(path("/auto_slow.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_page("Slow", 3_000))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    // Nothing reaches the store before the final flush
    let toml = test_config_toml(
        &format!("{}/list", server.uri()),
        "",
        ConflictPolicy::Ignore,
    )
    .replace("size = 2", "size = 10")
    .replace("flush-interval-ms = 50", "flush-interval-ms = 600000");
    let config = parse_config(&toml).unwrap();

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let shared: Arc<dyn RecordStore> = Arc::new(store.clone());
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });
    }

    let started = Instant::now();
    let outcome = run_harvest(config, "test-hash", shared, cancel).await.unwrap();

    // The slow request was aborted rather than waited out
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(outcome.state, RunState::Done);
    assert!(outcome.cancelled);
    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.fetch_failures, 0);
    assert_eq!(outcome.inserted, 2);

    assert_eq!(store.count_records().await.unwrap(), 2);
    assert!(store
        .get_record(&format!("{}/auto_slow.html", server.uri()))
        .await
        .unwrap()
        .is_none());
    assert!(store.recent_runs(1).await.unwrap()[0].cancelled);
}

#[tokio::test]
async fn test_listing_links_resolve_against_redirect_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/used"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/uk/car/used/"))
        .mount(&server)
        .await;
    mount_page(&server, "/uk/car/used/", listing_page(&["auto_1.html"], None)).await;
    Mock::given(method("GET"))
        .and(path("/uk/car/used/auto_1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_page("Moved", 9_000)))
        .expect(1)
        .mount(&server)
        .await;

    let store = SqliteStore::in_memory_with_schema().unwrap();
    let config = create_test_config(
        &format!("{}/used", server.uri()),
        "",
        ConflictPolicy::Ignore,
    );

    let outcome = harvest(config, &store).await.unwrap();

    assert_eq!(outcome.fetch_failures, 0);
    assert_eq!(outcome.inserted, 1);
    assert!(store
        .get_record(&format!("{}/uk/car/used/auto_1.html", server.uri()))
        .await
        .unwrap()
        .is_some());
}

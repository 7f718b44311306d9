//! Fetcher limits against a local server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use tokio::task::JoinSet;

use catalog_watch::config::HttpConfig;
use catalog_watch::fetcher::{FetchError, RateLimitedFetcher};

#[derive(Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    served: AtomicUsize,
}

async fn slow(State(gauge): State<Arc<Gauge>>) -> &'static str {
    let now = gauge.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    gauge.peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
    gauge.served.fetch_add(1, Ordering::SeqCst);
    "<html><body>ok</body></html>"
}

async fn stalled() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn echo_agent(headers: HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn spawn_server(gauge: Arc<Gauge>) -> String {
    let app = Router::new()
        .route("/slow", get(slow))
        .route("/stalled", get(stalled))
        .route("/agent", get(echo_agent))
        .route("/gone", get(|| async { (StatusCode::NOT_FOUND, "gone") }))
        .with_state(gauge);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn http(concurrency: usize, rate_limit_rps: f64, burst: u32, timeout_secs: u64) -> HttpConfig {
    HttpConfig {
        concurrency,
        rate_limit_rps,
        burst,
        timeout_secs,
        ..HttpConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_requests_never_exceed_concurrency() {
    let gauge = Arc::new(Gauge::default());
    let base = spawn_server(gauge.clone()).await;
    let fetcher = Arc::new(RateLimitedFetcher::new(&http(2, 200.0, 10, 10)).unwrap());

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let fetcher = fetcher.clone();
        let url = format!("{}/slow", base);
        tasks.spawn(async move { fetcher.fetch(&url).await });
    }
    while let Some(result) = tasks.join_next().await {
        let response = result.unwrap().unwrap();
        assert_eq!(response.status, 200);
    }

    assert_eq!(gauge.served.load(Ordering::SeqCst), 8);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak in-flight was {}", peak);
    assert!(peak >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_rate_is_capped() {
    let gauge = Arc::new(Gauge::default());
    let base = spawn_server(gauge).await;
    // One token up front, then one every 250ms.
    let fetcher = Arc::new(RateLimitedFetcher::new(&http(5, 4.0, 1, 10)).unwrap());

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let fetcher = fetcher.clone();
        let url = format!("{}/agent", base);
        tasks.spawn(async move { fetcher.fetch(&url).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(900),
        "5 requests at 4 rps finished in {:?}",
        elapsed
    );
}

#[tokio::test]
async fn slow_response_times_out() {
    let base = spawn_server(Arc::new(Gauge::default())).await;
    let fetcher = RateLimitedFetcher::new(&http(1, 10.0, 1, 1)).unwrap();

    let started = Instant::now();
    let err = fetcher.fetch(&format!("{}/stalled", base)).await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(4));

    // The permit was released: the next request goes through.
    let ok = fetcher.fetch(&format!("{}/agent", base)).await.unwrap();
    assert_eq!(ok.status, 200);
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let base = spawn_server(Arc::new(Gauge::default())).await;
    let fetcher = RateLimitedFetcher::new(&http(1, 10.0, 1, 5)).unwrap();

    let err = fetcher.fetch(&format!("{}/gone", base)).await.unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus(404)), "{:?}", err);
}

#[tokio::test]
async fn configured_user_agent_is_sent() {
    let base = spawn_server(Arc::new(Gauge::default())).await;
    let fetcher = RateLimitedFetcher::new(&HttpConfig {
        user_agent: "catalog-watch-test/1.0".to_string(),
        ..http(1, 10.0, 1, 5)
    })
    .unwrap();

    let response = fetcher.fetch(&format!("{}/agent", base)).await.unwrap();
    assert_eq!(response.body, "catalog-watch-test/1.0");
}

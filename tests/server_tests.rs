//! The server running on a real socket.

mod common;

use std::sync::Arc;

use assetgate::db::Database;
use assetgate::rate_limit::RateLimitConfig;
use assetgate::run_server;
use common::{CLIENT_IP, FakeVendor, RecordingMailer, test_config};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_run_server_serves_api_and_pages() {
    let db = Database::open(":memory:").await.unwrap();
    let config = test_config(
        db,
        Arc::new(FakeVendor::default()),
        Arc::new(RecordingMailer::default()),
        RateLimitConfig::permissive(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_server(config, listener));

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let response = client
        .get(format!("http://{}/api/config", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let response = client
        .get(format!("http://{}/dashboard", addr))
        .header("x-forwarded-for", CLIENT_IP)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()["location"],
        "/sign-in?callbackUrl=%2Fdashboard"
    );
}

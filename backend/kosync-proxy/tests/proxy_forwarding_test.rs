//! Integration Tests: Forwarding Layer
//!
//! Runs the proxy app in-process against a stub KoSync server bound to a
//! random local port.
//!
//! Coverage:
//! - Method, path, query, headers and body relayed both ways
//! - Accepted progress calls feed the tracker, rejected ones do not
//! - Upstream outages surface as gateway errors
//! - Local probe endpoints

mod common;

use actix_web::{http::StatusCode, test, web, App, HttpRequest, HttpResponse, HttpServer};
use bytes::Bytes;
use chrono::Duration;
use common::mock_library::MockLibrary;
use common::mock_session_store::MockSessionStore;
use common::t0;
use kosync_proxy::config::UpstreamConfig;
use kosync_proxy::handlers::{self, ProxyState};
use kosync_proxy::middleware::RequestTracing;
use kosync_proxy::models::SessionKey;
use kosync_proxy::services::{
    ManualClock, SessionTracker, SyncEventAdapter, TrackerSettings, UpstreamClient,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

const DOC: &str = "0b229176d4e8db7f6d2b5a4952368d7a";

async fn stub_push(req: HttpRequest, body: web::Json<serde_json::Value>) -> HttpResponse {
    match req.headers().get("x-auth-user").and_then(|v| v.to_str().ok()) {
        Some("reader") => HttpResponse::Ok().json(json!({
            "document": body["document"],
            "timestamp": 1709323200
        })),
        _ => HttpResponse::Unauthorized().json(json!({ "code": 2001, "message": "Unauthorized" })),
    }
}

async fn stub_pull(path: web::Path<String>) -> HttpResponse {
    let document = path.into_inner();
    if document == DOC {
        HttpResponse::Ok().json(json!({
            "document": document,
            "percentage": 0.5,
            "progress": "/body/DocFragment[9]",
            "device": "KOReader",
            "timestamp": 1709323200
        }))
    } else {
        HttpResponse::NotFound().finish()
    }
}

async fn stub_echo(req: HttpRequest, body: Bytes) -> HttpResponse {
    let user = req
        .headers()
        .get("x-auth-user")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let saw_proxy_auth = req.headers().contains_key("proxy-authorization");

    HttpResponse::Created()
        .insert_header(("x-upstream", "stub"))
        .json(json!({
            "method": req.method().as_str(),
            "path": req.path(),
            "query": req.query_string(),
            "user": user,
            "saw_proxy_authorization": saw_proxy_auth,
            "body": String::from_utf8_lossy(&body),
        }))
}

fn start_stub() -> SocketAddr {
    let server = HttpServer::new(|| {
        App::new()
            .service(
                web::resource("/api/kosync/syncs/progress")
                    .route(web::put().to(stub_push))
                    .default_service(web::to(stub_echo)),
            )
            .route("/api/kosync/syncs/progress/{document}", web::get().to(stub_pull))
            .default_service(web::to(stub_echo))
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    addr
}

fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn proxy_state(upstream: SocketAddr) -> (web::Data<ProxyState>, Arc<SessionTracker>) {
    let store = MockSessionStore::new();
    let tracker = Arc::new(SessionTracker::new(
        TrackerSettings::new(Duration::minutes(10), 10),
        Arc::new(store),
    ));
    let library = Arc::new(
        MockLibrary::new()
            .with_user("reader", 1)
            .with_book(DOC, 7, "EPUB"),
    );
    let adapter = Arc::new(SyncEventAdapter::new(
        library,
        tracker.clone(),
        Arc::new(ManualClock::new(t0())),
    ));
    let upstream = UpstreamClient::new(&UpstreamConfig {
        base_url: format!("http://{}/api/kosync", upstream),
        timeout: std::time::Duration::from_secs(2),
    })
    .unwrap();

    let state = web::Data::new(ProxyState {
        upstream,
        adapter,
        tracker: tracker.clone(),
    });
    (state, tracker)
}

/// Tracking runs on a spawned task; give it a moment
async fn wait_for_active(tracker: &SessionTracker, expected: usize) -> bool {
    for _ in 0..50 {
        if tracker.active_count() == expected {
            return true;
        }
        actix_web::rt::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}

#[actix_web::test]
async fn test_unrelated_request_is_relayed() {
    let (state, tracker) = proxy_state(start_stub());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .wrap(RequestTracing)
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/users/create?source=koreader")
        .insert_header(("x-auth-user", "reader"))
        .insert_header(("proxy-authorization", "Basic abc"))
        .set_payload("hello upstream")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.headers().get("x-upstream").unwrap(), "stub");
    assert!(resp.headers().contains_key("x-request-id"));

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/api/kosync/users/create");
    assert_eq!(body["query"], "source=koreader");
    assert_eq!(body["user"], "reader");
    assert_eq!(body["saw_proxy_authorization"], false);
    assert_eq!(body["body"], "hello upstream");

    assert_eq!(tracker.active_count(), 0);
}

#[actix_web::test]
async fn test_accepted_push_is_tracked() {
    let (state, tracker) = proxy_state(start_stub());
    let app = test::init_service(App::new().app_data(state).configure(handlers::configure)).await;

    let req = test::TestRequest::put()
        .uri("/syncs/progress")
        .insert_header(("x-auth-user", "reader"))
        .set_json(json!({
            "document": DOC,
            "progress": "/body/DocFragment[3]",
            "percentage": 0.12,
            "device": "KOReader",
            "device_id": "A1B2"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["document"], DOC);

    assert!(wait_for_active(&tracker, 1).await);
    let session = tracker.snapshot(SessionKey::new(1, 7)).unwrap();
    assert_eq!(session.start_progress, 0.12);
}

#[actix_web::test]
async fn test_rejected_push_is_relayed_and_not_tracked() {
    let (state, tracker) = proxy_state(start_stub());
    let app = test::init_service(App::new().app_data(state).configure(handlers::configure)).await;

    let req = test::TestRequest::put()
        .uri("/syncs/progress")
        .insert_header(("x-auth-user", "intruder"))
        .set_json(json!({ "document": DOC, "percentage": 0.12 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 2001);

    actix_web::rt::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(tracker.active_count(), 0);
}

#[actix_web::test]
async fn test_pull_is_tracked_from_response() {
    let (state, tracker) = proxy_state(start_stub());
    let app = test::init_service(App::new().app_data(state).configure(handlers::configure)).await;

    let req = test::TestRequest::get()
        .uri(&format!("/syncs/progress/{}", DOC))
        .insert_header(("x-auth-user", "reader"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    assert!(wait_for_active(&tracker, 1).await);
    let session = tracker.snapshot(SessionKey::new(1, 7)).unwrap();
    assert_eq!(session.end_progress, 0.5);
    assert_eq!(session.end_location, "/body/DocFragment[9]");
}

#[actix_web::test]
async fn test_pull_miss_is_not_tracked() {
    let (state, tracker) = proxy_state(start_stub());
    let app = test::init_service(App::new().app_data(state).configure(handlers::configure)).await;

    let req = test::TestRequest::get()
        .uri("/syncs/progress/unknown-document")
        .insert_header(("x-auth-user", "reader"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    actix_web::rt::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(tracker.active_count(), 0);
}

#[actix_web::test]
async fn test_other_method_on_progress_path_is_forwarded() {
    let (state, tracker) = proxy_state(start_stub());
    let app = test::init_service(App::new().app_data(state).configure(handlers::configure)).await;

    let req = test::TestRequest::post()
        .uri("/syncs/progress")
        .set_payload("{}")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["path"], "/api/kosync/syncs/progress");
    assert_eq!(tracker.active_count(), 0);
}

#[actix_web::test]
async fn test_upstream_down_returns_bad_gateway() {
    let (state, tracker) = proxy_state(unused_addr());
    let app = test::init_service(App::new().app_data(state).configure(handlers::configure)).await;

    let req = test::TestRequest::put()
        .uri("/syncs/progress")
        .insert_header(("x-auth-user", "reader"))
        .set_json(json!({ "document": DOC, "percentage": 0.12 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    actix_web::rt::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(tracker.active_count(), 0);
}

#[actix_web::test]
async fn test_probes_are_local() {
    let (state, tracker) = proxy_state(unused_addr());
    let app = test::init_service(App::new().app_data(state).configure(handlers::configure)).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // No database pool registered
    let resp = test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["database"], "not_configured");
    assert_eq!(body["tracker"], "ok");

    tracker.shutdown().await.unwrap();
    let resp = test::call_service(&app, test::TestRequest::get().uri("/ready").to_request()).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["tracker"], "closed");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

//! Transparent forwarding to the upstream KoSync server
//!
//! Every request is relayed unchanged. The two progress routes additionally
//! hand the exchange to the sync adapter once the response is known; that
//! work runs on a spawned task so the client never waits on tracking.

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::middleware;
use crate::models::SyncDirection;
use crate::services::{ForwardRequest, SessionTracker, SyncEventAdapter, SyncOutcome, UpstreamClient};

/// Header carrying the KoSync username
pub const AUTH_USER_HEADER: &str = "x-auth-user";

/// Shared state for the forwarding handlers
pub struct ProxyState {
    pub upstream: UpstreamClient,
    pub adapter: Arc<SyncEventAdapter>,
    pub tracker: Arc<SessionTracker>,
}

/// PUT /syncs/progress
pub async fn push_progress(
    req: HttpRequest,
    body: Bytes,
    state: web::Data<ProxyState>,
) -> Result<HttpResponse> {
    let payload = serde_json::from_slice::<Value>(&body).ok();

    let response = state.upstream.forward(forward_request(&req, body)).await?;

    observe(
        &state,
        sync_outcome(&req, SyncDirection::Push, None, response.status, payload),
    );

    Ok(relay(response.status, &response.headers, response.body))
}

/// GET /syncs/progress/{document}
pub async fn pull_progress(
    req: HttpRequest,
    body: Bytes,
    document: web::Path<String>,
    state: web::Data<ProxyState>,
) -> Result<HttpResponse> {
    let response = state.upstream.forward(forward_request(&req, body)).await?;

    let payload = response.json();
    observe(
        &state,
        sync_outcome(
            &req,
            SyncDirection::Pull,
            Some(document.into_inner()),
            response.status,
            payload,
        ),
    );

    Ok(relay(response.status, &response.headers, response.body))
}

/// Any other path and method
pub async fn forward_any(
    req: HttpRequest,
    body: Bytes,
    state: web::Data<ProxyState>,
) -> Result<HttpResponse> {
    let response = state.upstream.forward(forward_request(&req, body)).await?;
    Ok(relay(response.status, &response.headers, response.body))
}

fn auth_user(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(AUTH_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn sync_outcome(
    req: &HttpRequest,
    direction: SyncDirection,
    document: Option<String>,
    upstream_status: u16,
    payload: Option<Value>,
) -> SyncOutcome {
    SyncOutcome {
        request_id: middleware::request_id(req),
        direction,
        username: auth_user(req),
        document,
        upstream_status,
        payload,
    }
}

fn forward_request(req: &HttpRequest, body: Bytes) -> ForwardRequest {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.path().to_string());

    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect();

    ForwardRequest {
        method: req.method().to_string(),
        path_and_query,
        headers,
        body,
    }
}

fn observe(state: &ProxyState, outcome: SyncOutcome) {
    let adapter = Arc::clone(&state.adapter);
    actix_web::rt::spawn(async move {
        adapter.handle(outcome).await;
    });
}

fn relay(status: u16, headers: &[(String, Vec<u8>)], body: Bytes) -> HttpResponse {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    for (name, value) in headers {
        builder.append_header((name.as_str(), value.as_slice()));
    }
    builder.body(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::RequestId;
    use actix_web::{test::TestRequest, HttpMessage};
    use serde_json::json;

    #[test]
    fn test_sync_outcome_carries_request_context() {
        let req = TestRequest::put()
            .uri("/syncs/progress")
            .insert_header((AUTH_USER_HEADER, "reader"))
            .to_http_request();
        req.extensions_mut().insert(RequestId("req-42".to_string()));

        let outcome = sync_outcome(
            &req,
            SyncDirection::Push,
            None,
            200,
            Some(json!({ "percentage": 0.3 })),
        );

        assert_eq!(outcome.request_id, "req-42");
        assert_eq!(outcome.username.as_deref(), Some("reader"));
        assert_eq!(outcome.direction, SyncDirection::Push);
        assert!(outcome.upstream_accepted());
    }

    #[test]
    fn test_sync_outcome_outside_middleware() {
        let req = TestRequest::get()
            .uri("/syncs/progress/abc")
            .to_http_request();

        let outcome = sync_outcome(&req, SyncDirection::Pull, Some("abc".to_string()), 404, None);

        assert_eq!(outcome.request_id, "-");
        assert_eq!(outcome.username, None);
        assert_eq!(outcome.document.as_deref(), Some("abc"));
    }
}

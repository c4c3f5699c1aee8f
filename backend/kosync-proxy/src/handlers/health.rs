use actix_web::{web, HttpResponse};
use serde_json::json;
use sqlx::MySqlPool;

use crate::handlers::proxy::ProxyState;

/// Liveness: the process is serving requests
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": crate::config::SERVICE_NAME,
    }))
}

/// Readiness: the database answers and the tracker still accepts events
pub async fn readiness(
    pool: Option<web::Data<MySqlPool>>,
    state: web::Data<ProxyState>,
) -> HttpResponse {
    let database = match pool {
        Some(pool) => match db_pool::ping(pool.get_ref()).await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Readiness check: database unreachable");
                "unavailable"
            }
        },
        None => "not_configured",
    };
    let tracker = if state.tracker.is_closed() {
        "closed"
    } else {
        "ok"
    };

    let ready = database == "ok" && tracker == "ok";
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "database": database,
        "tracker": tracker,
        "active_sessions": state.tracker.active_count(),
    });

    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

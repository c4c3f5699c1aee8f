/// HTTP handlers
///
/// - Probes: `/health`, `/ready` and `/metrics`, answered locally
/// - Progress: push and pull calls, forwarded and then observed
/// - Everything else: forwarded as-is
pub mod health;
pub mod proxy;

use actix_web::web;

pub use proxy::ProxyState;

/// Register every route. Other methods on the progress paths, and every
/// unmatched path, are forwarded without observation.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health))
        .route("/ready", web::get().to(health::readiness))
        .route("/metrics", web::get().to(crate::metrics::serve_metrics))
        .service(
            web::resource("/syncs/progress")
                .route(web::put().to(proxy::push_progress))
                .default_service(web::to(proxy::forward_any)),
        )
        .service(
            web::resource("/syncs/progress/{document}")
                .route(web::get().to(proxy::pull_progress))
                .default_service(web::to(proxy::forward_any)),
        )
        .service(web::resource("/{tail:.*}").to(proxy::forward_any));
}

use axum::{Router, middleware::from_fn_with_state, routing::get};
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::Level;

use crate::{DeploymentImpl, routes};

mod auth;

pub fn router(deployment: DeploymentImpl) -> Router {
    let api_routes = Router::new()
        .merge(routes::info::router())
        .merge(routes::images::router())
        .merge(routes::gallery::router(&deployment))
        .merge(routes::shipments::router(&deployment))
        .merge(routes::url_mappings::router())
        .layer(from_fn_with_state(
            deployment.clone(),
            auth::require_api_auth,
        ));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        .with_state(deployment)
}

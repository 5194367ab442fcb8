use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{self, Payload};
use crate::state::{AppState, KindState};

/// Routes of one kind: `/{kind}` and `/{kind}/{namespace}/{name}`.
fn kind_routes<S, T, X>(kind: Arc<KindState<S, T>>) -> Router<X>
where
    S: Payload,
    T: Payload + Default,
    X: Clone + Send + Sync + 'static,
{
    let collection = format!("/{}", kind.kind());
    let item = format!("{}/{{namespace}}/{{name}}", collection);

    Router::new()
        .route(&collection, get(handlers::list_objects::<S, T>))
        .route(
            &item,
            get(handlers::get_object::<S, T>)
                .put(handlers::apply_object::<S, T>)
                .delete(handlers::delete_object::<S, T>),
        )
        .route(
            &format!("{}/reconcile", item),
            post(handlers::trigger_reconcile::<S, T>),
        )
        .with_state(kind)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // System
        .route("/version", get(handlers::get_version))
        .route("/events", get(handlers::list_events))
        // Kinds
        .merge(kind_routes(state.dns_zones.clone()))
        .merge(kind_routes(state.ip_addresses.clone()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

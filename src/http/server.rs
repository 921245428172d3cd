use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::context::WebContext;
use super::handle_cii::handle_cii;
use super::handle_controller::handle_controller;
use super::handle_ts::handle_ts;
use super::handle_wcws::handle_wcws;

pub fn build_router(web_context: WebContext) -> Router {
    Router::new()
        .route("/cii", get(handle_cii))
        .route("/ts", get(handle_ts))
        .route("/wcws", get(handle_wcws))
        .route("/server", get(handle_controller))
        .layer(TraceLayer::new_for_http())
        .with_state(web_context)
}

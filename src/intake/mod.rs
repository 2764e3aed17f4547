//! Intake API: accepts user submissions and operator actions over HTTP.

pub mod actions;
pub mod handlers;

use crate::config::Config;
use crate::error::Result;
use crate::llm::ChatModel;
use crate::store::Store;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub chat: Arc<dyn ChatModel>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/handle_initial_submission",
            post(handlers::handle_initial_submission),
        )
        .route(
            "/submit_selected_for_generation",
            post(handlers::submit_selected_for_generation),
        )
        .route("/delete_topic/:id", delete(handlers::delete_topic))
        .route("/delete_generation/:id", delete(handlers::delete_generation))
        .route("/reset_generation/:id", post(handlers::reset_generation))
        .route("/reset_topic_link/:id", post(handlers::reset_topic_link))
        .route(
            "/api/generation_status/:id",
            get(handlers::generation_status),
        )
        .route(
            "/api/generation/:id/chunks",
            get(handlers::generation_chunks),
        )
        .with_state(state)
}

pub async fn serve(state: AppState, bind_addr: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Intake API listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use super::services::{
    create_operation, create_queue, delete_message, get_operation, health, list_operations,
    peek_messages, queue_depth, queue_info, receive_messages, send_message, set_attributes,
    set_redrive_policy, update_operation,
};
use super::state::AppState;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/queues", post(create_queue))
        .route("/queues/{name}", get(queue_info))
        .route("/queues/{name}/attributes", put(set_attributes))
        .route("/queues/{name}/redrive-policy", put(set_redrive_policy))
        .route("/queues/{name}/depth", get(queue_depth))
        .route("/queues/{name}/messages", post(send_message))
        .route("/queues/{name}/receive", post(receive_messages))
        .route("/queues/{name}/receipts/{receipt}", delete(delete_message))
        .route("/queues/{name}/peek", get(peek_messages))
        .route("/operations", post(create_operation).get(list_operations))
        .route("/operations/{id}", get(get_operation).patch(update_operation))
        .with_state(state)
}

/// Serve the broker and ledger until `shutdown` resolves, then flush both
pub async fn run<F>(address: SocketAddr, state: AppState, shutdown: F) -> Result<(), AnyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(address).await?;
    info!(%address, "Broker service listening");
    serve(listener, state, shutdown).await
}

/// Like [`run`] on an already bound listener
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), AnyError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state.clone()).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    state.broker.flush()?;
    state.store.persist()?;
    info!("Broker service stopped, data flushed");
    Ok(())
}

//! Read API: a small axum server exposing the reconstructed books.
//!
//! Every handler locks a symbol's book only long enough to clone its maps,
//! then releases the lock before serializing — the same pattern the teacher
//! uses to keep the HTTP transport from ever blocking on shared state.

mod dto;
mod error;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::book::BookRegistry;

pub use dto::{ErrorResponse, OrderBookResponse, SymbolsResponse};
pub use error::ApiError;

#[derive(Clone)]
struct ApiState {
    registry: Arc<BookRegistry>,
}

pub fn router(registry: Arc<BookRegistry>) -> Router {
    Router::new()
        .route("/orderbooks/{symbol}", get(get_order_book))
        .route("/symbols", get(get_symbols))
        .layer(CorsLayer::permissive())
        .with_state(ApiState { registry })
}

async fn get_order_book(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<OrderBookResponse>, ApiError> {
    let symbol = symbol.to_uppercase();
    let book = state.registry.get(&symbol).ok_or(ApiError::UnknownSymbol)?;

    let guard = book.lock().await;
    if !guard.is_initialized() {
        return Err(ApiError::NotInitialized);
    }
    let view = guard.view();
    drop(guard);

    Ok(Json(view.into()))
}

async fn get_symbols(State(state): State<ApiState>) -> Json<SymbolsResponse> {
    let mut symbols: Vec<String> = state.registry.symbols().cloned().collect();
    symbols.sort();

    let mut initialized = Vec::new();
    let mut pending = Vec::new();
    for symbol in &symbols {
        if let Some(book) = state.registry.get(symbol) {
            let guard = book.lock().await;
            if guard.is_initialized() {
                initialized.push(symbol.clone());
            } else {
                pending.push(symbol.clone());
            }
        }
    }

    Json(SymbolsResponse { symbols, initialized, pending })
}

/// Serve the Read API until a shutdown signal arrives.
pub async fn serve(addr: SocketAddr, registry: Arc<BookRegistry>) -> std::io::Result<()> {
    let app = router(registry);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "read API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping read API");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn registry() -> Arc<BookRegistry> {
        Arc::new(BookRegistry::new(&["BTCUSDT".to_string()]))
    }

    #[tokio::test]
    async fn unknown_symbol_is_404() {
        let app = router(registry());
        let response = app
            .oneshot(Request::builder().uri("/orderbooks/DOGEUSDT").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pending_symbol_is_503() {
        let app = router(registry());
        let response = app
            .oneshot(Request::builder().uri("/orderbooks/BTCUSDT").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn initialized_symbol_is_200() {
        let reg = registry();
        {
            let book = reg.get("BTCUSDT").unwrap();
            let mut guard = book.lock().await;
            guard.bootstrap(crate::book::Snapshot {
                last_update_id: 1,
                bids: vec![["100.0".to_string(), "1.0".to_string()]],
                asks: vec![],
            });
        }
        let app = router(Arc::clone(&reg));
        let response = app
            .oneshot(Request::builder().uri("/orderbooks/btcusdt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn symbols_endpoint_splits_initialized_and_pending() {
        let app = router(registry());
        let response = app
            .oneshot(Request::builder().uri("/symbols").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

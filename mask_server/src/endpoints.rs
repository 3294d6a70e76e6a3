//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::{Html, IntoResponse},
    routing::get,
    Extension, Json, Router,
};
use common::protocol::{ParamsMsg, VideoFrame};

use crate::{
    categories::Category,
    session::{process_frame, AppState},
};

/// Build the HTTP router serving the page and the frame socket.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/categories", get(categories))
        .route("/ws", get(frame_socket))
        .layer(Extension(state))
}

/// Page capturing the webcam and showing the annotated stream.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../resources/index.html"))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Category table used for labels.
pub async fn categories(Extension(state): Extension<Arc<AppState>>) -> Json<Vec<Category>> {
    Json(state.categories.iter().cloned().collect())
}

/// Bidirectional frame channel of one browser session.
pub async fn frame_socket(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, state).await {
            log::warn!("WebSocket session failed: {e}");
        }
    })
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    log::info!("New WebSocket session");

    let mut processor = state.new_processor();
    let params = processor.params();

    while let Some(msg) = socket.recv().await {
        match msg? {
            Message::Binary(data) => {
                let frame = match VideoFrame::deserialize(&data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        send_error(&mut socket, format!("malformed frame: {e}")).await?;
                        continue;
                    }
                };

                let (returned, result) = process_frame(processor, frame).await?;
                processor = returned;
                match result {
                    Ok(annotated) => socket.send(Message::Binary(annotated.serialize()?)).await?,
                    Err(e) => send_error(&mut socket, e.to_string()).await?,
                }
            }
            Message::Text(text) => {
                let update = serde_json::from_str::<ParamsMsg>(&text)
                    .map_err(|e| format!("malformed parameters: {e}"))
                    .and_then(|msg| params.apply(&msg).map_err(|e| e.to_string()));
                match update {
                    Ok(()) => log::debug!(
                        "Parameters: threshold {:.2}, max boxes {}",
                        params.confidence_threshold(),
                        params.max_boxes()
                    ),
                    Err(e) => send_error(&mut socket, e).await?,
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    log::info!(
        "WebSocket session closed after {} frames",
        processor.frames_processed()
    );

    Ok(())
}

async fn send_error(socket: &mut WebSocket, message: String) -> Result<()> {
    log::debug!("Reporting error to client: {}", &message);
    let body = serde_json::json!({ "error": message }).to_string();
    socket.send(Message::Text(body)).await?;
    Ok(())
}

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::{resolve_identity, Identity};
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Browsers cannot set headers on a WebSocket handshake, so `?token=` is accepted
/// alongside `Authorization: Bearer`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = no credential presented
/// 4002 = credential invalid or expired
pub const CLOSE_AUTH_REQUIRED: u16 = 4001;
pub const CLOSE_AUTH_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. On auth failure, upgrades then immediately closes with
/// the matching close code; the connection never reaches the registry.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = params.token.or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    match resolve_identity(&state.jwt_secret, credential.as_deref()) {
        Ok(identity) => {
            tracing::info!(
                user_id = %identity.user_id,
                role = %identity.role,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| handle_authenticated(socket, state, identity))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                ChatError::AuthenticationRequired => (CLOSE_AUTH_REQUIRED, "Authentication required"),
                _ => (CLOSE_AUTH_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

/// Handle an authenticated WebSocket connection by spawning the actor.
async fn handle_authenticated(socket: WebSocket, state: AppState, identity: Identity) {
    actor::run_connection(socket, state, identity).await;
}

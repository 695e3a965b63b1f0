use crate::auth::Identity;
use crate::chat::{router, status};
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::{Ack, ClientEvent, ConnectionId, ConnectionSender, ErrorFrame, ServerEvent};

/// Handle an incoming text (JSON) frame.
/// Decodes the event, dispatches it, and replies on this connection only.
pub async fn handle_text_message(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    identity: &Identity,
    connection_id: ConnectionId,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %identity.user_id,
                connection_id = %connection_id,
                error = %e,
                "Failed to decode client event"
            );
            send_error(tx, &ChatError::InvalidRequest(format!("malformed event: {}", e)));
            return;
        }
    };

    dispatch_event(event, tx, state, identity, connection_id).await;
}

/// Dispatch a decoded event to the appropriate handler.
async fn dispatch_event(
    event: ClientEvent,
    tx: &ConnectionSender,
    state: &AppState,
    identity: &Identity,
    connection_id: ConnectionId,
) {
    match event {
        ClientEvent::SendMessage(payload) => {
            let request_id = payload.request_id.clone();
            let result = match payload.target() {
                Ok(target) => {
                    router::send_message(state, identity, target, payload.content, Some(connection_id))
                        .await
                }
                Err(e) => Err(e),
            };

            // Persistence errors surface here, in the ack; the server never retries.
            let ack = match result {
                Ok(message) => Ack::ok(request_id, message),
                Err(e) => {
                    tracing::debug!(
                        user_id = %identity.user_id,
                        error = %e,
                        "sendMessage rejected"
                    );
                    Ack::failed(request_id, &e)
                }
            };
            send_event(tx, &ServerEvent::Ack(ack));
        }
        ClientEvent::MessageDelivered { message_id } => {
            if let Err(e) = status::mark_delivered(state, identity, message_id).await {
                send_error(tx, &e);
            }
        }
        ClientEvent::MessagesRead { conversation_id } => {
            if let Err(e) = status::mark_read(state, identity, conversation_id).await {
                send_error(tx, &e);
            }
        }
    }
}

fn send_event(tx: &ConnectionSender, event: &ServerEvent) {
    if let Some(frame) = event.to_frame() {
        let _ = tx.send(frame);
    }
}

/// Send an error frame.
fn send_error(tx: &ConnectionSender, err: &ChatError) {
    send_event(tx, &ServerEvent::Error(ErrorFrame::from(err)));
}

/// Non-text frames carry nothing we understand.
pub fn reject_binary(tx: &ConnectionSender) {
    send_error(
        tx,
        &ChatError::InvalidRequest("binary frames are not supported".to_string()),
    );
}

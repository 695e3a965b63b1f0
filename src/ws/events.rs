//! JSON text-frame wire format: `{"event": <name>, "data": <payload>}`.

use axum::extract::ws::Message as WsMessage;
use serde::{Deserialize, Serialize};

use crate::db::models::{Message, MessageStatus, Recipient, Role};
use crate::error::{ChatError, ChatResult};
use crate::store::messages::NewMessageTarget;

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "sendMessage")]
    SendMessage(SendMessagePayload),
    #[serde(rename = "message_delivered", rename_all = "camelCase")]
    MessageDelivered { message_id: String },
    #[serde(rename = "messages_read", rename_all = "camelCase")]
    MessagesRead { conversation_id: String },
}

/// Body of `sendMessage`, also accepted as the JSON body of `POST /api/messages`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_type: Option<Role>,
    pub content: String,
}

impl SendMessagePayload {
    /// An explicit conversation id wins; otherwise the recipient fields name the pair.
    pub fn target(&self) -> ChatResult<NewMessageTarget> {
        if let Some(id) = self.conversation_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Ok(NewMessageTarget::Conversation(id.to_string()));
        }
        Recipient::from_parts(self.recipient_id.clone(), self.recipient_type)
            .map(NewMessageTarget::Recipient)
            .map_err(ChatError::InvalidRequest)
    }
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(Message),
    #[serde(rename = "conversationUpdated")]
    ConversationUpdated(ConversationUpdate),
    #[serde(rename = "message_status_updated")]
    MessageStatusUpdated(StatusUpdate),
    #[serde(rename = "ack")]
    Ack(Ack),
    #[serde(rename = "error")]
    Error(ErrorFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationUpdate {
    pub id: String,
    pub last_message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: MessageStatus,
}

/// Reply to `sendMessage`. Either `message` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorFrame>,
}

impl Ack {
    pub fn ok(request_id: Option<String>, message: Message) -> Self {
        Self {
            request_id,
            success: true,
            message: Some(message),
            error: None,
        }
    }

    pub fn failed(request_id: Option<String>, err: &ChatError) -> Self {
        Self {
            request_id,
            success: false,
            message: None,
            error: Some(ErrorFrame::from(err)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub code: String,
    pub message: String,
}

impl From<&ChatError> for ErrorFrame {
    fn from(err: &ChatError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

impl ServerEvent {
    /// Encode as a text frame. Serialization of these types cannot realistically fail,
    /// but a failure is logged and the event dropped rather than panicking a publisher.
    pub fn to_frame(&self) -> Option<WsMessage> {
        match serde_json::to_string(self) {
            Ok(json) => Some(WsMessage::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                None
            }
        }
    }
}

//! Typed client for the messaging actions.
//!
//! Each method sends one action from the catalog and reads back exactly the
//! number of values that action promises, in a single atomic exchange.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::client::ConnectionManager;
use crate::error::{Result, WireError};
use crate::wire::{ActionSpec, Control, Response, actions};

/// Application-facing client over a shared [`ConnectionManager`].
#[derive(Clone)]
pub struct ChatClient {
    manager: Arc<ConnectionManager>,
}

impl ChatClient {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Run one exchange for `spec`.
    pub async fn call(&self, spec: ActionSpec, params: Vec<Value>) -> Result<Response> {
        if params.len() != spec.param_count() {
            return Err(WireError::Protocol(format!(
                "{} takes {} params, got {}",
                spec.name,
                spec.param_count(),
                params.len()
            )));
        }
        let values = self
            .manager
            .send_request_and_read(spec.name, &params, spec.replies)
            .await?;
        Ok(Response::new(values))
    }

    /// Keep-alive round trip.
    pub async fn ping(&self) -> Result<bool> {
        let values = self.manager.send_request_and_read(Control::PING, &[], 1).await?;
        Ok(values.first().and_then(Value::as_str) == Some(Control::PONG))
    }

    // Accounts

    pub async fn login(&self, email: &str, password: &str) -> Result<Response> {
        self.call(actions::LOGIN, vec![json!(email), json!(password)]).await
    }

    pub async fn signup(&self, full_name: &str, email: &str, password: &str) -> Result<Response> {
        self.call(actions::SIGNUP, vec![json!(full_name), json!(email), json!(password)])
            .await
    }

    pub async fn verify(&self, email: &str, code: &str) -> Result<Response> {
        self.call(actions::VERIFY, vec![json!(email), json!(code)]).await
    }

    // Social graph

    pub async fn search_friend(&self, name_query: &str) -> Result<Response> {
        self.call(actions::SEARCH_FRIEND, vec![json!(name_query)]).await
    }

    pub async fn add_friend(&self, sender_id: i64, receiver_id: i64) -> Result<Response> {
        self.call(actions::ADD_FRIEND, vec![json!(sender_id), json!(receiver_id)])
            .await
    }

    pub async fn accept_friend(&self, request_id: i64, user_id: i64) -> Result<Response> {
        self.call(actions::ACCEPT_FRIEND, vec![json!(request_id), json!(user_id)])
            .await
    }

    pub async fn reject_friend(&self, request_id: i64, user_id: i64) -> Result<Response> {
        self.call(actions::REJECT_FRIEND, vec![json!(request_id), json!(user_id)])
            .await
    }

    pub async fn get_friends(&self, user_id: i64) -> Result<Response> {
        self.call(actions::GET_FRIENDS, vec![json!(user_id)]).await
    }

    pub async fn get_friend_requests(&self, user_id: i64) -> Result<Response> {
        self.call(actions::GET_FRIEND_REQUESTS, vec![json!(user_id)]).await
    }

    // Messaging

    pub async fn send_message(&self, sender_id: i64, receiver_id: i64, content: &str) -> Result<Response> {
        self.call(
            actions::SEND_MESSAGE,
            vec![json!(sender_id), json!(receiver_id), json!(content)],
        )
        .await
    }

    pub async fn get_messages(&self, conversation_id: i64, limit: i64) -> Result<Response> {
        self.call(actions::GET_MESSAGES, vec![json!(conversation_id), json!(limit)])
            .await
    }

    pub async fn get_conversations(&self, user_id: i64) -> Result<Response> {
        self.call(actions::GET_CONVERSATIONS, vec![json!(user_id)]).await
    }

    pub async fn mark_messages_read(&self, conversation_id: i64, user_id: i64) -> Result<Response> {
        self.call(actions::MARK_MESSAGES_READ, vec![json!(conversation_id), json!(user_id)])
            .await
    }

    pub async fn send_typing(&self, conversation_id: i64, user_id: i64, is_typing: bool) -> Result<Response> {
        self.call(
            actions::SEND_TYPING,
            vec![json!(conversation_id), json!(user_id), json!(is_typing)],
        )
        .await
    }

    pub async fn get_typing_status(&self, conversation_id: i64) -> Result<Response> {
        self.call(actions::GET_TYPING_STATUS, vec![json!(conversation_id)]).await
    }

    pub async fn add_reaction(&self, message_id: i64, user_id: i64, reaction: &str) -> Result<Response> {
        self.call(
            actions::ADD_REACTION,
            vec![json!(message_id), json!(user_id), json!(reaction)],
        )
        .await
    }

    pub async fn edit_message(&self, message_id: i64, user_id: i64, content: &str) -> Result<Response> {
        self.call(
            actions::EDIT_MESSAGE,
            vec![json!(message_id), json!(user_id), json!(content)],
        )
        .await
    }

    pub async fn delete_message(&self, message_id: i64, user_id: i64) -> Result<Response> {
        self.call(actions::DELETE_MESSAGE, vec![json!(message_id), json!(user_id)])
            .await
    }
}

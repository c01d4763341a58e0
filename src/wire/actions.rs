//! Action catalog: the fixed per-action contract shared by client and server.
//!
//! Every action declares how many parameters follow its token and how many
//! values its reply contains. The transport cannot detect a mismatch, so
//! both the server registry and the client facade read arities from here.

use std::fmt;

/// Contract of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionSpec {
    /// Action token, matched exactly and case-sensitively.
    pub name: &'static str,
    /// Parameter names, in wire order.
    pub params: &'static [&'static str],
    /// Number of reply values.
    pub replies: usize,
}

impl ActionSpec {
    pub const fn new(name: &'static str, params: &'static [&'static str], replies: usize) -> Self {
        Self { name, params, replies }
    }

    /// Number of parameter values following the action token.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) -> {}", self.name, self.params.join(", "), self.replies)
    }
}

// Accounts
pub const LOGIN: ActionSpec = ActionSpec::new("LOGIN", &["email", "password"], 2);
pub const SIGNUP: ActionSpec = ActionSpec::new("SIGNUP", &["full_name", "email", "password"], 1);
pub const VERIFY: ActionSpec = ActionSpec::new("VERIFY", &["email", "code"], 1);

// Social graph
pub const SEARCH_FRIEND: ActionSpec = ActionSpec::new("SEARCH_FRIEND", &["name_query"], 1);
pub const ADD_FRIEND: ActionSpec = ActionSpec::new("ADD_FRIEND", &["sender_id", "receiver_id"], 1);
pub const ACCEPT_FRIEND: ActionSpec = ActionSpec::new("ACCEPT_FRIEND", &["request_id", "user_id"], 1);
pub const REJECT_FRIEND: ActionSpec = ActionSpec::new("REJECT_FRIEND", &["request_id", "user_id"], 1);
pub const GET_FRIENDS: ActionSpec = ActionSpec::new("GET_FRIENDS", &["user_id"], 2);
pub const GET_FRIEND_REQUESTS: ActionSpec = ActionSpec::new("GET_FRIEND_REQUESTS", &["user_id"], 2);

// Messaging
pub const SEND_MESSAGE: ActionSpec =
    ActionSpec::new("SEND_MESSAGE", &["sender_id", "receiver_id", "content"], 2);
pub const GET_MESSAGES: ActionSpec = ActionSpec::new("GET_MESSAGES", &["conversation_id", "limit"], 2);
pub const GET_CONVERSATIONS: ActionSpec = ActionSpec::new("GET_CONVERSATIONS", &["user_id"], 2);
pub const MARK_MESSAGES_READ: ActionSpec =
    ActionSpec::new("MARK_MESSAGES_READ", &["conversation_id", "user_id"], 1);
pub const SEND_TYPING: ActionSpec =
    ActionSpec::new("SEND_TYPING", &["conversation_id", "user_id", "is_typing"], 1);
pub const GET_TYPING_STATUS: ActionSpec = ActionSpec::new("GET_TYPING_STATUS", &["conversation_id"], 2);
pub const ADD_REACTION: ActionSpec =
    ActionSpec::new("ADD_REACTION", &["message_id", "user_id", "reaction"], 2);
pub const EDIT_MESSAGE: ActionSpec =
    ActionSpec::new("EDIT_MESSAGE", &["message_id", "user_id", "content"], 2);
pub const DELETE_MESSAGE: ActionSpec = ActionSpec::new("DELETE_MESSAGE", &["message_id", "user_id"], 2);

/// Every business action the application speaks.
pub const ALL: &[ActionSpec] = &[
    LOGIN,
    SIGNUP,
    VERIFY,
    SEARCH_FRIEND,
    ADD_FRIEND,
    ACCEPT_FRIEND,
    REJECT_FRIEND,
    GET_FRIENDS,
    GET_FRIEND_REQUESTS,
    SEND_MESSAGE,
    GET_MESSAGES,
    GET_CONVERSATIONS,
    MARK_MESSAGES_READ,
    SEND_TYPING,
    GET_TYPING_STATUS,
    ADD_REACTION,
    EDIT_MESSAGE,
    DELETE_MESSAGE,
];

/// Look up an action by exact name.
pub fn lookup(name: &str) -> Option<ActionSpec> {
    ALL.iter().copied().find(|spec| spec.name == name)
}

//! Wire types for the nearby_friends social graph service
//!
//! HTTP bodies are plain JSON. WebSocket echo frames are JSON text frames
//! that the server sends back verbatim.

use std::fmt;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const PATH_REGISTER: &str = "/user/register";
pub const PATH_FRIENDSHIP: &str = "/user/friendship";

pub fn path_possible_friends(user_id: UserId) -> String {
    format!("/user/{}/possible-friends", user_id)
}

/// Identifier assigned by the backend on registration
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Body of `POST /user/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

/// A registered user as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

/// Body of `POST /user/friendship`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub user: User,
    pub friend: User,
}

/// Echo frame. `start_at` is seconds since the unix epoch at send time and
/// travels with the frame so that round-trip time can be computed when the
/// echo arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoMessage {
    pub message: String,
    pub user_id: String,
    pub start_at: f64,
}

impl EchoMessage {
    /// Key identifying this message among the outstanding ones of a session
    #[inline]
    pub fn correlation_key(&self) -> u64 {
        self.start_at.to_bits()
    }

    #[inline]
    pub fn to_ws_message(&self) -> ::anyhow::Result<::tungstenite::Message> {
        let text = ::serde_json::to_string(self).context("serialize echo message")?;

        Ok(::tungstenite::Message::Text(text))
    }

    #[inline]
    pub fn from_ws_message(message: &::tungstenite::Message) -> ::anyhow::Result<Self> {
        use tungstenite::Message::{Binary, Text};

        match message {
            Text(text) => ::serde_json::from_str(text).context("deserialize echo message"),
            Binary(bytes) => ::serde_json::from_slice(bytes).context("deserialize echo message"),
            _ => Err(anyhow::anyhow!("Message is neither text nor bytes")),
        }
    }
}

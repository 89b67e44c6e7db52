use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// String map pushed to subscribers.
pub type EventPayload = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CartEvent {
    /// A new listing is claimable.
    Produce,
    /// Purchase confirmation, private to the owning user.
    Bought,
    /// A reservation's window elapsed; subscribers drop the row.
    ExpiredRow,
}

impl CartEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CartEvent::Produce => "produce",
            CartEvent::Bought => "bought",
            CartEvent::ExpiredRow => "expired-row",
        }
    }
}

impl fmt::Display for CartEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message handed to a broadcast gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub channel: String,
    pub event: String,
    pub data: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelNames {
    pub public: String,
    pub private_prefix: String,
}

impl ChannelNames {
    pub fn private_for(&self, user_id: &str) -> String {
        format!("{}{}", self.private_prefix, user_id)
    }
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            public: "public-channel".to_string(),
            private_prefix: "private-channel-".to_string(),
        }
    }
}

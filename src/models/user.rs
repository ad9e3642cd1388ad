use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::Channel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub push_token: Option<String>,

    #[serde(default)]
    pub preferences: ChannelPreferences,
}

/// Per-channel opt-in flags. Absent preferences mean opted in, matching the
/// user service's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPreferences {
    #[serde(default = "default_enabled")]
    pub email: bool,

    #[serde(default = "default_enabled")]
    pub push: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for ChannelPreferences {
    fn default() -> Self {
        Self {
            email: true,
            push: true,
        }
    }
}

impl ChannelPreferences {
    pub fn allows(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email,
            Channel::Push => self.push,
        }
    }
}

impl UserProfile {
    /// Resolved delivery target for the channel, if the user has one on file.
    pub fn recipient_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Push => self.push_token.as_deref(),
        }
    }
}

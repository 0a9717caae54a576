use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! matrix_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ContactId);
id_newtype!(ConversationId);
id_newtype!(ChatwootMessageId);

matrix_id_newtype!(RoomId);
matrix_id_newtype!(EventId);
matrix_id_newtype!(UserId);

impl UserId {
    /// `@alice:example.org` -> `alice`. Identifiers without a sigil or server part are
    /// returned as-is.
    pub fn localpart(&self) -> &str {
        let raw = self.0.strip_prefix('@').unwrap_or(&self.0);
        raw.split_once(':').map_or(raw, |(local, _)| local)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_chatwoot_str(self) -> &'static str {
        match self {
            MessageDirection::Inbound => "incoming",
            MessageDirection::Outbound => "outgoing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MxcUriError {
    #[error("content uri '{0}' does not use the mxc:// scheme")]
    Scheme(String),
    #[error("content uri '{0}' is missing a server name or media id")]
    Incomplete(String),
}

/// A parsed `mxc://<server_name>/<media_id>` content locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MxcUri {
    pub server_name: String,
    pub media_id: String,
}

impl MxcUri {
    pub fn parse(raw: &str) -> Result<Self, MxcUriError> {
        let rest = raw
            .strip_prefix("mxc://")
            .ok_or_else(|| MxcUriError::Scheme(raw.to_string()))?;
        let (server_name, media_id) = rest
            .split_once('/')
            .ok_or_else(|| MxcUriError::Incomplete(raw.to_string()))?;
        if server_name.is_empty() || media_id.is_empty() || media_id.contains('/') {
            return Err(MxcUriError::Incomplete(raw.to_string()));
        }
        Ok(Self {
            server_name: server_name.to_string(),
            media_id: media_id.to_string(),
        })
    }
}

impl fmt::Display for MxcUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mxc://{}/{}", self.server_name, self.media_id)
    }
}

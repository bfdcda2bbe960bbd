//! Logical fan-out channels.
//!
//! Every real-time event is published to exactly one channel. A channel
//! is identified by a short string key that clients can also send back
//! when they want to join or leave one:
//!
//! | Key                 | Who listens                          |
//! |---------------------|--------------------------------------|
//! | `user:<id>`         | every connection of that user        |
//! | `queue:<game>`      | anyone watching a game's queue       |
//! | `teammates`         | every connected teammate             |
//! | `teammates:<game>`  | teammates of one game                |
//! | `session:<id>`      | participants inside a session's chat |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, SessionId, UserId};

/// A parsed channel key.
///
/// Serialized as its string form (`"user:42"`) via `try_from`/`into`, so
/// clients never see the enum structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelKey {
    User(UserId),
    Queue(String),
    Teammates,
    TeammatesOf(String),
    Session(SessionId),
}

impl ChannelKey {
    pub fn user(id: UserId) -> Self {
        Self::User(id)
    }

    pub fn queue(game: impl Into<String>) -> Self {
        Self::Queue(game.into())
    }

    pub fn teammates_of(game: impl Into<String>) -> Self {
        Self::TeammatesOf(game.into())
    }

    pub fn session(id: SessionId) -> Self {
        Self::Session(id)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id.0),
            Self::Queue(game) => write!(f, "queue:{game}"),
            Self::Teammates => write!(f, "teammates"),
            Self::TeammatesOf(game) => write!(f, "teammates:{game}"),
            Self::Session(id) => write!(f, "session:{}", id.0),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidChannel(s.to_string());

        if s == "teammates" {
            return Ok(Self::Teammates);
        }

        // `split_once` splits at the FIRST ':' only, so game names may
        // themselves contain colons.
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }

        match kind {
            "user" => rest
                .parse()
                .map(|id| Self::User(UserId(id)))
                .map_err(|_| invalid()),
            "session" => rest
                .parse()
                .map(|id| Self::Session(SessionId(id)))
                .map_err(|_| invalid()),
            "queue" => Ok(Self::Queue(rest.to_string())),
            "teammates" => Ok(Self::TeammatesOf(rest.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ChannelKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelKey> for String {
    fn from(key: ChannelKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_display() {
        assert_eq!(ChannelKey::user(UserId(4)).to_string(), "user:4");
        assert_eq!(ChannelKey::queue("valorant").to_string(), "queue:valorant");
        assert_eq!(ChannelKey::Teammates.to_string(), "teammates");
        assert_eq!(
            ChannelKey::teammates_of("dota").to_string(),
            "teammates:dota"
        );
        assert_eq!(ChannelKey::session(SessionId(9)).to_string(), "session:9");
    }

    #[test]
    fn test_channel_key_parse_every_kind() {
        assert_eq!(
            "user:4".parse::<ChannelKey>().unwrap(),
            ChannelKey::User(UserId(4))
        );
        assert_eq!(
            "queue:valorant".parse::<ChannelKey>().unwrap(),
            ChannelKey::queue("valorant")
        );
        assert_eq!(
            "teammates".parse::<ChannelKey>().unwrap(),
            ChannelKey::Teammates
        );
        assert_eq!(
            "teammates:dota".parse::<ChannelKey>().unwrap(),
            ChannelKey::teammates_of("dota")
        );
        assert_eq!(
            "session:12".parse::<ChannelKey>().unwrap(),
            ChannelKey::Session(SessionId(12))
        );
    }

    #[test]
    fn test_channel_key_game_may_contain_colon() {
        let key: ChannelKey = "queue:cs:go".parse().unwrap();
        assert_eq!(key, ChannelKey::queue("cs:go"));
    }

    #[test]
    fn test_channel_key_rejects_garbage() {
        assert!("".parse::<ChannelKey>().is_err());
        assert!("user:".parse::<ChannelKey>().is_err());
        assert!("user:abc".parse::<ChannelKey>().is_err());
        assert!("lobby:1".parse::<ChannelKey>().is_err());
        assert!("session".parse::<ChannelKey>().is_err());
    }

    #[test]
    fn test_channel_key_serializes_as_string() {
        let json = serde_json::to_string(&ChannelKey::session(SessionId(3))).unwrap();
        assert_eq!(json, "\"session:3\"");

        let key: ChannelKey = serde_json::from_str("\"queue:lol\"").unwrap();
        assert_eq!(key, ChannelKey::queue("lol"));

        assert!(serde_json::from_str::<ChannelKey>("\"nope\"").is_err());
    }
}

use serde::{Deserialize, Serialize};

use crate::media::MediaData;

/// Authoritative playback position of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub paused: bool,
    pub current_time_seconds: f64,
    pub playback_rate: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            paused: true,
            current_time_seconds: 0.0,
            playback_rate: 1.0,
        }
    }
}

impl PlaybackState {
    /// Rejects states a player could not apply (negative or non-finite time,
    /// non-positive rate).
    pub fn validate(&self) -> Result<(), String> {
        if !self.current_time_seconds.is_finite() || self.current_time_seconds < 0.0 {
            return Err(format!(
                "currentTimeSeconds must be a finite non-negative number, got {}",
                self.current_time_seconds
            ));
        }
        if !self.playback_rate.is_finite() || self.playback_rate <= 0.0 {
            return Err(format!(
                "playbackRate must be positive, got {}",
                self.playback_rate
            ));
        }
        Ok(())
    }
}

/// Roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeData {
    pub client_id: String,
    pub display_name: String,
    pub clients: Vec<ClientInfo>,
    pub super_master_id: Option<String>,
    pub media: Option<MediaData>,
    pub playback_state: PlaybackState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDisconnectData {
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperMasterChangeData {
    pub client_id: String,
}

/// Media switch. Server→client it is authoritative and carries the issuer;
/// client→server it is the super-master's command and `issuerClientId` may be
/// omitted. A `null` media clears the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChangeData {
    #[serde(default)]
    pub issuer_client_id: Option<String>,
    #[serde(default)]
    pub media: Option<MediaData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatePingData {
    pub client_id: String,
    pub playback_state: PlaybackState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMediaChangeData {
    pub client_id: String,
    pub media: MediaData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPlaybackStateChangeData {
    pub client_id: String,
    pub playback_state: PlaybackState,
}

/// Closed set of message kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Message {
    Welcome(WelcomeData),
    ClientConnect(ClientInfo),
    ClientDisconnect(ClientDisconnectData),
    SuperMasterChange(SuperMasterChangeData),
    MediaChange(MediaChangeData),
    PlaybackStatePing(PlaybackStatePingData),
    RequestMediaChange(RequestMediaChangeData),
    RequestPlaybackStateChange(RequestPlaybackStateChangeData),
    BackendDebugInfo(serde_json::Value),
}

impl Message {
    /// Every `type` value this protocol defines
    pub const KINDS: [&'static str; 9] = [
        "welcome",
        "clientConnect",
        "clientDisconnect",
        "superMasterChange",
        "mediaChange",
        "playbackStatePing",
        "requestMediaChange",
        "requestPlaybackStateChange",
        "backendDebugInfo",
    ];

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::ClientConnect(_) => "clientConnect",
            Self::ClientDisconnect(_) => "clientDisconnect",
            Self::SuperMasterChange(_) => "superMasterChange",
            Self::MediaChange(_) => "mediaChange",
            Self::PlaybackStatePing(_) => "playbackStatePing",
            Self::RequestMediaChange(_) => "requestMediaChange",
            Self::RequestPlaybackStateChange(_) => "requestPlaybackStateChange",
            Self::BackendDebugInfo(_) => "backendDebugInfo",
        }
    }

    #[must_use]
    pub fn is_known_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }

    /// Client id claimed by the message body, for kinds that carry one
    #[must_use]
    pub fn claimed_client_id(&self) -> Option<&str> {
        match self {
            Self::PlaybackStatePing(data) => Some(&data.client_id),
            Self::RequestMediaChange(data) => Some(&data.client_id),
            Self::RequestPlaybackStateChange(data) => Some(&data.client_id),
            Self::MediaChange(data) => data.issuer_client_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let message = Message::SuperMasterChange(SuperMasterChangeData {
            client_id: "abc".to_string(),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"type": "superMasterChange", "data": {"clientId": "abc"}})
        );
    }

    #[test]
    fn test_ping_field_names() {
        let message = Message::PlaybackStatePing(PlaybackStatePingData {
            client_id: "c1".to_string(),
            playback_state: PlaybackState {
                paused: false,
                current_time_seconds: 12.5,
                playback_rate: 1.0,
            },
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["data"]["playbackState"]["currentTimeSeconds"], 12.5);
        assert_eq!(value["data"]["playbackState"]["playbackRate"], 1.0);
        assert_eq!(value["data"]["playbackState"]["paused"], false);
    }

    #[test]
    fn test_kind_matches_serialized_type() {
        let messages = vec![
            Message::ClientConnect(ClientInfo {
                client_id: "a".to_string(),
                display_name: "A".to_string(),
            }),
            Message::ClientDisconnect(ClientDisconnectData {
                client_id: "a".to_string(),
            }),
            Message::BackendDebugInfo(json!({"k": 1})),
            Message::MediaChange(MediaChangeData {
                issuer_client_id: None,
                media: None,
            }),
        ];
        for message in messages {
            let value = serde_json::to_value(&message).unwrap();
            assert_eq!(value["type"], message.kind());
            assert!(Message::is_known_kind(message.kind()));
        }
    }

    #[test]
    fn test_claimed_client_id() {
        let request = Message::RequestPlaybackStateChange(RequestPlaybackStateChangeData {
            client_id: "me".to_string(),
            playback_state: PlaybackState::default(),
        });
        assert_eq!(request.claimed_client_id(), Some("me"));

        let debug = Message::BackendDebugInfo(json!(null));
        assert_eq!(debug.claimed_client_id(), None);
    }

    #[test]
    fn test_playback_state_validation() {
        assert!(PlaybackState::default().validate().is_ok());

        let zero_rate = PlaybackState {
            playback_rate: 0.0,
            ..PlaybackState::default()
        };
        assert!(zero_rate.validate().is_err());

        let negative_time = PlaybackState {
            current_time_seconds: -1.0,
            ..PlaybackState::default()
        };
        assert!(negative_time.validate().is_err());

        let nan_time = PlaybackState {
            current_time_seconds: f64::NAN,
            ..PlaybackState::default()
        };
        assert!(nan_time.validate().is_err());
    }
}

//! Wire protocol shared by the watch session server and its clients.
//!
//! Every WebSocket text frame carries one JSON envelope of the form
//! `{"type": "<kind>", "data": {...}}`. Field names are camelCase and must not
//! change: clients parse them positionally.

pub mod codec;
pub mod media;
pub mod messages;
pub mod reconcile;

pub use codec::{decode, encode, Decoded, ProtocolError};
pub use media::{FontAsset, MediaData, MediaMetadata, MediaMode, SubtitleTrack};
pub use messages::{
    ClientDisconnectData, ClientInfo, MediaChangeData, Message, PlaybackState,
    PlaybackStatePingData, RequestMediaChangeData, RequestPlaybackStateChangeData,
    SuperMasterChangeData, WelcomeData,
};
pub use reconcile::{reconcile, Adjustment, LocalPlayer, PlayerSnapshot, Reconciler};

/// WebSocket sub-protocol spoken by this crate
pub const SUBPROTOCOL: &str = "cowatch.v1";

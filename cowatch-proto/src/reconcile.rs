//! Follower-side drift correction.
//!
//! Every participant that is not the super-master mirrors the authoritative
//! playback state and steers its local player towards it: large gaps (or a
//! paused master) are closed with a seek, small gaps with a temporary
//! playback-rate nudge so the viewer does not see a jump.

use crate::messages::{Message, PlaybackState};

/// Beyond this gap the follower seeks instead of nudging
pub const HARD_SEEK_THRESHOLD_SECONDS: f64 = 10.0;

/// Gaps up to this size are left alone
pub const DRIFT_TOLERANCE_SECONDS: f64 = 0.25;

/// Rate correction applied per second of drift
pub const RATE_CORRECTION_PER_SECOND: f64 = 0.1;

/// What the local player currently reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    pub paused: bool,
    pub current_time_seconds: f64,
    pub playback_rate: f64,
}

/// Corrections to apply, in field order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Adjustment {
    pub set_paused: Option<bool>,
    pub seek_to: Option<f64>,
    pub playback_rate: Option<f64>,
}

impl Adjustment {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.set_paused.is_none() && self.seek_to.is_none() && self.playback_rate.is_none()
    }

    /// Play/pause first, then seek, then rate
    pub fn apply<P: LocalPlayer + ?Sized>(&self, player: &mut P) {
        if let Some(paused) = self.set_paused {
            player.set_paused(paused);
        }
        if let Some(time) = self.seek_to {
            player.seek(time);
        }
        if let Some(rate) = self.playback_rate {
            player.set_playback_rate(rate);
        }
    }
}

/// Media element abstraction driven by the reconciler
pub trait LocalPlayer {
    fn snapshot(&self) -> PlayerSnapshot;
    fn set_paused(&mut self, paused: bool);
    fn seek(&mut self, time_seconds: f64);
    fn set_playback_rate(&mut self, rate: f64);
}

/// Compute the correction that moves `local` towards `master`.
#[must_use]
pub fn reconcile(local: &PlayerSnapshot, master: &PlaybackState) -> Adjustment {
    let mut adjustment = Adjustment::default();

    if local.paused != master.paused {
        adjustment.set_paused = Some(master.paused);
    }

    let delta = master.current_time_seconds - local.current_time_seconds;
    if delta.abs() > HARD_SEEK_THRESHOLD_SECONDS || master.paused {
        if delta != 0.0 {
            adjustment.seek_to = Some(master.current_time_seconds);
        }
    } else if delta.abs() > DRIFT_TOLERANCE_SECONDS {
        // Always upward from the local rate; the next ping bounds it.
        adjustment.playback_rate =
            Some(local.playback_rate + delta.abs() * RATE_CORRECTION_PER_SECOND);
    }

    adjustment
}

/// Stateful mirror of the session kept by each participant.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    client_id: Option<String>,
    super_master_id: Option<String>,
    authoritative: PlaybackState,
}

impl Reconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn super_master_id(&self) -> Option<&str> {
        self.super_master_id.as_deref()
    }

    #[must_use]
    pub const fn authoritative_state(&self) -> &PlaybackState {
        &self.authoritative
    }

    #[must_use]
    pub fn is_super_master(&self) -> bool {
        self.client_id.is_some() && self.client_id == self.super_master_id
    }

    /// Track a server message and correct the player when it affects state.
    ///
    /// Returns the adjustment that was applied, if any.
    pub fn on_message<P: LocalPlayer + ?Sized>(
        &mut self,
        message: &Message,
        player: &mut P,
    ) -> Option<Adjustment> {
        match message {
            Message::Welcome(welcome) => {
                self.client_id = Some(welcome.client_id.clone());
                self.super_master_id.clone_from(&welcome.super_master_id);
                self.authoritative = welcome.playback_state;
            }
            Message::PlaybackStatePing(ping) => {
                if self.super_master_id.as_deref() != Some(ping.client_id.as_str()) {
                    return None;
                }
                self.authoritative = ping.playback_state;
            }
            Message::SuperMasterChange(change) => {
                self.super_master_id = Some(change.client_id.clone());
            }
            Message::MediaChange(_) => {
                self.authoritative = PlaybackState::default();
                return None;
            }
            _ => return None,
        }

        if self.is_super_master() {
            return None;
        }

        let adjustment = reconcile(&player.snapshot(), &self.authoritative);
        adjustment.apply(player);
        Some(adjustment)
    }
}

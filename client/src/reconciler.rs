//! Shared player map, fed by the local tick and by inbound peer payloads.
//!
//! Remote entries are replaced wholesale by the latest payload that parses.
//! Nothing orders payloads, so a late delivery can show an older snapshot.

use crate::error::ReconcileError;
use log::{debug, warn};
use shared::{GameStatePayload, PlayerId, PlayerState};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PlayerMap {
    players: HashMap<PlayerId, PlayerState>,
    redraw_due: bool,
    discarded: u64,
}

impl PlayerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces `players[from]` with the decoded payload.
    ///
    /// A payload that fails to decode is dropped and the previous entry for
    /// `from` is left exactly as it was.
    pub fn reconcile(&mut self, from: &PlayerId, raw: &[u8]) -> Result<(), ReconcileError> {
        let payload = match GameStatePayload::decode(raw) {
            Ok(payload) => payload,
            Err(e) => {
                self.discarded += 1;
                warn!(
                    "Discarding malformed payload from {} ({} bytes): {}",
                    from,
                    raw.len(),
                    e
                );
                return Err(e.into());
            }
        };

        debug!(
            "Reconciled {}: {} segments, score {}",
            from,
            payload.snake.len(),
            payload.score
        );
        self.players.insert(from.clone(), payload.into_player_state());
        self.redraw_due = true;
        Ok(())
    }

    /// Writes the local player's state after a tick.
    pub fn set_local(&mut self, id: &PlayerId, state: PlayerState) {
        self.players.insert(id.clone(), state);
        self.redraw_due = true;
    }

    /// Adds an empty entry for a peer we expect to hear from. Returns true if it was new.
    pub fn ensure(&mut self, id: &PlayerId) -> bool {
        if self.players.contains_key(id) {
            return false;
        }
        self.players.insert(id.clone(), PlayerState::default());
        self.redraw_due = true;
        true
    }

    pub fn get(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.contains_key(id)
    }

    /// Player ids in display order.
    pub fn ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Number of payloads dropped because they did not parse.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Returns whether a redraw was requested since the last call, and clears the flag.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.redraw_due)
    }
}

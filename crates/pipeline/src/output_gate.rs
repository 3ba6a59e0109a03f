//! Turn-id gate in front of the room's audio output
//!
//! Synthesized frames carry the turn they were produced for. Only frames of
//! the turn currently allowed to speak reach the room; anything else, such as
//! frames still in flight from an interrupted turn, is dropped here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weaver_core::{AudioFrame, RoomConnection, TransportError};

const NO_TURN: u64 = 0;

/// Which turn may currently emit audio
#[derive(Debug, Default)]
pub struct OutputGate {
    active: AtomicU64,
}

impl OutputGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `turn_id` speak, closing the gate to every other turn
    pub fn open(&self, turn_id: u64) {
        self.active.store(turn_id, Ordering::SeqCst);
    }

    /// Close the gate if `turn_id` holds it
    pub fn close_turn(&self, turn_id: u64) {
        let _ = self
            .active
            .compare_exchange(turn_id, NO_TURN, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.active.store(NO_TURN, Ordering::SeqCst);
    }

    pub fn active_turn(&self) -> Option<u64> {
        match self.active.load(Ordering::SeqCst) {
            NO_TURN => None,
            id => Some(id),
        }
    }

    pub fn admits(&self, turn_id: u64) -> bool {
        turn_id != NO_TURN && self.active.load(Ordering::SeqCst) == turn_id
    }
}

/// Room audio output behind an [`OutputGate`]
#[derive(Clone)]
pub struct GatedOutput {
    gate: Arc<OutputGate>,
    connection: Arc<dyn RoomConnection>,
}

impl GatedOutput {
    pub fn new(gate: Arc<OutputGate>, connection: Arc<dyn RoomConnection>) -> Self {
        Self { gate, connection }
    }

    pub fn gate(&self) -> &OutputGate {
        &self.gate
    }

    /// Publish a frame for `turn_id`. Returns false if the gate dropped it.
    pub async fn publish(&self, turn_id: u64, frame: AudioFrame) -> Result<bool, TransportError> {
        if !self.gate.admits(turn_id) {
            tracing::trace!(turn_id, sequence = frame.sequence, "Frame blocked by output gate");
            return Ok(false);
        }
        self.connection.publish_audio(frame).await?;
        Ok(true)
    }
}

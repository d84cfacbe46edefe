//! Blink state tracking

use serde::{Deserialize, Serialize};

use crate::config::BlinkConfig;

/// Eye phase of the blink state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlinkPhase {
    /// EAR at or above threshold
    #[default]
    Open,
    /// EAR below threshold, counting consecutive frames
    Closing,
}

/// Outcome of feeding one frame to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlinkUpdate {
    /// A blink ended on this frame
    pub blink_completed: bool,
    pub total_blinks: u64,
}

/// Blink state (tracked over one monitoring session)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlinkState {
    pub phase: BlinkPhase,

    /// Consecutive frames with EAR below threshold
    pub consecutive_low_frames: u32,

    /// Blinks counted since the session started
    pub total_blinks: u64,
}

impl BlinkState {
    /// Advance by one frame with the averaged EAR of both eyes.
    ///
    /// A closed run counts as one blink when the eyes reopen, however far it
    /// exceeded the minimum length.
    pub fn update(&mut self, ear: f64, config: &BlinkConfig) -> BlinkUpdate {
        let mut blink_completed = false;

        if ear < config.ear_threshold {
            self.consecutive_low_frames = self.consecutive_low_frames.saturating_add(1);
            self.phase = BlinkPhase::Closing;
        } else {
            if self.consecutive_low_frames >= config.min_consecutive_frames {
                self.total_blinks += 1;
                blink_completed = true;
            }
            self.consecutive_low_frames = 0;
            self.phase = BlinkPhase::Open;
        }

        BlinkUpdate {
            blink_completed,
            total_blinks: self.total_blinks,
        }
    }
}

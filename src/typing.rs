use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TYPING_EVENT: &str = "typing";
pub const EMIT_INTERVAL: Duration = Duration::from_secs(2);

/// Payload of the `typing` broadcast on the shared typing channel.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypingSignal {
    pub from: Uuid,
    pub to: Uuid,
}

impl TypingSignal {
    /// The sender, if the signal is addressed to `me`.
    pub fn sender_for(&self, me: Uuid) -> Option<Uuid> {
        (self.to == me).then_some(self.from)
    }
}

/// Throttles outgoing typing signals while the input keeps changing.
#[derive(Debug, Default, Clone)]
pub struct TypingEmitter {
    last_sent: Option<Instant>,
}

impl TypingEmitter {
    pub fn new() -> Self {
        TypingEmitter::default()
    }

    pub fn should_emit(&mut self, now: Instant) -> bool {
        let due = self
            .last_sent
            .map_or(true, |last| now.duration_since(last) >= EMIT_INTERVAL);
        if due {
            self.last_sent = Some(now);
        }
        due
    }

    /// Input lost focus.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

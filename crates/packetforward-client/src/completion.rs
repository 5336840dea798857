//! Completion signal between a downstream copy loop and the controller
//!
//! A capacity-one channel that is both the copy loop's result and the rendezvous
//! the controller waits on before it dials again. One producer per link
//! generation, one consumer for the lifetime of the client.

use crate::error::LinkError;
use tokio::sync::mpsc;
use tracing::warn;

/// Why a copy loop stopped
#[derive(Debug)]
pub struct Termination {
    pub generation: u64,
    pub reason: LinkError,
}

/// Consumer side, owned by the controller
#[derive(Debug)]
pub struct CompletionSignal {
    tx: mpsc::Sender<Termination>,
    rx: mpsc::Receiver<Termination>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }

    /// Publisher handed to the copy loop of `generation`
    pub fn publisher(&self, generation: u64) -> CompletionPublisher {
        CompletionPublisher {
            generation,
            tx: self.tx.clone(),
        }
    }

    /// Wait for the copy loop of `generation` to finish.
    ///
    /// Values from any other generation are discarded. Returns `None` only if every
    /// publisher is gone without publishing, which cannot happen while `self` holds
    /// a sender.
    pub async fn drain(&mut self, generation: u64) -> Option<Termination> {
        while let Some(termination) = self.rx.recv().await {
            if termination.generation == generation {
                return Some(termination);
            }
            warn!(
                expected = generation,
                stale = termination.generation,
                reason = %termination.reason,
                "Discarding completion from superseded link"
            );
        }
        None
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side, consumed by the single publish of one copy loop
#[derive(Debug)]
pub struct CompletionPublisher {
    generation: u64,
    tx: mpsc::Sender<Termination>,
}

impl CompletionPublisher {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Publish the loop's termination without blocking
    pub fn publish(self, reason: LinkError) {
        let termination = Termination {
            generation: self.generation,
            reason,
        };
        if let Err(e) = self.tx.try_send(termination) {
            // Only possible if two loops were alive at once
            warn!(generation = self.generation, "Completion slot unavailable: {}", e);
        }
    }
}

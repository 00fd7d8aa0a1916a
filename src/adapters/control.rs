//! Shared run/pause/cancel signal for playback adapters.
//!
//! A [`PlaybackControl`] wraps a `tokio::sync::watch` channel.  The sync
//! `pause`/`resume`/`cancel` methods of an adapter flip the signal; the
//! adapter's in-flight `speak`/`play` future watches it and reacts.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Running,
    Paused,
    Cancelled,
}

pub struct PlaybackControl {
    tx: watch::Sender<Playback>,
    /// Bumped by every `begin`, so a superseded utterance can tell it lost
    /// ownership even if the signal went back to `Running`.
    utterance: AtomicU64,
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Playback::Running);
        Self {
            tx,
            utterance: AtomicU64::new(0),
        }
    }

    /// Prepare for a new utterance and subscribe to changes.  Returns the
    /// utterance id and the receiver.
    ///
    /// A leftover `Cancelled` from an earlier utterance is cleared; a pending
    /// `Paused` is kept so a pause issued just before playback is honoured.
    pub fn begin(&self) -> (u64, watch::Receiver<Playback>) {
        let id = self.utterance.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx.send_if_modified(|state| {
            if *state == Playback::Cancelled {
                *state = Playback::Running;
                true
            } else {
                false
            }
        });
        (id, self.tx.subscribe())
    }

    /// `false` once a later `begin` has taken over.
    pub fn is_current(&self, id: u64) -> bool {
        self.utterance.load(Ordering::SeqCst) == id
    }

    pub fn pause(&self) {
        self.tx.send_if_modified(|state| {
            if *state == Playback::Running {
                *state = Playback::Paused;
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.tx.send_if_modified(|state| {
            if *state == Playback::Paused {
                *state = Playback::Running;
                true
            } else {
                false
            }
        });
    }

    pub fn cancel(&self) {
        self.tx.send_replace(Playback::Cancelled);
    }

    pub fn state(&self) -> Playback {
        *self.tx.borrow()
    }
}

/// Block until the signal leaves `Paused`.  Returns the new state.
pub async fn wait_unpaused(rx: &mut watch::Receiver<Playback>) -> Playback {
    loop {
        let state = *rx.borrow_and_update();
        if state != Playback::Paused {
            return state;
        }
        if rx.changed().await.is_err() {
            return Playback::Cancelled;
        }
    }
}

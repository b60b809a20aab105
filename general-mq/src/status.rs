// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle status shared by [`crate::connection::Connection`] and
//! [`crate::queue::Queue`], and the low-frequency listener channel both use to
//! publish transitions.

use tokio::sync::watch;

/// Lifecycle status of a Connection or Queue.
///
/// State diagram: `Closed -> Connecting -> Connected -> (Connecting | Closing) -> Closed`.
/// `Closed` is the only terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not connected, and not attempting to connect.
    Closed,
    /// Dial/handshake/declare in progress.
    Connecting,
    /// Transport (and, for a Queue, its channel/subscription) is ready for use.
    Connected,
    /// Was connected; the underlying transport was lost and reconnection has not
    /// yet progressed to `Connecting`.
    Disconnected,
    /// `close()` has been requested and teardown is in progress.
    Closing,
}

/// A single-slot broadcast of the current [`Status`].
///
/// Backed by [`tokio::sync::watch`], which is exactly the "simple `Vec` of
/// listeners" the status stream design note calls for: any number of receivers
/// can be cloned off a single sender, each sees only the latest value plus a
/// notification of change, and none of them need to be individually
/// unsubscribed when dropped.
pub struct StatusChannel {
    tx: watch::Sender<Status>,
}

impl StatusChannel {
    /// Create a channel starting at the given status.
    #[must_use]
    pub fn new(initial: Status) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    /// Current status.
    #[must_use]
    pub fn get(&self) -> Status {
        *self.tx.borrow()
    }

    /// Transition to `status`, notifying listeners only if it differs from the
    /// current value, so no consecutive duplicate status event is ever
    /// observed.
    pub fn set(&self, status: Status) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Obtain a new receiver for this channel's status changes.
    #[must_use]
    pub fn receiver(&self) -> StatusReceiver {
        StatusReceiver(self.tx.subscribe())
    }
}

/// A handle that observes [`Status`] transitions of a Connection, Queue, or
/// Manager without needing explicit unsubscription.
#[derive(Clone)]
pub struct StatusReceiver(watch::Receiver<Status>);

impl StatusReceiver {
    /// Current status, without waiting.
    #[must_use]
    pub fn get(&self) -> Status {
        *self.0.borrow()
    }

    /// Wait for the next status transition and return it.
    ///
    /// Returns the last known status if the channel's sender has been dropped
    /// (the owning Connection/Queue/Manager no longer exists).
    pub async fn changed(&mut self) -> Status {
        if self.0.changed().await.is_err() {
            return *self.0.borrow();
        }
        *self.0.borrow()
    }

    /// Wait until status equals `target`, returning immediately if already there.
    pub async fn wait_for(&mut self, target: Status) {
        loop {
            if self.get() == target {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

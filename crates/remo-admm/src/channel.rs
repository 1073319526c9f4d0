//! Point-to-point asynchronous channels between workers.
//!
//! Thin wrapper over `std::sync::mpsc` with the two policies the algorithm
//! relies on: sends never block the sender, and receives drain the queue down
//! to the freshest message per neighbor (intermediate snapshots are obsolete
//! the moment a newer one exists).

use crate::message::Message;
use remo_core::ClusterId;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::debug;

/// Sending half of a directed worker-to-worker channel.
pub struct ChannelSender {
    from: ClusterId,
    to: ClusterId,
    tx: Sender<Message>,
}

impl ChannelSender {
    /// Publish a message. Never blocks; a disconnected receiver (worker
    /// already terminated) is not an error for the sender.
    pub fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            debug!(from = %self.from, to = %self.to, "receiver gone, message dropped");
        }
    }

    pub fn peer(&self) -> ClusterId {
        self.to
    }
}

/// Receiving half of a directed worker-to-worker channel.
pub struct ChannelReceiver {
    from: ClusterId,
    rx: Receiver<Message>,
}

impl ChannelReceiver {
    /// Wait up to `timeout` for a message, then drain whatever else is queued
    /// and return only the most recent payload. `None` when nothing arrived
    /// within the timeout or the sender is gone.
    pub fn try_receive_latest(&self, timeout: Duration) -> Option<Message> {
        let mut latest = match self.rx.recv_timeout(timeout) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        };
        let mut dropped = 0usize;
        while let Ok(newer) = self.rx.try_recv() {
            latest = newer;
            dropped += 1;
        }
        if dropped > 0 {
            debug!(from = %self.from, dropped, "skipped stale messages");
        }
        Some(latest)
    }

    pub fn peer(&self) -> ClusterId {
        self.from
    }
}

/// Create one directed channel from `from` to `to`.
pub fn channel(from: ClusterId, to: ClusterId) -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = mpsc::channel();
    (
        ChannelSender { from, to, tx },
        ChannelReceiver { from, rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn message(rho: f64) -> Message {
        Message {
            sender: ClusterId::new(0),
            flows: HashMap::new(),
            lambda: HashMap::new(),
            rho,
            gap_table: HashMap::new(),
        }
    }

    #[test]
    fn receive_keeps_only_the_freshest_message() {
        let (tx, rx) = channel(ClusterId::new(0), ClusterId::new(1));
        tx.send(message(1.0));
        tx.send(message(2.0));
        tx.send(message(3.0));

        let latest = rx.try_receive_latest(Duration::from_millis(10)).unwrap();
        assert_eq!(latest.rho, 3.0);
        assert!(rx.try_receive_latest(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn receive_times_out_on_empty_channel() {
        let (_tx, rx) = channel(ClusterId::new(0), ClusterId::new(1));
        assert!(rx.try_receive_latest(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn send_to_dropped_receiver_is_silent() {
        let (tx, rx) = channel(ClusterId::new(0), ClusterId::new(1));
        drop(rx);
        tx.send(message(1.0));
    }
}

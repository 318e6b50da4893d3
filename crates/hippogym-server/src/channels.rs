//! Per-session event channel set.
//!
//! One unbounded FIFO per inbound [`ChannelKind`] plus one outbound FIFO.
//! Receivers are handed out by value, so each channel has exactly one
//! consumer: the worker owns the inbound receivers, the communicator owns
//! the outbound receiver.

use std::collections::HashMap;

use hippogym_core::message::{ChannelKind, InboundFrame, Outbound};
use tokio::sync::mpsc;

pub type InboundSender = mpsc::UnboundedSender<InboundFrame>;
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundFrame>;
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Producer side of the inbound channels. Cheap to clone.
#[derive(Debug, Clone)]
pub struct InboundSenders {
    senders: HashMap<ChannelKind, InboundSender>,
}

impl InboundSenders {
    /// Enqueue `frame` on the `kind` channel. Returns `false` once the
    /// consumer is gone, i.e. the worker has stopped.
    pub fn send(&self, kind: ChannelKind, frame: InboundFrame) -> bool {
        self.senders
            .get(&kind)
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

/// Consumer side of the inbound channels, owned by the worker.
#[derive(Debug)]
pub struct InboundReceivers {
    receivers: HashMap<ChannelKind, InboundReceiver>,
}

impl InboundReceivers {
    /// Take ownership of the receiver for `kind`. Each receiver can be taken
    /// once; later calls return `None`.
    pub fn take(&mut self, kind: ChannelKind) -> Option<InboundReceiver> {
        self.receivers.remove(&kind)
    }

    pub fn remaining(&self) -> usize {
        self.receivers.len()
    }
}

/// What the communicator keeps for one session.
#[derive(Debug)]
pub struct SessionChannels {
    pub inbound: InboundSenders,
    pub outbound: OutboundReceiver,
}

/// What the trial worker keeps for one session.
#[derive(Debug)]
pub struct WorkerChannels {
    pub inbound: InboundReceivers,
    pub outbound: OutboundSender,
}

/// Create a fresh channel set and split it between the two sides.
pub fn channel_set() -> (SessionChannels, WorkerChannels) {
    let mut senders = HashMap::with_capacity(ChannelKind::ALL.len());
    let mut receivers = HashMap::with_capacity(ChannelKind::ALL.len());
    for kind in ChannelKind::ALL {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.insert(kind, tx);
        receivers.insert(kind, rx);
    }
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    (
        SessionChannels {
            inbound: InboundSenders { senders },
            outbound: out_rx,
        },
        WorkerChannels {
            inbound: InboundReceivers { receivers },
            outbound: out_tx,
        },
    )
}

/// Pop every frame currently queued on `rx` without waiting.
pub fn drain_now(rx: &mut InboundReceiver) -> Vec<InboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_kind_has_a_channel() {
        let (session, mut worker) = channel_set();
        for kind in ChannelKind::ALL {
            assert!(session.inbound.send(kind, InboundFrame::Parsed(json!(kind.as_str()))));
        }
        for kind in ChannelKind::ALL {
            let mut rx = worker.inbound.take(kind).expect("receiver should exist");
            assert_eq!(drain_now(&mut rx), vec![InboundFrame::Parsed(json!(kind.as_str()))]);
        }
        assert_eq!(worker.inbound.remaining(), 0);
    }

    #[test]
    fn receiver_can_only_be_taken_once() {
        let (_session, mut worker) = channel_set();
        assert!(worker.inbound.take(ChannelKind::Grid).is_some());
        assert!(worker.inbound.take(ChannelKind::Grid).is_none());
    }

    #[test]
    fn per_channel_order_is_preserved() {
        let (session, mut worker) = channel_set();
        for i in 0..5 {
            session.inbound.send(ChannelKind::Action, InboundFrame::Parsed(json!(i)));
        }
        let mut rx = worker.inbound.take(ChannelKind::Action).unwrap();
        let got: Vec<_> = drain_now(&mut rx);
        let expected: Vec<_> = (0..5).map(|i| InboundFrame::Parsed(json!(i))).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn drain_on_empty_channel_returns_immediately() {
        let (_session, mut worker) = channel_set();
        let mut rx = worker.inbound.take(ChannelKind::Keyboard).unwrap();
        assert!(drain_now(&mut rx).is_empty());
    }

    #[test]
    fn send_fails_after_worker_drops() {
        let (session, worker) = channel_set();
        drop(worker);
        assert!(!session.inbound.send(ChannelKind::Button, InboundFrame::Parsed(json!("start"))));
    }

    #[tokio::test]
    async fn outbound_preserves_order() {
        let (mut session, worker) = channel_set();
        worker.outbound.send(Outbound::Done).unwrap();
        worker
            .outbound
            .send(Outbound::ui(
                hippogym_core::message::ElementCategory::TextBox,
                json!({}),
            ))
            .unwrap();
        assert_eq!(session.outbound.recv().await, Some(Outbound::Done));
        assert!(matches!(session.outbound.recv().await, Some(Outbound::Ui { .. })));
    }
}

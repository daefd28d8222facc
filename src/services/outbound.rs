//! Acknowledgement-gated outbound message queue
//!
//! At most one message is outstanding. Messages sent while one awaits
//! confirmation are queued and released one per CONFIRM_RECEIVED, lowest
//! priority value first, arrival order among equals.

use crate::io::protocol::{build_frame, MessageType, OUT_HEADER_LEN};
use std::sync::Arc;
use tracing::{debug, trace};

/// Transport capability used to put a stamped frame on the wire
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8]);
}

impl<T: FrameSink + ?Sized> FrameSink for Arc<T> {
    fn send_frame(&self, frame: &[u8]) {
        (**self).send_frame(frame)
    }
}

/// Send priority; lower value goes first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    VeryHigh = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    VeryLow = 4,
}

#[derive(Debug, Clone)]
struct PendingMessage {
    message_type: MessageType,
    sequence: u32,
    frame: Vec<u8>,
    priority: Priority,
}

pub struct OutboundQueue<S: FrameSink> {
    sink: S,
    pending: Vec<PendingMessage>,
    awaiting_confirmation: bool,
    /// Last sequence number stamped; next message uses `sequence + 1`
    sequence: u32,
}

impl<S: FrameSink> OutboundQueue<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, pending: Vec::new(), awaiting_confirmation: false, sequence: 0 }
    }

    /// Stamp the next sequence number, then send now if the line is free, otherwise queue
    pub fn send(&mut self, message_type: MessageType, payload: &[u8], priority: Priority) {
        self.sequence = self.sequence.wrapping_add(1);
        let frame = build_frame(self.sequence, message_type, payload);
        if self.awaiting_confirmation {
            trace!(
                sequence = self.sequence,
                message_type = message_type.as_str(),
                priority = ?priority,
                pending = self.pending.len() + 1,
                "outbound_queued"
            );
            self.pending.push(PendingMessage { message_type, sequence: self.sequence, frame: frame.to_vec(), priority });
            return;
        }
        self.transmit(message_type, self.sequence, &frame);
    }

    /// Peer acknowledged the outstanding message
    pub fn on_confirmation(&mut self) {
        if self.pending.is_empty() {
            self.awaiting_confirmation = false;
            return;
        }
        // stable: equal priorities keep arrival order
        self.pending.sort_by_key(|m| m.priority);
        let next = self.pending.remove(0);
        self.transmit(next.message_type, next.sequence, &next.frame);
    }

    /// Drop queued messages for which `stale(type, payload)` holds; returns how many went
    ///
    /// The outstanding message is unaffected.
    pub fn discard_pending(&mut self, mut stale: impl FnMut(MessageType, &[u8]) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|m| !stale(m.message_type, &m.frame[OUT_HEADER_LEN..]));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, pending = self.pending.len(), "outbound_discarded");
        }
        dropped
    }

    /// Drop queued messages and the awaiting flag; the sequence counter is kept
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "outbound_reset");
        }
        self.pending.clear();
        self.awaiting_confirmation = false;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn transmit(&mut self, message_type: MessageType, sequence: u32, frame: &[u8]) {
        trace!(sequence, message_type = message_type.as_str(), "outbound_sent");
        self.sink.send_frame(frame);
        self.awaiting_confirmation = true;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::codec::u32_from_bytes;
    use parking_lot::Mutex;

    /// Records every frame handed to the transport
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub frames: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingSink {
        pub fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut *self.frames.lock())
        }
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&self, frame: &[u8]) {
            self.frames.lock().push(frame.to_vec());
        }
    }

    fn queue() -> OutboundQueue<Arc<RecordingSink>> {
        OutboundQueue::new(Arc::new(RecordingSink::default()))
    }

    #[test]
    fn test_first_message_goes_immediately() {
        let mut q = queue();
        q.send(MessageType::Pong, &[], Priority::High);
        let frames = q.sink().take();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][6], MessageType::Pong as u8);
        assert_eq!(u32_from_bytes(&frames[0][2..], false), 1);
        assert!(q.is_awaiting_confirmation());
    }

    #[test]
    fn test_priority_order_after_confirmation() {
        let mut q = queue();
        q.send(MessageType::Pong, &[0], Priority::Normal);
        q.send(MessageType::RequestTile, &[3], Priority::Low);
        q.send(MessageType::RequestTile, &[1], Priority::High);
        q.send(MessageType::RequestTile, &[2], Priority::Normal);
        assert_eq!(q.sink().take().len(), 1);
        assert_eq!(q.pending_len(), 3);

        let mut order = Vec::new();
        for _ in 0..3 {
            q.on_confirmation();
            let frames = q.sink().take();
            assert_eq!(frames.len(), 1);
            order.push(frames[0][7]);
        }
        assert_eq!(order, vec![1, 2, 3]);

        q.on_confirmation();
        assert!(q.sink().take().is_empty());
        assert!(!q.is_awaiting_confirmation());
    }

    #[test]
    fn test_equal_priority_keeps_arrival_order() {
        let mut q = queue();
        q.send(MessageType::Pong, &[], Priority::High);
        for tag in 10..15u8 {
            q.send(MessageType::RequestTile, &[tag], Priority::Normal);
        }
        let mut order = Vec::new();
        while q.pending_len() > 0 {
            q.on_confirmation();
            order.push(q.sink().take()[0][7]);
        }
        assert_eq!(order, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_sequence_increments_and_survives_reset() {
        let mut q = queue();
        q.send(MessageType::Pong, &[], Priority::High);
        q.on_confirmation();
        q.send(MessageType::Pong, &[], Priority::High);
        q.send(MessageType::Pong, &[], Priority::High);
        q.reset();
        assert_eq!(q.pending_len(), 0);
        assert!(!q.is_awaiting_confirmation());
        q.send(MessageType::Pong, &[], Priority::High);

        // the dropped message keeps its number
        let seqs: Vec<u32> = q.sink().take().iter().map(|f| u32_from_bytes(&f[2..], false)).collect();
        assert_eq!(seqs, vec![1, 2, 4]);
    }

    #[test]
    fn test_sequence_follows_send_order_not_priority() {
        let mut q = queue();
        q.send(MessageType::Pong, &[0], Priority::Normal);
        q.send(MessageType::RequestTile, &[1], Priority::Low);
        q.send(MessageType::RequestTile, &[2], Priority::VeryHigh);
        q.on_confirmation();
        q.on_confirmation();

        let sent: Vec<(u32, u8)> =
            q.sink().take().iter().map(|f| (u32_from_bytes(&f[2..], false), f[7])).collect();
        assert_eq!(sent, vec![(1, 0), (3, 2), (2, 1)]);
    }

    #[test]
    fn test_discard_pending_keeps_outstanding() {
        let mut q = queue();
        q.send(MessageType::RequestTile, &[0, 0, 0, 0, 0, 0, 0, 0, 16], Priority::Normal);
        q.send(MessageType::RequestTile, &[1, 0, 0, 0, 0, 0, 0, 0, 16], Priority::Normal);
        q.send(MessageType::Pong, &[], Priority::High);
        q.send(MessageType::RequestTile, &[2, 0, 0, 0, 0, 0, 0, 0, 15], Priority::Normal);

        let dropped = q.discard_pending(|t, payload| t == MessageType::RequestTile && payload[8] != 15);
        assert_eq!(dropped, 1);
        assert_eq!(q.pending_len(), 2);
        assert_eq!(q.sink().take().len(), 1);

        q.on_confirmation();
        q.on_confirmation();
        let frames = q.sink().take();
        assert_eq!(frames[0][6], MessageType::Pong as u8);
        assert_eq!(frames[1][7 + 8], 15);
    }

    #[test]
    fn test_confirmation_with_nothing_outstanding() {
        let mut q = queue();
        q.on_confirmation();
        assert!(!q.is_awaiting_confirmation());
        assert!(q.sink().take().is_empty());
    }
}

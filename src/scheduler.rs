use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::protocol::codec::{FrameReceiver, TxFrame};


/// Minimum gap between two transmissions.
pub const TX_INTERVAL: Duration = Duration::from_millis(100);

/// The link must have been quiet this long before we transmit.
pub const RX_QUIET: Duration = Duration::from_millis(100);


/// FIFO of outgoing frames, released one at a time while the link is idle.
#[derive(Debug, Default)]
pub struct TxScheduler {
    queue: VecDeque<TxFrame>,
    last_tx_time: Option<Instant>,
}

impl TxScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, frame: TxFrame) {
        self.queue.push_back(frame);
    }

    /// Next frame to put on the wire, if the queue is non-empty and the link allows it.
    pub fn poll(&mut self, receiver: &FrameReceiver, now: Instant) -> Option<TxFrame> {
        if self.queue.is_empty() || !receiver.is_empty() {
            return None;
        }

        let elapsed = |since: Option<Instant>| since.map(|t| now.saturating_duration_since(t));

        if elapsed(self.last_tx_time).is_some_and(|d| d < TX_INTERVAL) {
            return None;
        }

        if elapsed(receiver.last_rx_time()).is_some_and(|d| d < RX_QUIET) {
            return None;
        }

        let frame = self.queue.pop_front()?;
        self.last_tx_time = Some(now);
        debug!(?frame, queued = self.queue.len(), "tx");

        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TxFrame> {
        self.queue.iter()
    }
}


#[cfg(test)]
mod tests {
    use crate::protocol::registers::Register;

    use super::*;

    #[test]
    fn test_fifo_and_spacing() {
        let receiver = FrameReceiver::new();
        let mut scheduler = TxScheduler::new();
        let start = Instant::now();

        scheduler.enqueue(TxFrame::read(Register::Mode));
        scheduler.enqueue(TxFrame::read(Register::FanMode));

        assert_eq!(scheduler.poll(&receiver, start), Some(TxFrame::read(Register::Mode)));
        assert_eq!(scheduler.poll(&receiver, start + Duration::from_millis(50)), None);
        assert_eq!(scheduler.poll(&receiver, start + Duration::from_millis(100)), Some(TxFrame::read(Register::FanMode)));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_waits_for_quiet_link() {
        let mut receiver = FrameReceiver::new();
        let mut scheduler = TxScheduler::new();
        let start = Instant::now();

        scheduler.enqueue(TxFrame::read(Register::Mode));

        // partial frame in flight
        receiver.receive(&[0x02, 0x00, 0x03], start);
        assert_eq!(scheduler.poll(&receiver, start + Duration::from_millis(150)), None);

        receiver.expire(start + Duration::from_millis(250));
        assert!(receiver.is_empty());

        // buffer empty and last byte long ago
        assert!(scheduler.poll(&receiver, start + Duration::from_millis(250)).is_some());
    }

    #[test]
    fn test_waits_after_last_rx() {
        let mut receiver = FrameReceiver::new();
        let mut scheduler = TxScheduler::new();
        let start = Instant::now();

        let frame = TxFrame::write(Register::Mode, 0x43);
        receiver.receive(frame.as_bytes(), start);
        assert!(receiver.is_empty());

        scheduler.enqueue(TxFrame::read(Register::Mode));
        assert_eq!(scheduler.poll(&receiver, start + Duration::from_millis(99)), None);
        assert!(scheduler.poll(&receiver, start + Duration::from_millis(100)).is_some());
    }
}

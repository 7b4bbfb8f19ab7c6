//! Bounded FIFO frame queue between the producer loop and the sink
//! consumer. Backpressure is policy driven: block the producer when no
//! frame may be lost, or discard the oldest frame when freshness wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

use stream_types::SampleFrame;

/// What happens when a frame is pushed into a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Producer waits for room. No frame is ever lost; queue-full is a
    /// scheduling delay, not an error.
    Block,
    /// The oldest queued frame is discarded to make room. Gaps in the
    /// delivered sequence are expected under this policy.
    DropOldest,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("frame queue closed")]
pub struct QueueClosed;

/// How long a blocked push waits between checks of the closed flag.
const PUSH_POLL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct FrameQueue {
    tx: flume::Sender<SampleFrame>,
    rx: flume::Receiver<SampleFrame>,
    policy: OverflowPolicy,
    closed: Arc<AtomicBool>,
}

impl FrameQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            policy,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Enqueue a frame under the queue's policy. FIFO order is preserved
    /// in both cases.
    pub fn push(&self, frame: SampleFrame) -> Result<(), QueueClosed> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueClosed);
        }
        let mut frame = frame;
        match self.policy {
            OverflowPolicy::Block => loop {
                match self.tx.send_timeout(frame, PUSH_POLL) {
                    Ok(()) => return Ok(()),
                    Err(flume::SendTimeoutError::Timeout(f)) => {
                        if self.closed.load(Ordering::Acquire) {
                            return Err(QueueClosed);
                        }
                        frame = f;
                    }
                    Err(flume::SendTimeoutError::Disconnected(_)) => return Err(QueueClosed),
                }
            },
            OverflowPolicy::DropOldest => loop {
                match self.tx.try_send(frame) {
                    Ok(()) => return Ok(()),
                    Err(flume::TrySendError::Full(f)) => {
                        if let Ok(dropped) = self.rx.try_recv() {
                            trace!(seq = dropped.seq(), "dropped oldest frame");
                        }
                        frame = f;
                    }
                    Err(flume::TrySendError::Disconnected(_)) => return Err(QueueClosed),
                }
            },
        }
    }

    /// Dequeue the next frame, waiting up to `timeout`.
    pub fn pop(&self, timeout: Duration) -> Option<SampleFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Discard everything currently queued. Used by abortive stop.
    pub fn discard_all(&self) -> usize {
        self.rx.drain().count()
    }

    /// Refuse further pushes and wake any blocked producer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use stream_types::Resolution;

    fn frame(seq: u32) -> SampleFrame {
        SampleFrame::new(seq, Resolution::Bits8, 1, vec![Bytes::from(vec![0u8; 4])], 4)
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = FrameQueue::new(8, OverflowPolicy::Block);
        for seq in 0..5 {
            queue.push(frame(seq)).unwrap();
        }
        for seq in 0..5 {
            assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().seq(), seq);
        }
        assert!(queue.pop(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn drop_oldest_discards_head() {
        let queue = FrameQueue::new(2, OverflowPolicy::DropOldest);
        for seq in 0..4 {
            queue.push(frame(seq)).unwrap();
        }
        // Frames 0 and 1 were sacrificed for 2 and 3.
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().seq(), 2);
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().seq(), 3);
    }

    #[test]
    fn blocking_push_waits_for_room() {
        let queue = FrameQueue::new(1, OverflowPolicy::Block);
        queue.push(frame(0)).unwrap();

        let q = queue.clone();
        let handle = std::thread::spawn(move || q.push(frame(1)));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(queue.pop(Duration::from_millis(10)).unwrap().seq(), 0);
        handle.join().unwrap().unwrap();
        assert_eq!(queue.pop(Duration::from_millis(100)).unwrap().seq(), 1);
    }

    #[test]
    fn close_wakes_blocked_producer() {
        let queue = FrameQueue::new(1, OverflowPolicy::Block);
        queue.push(frame(0)).unwrap();

        let q = queue.clone();
        let handle = std::thread::spawn(move || q.push(frame(1)));
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(handle.join().unwrap(), Err(QueueClosed));
    }
}

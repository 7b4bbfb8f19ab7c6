//! The streaming manager owns the frame queue and exactly one active
//! sink, drained on a dedicated consumer thread. It decouples the
//! fixed-rate producer from sink latency and tells the owning session
//! when the sink terminates the capture on its own.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info};

use stream_types::{FileFormat, Resolution, SampleFrame, StreamConfig};

use crate::file_sink::{self, FileSink};
use crate::net_sink::NetSink;
use crate::queue::FrameQueue;
use crate::sink::{Sink, SinkError, SinkStatus};

/// Why the manager stopped accepting frames on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The sink reached its configured end (e.g. the sample cap).
    SinkComplete,
    /// The sink failed permanently.
    SinkFailed,
}

/// Invoked exactly once, from the consumer thread, when the sink
/// terminates the capture. The owning application uses this to stop the
/// session without an external stop command.
pub type NotifyStop = Box<dyn FnMut(StopReason) + Send>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    #[error("sink is closed")]
    SinkClosed,
    #[error("frame queue closed")]
    QueueClosed,
}

/// How long the consumer waits on an empty queue before re-checking its
/// stop flags.
const POP_POLL: Duration = Duration::from_millis(50);

struct CsvCapture {
    paths: Arc<Mutex<Vec<PathBuf>>>,
    resolution: Resolution,
    channel_count: u8,
}

pub struct StreamingManager {
    queue: FrameQueue,
    stop: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    sink_closed: Arc<AtomicBool>,
    notify: Arc<Mutex<Option<NotifyStop>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    csv: Option<CsvCapture>,
}

impl StreamingManager {
    /// Build a manager around an already-connected sink. The consumer
    /// thread starts immediately; it idles until frames arrive.
    pub fn with_sink(sink: Box<dyn Sink>, queue_capacity: usize) -> Self {
        let queue = FrameQueue::new(queue_capacity, sink.overflow_policy());
        let stop = Arc::new(AtomicBool::new(false));
        let abort = Arc::new(AtomicBool::new(false));
        let sink_closed = Arc::new(AtomicBool::new(false));
        let notify: Arc<Mutex<Option<NotifyStop>>> = Arc::new(Mutex::new(None));

        let worker = {
            let queue = queue.clone();
            let stop = Arc::clone(&stop);
            let abort = Arc::clone(&abort);
            let sink_closed = Arc::clone(&sink_closed);
            let notify = Arc::clone(&notify);
            thread::Builder::new()
                .name("stream-sink".into())
                .spawn(move || consume(sink, queue, stop, abort, sink_closed, notify))
                .expect("spawn sink consumer thread")
        };

        Self {
            queue,
            stop,
            abort,
            sink_closed,
            notify,
            worker: Mutex::new(Some(worker)),
            csv: None,
        }
    }

    /// Network-sink session (TCP or UDP).
    pub fn network(cfg: &StreamConfig) -> Result<Self, SinkError> {
        let sink = NetSink::connect(cfg.transport, &cfg.host, cfg.port)?;
        Ok(Self::with_sink(Box::new(sink), cfg.queue_capacity))
    }

    /// File-sink session. `sample_rate_hz` is the decimated rate.
    pub fn file(cfg: &StreamConfig, sample_rate_hz: u32) -> Result<Self, SinkError> {
        let sink = FileSink::create(cfg, sample_rate_hz)?;
        let csv = (cfg.format == FileFormat::Csv).then(|| CsvCapture {
            paths: sink.capture_paths(),
            resolution: cfg.resolution,
            channel_count: cfg.channels.count(),
        });
        let mut manager = Self::with_sink(Box::new(sink), cfg.queue_capacity);
        manager.csv = csv;
        Ok(manager)
    }

    /// Register the stop callback. Set this before the producer starts.
    pub fn set_notify_stop(&self, callback: NotifyStop) {
        *self.notify.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Enqueue a frame from the producer, applying the sink's
    /// backpressure policy.
    pub fn push(&self, frame: SampleFrame) -> Result<(), PushError> {
        if self.sink_closed.load(Ordering::Acquire) {
            return Err(PushError::SinkClosed);
        }
        self.queue.push(frame).map_err(|_| PushError::QueueClosed)
    }

    /// Whether the sink terminated the capture on its own.
    pub fn is_sink_closed(&self) -> bool {
        self.sink_closed.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stop the consumer. Graceful drains the queue into the sink and
    /// flushes; abortive discards the queued tail. Idempotent.
    pub fn stop(&self, graceful: bool) {
        if !graceful {
            self.abort.store(true, Ordering::Release);
        }
        self.stop.store(true, Ordering::Release);
        self.queue.close();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("sink consumer thread panicked");
            }
        }
    }

    /// Bulk-convert a closed CSV-format capture. Call after `stop`.
    pub fn convert_to_csv(&self) -> Result<Vec<PathBuf>, SinkError> {
        let csv = self.csv.as_ref().ok_or_else(|| {
            SinkError::File(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "session did not capture to a CSV-format file sink",
            ))
        })?;
        let paths = csv.paths.lock().unwrap_or_else(|e| e.into_inner()).clone();
        file_sink::convert_capture_to_csv(&paths, csv.resolution, csv.channel_count)
            .map_err(SinkError::File)
    }
}

fn consume(
    mut sink: Box<dyn Sink>,
    queue: FrameQueue,
    stop: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
    sink_closed: Arc<AtomicBool>,
    notify: Arc<Mutex<Option<NotifyStop>>>,
) {
    let mut notify_once = |reason: StopReason| {
        if let Some(mut callback) = notify.lock().unwrap_or_else(|e| e.into_inner()).take() {
            callback(reason);
        }
    };

    loop {
        if abort.load(Ordering::Acquire) {
            let dropped = queue.discard_all();
            debug!(dropped, "sink consumer aborted");
            break;
        }
        match queue.pop(POP_POLL) {
            Some(frame) => match sink.write_frame(&frame) {
                Ok(SinkStatus::Continue) => {}
                Ok(SinkStatus::Complete) => {
                    sink_closed.store(true, Ordering::Release);
                    queue.close();
                    info!("sink completed capture");
                    notify_once(StopReason::SinkComplete);
                    break;
                }
                Err(e) => {
                    sink_closed.store(true, Ordering::Release);
                    queue.close();
                    error!(error = %e, "sink failed, tearing down session");
                    notify_once(StopReason::SinkFailed);
                    break;
                }
            },
            // Timed out on an empty queue: exit once a graceful stop has
            // been requested and everything queued was delivered.
            None => {
                if stop.load(Ordering::Acquire) && queue.is_empty() {
                    break;
                }
            }
        }
    }

    if let Err(e) = sink.flush() {
        error!(error = %e, "sink flush on shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use stream_types::Resolution;

    /// Sink recording the sequence numbers it receives.
    struct RecordingSink {
        seqs: Arc<Mutex<Vec<u32>>>,
        complete_after: Option<usize>,
    }

    impl Sink for RecordingSink {
        fn write_frame(&mut self, frame: &SampleFrame) -> Result<SinkStatus, SinkError> {
            let mut seqs = self.seqs.lock().unwrap();
            seqs.push(frame.seq());
            if Some(seqs.len()) == self.complete_after {
                return Ok(SinkStatus::Complete);
            }
            Ok(SinkStatus::Continue)
        }

        fn flush(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn overflow_policy(&self) -> OverflowPolicy {
            OverflowPolicy::Block
        }
    }

    use crate::queue::OverflowPolicy;

    fn frame(seq: u32) -> SampleFrame {
        SampleFrame::new(seq, Resolution::Bits8, 1, vec![Bytes::from(vec![0u8; 2])], 2)
    }

    #[test]
    fn frames_delivered_in_order_and_drained_on_stop() {
        let seqs = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seqs: Arc::clone(&seqs),
            complete_after: None,
        };
        let manager = StreamingManager::with_sink(Box::new(sink), 4);
        for seq in 0..20 {
            manager.push(frame(seq)).unwrap();
        }
        manager.stop(true);

        let seqs = seqs.lock().unwrap();
        assert_eq!(*seqs, (0..20).collect::<Vec<u32>>());
    }

    #[test]
    fn abort_discards_queued_tail() {
        let seqs = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seqs: Arc::clone(&seqs),
            complete_after: None,
        };
        let manager = StreamingManager::with_sink(Box::new(sink), 64);
        for seq in 0..50 {
            manager.push(frame(seq)).unwrap();
        }
        manager.stop(false);

        // Whatever made it through is a strict gap-free prefix.
        let seqs = seqs.lock().unwrap();
        assert!(seqs.len() < 50 || seqs.len() == 50);
        for (i, &seq) in seqs.iter().enumerate() {
            assert_eq!(seq, i as u32);
        }
    }

    #[test]
    fn sink_completion_notifies_exactly_once_and_rejects_pushes() {
        let seqs = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            seqs: Arc::clone(&seqs),
            complete_after: Some(3),
        };
        let manager = StreamingManager::with_sink(Box::new(sink), 8);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        manager.set_notify_stop(Box::new(move |reason| {
            assert_eq!(reason, StopReason::SinkComplete);
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let mut rejected = false;
        for seq in 0..10 {
            if manager.push(frame(seq)).is_err() {
                rejected = true;
                break;
            }
            // Give the consumer a chance to hit the completion point.
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(rejected);
        manager.stop(true);
        manager.stop(true); // idempotent

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(manager.is_sink_closed());
        assert_eq!(seqs.lock().unwrap().len(), 3);
    }

    #[test]
    fn convert_without_csv_capture_is_an_error() {
        let sink = RecordingSink {
            seqs: Arc::new(Mutex::new(Vec::new())),
            complete_after: None,
        };
        let manager = StreamingManager::with_sink(Box::new(sink), 4);
        manager.stop(true);
        assert!(manager.convert_to_csv().is_err());
    }
}

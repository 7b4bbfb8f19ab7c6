//! One streaming session: driver, conditioners, manager and the producer
//! application, built from the daemon config plus any settings a master
//! pushed for this run.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use digitizer::SineDriver;
use stream_types::{
    Attenuator, FileFormat, FilterCoefficients, NetConfigMessage, StreamConfig, TransportKind,
};
use streamer::{ChannelConditioner, StopReason, StreamingApplication, StreamingManager};

use crate::config::DaemonConfig;

/// Samples per acquisition block pulled from the driver.
const BLOCK_SAMPLES: usize = 16_384;

/// Everything the daemon supervisor reacts to, on one channel.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command arrived on the control channel.
    Control(NetConfigMessage),
    /// The active sink ended the session on its own.
    SinkStopped(StopReason),
}

pub struct Session {
    manager: Arc<StreamingManager>,
    app: StreamingApplication,
    convert_csv: bool,
}

impl Session {
    /// Validate, connect the sink and start the producer.
    pub fn start(
        cfg: &DaemonConfig,
        stream: &StreamConfig,
        events: flume::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        stream.validate().context("session settings")?;
        if stream.attenuator != Attenuator::A1x1 && !cfg.board.has_attenuator() {
            anyhow::bail!(
                "board {} has no programmable attenuator",
                cfg.board.as_str()
            );
        }
        let sample_rate_hz = cfg.board.base_rate_hz() / stream.decimation;

        let manager = match stream.transport {
            TransportKind::File => Arc::new(
                StreamingManager::file(stream, sample_rate_hz).context("opening file sink")?,
            ),
            TransportKind::Tcp | TransportKind::Udp => Arc::new(
                StreamingManager::network(stream).context("connecting network sink")?,
            ),
        };
        manager.set_notify_stop(Box::new(move |reason| {
            // The supervisor owns the teardown; losing the event means it
            // already shut down.
            let _ = events.send(DaemonEvent::SinkStopped(reason));
        }));

        // The synthetic driver stands in for the memory-mapped hardware
        // ring buffer, which binds here on the device image.
        let driver = SineDriver::open(stream.channels, stream.decimation, BLOCK_SAMPLES)
            .context("opening acquisition driver")?;

        let mut conditioners = Vec::new();
        for ch in [0usize, 1] {
            let enabled = match ch {
                0 => stream.channels.has_ch1(),
                _ => stream.channels.has_ch2(),
            };
            if !enabled {
                continue;
            }
            let cal = cfg.channel_calibration(ch);
            let filter = if cfg.board.needs_equalization() {
                cal.filter
            } else {
                FilterCoefficients::default()
            };
            conditioners.push(ChannelConditioner::new(cal.params, &filter));
        }

        let app = StreamingApplication::new(
            Box::new(driver),
            conditioners,
            stream.resolution,
            stream.decimation,
            Arc::clone(&manager),
        );
        app.run()?;
        info!(
            transport = ?stream.transport,
            decimation = stream.decimation,
            sample_rate_hz,
            "session started"
        );

        Ok(Self {
            manager,
            app,
            convert_csv: stream.transport == TransportKind::File
                && stream.format == FileFormat::Csv,
        })
    }

    /// Stop the session and run any deferred CSV conversion.
    pub fn stop(&self, graceful: bool) -> anyhow::Result<()> {
        let result = self.app.stop(graceful);
        if self.convert_csv {
            match self.manager.convert_to_csv() {
                Ok(outputs) => info!(files = outputs.len(), "capture converted to CSV"),
                Err(e) => warn!(error = %e, "CSV conversion failed"),
            }
        }
        result.context("producer loop")
    }
}

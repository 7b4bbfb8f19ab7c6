//! The producer loop: pull raw blocks from the acquisition driver,
//! condition each channel, pack to the session bit width and enqueue
//! frames into the streaming manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{error, info, warn};

use digitizer::dsp::{self, EqFilter};
use digitizer::{AdcDriver, DriverError, RawBlock};
use stream_types::{CalibrationParams, FilterCoefficients, Resolution, SampleFrame};

use crate::manager::StreamingManager;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("streaming session already started")]
    AlreadyStarted,
}

/// Calibration and equalization for one channel. Built once at session
/// start; the filter state is reset before the first block.
pub struct ChannelConditioner {
    calib: CalibrationParams,
    filter: EqFilter,
}

impl ChannelConditioner {
    pub fn new(calib: CalibrationParams, coeffs: &FilterCoefficients) -> Self {
        Self {
            calib,
            filter: EqFilter::new(coeffs),
        }
    }
}

struct ProducerParts {
    driver: Box<dyn AdcDriver>,
    channels: Vec<ChannelConditioner>,
    resolution: Resolution,
    decimation: u32,
}

pub struct StreamingApplication {
    manager: Arc<StreamingManager>,
    parts: Mutex<Option<ProducerParts>>,
    producer: Mutex<Option<JoinHandle<Result<(), AppError>>>>,
    stop_flag: Arc<AtomicBool>,
    graceful: Arc<AtomicBool>,
}

impl StreamingApplication {
    /// One conditioner per enabled channel, in channel order.
    pub fn new(
        driver: Box<dyn AdcDriver>,
        channels: Vec<ChannelConditioner>,
        resolution: Resolution,
        decimation: u32,
        manager: Arc<StreamingManager>,
    ) -> Self {
        Self {
            manager,
            parts: Mutex::new(Some(ProducerParts {
                driver,
                channels,
                resolution,
                decimation,
            })),
            producer: Mutex::new(None),
            stop_flag: Arc::new(AtomicBool::new(false)),
            graceful: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Start the producer loop on its own thread. Valid once per session.
    pub fn run(&self) -> Result<(), AppError> {
        let mut parts = self
            .parts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(AppError::AlreadyStarted)?;
        for channel in &mut parts.channels {
            channel.filter.reset();
        }
        let manager = Arc::clone(&self.manager);
        let stop_flag = Arc::clone(&self.stop_flag);
        let graceful = Arc::clone(&self.graceful);
        let handle = thread::Builder::new()
            .name("stream-producer".into())
            .spawn(move || produce(parts, manager, stop_flag, graceful))
            .map_err(|e| AppError::Driver(DriverError::Hardware(e.to_string())))?;
        *self.producer.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("streaming session started");
        Ok(())
    }

    /// Stop the session. Graceful drains in-flight data and flushes the
    /// sink; abortive discards the queued tail. Calling it again after
    /// completion is a no-op returning `Ok`.
    pub fn stop(&self, graceful: bool) -> Result<(), AppError> {
        self.graceful.store(graceful, Ordering::Release);
        self.stop_flag.store(true, Ordering::Release);
        if !graceful {
            // Unblock a producer stuck behind a full queue first.
            self.manager.stop(false);
        }
        let handle = self
            .producer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let result = match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    error!("producer thread panicked");
                    Ok(())
                }
            },
            None => Ok(()),
        };
        if graceful {
            self.manager.stop(true);
        }
        info!(graceful, "streaming session stopped");
        result
    }
}

fn produce(
    mut parts: ProducerParts,
    manager: Arc<StreamingManager>,
    stop_flag: Arc<AtomicBool>,
    graceful: Arc<AtomicBool>,
) -> Result<(), AppError> {
    let mut seq: u32 = 0;
    let result = loop {
        if stop_flag.load(Ordering::Acquire) {
            break Ok(());
        }
        match parts.driver.pull() {
            Ok(block) => {
                let frame = condition_block(
                    block,
                    &mut parts.channels,
                    parts.resolution,
                    parts.decimation,
                    seq,
                );
                if manager.push(frame).is_err() {
                    // Sink finished the capture; normal termination.
                    break Ok(());
                }
                seq = seq.wrapping_add(1);
            }
            Err(e) => {
                error!(error = %e, "acquisition failed, terminating session");
                break Err(AppError::Driver(e));
            }
        }
    };

    // A graceful stop drains what the hardware still buffers into one
    // final partial frame.
    if result.is_ok() && graceful.load(Ordering::Acquire) && stop_flag.load(Ordering::Acquire) {
        if let Some(block) = parts.driver.drain() {
            if block.samples_per_channel() > 0 {
                let frame = condition_block(
                    block,
                    &mut parts.channels,
                    parts.resolution,
                    parts.decimation,
                    seq,
                );
                if manager.push(frame).is_err() {
                    warn!("final partial frame discarded: sink already closed");
                }
            }
        }
    }

    parts.driver.close();
    result
}

fn condition_block(
    block: RawBlock,
    channels: &mut [ChannelConditioner],
    resolution: Resolution,
    decimation: u32,
    seq: u32,
) -> SampleFrame {
    let samples_per_channel = block.samples_per_channel() as u32;
    let mut payloads = Vec::with_capacity(block.channels.len());
    for (raw, conditioner) in block.channels.into_iter().zip(channels.iter_mut()) {
        let mut samples: Vec<i32> = raw
            .into_iter()
            .map(|count| dsp::calibrate(count, &conditioner.calib))
            .collect();
        conditioner.filter.apply(&mut samples);
        payloads.push(dsp::pack(resolution, &samples));
    }
    SampleFrame::new(seq, resolution, decimation, payloads, samples_per_channel)
}

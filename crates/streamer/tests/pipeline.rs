//! End-to-end pipeline tests: synthetic acquisition through calibration
//! and packing into real network and file sinks.

use std::io::Read;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use digitizer::dsp;
use digitizer::{sine_sample, SineDriver};
use stream_types::{
    Attenuator, CalibrationParams, ChannelMask, FileFormat, FilterCoefficients, Resolution,
    SampleFrame, SaveMode, StreamConfig, TransportKind,
};
use streamer::file_sink::read_raw_capture;
use streamer::net_sink::{decode_header, FRAME_HEADER_LEN};
use streamer::{ChannelConditioner, StopReason, StreamingApplication, StreamingManager};

const BLOCK_SAMPLES: usize = 64;

fn base_config() -> StreamConfig {
    StreamConfig {
        transport: TransportKind::Tcp,
        host: "127.0.0.1".into(),
        port: 0,
        out_dir: std::env::temp_dir(),
        file_stem: "capture".into(),
        resolution: Resolution::Bits16,
        decimation: 1,
        channels: ChannelMask::Both,
        attenuator: Attenuator::A1x1,
        format: FileFormat::Raw,
        save_mode: SaveMode::Single,
        sample_cap: None,
        queue_capacity: 64,
    }
}

fn application(cfg: &StreamConfig, manager: Arc<StreamingManager>) -> StreamingApplication {
    let driver = SineDriver::open(cfg.channels, cfg.decimation, BLOCK_SAMPLES).unwrap();
    let conditioners = (0..cfg.channels.count())
        .map(|_| ChannelConditioner::new(CalibrationParams::default(), &FilterCoefficients::default()))
        .collect();
    StreamingApplication::new(
        Box::new(driver),
        conditioners,
        cfg.resolution,
        cfg.decimation,
        manager,
    )
}

/// Split a captured TCP byte stream back into frames.
fn parse_stream(data: &[u8]) -> Vec<SampleFrame> {
    let mut frames = Vec::new();
    let mut at = 0;
    while at < data.len() {
        let header = decode_header(&data[at..]).unwrap();
        at += FRAME_HEADER_LEN;
        let per_channel = header.payload_len as usize / header.channel_count as usize;
        let mut channels = Vec::new();
        for _ in 0..header.channel_count {
            channels.push(bytes::Bytes::copy_from_slice(&data[at..at + per_channel]));
            at += per_channel;
        }
        let resolution = match header.resolution_bits {
            8 => Resolution::Bits8,
            _ => Resolution::Bits16,
        };
        let samples = (per_channel / resolution.sample_bytes()) as u32;
        frames.push(SampleFrame::new(header.seq, resolution, 1, channels, samples));
    }
    frames
}

#[test]
fn tcp_session_streams_ordered_calibrated_sine() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let reader = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        data
    });

    let mut cfg = base_config();
    cfg.port = port;
    let manager = Arc::new(StreamingManager::network(&cfg).unwrap());
    let app = application(&cfg, Arc::clone(&manager));
    app.run().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    app.stop(true).unwrap();

    let frames = parse_stream(&reader.join().unwrap());
    assert!(frames.len() > 1);

    // Identity calibration means the wire carries the generator output
    // verbatim, gap-free and in order.
    let mut next_n = 0u64;
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.seq(), i as u32);
        assert_eq!(frame.channel_count(), 2);
        for (ch, payload) in frame.channels().iter().enumerate() {
            let values = dsp::unpack(Resolution::Bits16, payload);
            for (offset, &v) in values.iter().enumerate() {
                assert_eq!(v, sine_sample(ch, next_n + offset as u64));
            }
        }
        next_n += frame.samples_per_channel() as u64;
    }
    // The graceful stop drained a final partial block.
    assert_eq!(
        frames.last().unwrap().samples_per_channel() as usize,
        BLOCK_SAMPLES / 2
    );
}

#[test]
fn file_session_self_terminates_at_sample_cap() {
    let dir = TempDir::new().unwrap();
    let mut cfg = base_config();
    cfg.transport = TransportKind::File;
    cfg.out_dir = dir.path().to_path_buf();
    cfg.channels = ChannelMask::Ch1;
    cfg.sample_cap = Some(150);

    let manager = Arc::new(StreamingManager::file(&cfg, 125_000_000).unwrap());
    let (tx, rx) = flume::bounded(1);
    manager.set_notify_stop(Box::new(move |reason| {
        let _ = tx.send(reason);
    }));

    let app = application(&cfg, Arc::clone(&manager));
    app.run().unwrap();
    // The sink ends the capture on its own; no stop command is sent.
    let reason = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(reason, StopReason::SinkComplete);
    app.stop(true).unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    let channels = read_raw_capture(&files[0], Resolution::Bits16, 1).unwrap();
    assert_eq!(channels[0].len(), 150);
    for (n, &v) in channels[0].iter().enumerate() {
        assert_eq!(v, sine_sample(0, n as u64));
    }
}

#[test]
fn rotating_capture_splits_preserving_order() {
    let dir = TempDir::new().unwrap();
    let mut cfg = base_config();
    cfg.transport = TransportKind::File;
    cfg.out_dir = dir.path().to_path_buf();
    cfg.channels = ChannelMask::Ch1;
    cfg.save_mode = SaveMode::Rotating {
        samples_per_file: 100,
    };
    cfg.sample_cap = Some(250);

    let manager = Arc::new(StreamingManager::file(&cfg, 125_000_000).unwrap());
    let (tx, rx) = flume::bounded(1);
    manager.set_notify_stop(Box::new(move |reason| {
        let _ = tx.send(reason);
    }));
    let app = application(&cfg, Arc::clone(&manager));
    app.run().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    app.stop(true).unwrap();

    let mut files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    assert_eq!(files.len(), 3);

    let mut all = Vec::new();
    for path in &files {
        all.extend(read_raw_capture(path, Resolution::Bits16, 1).unwrap().remove(0));
    }
    assert_eq!(all.len(), 250);
    for (n, &v) in all.iter().enumerate() {
        assert_eq!(v, sine_sample(0, n as u64));
    }
}

#[test]
fn csv_capture_converts_after_session_close() {
    let dir = TempDir::new().unwrap();
    let mut cfg = base_config();
    cfg.transport = TransportKind::File;
    cfg.out_dir = dir.path().to_path_buf();
    cfg.format = FileFormat::Csv;
    cfg.sample_cap = Some(40);

    let manager = Arc::new(StreamingManager::file(&cfg, 125_000_000).unwrap());
    let (tx, rx) = flume::bounded(1);
    manager.set_notify_stop(Box::new(move |reason| {
        let _ = tx.send(reason);
    }));
    let app = application(&cfg, Arc::clone(&manager));
    app.run().unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    app.stop(true).unwrap();

    let outputs = manager.convert_to_csv().unwrap();
    assert_eq!(outputs.len(), 1);
    let text = std::fs::read_to_string(&outputs[0]).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "ch1,ch2");
    assert_eq!(lines.len(), 41);
    let first: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(first[0], format!("{:.6}", sine_sample(0, 0) as f64));
    assert_eq!(first[1], format!("{:.6}", sine_sample(1, 0) as f64));
}

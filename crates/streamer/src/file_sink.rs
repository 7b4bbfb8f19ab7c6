//! File sink: raw, CSV (deferred conversion) and chunked waveform
//! captures, with single-file and rotating save modes and an optional
//! per-channel sample cap that self-terminates the session.
//!
//! On-disk raw layout is packed samples interleaved by channel
//! (ch1[0], ch2[0], ch1[1], ...), so a capture can be demultiplexed
//! without side metadata. The waveform container prefixes each file with
//! a self-describing header and each write with a chunk length.

use std::fs::{create_dir_all, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::Local;
use tracing::{debug, info, warn};

use digitizer::dsp;
use stream_types::{FileFormat, Resolution, SampleFrame, SaveMode, StreamConfig, TransportKind};

use crate::queue::OverflowPolicy;
use crate::sink::{Sink, SinkError, SinkStatus};

/// Transient write failures are retried this many times before the sink
/// is marked failed.
const WRITE_RETRIES: u32 = 3;

const WAV_MAGIC: &[u8; 4] = b"RPWV";
const WAV_VERSION: u8 = 1;

/// Rows converted per slab when turning a capture into CSV.
const CSV_CHUNK_ROWS: usize = 4096;

pub struct FileSink {
    format: FileFormat,
    save_mode: SaveMode,
    dir: PathBuf,
    stem: String,
    /// Session timestamp baked into every file name.
    session_tag: String,
    resolution: Resolution,
    channel_count: u8,
    sample_rate_hz: u32,
    sample_cap: Option<u64>,
    /// Samples per channel delivered so far across all files.
    delivered: u64,
    samples_in_file: u64,
    file_index: u32,
    writer: Option<BufWriter<File>>,
    /// Every file this capture created, shared with the manager for the
    /// deferred CSV conversion.
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl FileSink {
    /// `sample_rate_hz` is the decimated rate, recorded in waveform
    /// container headers.
    pub fn create(cfg: &StreamConfig, sample_rate_hz: u32) -> Result<Self, SinkError> {
        debug_assert_eq!(cfg.transport, TransportKind::File);
        create_dir_all(&cfg.out_dir).map_err(SinkError::File)?;
        Ok(Self {
            format: cfg.format,
            save_mode: cfg.save_mode,
            dir: cfg.out_dir.clone(),
            stem: cfg.file_stem.clone(),
            session_tag: Local::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
            resolution: cfg.resolution,
            channel_count: cfg.channels.count(),
            sample_rate_hz,
            sample_cap: cfg.sample_cap,
            delivered: 0,
            samples_in_file: 0,
            file_index: 0,
            writer: None,
            paths: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Handle to the capture's file list; clone before boxing the sink.
    pub fn capture_paths(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.paths)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn extension(&self) -> &'static str {
        match self.format {
            // CSV captures stream raw and convert after close.
            FileFormat::Raw | FileFormat::Csv => "bin",
            FileFormat::Wav => "wav",
        }
    }

    fn next_path(&self) -> PathBuf {
        let name = match self.save_mode {
            SaveMode::Single => {
                format!("{}_{}.{}", self.stem, self.session_tag, self.extension())
            }
            SaveMode::Rotating { .. } => format!(
                "{}_{}_{:04}.{}",
                self.stem,
                self.session_tag,
                self.file_index,
                self.extension()
            ),
        };
        self.dir.join(name)
    }

    fn open_next_file(&mut self) -> Result<(), SinkError> {
        let path = self.next_path();
        let file = File::create(&path).map_err(SinkError::File)?;
        let mut writer = BufWriter::new(file);
        if self.format == FileFormat::Wav {
            write_retrying(&mut writer, |w| {
                w.write_all(WAV_MAGIC)?;
                w.write_u8(WAV_VERSION)?;
                w.write_u8(self.resolution.bits())?;
                w.write_u8(self.channel_count)?;
                w.write_u32::<LittleEndian>(self.sample_rate_hz)
            })
            .map_err(SinkError::File)?;
        }
        debug!(path = %path.display(), "capture file opened");
        self.paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path);
        self.writer = Some(writer);
        self.file_index += 1;
        self.samples_in_file = 0;
        Ok(())
    }

    fn finish_file(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(SinkError::File)?;
        }
        Ok(())
    }

    /// Write samples `[start, start + count)` of each channel,
    /// interleaved, as one unit.
    fn write_range(&mut self, frame: &SampleFrame, start: u64, count: u64) -> Result<(), SinkError> {
        let bps = self.resolution.sample_bytes();
        let mut chunk = Vec::with_capacity(count as usize * frame.channels().len() * bps);
        for s in start..start + count {
            let at = s as usize * bps;
            for channel in frame.channels() {
                chunk.extend_from_slice(&channel[at..at + bps]);
            }
        }
        let is_wav = self.format == FileFormat::Wav;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::File(io::Error::new(io::ErrorKind::Other, "no open file")))?;
        write_retrying(writer, |w| {
            if is_wav {
                w.write_u32::<LittleEndian>(count as u32)?;
            }
            w.write_all(&chunk)
        })
        .map_err(SinkError::File)
    }
}

impl Sink for FileSink {
    fn write_frame(&mut self, frame: &SampleFrame) -> Result<SinkStatus, SinkError> {
        let mut remaining = frame.samples_per_channel() as u64;
        if let Some(cap) = self.sample_cap {
            if self.delivered >= cap {
                return Ok(SinkStatus::Complete);
            }
            remaining = remaining.min(cap - self.delivered);
        }

        let mut offset = 0u64;
        while remaining > 0 {
            if self.writer.is_none() {
                self.open_next_file()?;
            }
            let take = match self.save_mode {
                SaveMode::Rotating { samples_per_file } => {
                    remaining.min(samples_per_file - self.samples_in_file)
                }
                SaveMode::Single => remaining,
            };
            self.write_range(frame, offset, take)?;
            self.samples_in_file += take;
            self.delivered += take;
            offset += take;
            remaining -= take;
            if let SaveMode::Rotating { samples_per_file } = self.save_mode {
                if self.samples_in_file >= samples_per_file {
                    self.finish_file()?;
                }
            }
        }

        if self.sample_cap == Some(self.delivered) {
            self.finish_file()?;
            info!(samples = self.delivered, "file capture reached sample cap");
            return Ok(SinkStatus::Complete);
        }
        Ok(SinkStatus::Continue)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(SinkError::File)?;
        }
        Ok(())
    }

    fn overflow_policy(&self) -> OverflowPolicy {
        OverflowPolicy::Block
    }
}

fn write_retrying<W, F>(writer: &mut W, mut op: F) -> io::Result<()>
where
    W: Write,
    F: FnMut(&mut W) -> io::Result<()>,
{
    let mut attempt = 0;
    loop {
        match op(writer) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if attempt == WRITE_RETRIES {
                    return Err(e);
                }
                attempt += 1;
                warn!(attempt, error = %e, "file write failed, retrying");
            }
        }
    }
}

/// Bulk-convert a closed raw-layout capture to CSV: one row per sample,
/// one column per channel, fixed decimal precision. Returns the paths of
/// the CSV files written next to the originals.
///
/// Captures can exceed memory, so each file is converted a bounded slab
/// of whole rows at a time.
pub fn convert_capture_to_csv(
    paths: &[PathBuf],
    resolution: Resolution,
    channel_count: u8,
) -> io::Result<Vec<PathBuf>> {
    let row_bytes = channel_count as usize * resolution.sample_bytes();
    let mut outputs = Vec::with_capacity(paths.len());
    for path in paths {
        let mut reader = BufReader::new(File::open(path)?);
        let out_path = path.with_extension("csv");
        let mut writer = BufWriter::new(File::create(&out_path)?);
        let header: Vec<String> = (1..=channel_count).map(|c| format!("ch{c}")).collect();
        writeln!(writer, "{}", header.join(","))?;

        let mut chunk = vec![0u8; row_bytes * CSV_CHUNK_ROWS];
        loop {
            let filled = read_block(&mut reader, &mut chunk)?;
            if filled == 0 {
                break;
            }
            let samples = dsp::unpack(resolution, &chunk[..filled]);
            for row in samples.chunks_exact(channel_count as usize) {
                let cells: Vec<String> =
                    row.iter().map(|v| format!("{:.6}", *v as f64)).collect();
                writeln!(writer, "{}", cells.join(","))?;
            }
            if filled < chunk.len() {
                break;
            }
        }
        writer.flush()?;
        info!(path = %out_path.display(), "capture converted to CSV");
        outputs.push(out_path);
    }
    Ok(outputs)
}

/// Fill `buf` from `reader`, short only at end of file.
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read a raw-layout capture back into per-channel counts. Test and
/// tooling helper for round-trip checks.
pub fn read_raw_capture(
    path: &Path,
    resolution: Resolution,
    channel_count: u8,
) -> io::Result<Vec<Vec<i32>>> {
    let data = std::fs::read(path)?;
    let interleaved = dsp::unpack(resolution, &data);
    let mut channels = vec![Vec::new(); channel_count as usize];
    for (i, v) in interleaved.into_iter().enumerate() {
        channels[i % channel_count as usize].push(v);
    }
    Ok(channels)
}

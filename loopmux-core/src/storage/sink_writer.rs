use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::format::{AudioFormat, SampleEncoding};
use crate::processing::{convert, wav_format};

/// Streaming WAV writer for interleaved output frames.
///
/// Not synchronized itself: the recording session wraps it in
/// `Arc<parking_lot::Mutex<Option<SinkWriter>>>`, shared by the drain
/// scheduler and stop, so `close()` never interleaves with `write()`.
///
/// ## File Format
/// ```text
/// [44-byte WAV header]
/// [interleaved little-endian samples...]
/// ```
///
/// Length fields are written as zero on open and patched on `close()`. If the
/// writer is dropped without being closed the header is still finalized, so an
/// aborted session leaves a readable file.
pub struct SinkWriter {
    file_path: PathBuf,
    format: AudioFormat,
    writer: Option<BufWriter<File>>,
    frames_written: u64,
    scratch: Vec<u8>,
}

impl SinkWriter {
    /// Create the container at `path` and write a placeholder header.
    ///
    /// Output encodings are limited to `Int16` and `Float32`.
    pub fn open(path: impl Into<PathBuf>, format: AudioFormat) -> Result<Self, CaptureError> {
        let file_path = path.into();
        format.validate()?;
        if !matches!(format.encoding, SampleEncoding::Int16 | SampleEncoding::Float32) {
            return Err(CaptureError::FormatUnsupported(format!(
                "sink cannot write {} samples",
                format.encoding
            )));
        }

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::Io(format!("failed to create {}: {}", parent.display(), e)))?;
        }

        let file = File::create(&file_path)
            .map_err(|e| CaptureError::Io(format!("failed to create {}: {}", file_path.display(), e)))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&wav_format::generate_wav_header(&format, 0))
            .map_err(|e| CaptureError::Io(format!("failed to write header: {}", e)))?;

        log::debug!("opened sink {} ({})", file_path.display(), format);
        Ok(Self {
            file_path,
            format,
            writer: Some(writer),
            frames_written: 0,
            scratch: Vec::new(),
        })
    }

    /// Append interleaved frames in arrival order.
    ///
    /// `frames.len()` must be a multiple of the channel count.
    pub fn write(&mut self, frames: &[f32]) -> Result<(), CaptureError> {
        let channels = self.format.channels as usize;
        if frames.len() % channels != 0 {
            return Err(CaptureError::Io(format!(
                "block of {} samples is not a whole number of {}-channel frames",
                frames.len(),
                channels
            )));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CaptureError::Io("sink is closed".into()))?;

        self.scratch.clear();
        convert::encode_into(frames, self.format.encoding, &mut self.scratch);
        writer
            .write_all(&self.scratch)
            .map_err(|e| CaptureError::Io(format!("write failed: {}", e)))?;
        self.frames_written += (frames.len() / channels) as u64;
        Ok(())
    }

    /// Finalize the header and release the file. Returns the SHA-256 of the file.
    pub fn close(&mut self) -> Result<String, CaptureError> {
        let mut writer = self.writer.take().ok_or(CaptureError::AlreadyStopped)?;
        finalize(&mut writer, &self.format)
            .map_err(|e| CaptureError::Io(format!("failed to finalize {}: {}", self.file_path.display(), e)))?;
        drop(writer);

        log::debug!(
            "closed sink {} after {} frames",
            self.file_path.display(),
            self.frames_written
        );
        sha256_file(&self.file_path)
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Frames accepted by `write` so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            match finalize(&mut writer, &self.format) {
                Ok(()) => log::warn!("sink {} finalized without close()", self.file_path.display()),
                Err(e) => log::error!("failed to finalize {}: {}", self.file_path.display(), e),
            }
        }
    }
}

/// Flush buffered audio and patch both length fields from the real file length.
///
/// Using the on-disk length rather than a running counter keeps the header
/// truthful even after a failed partial write; a trailing partial frame is
/// excluded from the data size.
fn finalize(writer: &mut BufWriter<File>, format: &AudioFormat) -> io::Result<()> {
    writer.flush()?;
    let file = writer.get_mut();
    let file_len = file.seek(SeekFrom::End(0))?;
    let raw_data = file_len.saturating_sub(wav_format::WAV_HEADER_SIZE as u64);
    let data_size = raw_data - raw_data % format.block_align() as u64;

    file.seek(SeekFrom::Start(wav_format::RIFF_SIZE_OFFSET))?;
    file.write_all(&wav_format::riff_size(data_size).to_le_bytes())?;
    file.seek(SeekFrom::Start(wav_format::DATA_SIZE_OFFSET))?;
    file.write_all(&wav_format::data_size_field(data_size).to_le_bytes())?;
    file.seek(SeekFrom::End(0))?;
    file.sync_data()
}

/// Compute the SHA-256 hex digest of a file.
fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let mut file =
        File::open(path).map_err(|e| CaptureError::Io(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| CaptureError::Io(format!("checksum failed: {}", e)))?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

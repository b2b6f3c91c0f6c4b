use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use crate::capture::source::{CaptureSource, FaultListener, LevelListener};
use crate::models::audio_models::{AudioTrack, PipelineDiagnostics, SourceKind};
use crate::models::config::PipelineConfiguration;
use crate::models::error::CaptureError;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::models::state::SessionState;
use crate::processing::multiplexer::{ChannelMultiplexer, MuxInput};
use crate::session::scheduler::{DrainScheduler, DrainStats, DrainTask, CATCH_UP_FACTOR};
use crate::storage::metadata as sidecar;
use crate::storage::sink_writer::SinkWriter;
use crate::traits::capture_delegate::PipelineDelegate;

/// Multiplexer index of the loopback source.
pub const LOOPBACK_INDEX: usize = 0;
/// Multiplexer index of the microphone source.
pub const MICROPHONE_INDEX: usize = 1;

/// One loopback + microphone recording to one multi-channel file.
///
/// The control layer owns the session. Pipeline pieces only receive shared
/// handles to what they touch:
///
/// ```text
/// [loopback source] → [queue 0] ─┐
///                                ├→ [ChannelMultiplexer] → [drain tick] → [SinkWriter]
/// [mic source]      → [queue 1] ─┘
/// ```
///
/// The default layout records loopback channel 0 on output channel 0 and
/// microphone channel 0 on output channel 1. Any `map` call before `start`
/// replaces that layout.
pub struct RecordingSession {
    config: PipelineConfiguration,
    loopback: CaptureSource,
    microphone: CaptureSource,
    multiplexer: Arc<Mutex<ChannelMultiplexer>>,
    sink: Arc<Mutex<Option<SinkWriter>>>,
    state: Arc<Mutex<SessionState>>,
    stats: Arc<DrainStats>,
    task: Option<Arc<DrainTask>>,
    scheduler: Option<DrainScheduler>,
    delegate: Option<Arc<dyn PipelineDelegate>>,
    requested_path: Option<PathBuf>,
    file_path: Option<PathBuf>,
    started_at: Option<DateTime<Local>>,
    default_layout: bool,
}

impl RecordingSession {
    /// Assemble a session from two opened sources.
    ///
    /// Both sources must run at `config.sample_rate`.
    pub fn new(
        loopback: CaptureSource,
        microphone: CaptureSource,
        config: PipelineConfiguration,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        for source in [&loopback, &microphone] {
            if source.format().sample_rate != config.sample_rate {
                return Err(CaptureError::FormatUnsupported(format!(
                    "{} source runs at {} Hz, session expects {} Hz",
                    source.kind(),
                    source.format().sample_rate,
                    config.sample_rate
                )));
            }
        }

        let inputs = vec![
            MuxInput::with_gain(Arc::clone(loopback.queue()), config.loopback_gain),
            MuxInput::with_gain(Arc::clone(microphone.queue()), config.mic_gain),
        ];
        let mut multiplexer = ChannelMultiplexer::new(inputs, config.output_channels)?
            .with_alignment(config.alignment, config.max_skew_frames());
        multiplexer.map(LOOPBACK_INDEX, 0, 0)?;
        multiplexer.map(MICROPHONE_INDEX, 0, 1.min(config.output_channels - 1))?;

        Ok(Self {
            config,
            loopback,
            microphone,
            multiplexer: Arc::new(Mutex::new(multiplexer)),
            sink: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            stats: Arc::new(DrainStats::default()),
            task: None,
            scheduler: None,
            delegate: None,
            requested_path: None,
            file_path: None,
            started_at: None,
            default_layout: true,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn PipelineDelegate>) {
        self.delegate = Some(delegate);
    }

    /// Record to `path` instead of a generated name in the output directory.
    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) -> Result<(), CaptureError> {
        self.ensure_idle()?;
        self.requested_path = Some(path.into());
        Ok(())
    }

    /// Route `source_channel` of `source` into `output_channel`.
    pub fn map(&mut self, source: SourceKind, source_channel: u16, output_channel: u16) -> Result<(), CaptureError> {
        self.ensure_idle()?;
        self.take_custom_layout();
        self.multiplexer
            .lock()
            .map(source_index(source), source_channel, output_channel)
    }

    /// Like [`map`](Self::map) with a gain for this binding only.
    pub fn map_with_gain(
        &mut self,
        source: SourceKind,
        source_channel: u16,
        output_channel: u16,
        gain: f32,
    ) -> Result<(), CaptureError> {
        self.ensure_idle()?;
        self.take_custom_layout();
        self.multiplexer
            .lock()
            .map_with_gain(source_index(source), source_channel, output_channel, gain)
    }

    /// Change a source's gain. Takes effect from the next drain tick.
    pub fn set_gain(&self, source: SourceKind, gain: f32) -> Result<(), CaptureError> {
        self.multiplexer.lock().set_source_gain(source_index(source), gain)
    }

    /// Open the sink, start both sources, then the drain scheduler.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        match &*self.state.lock() {
            SessionState::Idle => {}
            SessionState::Stopped => return Err(CaptureError::AlreadyStopped),
            SessionState::Recording | SessionState::Failed(_) => return Err(CaptureError::AlreadyStarted),
        }

        let started_at = Local::now();
        let path = match &self.requested_path {
            Some(path) => path.clone(),
            None => self.generated_path(&started_at),
        };
        let writer = SinkWriter::open(&path, self.config.output_format())?;
        *self.sink.lock() = Some(writer);
        *self.state.lock() = SessionState::Recording;

        if let Some(delegate) = &self.delegate {
            let delegate = Arc::clone(delegate);
            let listener: LevelListener = Arc::new(move |kind: SourceKind, level: f32| delegate.on_level(kind, level));
            self.loopback.set_level_listener(Arc::clone(&listener));
            self.microphone.set_level_listener(listener);
        }

        // A dead stream leaves the session recording: the other source keeps
        // going and the lost one is padded with silence.
        let delegate = self.delegate.clone();
        let on_fault: FaultListener = Arc::new(move |kind: SourceKind, error: &CaptureError| {
            log::warn!("{} source lost mid-recording, continuing with silence", kind);
            if let Some(delegate) = &delegate {
                delegate.on_error(error);
            }
        });
        self.loopback.set_fault_listener(Arc::clone(&on_fault));
        self.microphone.set_fault_listener(on_fault);

        if let Err(e) = self.start_sources() {
            self.abort_start(&path);
            return Err(e);
        }

        let task = Arc::new(
            DrainTask::new(
                Arc::clone(&self.multiplexer),
                Arc::clone(&self.sink),
                Arc::clone(&self.state),
                Arc::clone(&self.stats),
                self.config.frames_per_tick() * CATCH_UP_FACTOR,
            )
            .with_delegate(self.delegate.clone()),
        );
        let scheduler = match DrainScheduler::spawn(Arc::clone(&task), self.config.drain_interval) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                let _ = self.loopback.stop();
                let _ = self.microphone.stop();
                self.abort_start(&path);
                return Err(e);
            }
        };

        log::info!("recording to {}", path.display());
        self.task = Some(task);
        self.scheduler = Some(scheduler);
        self.file_path = Some(path);
        self.started_at = Some(started_at);
        self.notify_state(&SessionState::Recording);
        Ok(())
    }

    /// Finish the recording and finalize the file.
    ///
    /// Order: cancel the scheduler, stop both sources, drain what is still
    /// queued, close the sources, close the sink. A session that failed
    /// mid-recording is finalized the same way.
    pub fn stop(&mut self) -> Result<RecordingResult, CaptureError> {
        if !self.state.lock().is_active() {
            return Err(CaptureError::AlreadyStopped);
        }

        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        for source in [&mut self.loopback, &mut self.microphone] {
            if let Err(e) = source.stop() {
                log::warn!("{} source did not stop cleanly: {}", source.kind(), e);
            }
        }
        if let Some(task) = self.task.take() {
            let drained = task.drain_remaining();
            log::debug!("final drain wrote {} frames", drained);
        }
        self.loopback.close();
        self.microphone.close();

        let final_state = self.state.lock().clone();
        let closed = self.close_sink();
        *self.state.lock() = SessionState::Stopped;
        self.notify_state(&SessionState::Stopped);
        let (frames_written, checksum) = closed.map_err(|e| {
            self.notify_error(&e);
            e
        })?;

        let file_path = self.file_path.clone().unwrap_or_default();
        let mut metadata = RecordingMetadata::new(
            &file_path.to_string_lossy(),
            self.config.output_format(),
            frames_written,
            &checksum,
            self.started_at.unwrap_or_else(Local::now),
            self.tracks(),
        );
        if let SessionState::Failed(error) = &final_state {
            metadata.failure = Some(error.to_string());
        }

        if self.config.write_metadata {
            if let Err(e) = sidecar::write_metadata(&metadata, &file_path) {
                log::error!("failed to write metadata for {}: {}", file_path.display(), e);
                self.notify_error(&e);
            }
        }

        let result = RecordingResult {
            file_path,
            frames_written,
            duration_secs: metadata.duration_secs,
            metadata,
            checksum,
        };
        log::info!(
            "recording finished: {} frames ({:.2} s)",
            result.frames_written,
            result.duration_secs
        );
        if let Some(delegate) = &self.delegate {
            delegate.on_recording_finished(&result);
        }
        Ok(result)
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Path of the current or last recording.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    /// Output channel layout as currently bound.
    pub fn tracks(&self) -> Vec<AudioTrack> {
        self.multiplexer
            .lock()
            .bindings()
            .iter()
            .map(|binding| AudioTrack {
                source: if binding.source_index == LOOPBACK_INDEX {
                    self.loopback.kind()
                } else {
                    self.microphone.kind()
                },
                source_channel: binding.source_channel,
                output_channel: binding.output_channel,
            })
            .collect()
    }

    pub fn diagnostics(&self) -> PipelineDiagnostics {
        PipelineDiagnostics {
            loopback: self.loopback.diagnostics(),
            microphone: self.microphone.diagnostics(),
            ticks: self.stats.ticks(),
            frames_written: self.stats.frames_written(),
            write_errors: self.stats.write_errors(),
        }
    }

    // --- Internal helpers ---

    fn ensure_idle(&self) -> Result<(), CaptureError> {
        match &*self.state.lock() {
            SessionState::Idle => Ok(()),
            SessionState::Stopped => Err(CaptureError::AlreadyStopped),
            _ => Err(CaptureError::AlreadyStarted),
        }
    }

    fn take_custom_layout(&mut self) {
        if self.default_layout {
            self.multiplexer.lock().clear_bindings();
            self.default_layout = false;
        }
    }

    fn generated_path(&self, started_at: &DateTime<Local>) -> PathBuf {
        self.config.output_directory.join(format!(
            "{}_{}.wav",
            self.config.file_prefix,
            started_at.format("%Y%m%d_%H%M%S")
        ))
    }

    fn start_sources(&mut self) -> Result<(), CaptureError> {
        self.loopback.start()?;
        if let Err(e) = self.microphone.start() {
            let _ = self.loopback.stop();
            return Err(e);
        }
        Ok(())
    }

    /// Undo a partial start: back to idle with no file left behind.
    fn abort_start(&mut self, path: &Path) {
        *self.state.lock() = SessionState::Idle;
        if let Some(mut writer) = self.sink.lock().take() {
            let _ = writer.close();
        }
        if let Err(e) = fs::remove_file(path) {
            log::warn!("failed to remove {}: {}", path.display(), e);
        }
        self.loopback.queue().clear();
        self.microphone.queue().clear();
    }

    /// Take the writer out of the shared slot and finalize it.
    fn close_sink(&self) -> Result<(u64, String), CaptureError> {
        let mut writer = self
            .sink
            .lock()
            .take()
            .ok_or_else(|| CaptureError::Io("sink is no longer available".into()))?;
        let frames = writer.frames_written();
        let checksum = writer.close()?;
        Ok((frames, checksum))
    }

    fn notify_state(&self, state: &SessionState) {
        if let Some(delegate) = &self.delegate {
            delegate.on_state_changed(state);
        }
    }

    fn notify_error(&self, error: &CaptureError) {
        if let Some(delegate) = &self.delegate {
            delegate.on_error(error);
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.cancel();
        }
        self.loopback.close();
        self.microphone.close();
        // Dropping an unclosed writer finalizes its header.
        drop(self.sink.lock().take());
    }
}

fn source_index(kind: SourceKind) -> usize {
    match kind {
        SourceKind::Loopback => LOOPBACK_INDEX,
        SourceKind::Microphone => MICROPHONE_INDEX,
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use loopmux_core::processing::convert;
use loopmux_core::storage::metadata;
use loopmux_core::{
    AudioFormat, CaptureError, CaptureProvider, CaptureSource, Endpoint, PipelineConfiguration,
    PipelineDelegate, RawBufferCallback, RecordingResult, RecordingSession, SampleEncoding,
    SessionState, SourceKind, StreamErrorCallback,
};

/// Provider that plays a constant value per channel from its own thread,
/// standing in for a hardware callback.
struct SyntheticProvider {
    kind: SourceKind,
    format: Result<AudioFormat, CaptureError>,
    values: Vec<f32>,
    total_frames: usize,
    block_frames: usize,
    /// Reported through the error callback once every frame has been sent.
    fault: Option<CaptureError>,
    stop_flag: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    feeder: Option<thread::JoinHandle<()>>,
}

impl SyntheticProvider {
    fn new(kind: SourceKind, format: AudioFormat, values: Vec<f32>, total_frames: usize) -> Self {
        assert_eq!(values.len(), format.channels as usize);
        Self {
            kind,
            format: Ok(format),
            values,
            total_frames,
            block_frames: 441,
            fault: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            done: Arc::new(AtomicBool::new(false)),
            feeder: None,
        }
    }

    fn failing(kind: SourceKind, error: CaptureError) -> Self {
        Self {
            format: Err(error),
            ..Self::new(kind, AudioFormat::new(44100, SampleEncoding::Int16, 1), vec![0.0], 0)
        }
    }

    fn dying_with(self, fault: CaptureError) -> Self {
        Self {
            fault: Some(fault),
            ..self
        }
    }

    fn done_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.done)
    }
}

impl CaptureProvider for SyntheticProvider {
    fn endpoint(&self) -> Endpoint {
        Endpoint {
            id: format!("synthetic-{}", self.kind),
            name: format!("Synthetic {}", self.kind),
            kind: self.kind,
            is_default: true,
        }
    }

    fn native_format(&self) -> Result<AudioFormat, CaptureError> {
        self.format.clone()
    }

    fn open(&mut self, _format: &AudioFormat) -> Result<(), CaptureError> {
        Ok(())
    }

    fn start(&mut self, callback: RawBufferCallback, on_error: StreamErrorCallback) -> Result<(), CaptureError> {
        let format = self.format.clone()?;
        let frame: Vec<f32> = self.values.clone();
        let block: Vec<f32> = frame.iter().copied().cycle().take(frame.len() * self.block_frames).collect();
        let mut raw = Vec::new();
        convert::encode_into(&block, format.encoding, &mut raw);
        let frame_bytes = format.block_align();

        let total = self.total_frames;
        let stop_flag = Arc::clone(&self.stop_flag);
        let done = Arc::clone(&self.done);
        let fault = self.fault.clone();
        self.feeder = Some(thread::spawn(move || {
            let mut sent = 0;
            while sent < total && !stop_flag.load(Ordering::SeqCst) {
                let frames = (total - sent).min(raw.len() / frame_bytes);
                callback(&raw[..frames * frame_bytes]);
                sent += frames;
                thread::sleep(Duration::from_millis(1));
            }
            if let Some(fault) = fault {
                on_error(fault);
            }
            done.store(true, Ordering::SeqCst);
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(feeder) = self.feeder.take() {
            feeder.join().map_err(|_| CaptureError::Io("feeder panicked".into()))?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDelegate {
    states: Mutex<Vec<SessionState>>,
    levels: Mutex<Vec<(SourceKind, f32)>>,
    errors: Mutex<Vec<CaptureError>>,
    finished: Mutex<Option<RecordingResult>>,
}

impl PipelineDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: &SessionState) {
        self.states.lock().push(state.clone());
    }

    fn on_level(&self, source: SourceKind, magnitude: f32) {
        self.levels.lock().push((source, magnitude));
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.clone());
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        *self.finished.lock() = Some(result.clone());
    }
}

fn mono_i16() -> AudioFormat {
    AudioFormat::new(44100, SampleEncoding::Int16, 1)
}

fn config(dir: &std::path::Path) -> PipelineConfiguration {
    PipelineConfiguration {
        output_directory: dir.to_path_buf(),
        // Both feeders produce the same amount, so alignment never needs padding.
        max_skew: Duration::from_secs(1),
        queue_capacity: Duration::from_secs(2),
        ..Default::default()
    }
}

fn open(provider: SyntheticProvider, config: &PipelineConfiguration) -> CaptureSource {
    CaptureSource::open(Box::new(provider), &config.output_format(), config.queue_frames()).unwrap()
}

fn wait_for(flags: &[&Arc<AtomicBool>]) {
    let started = Instant::now();
    while !flags.iter().all(|f| f.load(Ordering::SeqCst)) {
        assert!(started.elapsed() < Duration::from_secs(10), "synthetic feeders did not finish");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Build a session over two constant mono sources and record `frames` frames.
fn record(
    config: PipelineConfiguration,
    v0: f32,
    v1: f32,
    frames: usize,
) -> (RecordingSession, RecordingResult) {
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![v0], frames);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![v1], frames);
    let (loopback_done, mic_done) = (loopback.done_flag(), mic.done_flag());

    let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
    session.start().unwrap();
    wait_for(&[&loopback_done, &mic_done]);
    let result = session.stop().unwrap();
    (session, result)
}

#[test]
fn one_second_of_two_mono_sources_becomes_exactly_44100_stereo_frames() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfiguration {
        mic_gain: 0.5,
        ..config(dir.path())
    };

    let (session, result) = record(config, 0.25, -0.5, 44100);

    assert_eq!(result.frames_written, 44100);
    assert!((result.duration_secs - 1.0).abs() < 1e-9);
    assert_eq!(session.state(), SessionState::Stopped);

    let mut reader = hound::WavReader::open(&result.file_path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 44100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.duration(), 44100);

    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    for frame in samples.chunks_exact(2) {
        assert_eq!(frame[0], 8192, "loopback channel is V0 * 1.0");
        assert_eq!(frame[1], -8192, "mic channel is V1 * 0.5");
    }

    let diagnostics = session.diagnostics();
    assert_eq!(diagnostics.loopback.samples_accepted, 44100);
    assert_eq!(diagnostics.microphone.samples_accepted, 44100);
    assert_eq!(diagnostics.loopback.samples_dropped, 0);
    assert_eq!(diagnostics.write_errors, 0);
    assert_eq!(diagnostics.frames_written, 44100);
}

#[test]
fn second_stop_reports_already_stopped_and_file_stays_valid() {
    let dir = tempfile::tempdir().unwrap();
    let (mut session, result) = record(config(dir.path()), 0.1, 0.2, 4410);

    assert_eq!(session.stop().unwrap_err(), CaptureError::AlreadyStopped);
    assert_eq!(session.start().unwrap_err(), CaptureError::AlreadyStopped);

    let reader = hound::WavReader::open(&result.file_path).unwrap();
    assert_eq!(reader.duration(), 4410);
}

#[test]
fn overlapping_sources_saturate_in_16_bit_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let loud = 20000.0 / 32768.0;
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![loud], 441);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![loud], 441);
    let (a, b) = (loopback.done_flag(), mic.done_flag());

    let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
    session.map(SourceKind::Loopback, 0, 0).unwrap();
    session.map(SourceKind::Microphone, 0, 0).unwrap();
    session.start().unwrap();
    wait_for(&[&a, &b]);
    let result = session.stop().unwrap();

    let mut reader = hound::WavReader::open(&result.file_path).unwrap();
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 441 * 2);
    for frame in samples.chunks_exact(2) {
        assert_eq!(frame, [32767, 0], "summed channel clamps, unbound channel is silent");
    }
}

#[test]
fn stereo_loopback_channel_can_be_selected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let stereo = AudioFormat::new(44100, SampleEncoding::Float32, 2);
    let loopback = SyntheticProvider::new(SourceKind::Loopback, stereo, vec![0.1, 0.75], 882);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![-0.5], 882);
    let (a, b) = (loopback.done_flag(), mic.done_flag());

    let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
    session.map(SourceKind::Loopback, 1, 0).unwrap();
    session.map(SourceKind::Microphone, 0, 1).unwrap();
    session.start().unwrap();
    wait_for(&[&a, &b]);
    let result = session.stop().unwrap();

    assert_eq!(result.frames_written, 882);
    let mut reader = hound::WavReader::open(&result.file_path).unwrap();
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert!(samples.chunks_exact(2).all(|f| f == [24576, -16384]));
    assert_eq!(result.metadata.tracks.len(), 2);
    assert_eq!(result.metadata.tracks[0].source_channel, 1);
}

#[test]
fn rate_mismatch_is_rejected_at_open() {
    let desired = mono_i16();
    let provider = SyntheticProvider::new(
        SourceKind::Loopback,
        AudioFormat::new(48000, SampleEncoding::Float32, 2),
        vec![0.0, 0.0],
        0,
    );
    let result = CaptureSource::open(Box::new(provider), &desired, 44100);
    assert!(matches!(result, Err(CaptureError::FormatUnsupported(_))));
}

#[test]
fn missing_device_is_unavailable() {
    let provider = SyntheticProvider::failing(
        SourceKind::Microphone,
        CaptureError::DeviceUnavailable("no capture endpoint".into()),
    );
    let result = CaptureSource::open(Box::new(provider), &mono_i16(), 44100);
    assert_eq!(
        result.err(),
        Some(CaptureError::DeviceUnavailable("no capture endpoint".into()))
    );
}

#[test]
fn start_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![0.0], 0);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![0.0], 0);

    let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
    session.start().unwrap();
    assert_eq!(session.start().unwrap_err(), CaptureError::AlreadyStarted);
    assert_eq!(
        session.map(SourceKind::Loopback, 0, 1).unwrap_err(),
        CaptureError::AlreadyStarted
    );

    let result = session.stop().unwrap();
    assert_eq!(result.frames_written, 0);
    assert!(hound::WavReader::open(&result.file_path).is_ok());
}

#[test]
fn delegate_sees_lifecycle_levels_and_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![0.5], 882);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![-0.25], 882);
    let (a, b) = (loopback.done_flag(), mic.done_flag());
    let delegate = Arc::new(RecordingDelegate::default());

    let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
    session.set_delegate(Arc::clone(&delegate) as Arc<dyn PipelineDelegate>);
    session.start().unwrap();
    wait_for(&[&a, &b]);
    let result = session.stop().unwrap();

    assert_eq!(
        *delegate.states.lock(),
        vec![SessionState::Recording, SessionState::Stopped]
    );
    let levels = delegate.levels.lock();
    assert!(levels.contains(&(SourceKind::Loopback, 0.5)));
    assert!(levels.contains(&(SourceKind::Microphone, 0.25)));
    assert!(delegate.errors.lock().is_empty());
    assert_eq!(delegate.finished.lock().as_ref(), Some(&result));
}

#[test]
fn lost_device_is_reported_and_recording_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let lost = CaptureError::DeviceUnavailable("microphone unplugged".into());
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![0.5], 4410);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![0.5], 441).dying_with(lost.clone());
    let (a, b) = (loopback.done_flag(), mic.done_flag());
    let delegate = Arc::new(RecordingDelegate::default());

    let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
    session.set_delegate(Arc::clone(&delegate) as Arc<dyn PipelineDelegate>);
    session.start().unwrap();
    wait_for(&[&a, &b]);

    assert_eq!(*delegate.errors.lock(), vec![lost]);
    assert_eq!(session.state(), SessionState::Recording);
    assert_eq!(
        session.diagnostics().microphone.fault.as_deref(),
        Some("device unavailable: microphone unplugged")
    );
    assert!(session.diagnostics().loopback.fault.is_none());

    let result = session.stop().unwrap();
    assert_eq!(result.frames_written, 4410);
    let mut reader = hound::WavReader::open(&result.file_path).unwrap();
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert!(samples.chunks_exact(2).take(441).all(|f| f == [16384, 16384]));
    assert!(samples.chunks_exact(2).skip(441).all(|f| f == [16384, 0]));
}

#[test]
fn generated_name_and_metadata_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfiguration {
        write_metadata: true,
        file_prefix: "take".into(),
        ..config(dir.path())
    };

    let (_session, result) = record(config, 0.1, 0.1, 441);

    let name = result.file_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("take_"), "{}", name);
    assert!(name.ends_with(".wav"), "{}", name);
    // take_YYYYmmdd_HHMMSS.wav
    assert_eq!(name.len(), "take_".len() + 15 + ".wav".len());
    assert_eq!(result.file_path.parent(), Some(dir.path()));

    let sidecar = metadata::read_metadata(&result.file_path).unwrap();
    assert_eq!(sidecar, result.metadata);
    assert_eq!(sidecar.frames_written, 441);
    assert_eq!(sidecar.checksum, result.checksum);
    assert!(sidecar.failure.is_none());
}

#[test]
fn explicit_output_path_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let target = dir.path().join("sessions").join("interview.wav");
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![0.1], 441);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![0.1], 441);
    let (a, b) = (loopback.done_flag(), mic.done_flag());

    let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
    session.set_output_path(&target).unwrap();
    session.start().unwrap();
    wait_for(&[&a, &b]);
    let result = session.stop().unwrap();

    assert_eq!(result.file_path, target);
    assert_eq!(session.file_path(), Some(target.as_path()));
    assert_eq!(hound::WavReader::open(&target).unwrap().duration(), 441);
}

#[test]
fn dropping_a_live_session_leaves_a_readable_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![0.3], 4410);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![0.3], 4410);
    let (a, b) = (loopback.done_flag(), mic.done_flag());

    let path = {
        let mut session = RecordingSession::new(open(loopback, &config), open(mic, &config), config).unwrap();
        session.start().unwrap();
        wait_for(&[&a, &b]);
        thread::sleep(Duration::from_millis(50));
        session.file_path().unwrap().to_path_buf()
    };

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert!(reader.duration() <= 4410);
}

#[test]
fn mismatched_session_rate_is_rejected() {
    let config = PipelineConfiguration::default();
    let other = PipelineConfiguration {
        sample_rate: 48000,
        ..Default::default()
    };
    let loopback = SyntheticProvider::new(SourceKind::Loopback, mono_i16(), vec![0.0], 0);
    let mic = SyntheticProvider::new(SourceKind::Microphone, mono_i16(), vec![0.0], 0);

    let result = RecordingSession::new(open(loopback, &config), open(mic, &config), other);
    assert!(matches!(result, Err(CaptureError::FormatUnsupported(_))));
}

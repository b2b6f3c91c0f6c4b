use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{Endpoint, SourceDiagnostics, SourceKind};
use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;
use crate::processing::level_meter;
use crate::processing::sample_queue::SampleQueue;
use crate::traits::capture_provider::{CaptureProvider, RawBufferCallback, StreamErrorCallback};

/// Receives the mean magnitude of every hardware buffer a source delivers.
pub type LevelListener = Arc<dyn Fn(SourceKind, f32) + Send + Sync + 'static>;

/// Receives the error that ended a running stream.
pub type FaultListener = Arc<dyn Fn(SourceKind, &CaptureError) + Send + Sync + 'static>;

/// One hardware endpoint feeding one [`SampleQueue`].
///
/// The source opens its provider in the device's native format and adapts
/// at ingestion: raw bytes are decoded into normalized samples on the
/// hardware thread, and the native channel count is kept so the multiplexer
/// can pick channels by index.
///
/// Lifecycle: `open → start ⇄ stop → close`.
pub struct CaptureSource {
    kind: SourceKind,
    endpoint: Endpoint,
    provider: Option<Box<dyn CaptureProvider>>,
    format: AudioFormat,
    queue: Arc<SampleQueue>,
    callbacks: Arc<AtomicU64>,
    listener: Option<LevelListener>,
    fault: Arc<Mutex<Option<CaptureError>>>,
    fault_listener: Option<FaultListener>,
    running: bool,
}

impl CaptureSource {
    /// Bind to `provider` for a pipeline running at `desired.sample_rate`.
    ///
    /// Fails with `DeviceUnavailable` if the device cannot report its native
    /// format and `FormatUnsupported` if that format runs at another rate.
    /// The device is never forced into a format it does not supply.
    pub fn open(
        mut provider: Box<dyn CaptureProvider>,
        desired: &AudioFormat,
        queue_capacity_frames: usize,
    ) -> Result<Self, CaptureError> {
        let endpoint = provider.endpoint();
        let native = provider.native_format().map_err(|e| match e {
            CaptureError::DeviceUnavailable(_) => e,
            other => CaptureError::DeviceUnavailable(format!("{}: {}", endpoint.name, other)),
        })?;
        native.validate()?;

        if native.sample_rate != desired.sample_rate {
            return Err(CaptureError::FormatUnsupported(format!(
                "{} runs at {} Hz, pipeline expects {} Hz",
                endpoint.name, native.sample_rate, desired.sample_rate
            )));
        }

        provider.open(&native)?;
        log::debug!(
            "opened {} source '{}' in native format {}",
            endpoint.kind,
            endpoint.name,
            native
        );

        Ok(Self {
            kind: endpoint.kind,
            endpoint,
            provider: Some(provider),
            format: native,
            queue: Arc::new(SampleQueue::new(queue_capacity_frames, native.channels, native.encoding)),
            callbacks: Arc::new(AtomicU64::new(0)),
            listener: None,
            fault: Arc::new(Mutex::new(None)),
            fault_listener: None,
            running: false,
        })
    }

    /// Install the level listener used by the next `start`.
    pub fn set_level_listener(&mut self, listener: LevelListener) {
        self.listener = Some(listener);
    }

    /// Install the listener told when the running stream dies.
    pub fn set_fault_listener(&mut self, listener: FaultListener) {
        self.fault_listener = Some(listener);
    }

    /// Begin delivering buffers into the queue. No-op if already running.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        let provider = self.provider.as_mut().ok_or(CaptureError::AlreadyStopped)?;
        if self.running {
            return Ok(());
        }

        let callback = ingest_callback(
            self.kind,
            &self.format,
            Arc::clone(&self.queue),
            Arc::clone(&self.callbacks),
            self.listener.clone(),
        );
        *self.fault.lock() = None;
        let on_error = fault_callback(self.kind, Arc::clone(&self.fault), self.fault_listener.clone());
        provider.start(callback, on_error)?;
        self.running = true;
        log::debug!("{} source started", self.kind);
        Ok(())
    }

    /// Stop delivery. Queued samples stay available for a final drain.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.running {
            return Err(CaptureError::AlreadyStopped);
        }
        let provider = self.provider.as_mut().ok_or(CaptureError::AlreadyStopped)?;
        self.running = false;
        provider.stop()?;
        log::debug!(
            "{} source stopped ({} samples dropped)",
            self.kind,
            self.queue.dropped_count()
        );
        Ok(())
    }

    /// Stop if needed, discard queued samples and release the device.
    pub fn close(&mut self) {
        if self.running {
            if let Err(e) = self.stop() {
                log::warn!("{} source failed to stop cleanly: {}", self.kind, e);
            }
        }
        if let Some(mut provider) = self.provider.take() {
            provider.close();
            log::debug!("{} source closed", self.kind);
        }
        self.queue.clear();
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Native format of the device, as delivered to the queue.
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_closed(&self) -> bool {
        self.provider.is_none()
    }

    /// The error that ended the stream since the last `start`, if any.
    pub fn fault(&self) -> Option<CaptureError> {
        self.fault.lock().clone()
    }

    pub fn diagnostics(&self) -> SourceDiagnostics {
        SourceDiagnostics {
            callback_count: self.callbacks.load(Ordering::Relaxed),
            samples_accepted: self.queue.accepted_count(),
            samples_dropped: self.queue.dropped_count(),
            format: self.format.to_string(),
            fault: self.fault.lock().as_ref().map(|e| e.to_string()),
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close();
        }
    }
}

/// Build the hardware-thread callback: decode into the queue, then report the level.
fn ingest_callback(
    kind: SourceKind,
    format: &AudioFormat,
    queue: Arc<SampleQueue>,
    callbacks: Arc<AtomicU64>,
    listener: Option<LevelListener>,
) -> RawBufferCallback {
    let encoding = format.encoding;
    Arc::new(move |raw: &[u8]| {
        callbacks.fetch_add(1, Ordering::Relaxed);
        queue.push(raw, raw.len());

        if let Some(listener) = &listener {
            let magnitude = level_meter::mean_magnitude(raw, encoding);
            if panic::catch_unwind(AssertUnwindSafe(|| listener(kind, magnitude))).is_err() {
                log::warn!("{} level listener panicked; capture continues", kind);
            }
        }
    })
}

/// Build the stream error callback: remember the fault, then tell the listener.
fn fault_callback(
    kind: SourceKind,
    fault: Arc<Mutex<Option<CaptureError>>>,
    listener: Option<FaultListener>,
) -> StreamErrorCallback {
    Arc::new(move |error: CaptureError| {
        log::error!("{} stream failed: {}", kind, error);
        if let Some(listener) = &listener {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(kind, &error))).is_err() {
                log::warn!("{} fault listener panicked", kind);
            }
        }
        *fault.lock() = Some(error);
    })
}

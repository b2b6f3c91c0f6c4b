//! Shared WASAPI shared-mode capture stream.
//!
//! Both providers use the same sequence; only the endpoint direction and the
//! `AUDCLNT_STREAMFLAGS_LOOPBACK` flag differ:
//! 1. CoInitializeEx (MTA)
//! 2. Resolve the endpoint (default or by ID)
//! 3. Activate IAudioClient, read the mix format
//! 4. Initialize in shared mode with exactly that format
//! 5. Get IAudioCaptureClient
//! 6. Register with MMCSS
//! 7. Start, poll for packets, hand raw bytes to the callback
//!
//! COM objects never leave the capture thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use windows::core::{GUID, PCWSTR};
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::AvSetMmThreadCharacteristicsW;

use loopmux_core::models::audio_models::{Endpoint, SourceKind};
use loopmux_core::models::error::CaptureError;
use loopmux_core::models::format::AudioFormat;
use loopmux_core::traits::capture_provider::{RawBufferCallback, StreamErrorCallback};

use crate::mix_format::{WaveDescriptor, WAVE_FORMAT_EXTENSIBLE};
use crate::permissions;

/// Shared-mode buffer duration: 100 ms in 100 ns units.
const BUFFER_DURATION: i64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-thread COM initialization, undone on drop when this scope did it.
pub(crate) struct ComScope {
    uninitialize: bool,
}

impl ComScope {
    pub(crate) fn enter() -> Result<Self, CaptureError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_ok() {
            Ok(Self { uninitialize: true })
        } else if hr == RPC_E_CHANGED_MODE {
            // Caller already runs an STA; MMDevice objects work there too.
            Ok(Self { uninitialize: false })
        } else {
            Err(CaptureError::DeviceUnavailable(format!("CoInitializeEx failed: {:?}", hr)))
        }
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        if self.uninitialize {
            unsafe { CoUninitialize() };
        }
    }
}

/// Owned `WAVEFORMATEX` returned by `GetMixFormat`.
struct MixFormat(*mut WAVEFORMATEX);

impl MixFormat {
    fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    /// Copy out the fields that decide decoding. The struct is packed, so
    /// everything is read unaligned.
    fn descriptor(&self) -> WaveDescriptor {
        unsafe {
            let base = self.0.read_unaligned();
            let sub_format_tag = if base.wFormatTag == WAVE_FORMAT_EXTENSIBLE && base.cbSize >= 22 {
                let ext = self.0 as *const WAVEFORMATEXTENSIBLE;
                let sub: GUID = std::ptr::addr_of!((*ext).SubFormat).read_unaligned();
                Some(sub.data1 as u16)
            } else {
                None
            };
            WaveDescriptor {
                sample_rate: base.nSamplesPerSec,
                channels: base.nChannels,
                format_tag: base.wFormatTag,
                bits_per_sample: base.wBitsPerSample,
                sub_format_tag,
            }
        }
    }
}

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
    }
}

pub(crate) fn data_flow(kind: SourceKind) -> EDataFlow {
    match kind {
        // Loopback reads what a render endpoint plays.
        SourceKind::Loopback => eRender,
        SourceKind::Microphone => eCapture,
    }
}

pub(crate) fn resolve_device(
    enumerator: &IMMDeviceEnumerator,
    kind: SourceKind,
    device_id: Option<&str>,
) -> Result<IMMDevice, CaptureError> {
    unsafe {
        match device_id {
            Some(id) => {
                let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                enumerator
                    .GetDevice(PCWSTR(wide.as_ptr()))
                    .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", id, e)))
            }
            None => enumerator
                .GetDefaultAudioEndpoint(data_flow(kind), eConsole)
                .map_err(|e| CaptureError::DeviceUnavailable(format!("no default {} endpoint: {}", kind, e))),
        }
    }
}

pub(crate) fn create_enumerator() -> Result<IMMDeviceEnumerator, CaptureError> {
    unsafe {
        CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to create enumerator: {}", e)))
    }
}

fn activate(kind: SourceKind, device_id: Option<&str>) -> Result<(IAudioClient, MixFormat), CaptureError> {
    let enumerator = create_enumerator()?;
    let device = resolve_device(&enumerator, kind, device_id)?;
    unsafe {
        let client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| permissions::activation_error(kind, &e))?;
        let mix = client
            .GetMixFormat()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("GetMixFormat failed: {}", e)))?;
        Ok((client, MixFormat(mix)))
    }
}

/// One capture endpoint, opened in its native shared-mode format.
pub(crate) struct WasapiStream {
    endpoint: Endpoint,
    device_id: Option<String>,
    format: Option<AudioFormat>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WasapiStream {
    pub(crate) fn new(endpoint: Endpoint, device_id: Option<String>) -> Self {
        Self {
            endpoint,
            device_id,
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Query the shared-mode mix format. The engine converts to and from it
    /// internally, so it is the only format that needs no device conversion.
    pub(crate) fn native_format(&self) -> Result<AudioFormat, CaptureError> {
        let _com = ComScope::enter()?;
        let (_client, mix) = activate(self.endpoint.kind, self.device_id.as_deref())?;
        mix.descriptor().to_audio_format()
    }

    pub(crate) fn open(&mut self, format: &AudioFormat) -> Result<(), CaptureError> {
        self.format = Some(*format);
        Ok(())
    }

    pub(crate) fn start(&mut self, callback: RawBufferCallback, on_error: StreamErrorCallback) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let format = self
            .format
            .ok_or_else(|| CaptureError::ConfigurationFailed(format!("{} stream not opened", self.endpoint.kind)))?;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let kind = self.endpoint.kind;
        let device_id = self.device_id.clone();
        let (ready_tx, ready_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name(format!("wasapi-{}-capture", kind))
            .spawn(move || {
                let mut ready = Some(ready_tx);
                let result = capture_loop(kind, device_id.as_deref(), &format, &running, callback, &mut ready);
                if let Err(e) = result {
                    // Setup errors go back to `start`; later ones to the source.
                    match ready.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(e));
                        }
                        None if running.load(Ordering::SeqCst) => on_error(e),
                        None => log::warn!("{} capture error during stop: {}", kind, e),
                    }
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::DeviceUnavailable(format!("failed to spawn {} thread: {}", kind, e))
            })?;

        // Setup errors surface here, synchronously.
        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.handle = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::DeviceUnavailable(format!("{} capture thread exited", kind)))
            }
        }
    }

    pub(crate) fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| CaptureError::DeviceUnavailable(format!("{} capture thread panicked", self.endpoint.kind)))?;
        }
        Ok(())
    }
}

impl Drop for WasapiStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Runs on the dedicated capture thread until `running` clears.
fn capture_loop(
    kind: SourceKind,
    device_id: Option<&str>,
    format: &AudioFormat,
    running: &AtomicBool,
    callback: RawBufferCallback,
    ready: &mut Option<Sender<Result<(), CaptureError>>>,
) -> Result<(), CaptureError> {
    let _com = ComScope::enter()?;
    let (client, mix) = activate(kind, device_id)?;

    // The device may have been reconfigured since the source was opened.
    let current = mix.descriptor().to_audio_format()?;
    if current != *format {
        return Err(CaptureError::FormatUnsupported(format!(
            "{} endpoint changed format from {} to {}",
            kind, format, current
        )));
    }

    let stream_flags = match kind {
        SourceKind::Loopback => AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
        SourceKind::Microphone => AUDCLNT_STREAMFLAGS_NOPERSIST,
    };

    unsafe {
        client
            .Initialize(AUDCLNT_SHAREMODE_SHARED, stream_flags, BUFFER_DURATION, 0, mix.as_ptr(), None)
            .map_err(|e| CaptureError::FormatUnsupported(format!("IAudioClient::Initialize failed: {}", e)))?;

        let capture: IAudioCaptureClient = client
            .GetService()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("GetService failed: {}", e)))?;

        // MMCSS registration for real-time priority
        let mut task_index: u32 = 0;
        let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
        let _mmcss = AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index);

        client
            .Start()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("IAudioClient::Start failed: {}", e)))?;
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }
        log::debug!("{} capture running at {}", kind, format);

        let block_align = format.block_align();
        let mut silence: Vec<u8> = Vec::new();
        let result = (|| -> Result<(), CaptureError> {
            while running.load(Ordering::SeqCst) {
                thread::sleep(POLL_INTERVAL);

                let mut packet_length = capture.GetNextPacketSize().map_err(transient)?;
                while packet_length > 0 {
                    let mut data: *mut u8 = std::ptr::null_mut();
                    let mut frames: u32 = 0;
                    let mut flags: u32 = 0;
                    capture
                        .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                        .map_err(transient)?;

                    let byte_count = frames as usize * block_align;
                    if byte_count > 0 && !data.is_null() {
                        if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                            silence.clear();
                            silence.resize(byte_count, 0);
                            callback(&silence);
                        } else {
                            callback(std::slice::from_raw_parts(data, byte_count));
                        }
                    }

                    capture.ReleaseBuffer(frames).map_err(transient)?;
                    packet_length = capture.GetNextPacketSize().map_err(transient)?;
                }
            }
            Ok(())
        })();

        let _ = client.Stop();
        result
    }
}

fn transient(e: windows::core::Error) -> CaptureError {
    CaptureError::DeviceUnavailable(format!("capture stream lost: {}", e))
}

//! Windows audio device enumeration via the MMDevice API.
//!
//! Lists render (loopback) and capture (microphone) endpoints with friendly
//! names, and turns `IMMNotificationClient` callbacks into `DeviceEvent`s.
//!
//! Notifications are registered from a dedicated thread that owns the
//! enumerator for as long as anyone may subscribe. Windows invokes the client
//! on its own threads; the client only publishes onto the event bus.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use windows::core::{implement, PCWSTR, PWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::PROPERTYKEY;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use loopmux_core::models::audio_models::{DeviceEvent, Endpoint, SourceKind};
use loopmux_core::models::error::CaptureError;
use loopmux_core::traits::device_directory::{DeviceDirectory, DeviceEventBus};

use crate::wasapi_stream::{create_enumerator, data_flow, ComScope};

/// Audio endpoint directory backed by the Windows MMDevice API.
pub struct DeviceEnumerator {
    bus: Arc<DeviceEventBus>,
    watcher: Mutex<Option<Watcher>>,
}

struct Watcher {
    shutdown: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(DeviceEventBus::new()),
            watcher: Mutex::new(None),
        }
    }

    /// Start listening for endpoint notifications if not already listening.
    fn ensure_watching(&self) -> Result<(), CaptureError> {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return Ok(());
        }

        let bus = Arc::clone(&self.bus);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("loopmux-device-events".into())
            .spawn(move || watch_endpoints(bus, shutdown_rx, ready_tx))
            .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to spawn device watcher: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *watcher = Some(Watcher {
                    shutdown: shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::DeviceUnavailable("device watcher exited".into()))
            }
        }
    }
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeviceEnumerator {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            let _ = watcher.shutdown.send(());
            if watcher.handle.join().is_err() {
                log::error!("device watcher panicked");
            }
        }
    }
}

impl DeviceDirectory for DeviceEnumerator {
    fn list_endpoints(&self, kind: SourceKind) -> Result<Vec<Endpoint>, CaptureError> {
        let _com = ComScope::enter()?;
        let enumerator = create_enumerator()?;
        let flow = data_flow(kind);

        unsafe {
            let collection = enumerator
                .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
                .map_err(|e| CaptureError::DeviceUnavailable(format!("EnumAudioEndpoints failed: {}", e)))?;
            let count = collection
                .GetCount()
                .map_err(|e| CaptureError::DeviceUnavailable(format!("GetCount failed: {}", e)))?;

            let default_id = enumerator
                .GetDefaultAudioEndpoint(flow, eConsole)
                .ok()
                .and_then(|d| device_id(&d));

            let mut endpoints = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };
                let name = friendly_name(&device).unwrap_or_else(|| format!("Device {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());
                endpoints.push(Endpoint {
                    id,
                    name,
                    kind,
                    is_default,
                });
            }
            Ok(endpoints)
        }
    }

    fn default_endpoint(&self, kind: SourceKind) -> Result<Endpoint, CaptureError> {
        let _com = ComScope::enter()?;
        let enumerator = create_enumerator()?;
        unsafe {
            let device = enumerator
                .GetDefaultAudioEndpoint(data_flow(kind), eConsole)
                .map_err(|e| CaptureError::DeviceUnavailable(format!("no default {} endpoint: {}", kind, e)))?;
            let id = device_id(&device)
                .ok_or_else(|| CaptureError::DeviceUnavailable(format!("default {} endpoint has no id", kind)))?;
            Ok(Endpoint {
                name: friendly_name(&device).unwrap_or_else(|| id.clone()),
                id,
                kind,
                is_default: true,
            })
        }
    }

    fn subscribe(&self) -> Receiver<DeviceEvent> {
        if let Err(e) = self.ensure_watching() {
            log::error!("device notifications unavailable: {}", e);
        }
        self.bus.subscribe()
    }
}

/// Watcher thread body: register, wait for shutdown, unregister.
fn watch_endpoints(bus: Arc<DeviceEventBus>, shutdown: Receiver<()>, ready: Sender<Result<(), CaptureError>>) {
    let registered = (|| -> Result<_, CaptureError> {
        let com = ComScope::enter()?;
        let enumerator = create_enumerator()?;
        let client: IMMNotificationClient = EndpointNotifier { bus }.into();
        unsafe { enumerator.RegisterEndpointNotificationCallback(&client) }
            .map_err(|e| CaptureError::DeviceUnavailable(format!("notification registration failed: {}", e)))?;
        Ok((com, enumerator, client))
    })();

    let (_com, enumerator, client) = match registered {
        Ok(parts) => {
            let _ = ready.send(Ok(()));
            parts
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    log::debug!("watching audio endpoint notifications");

    // Blocks until the enumerator is dropped.
    let _ = shutdown.recv();
    if let Err(e) = unsafe { enumerator.UnregisterEndpointNotificationCallback(&client) } {
        log::warn!("failed to unregister endpoint notifications: {}", e);
    }
}

#[implement(IMMNotificationClient)]
struct EndpointNotifier {
    bus: Arc<DeviceEventBus>,
}

impl IMMNotificationClient_Impl for EndpointNotifier_Impl {
    fn OnDeviceStateChanged(&self, device_id: &PCWSTR, new_state: DEVICE_STATE) -> windows::core::Result<()> {
        self.bus.publish(DeviceEvent::StateChanged {
            id: pcwstr_to_string(device_id),
            active: new_state == DEVICE_STATE_ACTIVE,
        });
        Ok(())
    }

    fn OnDeviceAdded(&self, device_id: &PCWSTR) -> windows::core::Result<()> {
        self.bus.publish(DeviceEvent::Added {
            id: pcwstr_to_string(device_id),
        });
        Ok(())
    }

    fn OnDeviceRemoved(&self, device_id: &PCWSTR) -> windows::core::Result<()> {
        self.bus.publish(DeviceEvent::Removed {
            id: pcwstr_to_string(device_id),
        });
        Ok(())
    }

    fn OnDefaultDeviceChanged(&self, flow: EDataFlow, role: ERole, default_id: &PCWSTR) -> windows::core::Result<()> {
        // Each change fires once per role; report the console role only.
        if role != eConsole {
            return Ok(());
        }
        let kind = if flow == eRender {
            SourceKind::Loopback
        } else if flow == eCapture {
            SourceKind::Microphone
        } else {
            return Ok(());
        };
        self.bus.publish(DeviceEvent::DefaultChanged {
            kind,
            id: pcwstr_to_string(default_id),
        });
        Ok(())
    }

    fn OnPropertyValueChanged(&self, _device_id: &PCWSTR, _key: &PROPERTYKEY) -> windows::core::Result<()> {
        Ok(())
    }
}

fn pcwstr_to_string(value: &PCWSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    unsafe { value.to_string() }.unwrap_or_default()
}

/// Endpoint ID string, freeing the COM allocation.
fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let raw: PWSTR = device.GetId().ok()?;
        let id = raw.to_string().ok();
        CoTaskMemFree(Some(raw.0 as *const _));
        id
    }
}

/// Read `PKEY_Device_FriendlyName` from the device property store.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        (!name.is_empty()).then_some(name)
    }
}

//! The context: backend probing, selection, and device enumeration.
//!
//! A context owns exactly one live backend, chosen by probing the
//! requested kinds in priority order. Devices are created through the
//! context and share its backend connection; a process may host any
//! number of contexts, each with its own.

use std::sync::Arc;

use rsn_core::thread::ThreadPriority;
use rsn_core::{Result, RsnError};

use crate::backend::{Backend, BackendInfo, DeviceId, DeviceInfo, DeviceType};
use crate::backends;

/// Selectable backend implementations, in the order they are probed
/// by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The cpal adapter (ALSA / CoreAudio / WASAPI behind one API).
    #[cfg(feature = "cpal")]
    Cpal,
    /// The timer-paced null backend. Always available; useful for
    /// tests and as a last resort.
    Null,
}

impl BackendKind {
    /// The default probe order.
    pub fn default_priority() -> &'static [BackendKind] {
        &[
            #[cfg(feature = "cpal")]
            BackendKind::Cpal,
            BackendKind::Null,
        ]
    }

    /// Parse a backend name as used by the CLI harness.
    pub fn from_name(name: &str) -> Option<BackendKind> {
        match name {
            #[cfg(feature = "cpal")]
            "cpal" => Some(BackendKind::Cpal),
            "null" => Some(BackendKind::Null),
            _ => None,
        }
    }
}

/// Context-wide settings.
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    /// Priority for device worker threads. A device config may
    /// override it per device.
    pub thread_priority: ThreadPriority,
}

pub(crate) struct ContextInner {
    backend: Box<dyn Backend>,
    config: ContextConfig,
}

/// Shared per-process state: the probed backend plus configuration.
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Probe `kinds` in order and keep the first backend that
    /// initializes. An empty slice means the default priority order.
    /// Fails with `NoBackend` when every candidate fails.
    pub fn new(kinds: &[BackendKind], config: ContextConfig) -> Result<Context> {
        let kinds = if kinds.is_empty() {
            BackendKind::default_priority()
        } else {
            kinds
        };

        for kind in kinds {
            match probe(*kind) {
                Ok(backend) => {
                    tracing::debug!(backend = backend.info().name, "context initialized");
                    return Ok(Context {
                        inner: Arc::new(ContextInner {
                            backend,
                            config: config.clone(),
                        }),
                    });
                }
                Err(e) => {
                    tracing::debug!(kind = ?kind, error = %e, "backend probe failed");
                }
            }
        }
        Err(RsnError::NoBackend)
    }

    /// A context on the default backend priority order.
    pub fn new_default() -> Result<Context> {
        Self::new(&[], ContextConfig::default())
    }

    /// The active backend.
    pub(crate) fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    /// Facts about the active backend.
    pub fn backend_info(&self) -> BackendInfo {
        self.inner.backend.info()
    }

    /// The worker-thread priority devices inherit unless their own
    /// config overrides it.
    pub fn thread_priority(&self) -> ThreadPriority {
        self.inner.config.thread_priority
    }

    /// Enumerate devices of the given role through a callback.
    pub fn enumerate_devices(
        &self,
        device_type: DeviceType,
        callback: &mut dyn FnMut(&DeviceInfo),
    ) -> Result<()> {
        self.inner.backend.enumerate_devices(device_type, callback)
    }

    /// Collect the device list for the given role.
    pub fn devices(&self, device_type: DeviceType) -> Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();
        self.enumerate_devices(device_type, &mut |info| devices.push(info.clone()))?;
        Ok(devices)
    }

    /// Look up one device by id.
    pub fn device_info(&self, device_type: DeviceType, id: &DeviceId) -> Result<DeviceInfo> {
        let mut found = None;
        self.enumerate_devices(device_type, &mut |info| {
            if info.id == *id && found.is_none() {
                found = Some(info.clone());
            }
        })?;
        found.ok_or(RsnError::InvalidArgs)
    }
}

fn probe(kind: BackendKind) -> Result<Box<dyn Backend>> {
    match kind {
        #[cfg(feature = "cpal")]
        BackendKind::Cpal => backends::cpal::CpalBackend::probe()
            .map(|backend| Box::new(backend) as Box<dyn Backend>),
        BackendKind::Null => Ok(Box::new(backends::null::NullBackend::new())),
    }
}

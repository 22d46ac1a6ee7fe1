// MIT License - Copyright (c) 2026 Peter Wright
// Capabilities the session needs from the home-automation side

use std::sync::Arc;

use crate::error::{PanelError, Result};
use crate::mapping::DeviceAction;

/// An external device that button mappings can switch.
///
/// Calls are fire-and-forget: implementations should hand the request off
/// (queue it, publish it) rather than wait for the device.
pub trait DeviceHandle: Send + Sync {
    fn name(&self) -> &str;

    fn set_on(&self, on: bool) -> Result<()>;

    fn toggle(&self) -> Result<()>;

    /// Brightness in percent. Devices without a brightness characteristic
    /// keep the default.
    fn set_brightness(&self, level: u8) -> Result<()> {
        let _ = level;
        Err(PanelError::Unsupported {
            details: format!("{} has no brightness", self.name()),
        })
    }
}

/// Lookup of external devices by display name, plus the readiness gate for
/// button events.
pub trait DeviceRegistry: Send + Sync {
    fn resolve_by_name(&self, name: &str) -> Option<Arc<dyn DeviceHandle>>;

    /// Whether the consumer of button events is ready. Events received
    /// earlier are queued.
    fn ready_for_events(&self) -> bool {
        true
    }

    fn activate_scene(&self, name: &str) -> Result<()> {
        Err(PanelError::Unsupported {
            details: format!("scene activation ({name})"),
        })
    }
}

/// Registry with no devices and no scenes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevices;

impl DeviceRegistry for NoDevices {
    fn resolve_by_name(&self, _name: &str) -> Option<Arc<dyn DeviceHandle>> {
        None
    }
}

/// Apply a mapped action to a device.
pub fn apply_device_action(device: &dyn DeviceHandle, action: DeviceAction) -> Result<()> {
    match action {
        DeviceAction::On => device.set_on(true),
        DeviceAction::Off => device.set_on(false),
        DeviceAction::Toggle => device.toggle(),
        DeviceAction::Brightness(level) => device.set_brightness(level.min(100)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every call for assertions.
    pub struct RecordingDevice {
        name: String,
        dimmable: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl RecordingDevice {
        pub fn new(name: &str, dimmable: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                dimmable,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DeviceHandle for RecordingDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn set_on(&self, on: bool) -> Result<()> {
            self.calls.lock().unwrap().push(if on { "on" } else { "off" }.to_string());
            Ok(())
        }

        fn toggle(&self) -> Result<()> {
            self.calls.lock().unwrap().push("toggle".to_string());
            Ok(())
        }

        fn set_brightness(&self, level: u8) -> Result<()> {
            if !self.dimmable {
                return Err(PanelError::Unsupported {
                    details: "brightness".to_string(),
                });
            }
            self.calls.lock().unwrap().push(format!("brightness:{level}"));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingRegistry {
        pub devices: HashMap<String, Arc<RecordingDevice>>,
        pub scenes: Mutex<Vec<String>>,
        pub not_ready: AtomicBool,
    }

    impl RecordingRegistry {
        pub fn with_device(mut self, device: Arc<RecordingDevice>) -> Self {
            self.devices.insert(device.name.clone(), device);
            self
        }

        pub fn set_ready(&self, ready: bool) {
            self.not_ready.store(!ready, Ordering::SeqCst);
        }
    }

    impl DeviceRegistry for RecordingRegistry {
        fn resolve_by_name(&self, name: &str) -> Option<Arc<dyn DeviceHandle>> {
            self.devices
                .get(name)
                .map(|d| Arc::clone(d) as Arc<dyn DeviceHandle>)
        }

        fn ready_for_events(&self) -> bool {
            !self.not_ready.load(Ordering::SeqCst)
        }

        fn activate_scene(&self, name: &str) -> Result<()> {
            self.scenes.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }
}

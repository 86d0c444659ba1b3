use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level bootstrap settings for the device process.
///
/// Loaded once at start from the system config file and the environment,
/// never written back.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub device: DeviceSettings,
    pub store: StoreSettings,
    pub router: RouterSettings,
    pub logging: LoggingSettings,
}

/// Network identity of the device.
///
/// `iface` has no default: a process without it cannot derive its uid.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeviceSettings {
    pub iface: Option<String>,
    pub topic: String,
    pub uid: Option<String>,
}

/// Locations of the persisted device state.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreSettings {
    pub device_file: PathBuf,
    pub timestamp_file: PathBuf,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RouterSettings {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub debug: bool,
    /// Minimum level reported to the remote authority as INFO packets.
    pub external: Option<String>,
}

impl StoreSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl RouterSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl LoggingSettings {
    /// `debug: true` overrides the configured level.
    pub fn effective_level(&self) -> &str {
        if self.debug { "debug" } else { &self.level }
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub device: Option<PartialDeviceSettings>,
    pub store: Option<PartialStoreSettings>,
    pub router: Option<PartialRouterSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDeviceSettings {
    pub iface: Option<String>,
    pub topic: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStoreSettings {
    pub device_file: Option<PathBuf>,
    pub timestamp_file: Option<PathBuf>,
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRouterSettings {
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
    pub debug: Option<bool>,
    pub external: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: DeviceSettings {
                iface: None,
                topic: "device".to_string(),
                uid: None,
            },
            store: StoreSettings {
                device_file: PathBuf::from("conf/device.yml"),
                timestamp_file: PathBuf::from("conf/ts"),
                lock_timeout_ms: 1000,
            },
            router: RouterSettings {
                poll_interval_ms: 100,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                debug: false,
                external: None,
            },
        }
    }
}

impl PartialSettings {
    /// Overlays whatever was provided onto the defaults.
    pub fn merge_over(self, default: Settings) -> Settings {
        let device = self.device;
        let store = self.store;
        let router = self.router;
        let logging = self.logging;

        Settings {
            device: DeviceSettings {
                iface: device
                    .as_ref()
                    .and_then(|d| d.iface.clone())
                    .or(default.device.iface),
                topic: device
                    .as_ref()
                    .and_then(|d| d.topic.clone())
                    .unwrap_or(default.device.topic),
                uid: device
                    .as_ref()
                    .and_then(|d| d.uid.clone())
                    .or(default.device.uid),
            },
            store: StoreSettings {
                device_file: store
                    .as_ref()
                    .and_then(|s| s.device_file.clone())
                    .unwrap_or(default.store.device_file),
                timestamp_file: store
                    .as_ref()
                    .and_then(|s| s.timestamp_file.clone())
                    .unwrap_or(default.store.timestamp_file),
                lock_timeout_ms: store
                    .as_ref()
                    .and_then(|s| s.lock_timeout_ms)
                    .unwrap_or(default.store.lock_timeout_ms),
            },
            router: RouterSettings {
                poll_interval_ms: router
                    .as_ref()
                    .and_then(|r| r.poll_interval_ms)
                    .unwrap_or(default.router.poll_interval_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.logging.level),
                debug: logging
                    .as_ref()
                    .and_then(|l| l.debug)
                    .unwrap_or(default.logging.debug),
                external: logging
                    .as_ref()
                    .and_then(|l| l.external.clone())
                    .or(default.logging.external),
            },
        }
    }
}

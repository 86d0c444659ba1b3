mod session;
mod settings;

use std::path::Path;

use config::{Config, Environment, File};

use crate::utils::error::ConfigError;
use settings::PartialSettings;

pub use session::{Session, SessionQueues, interface_uid};
pub use settings::{DeviceSettings, LoggingSettings, RouterSettings, Settings, StoreSettings};

/// Prefix of environment variables overriding the system config file,
/// e.g. `DEVSYNC__DEVICE__IFACE=eth0`.
pub const ENV_PREFIX: &str = "DEVSYNC";

/// Loads the system configuration from `path` (optional) and the environment,
/// merged over the default values.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_over(Settings::default()))
}

mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;
use settings::PartialSettings;

pub use settings::{BrokerSettings, LoggingSettings, ServerSettings, Settings};

/// Prefix for environment overrides, e.g. `AUDITBUS__SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "AUDITBUS";

/// Loads the configuration from `config/default` (any format the `config`
/// crate understands) and `AUDITBUS__*` environment variables, then merges
/// whatever was found over the default values.
pub fn load_config() -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_over(Settings::default()))
}

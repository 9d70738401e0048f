use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the server, the broker core and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the WebSocket listener binds to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the broker.
///
/// Controls connection limits, where the audit trail lives and how the admin
/// channel is buffered.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub database_path: String,
    /// Flush the store after every append, before anything is dispatched.
    pub flush_on_write: bool,
    /// Capacity of the admin broadcast channel.
    pub admin_buffer: usize,
    /// Deliveries buffered per session before new ones are dropped.
    pub session_buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub database_path: Option<String>,
    pub flush_on_write: Option<bool>,
    pub admin_buffer: Option<usize>,
    pub session_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            database_path: "auditbus_db".to_string(),
            flush_on_write: true,
            admin_buffer: 1024,
            session_buffer: 1024,
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(defaults.broker.max_connections),
                database_path: broker
                    .database_path
                    .unwrap_or(defaults.broker.database_path),
                flush_on_write: broker
                    .flush_on_write
                    .unwrap_or(defaults.broker.flush_on_write),
                admin_buffer: broker.admin_buffer.unwrap_or(defaults.broker.admin_buffer),
                session_buffer: broker
                    .session_buffer
                    .unwrap_or(defaults.broker.session_buffer),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}

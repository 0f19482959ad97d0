//! Engine configuration, built once at startup and passed into constructors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the connectivity probe timeout.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub sender: String,
}

impl SmtpConfig {
    /// Port 465 means implicit TLS; anything else upgrades with STARTTLS.
    pub fn implicit_tls(&self) -> bool {
        self.port == 465
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            sender: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Office binary run headless for spreadsheet -> PDF.
    pub soffice_bin: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            soffice_bin: "soffice".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub addr: String,
    pub timeout_ms: u64,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms).min(MAX_PROBE_TIMEOUT)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            addr: "8.8.8.8:53".to_string(),
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub drain_interval_secs: u64,
    /// Product name used in mail subjects and signatures.
    pub app_name: String,
    /// Base URL of the action endpoints, embedded in approve / send-back links.
    pub action_base_url: String,
}

impl DeliveryConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs.max(1))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 60,
            app_name: "LogBook System".to_string(),
            action_base_url: "http://localhost:5050".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Final signed PDFs land here.
    pub output_dir: PathBuf,
    /// Used when a report references no template.
    pub default_template: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("logbook.db"),
            output_dir: PathBuf::from("approved_reports"),
            default_template: PathBuf::from("templates/default_template.xlsx"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5050".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl EngineConfig {
    /// Read every setting from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit lookup, so callers and tests control the source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = EngineConfig::default();
        let num = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());

        let username = get("SMTP_USERNAME").unwrap_or_default();
        let smtp = SmtpConfig {
            server: get("SMTP_SERVER").unwrap_or(d.smtp.server),
            port: num("SMTP_PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(d.smtp.port),
            password: get("SMTP_PASSWORD").unwrap_or_default(),
            sender: get("SENDER_EMAIL").unwrap_or_else(|| username.clone()),
            username,
        };

        EngineConfig {
            smtp,
            conversion: ConversionConfig {
                soffice_bin: get("SOFFICE_BIN").unwrap_or(d.conversion.soffice_bin),
            },
            probe: ProbeConfig {
                addr: get("PROBE_ADDR").unwrap_or(d.probe.addr),
                timeout_ms: num("PROBE_TIMEOUT_MS").unwrap_or(d.probe.timeout_ms),
            },
            delivery: DeliveryConfig {
                drain_interval_secs: num("DRAIN_INTERVAL_SECS")
                    .unwrap_or(d.delivery.drain_interval_secs),
                app_name: get("LOGBOOK_APP_NAME").unwrap_or(d.delivery.app_name),
                action_base_url: get("API_BASE_URL").unwrap_or(d.delivery.action_base_url),
            },
            storage: StorageConfig {
                db_path: get("LOGBOOK_DB").map(PathBuf::from).unwrap_or(d.storage.db_path),
                output_dir: get("LOGBOOK_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(d.storage.output_dir),
                default_template: get("LOGBOOK_DEFAULT_TEMPLATE")
                    .map(PathBuf::from)
                    .unwrap_or(d.storage.default_template),
            },
            api: ApiConfig {
                listen: get("LOGBOOK_LISTEN").unwrap_or(d.api.listen),
            },
        }
    }
}

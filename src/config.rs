use std::{collections::HashSet, path::{Path, PathBuf}, str::FromStr, time::Duration};
use serde::Deserialize;
use strum::Display;
use thiserror::Error;

use crate::compartments::{CompartmentId, CompartmentReading, NotifyPolicy, Volume, DEFAULT_COMPARTMENTS, DEFAULT_THRESHOLD};
use crate::log_level::LogLevel;
use crate::push::PushMessage;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("open error: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("error deserializing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid MQTT broker address {0:?}, expected host or host:port")]
    InvalidBroker(String),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MqttBroker {
    pub hostname: String,
    pub port: u16
}

impl Default for MqttBroker {
    fn default() -> Self {
        Self { hostname: "localhost".to_owned(), port: 1883 }
    }
}

impl FromStr for MqttBroker {
    type Err = ConfigError;

    /// Accepts `host`, `host:port` and `mqtt://host:port`.
    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidBroker(address.to_owned());
        let stripped = address.trim().trim_start_matches("mqtt://").trim_end_matches('/');
        if stripped.is_empty() {
            return Err(invalid());
        }
        match stripped.rsplit_once(':') {
            Some((hostname, port)) if !hostname.is_empty() => Ok(Self {
                hostname: hostname.to_owned(),
                port: port.parse().map_err(|_| invalid())?,
            }),
            Some(_) => Err(invalid()),
            None => Ok(Self { hostname: stripped.to_owned(), ..Self::default() }),
        }
    }
}

/// Title and body templates. `{name}`, `{id}` and `{volume}` are substituted.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MessageTemplates {
    pub title: String,
    pub body: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            title: "Kompartemen {name} Penuh!".to_owned(),
            body: "Volume {name} telah mencapai {volume}%. Segera kosongkan.".to_owned(),
        }
    }
}

impl MessageTemplates {

    pub fn render(&self, reading: &CompartmentReading) -> PushMessage {
        let substitutions = [
            ("name", reading.compartment.display_name()),
            ("id", reading.compartment.to_string()),
            ("volume", reading.volume.to_string()),
        ];

        let fill = |template: &str| {
            let mut message = template.to_owned();
            for (cname, cstr) in &substitutions {
                message = message.replace(format!("{{{cname}}}").as_str(), cstr);
            }
            message
        };

        PushMessage { title: fill(&self.title), body: fill(&self.body) }
    }

}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Display)]
#[serde(tag = "provider", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PushCredentials {
    /// FCM HTTP v1. Without `service_account_file` the application default
    /// credentials of the environment are used.
    Fcm {
        #[serde(default)]
        service_account_file: Option<PathBuf>,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
    Expo {
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl PushCredentials {

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let credentials: Self = load_json(path.as_ref())?;
        match &credentials {
            Self::Fcm { project_id: Some(project_id), .. } if project_id.trim().is_empty() =>
                Err(ConfigError::Invalid(vec![format!("{}: FCM project_id is empty", path.as_ref().display())])),
            _ => Ok(credentials),
        }
    }

}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let file = std::fs::File::open(path).map_err(|source| ConfigError::Open { path: path.to_owned(), source })?;
    let reader = std::io::BufReader::new(file);
    serde_json::from_reader(reader).map_err(|source| ConfigError::Parse { path: path.to_owned(), source })
}

const DEFAULT_TIMED_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub log_level: LogLevel,

    pub threshold: Volume,
    pub compartments: Vec<CompartmentId>,
    pub policy: NotifyPolicy,
    pub messages: MessageTemplates,

    pub mqtt_broker: MqttBroker,
    pub mqtt_client_id: String,
    pub feed_topic: String,

    pub http_port: u16,
    pub enable_trigger_endpoint: bool,

    pub sweep_interval_secs: Option<u64>,
    pub dispatch_timeout_secs: u64,

    pub tokens_file: Option<PathBuf>,
    pub push_credentials: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            threshold: DEFAULT_THRESHOLD,
            compartments: DEFAULT_COMPARTMENTS.iter().map(|id| CompartmentId::from(*id)).collect(),
            policy: NotifyPolicy::default(),
            messages: MessageTemplates::default(),
            mqtt_broker: MqttBroker::default(),
            mqtt_client_id: "pantaubin-notifier".to_owned(),
            feed_topic: "compartments".to_owned(),
            http_port: 3000,
            enable_trigger_endpoint: false,
            sweep_interval_secs: None,
            dispatch_timeout_secs: 10,
            tokens_file: None,
            push_credentials: None,
        }
    }
}

impl Config {

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn feed_subscribe_patterns(&self) -> Vec<String> {
        vec![self.feed_topic.clone(), format!("{}/+", self.feed_topic)]
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Period of the full sweep. Time based policies get one even when none is
    /// configured, otherwise a compartment that stays full in an unchanging
    /// snapshot would never be notified again.
    pub fn sweep_interval(&self) -> Option<Duration> {
        if let Some(secs) = self.sweep_interval_secs {
            return Some(Duration::from_secs(secs));
        }
        let window = self.policy.window()?.to_std().ok()?;
        Some(window.min(DEFAULT_TIMED_SWEEP_INTERVAL))
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.threshold <= 0 {
            problems.push(format!("threshold must be positive, got {}", self.threshold));
        }

        if self.compartments.is_empty() {
            problems.push("at least one compartment must be watched".to_owned());
        }
        let mut seen = HashSet::new();
        for compartment in &self.compartments {
            if compartment.trim().is_empty() || compartment.contains('/') {
                problems.push(format!("invalid compartment identifier {:?}", compartment.as_str()));
            }
            if !seen.insert(compartment) {
                problems.push(format!("compartment {} is listed twice", compartment));
            }
        }

        if self.messages.title.trim().is_empty() || self.messages.body.trim().is_empty() {
            problems.push("message templates must not be empty".to_owned());
        }

        if self.feed_topic.is_empty() || self.feed_topic.contains('+') || self.feed_topic.contains('#') {
            problems.push(format!("invalid feed topic {:?}", self.feed_topic));
        }

        if self.mqtt_client_id.is_empty() {
            problems.push("mqtt_client_id must not be empty".to_owned());
        }

        if self.dispatch_timeout_secs == 0 {
            problems.push("dispatch_timeout_secs must be positive".to_owned());
        }

        if self.sweep_interval_secs == Some(0) {
            problems.push("sweep_interval_secs must be positive".to_owned());
        }

        match self.policy {
            NotifyPolicy::EdgeTriggeredWithRenotify { interval_secs: 0 } =>
                problems.push("renotify interval must be positive".to_owned()),
            NotifyPolicy::Cooldown { window_ms: 0 } =>
                problems.push("cooldown window must be positive".to_owned()),
            policy if policy.is_time_based() && policy.window().is_none() =>
                problems.push(format!("{} window is out of range", policy)),
            _ => {},
        }

        if problems.is_empty() { Ok(()) } else { Err(ConfigError::Invalid(problems)) }
    }

}

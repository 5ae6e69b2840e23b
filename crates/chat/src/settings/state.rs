use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use mimir_remote::{Credentials, RemoteConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::{
    DEFAULT_MAX_POLL_INTERVAL, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, PollPolicy,
    ReplyDetection,
};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/chat";
pub const SETTINGS_DIRECTORY_NAME: &str = "mimir";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Environment overrides use this prefix; `__` separates nested keys.
pub const ENV_PREFIX: &str = "MIMIR_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_failure_backoff")]
    pub failure_backoff: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// `None` or `0` waits for a reply indefinitely.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub detection: ReplyDetection,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            failure_backoff: default_failure_backoff(),
            max_interval_ms: default_max_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
            request_timeout_ms: None,
            detection: ReplyDetection::default(),
        }
    }
}

impl PollSettings {
    fn normalized(mut self) -> Self {
        if self.interval_ms == 0 {
            self.interval_ms = default_interval_ms();
        }
        if !self.failure_backoff.is_finite() || self.failure_backoff < 1.0 {
            self.failure_backoff = default_failure_backoff();
        }
        self.max_interval_ms = self.max_interval_ms.max(self.interval_ms);
        self.max_wait_secs = self.max_wait_secs.filter(|secs| *secs > 0);
        self.request_timeout_ms = self.request_timeout_ms.filter(|ms| *ms > 0);
        self
    }

    pub fn to_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::default()
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_failure_backoff(
                self.failure_backoff,
                Duration::from_millis(self.max_interval_ms),
            )
            .with_max_wait(self.max_wait_secs.map(Duration::from_secs))
            .with_detection(self.detection);
        if let Some(timeout_ms) = self.request_timeout_ms {
            policy = policy.with_request_timeout(Duration::from_millis(timeout_ms));
        }
        policy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub username: String,
    /// Read from the file or `MIMIR_PASSWORD`; never written back to disk.
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub poll: PollSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            instance_id: String::new(),
            username: String::new(),
            password: None,
            poll: PollSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Returns `None` until an instance id is configured.
    pub fn to_remote_config(&self) -> Option<RemoteConfig> {
        if !self.is_valid() {
            return None;
        }

        let mut config = RemoteConfig::new(&self.endpoint, &self.instance_id);
        if !self.username.is_empty()
            && let Some(password) = &self.password
        {
            config = config.with_credentials(Credentials::new(
                self.username.clone(),
                password.expose_secret().to_string(),
            ));
        }
        if let Some(timeout_ms) = self.poll.request_timeout_ms {
            config = config.with_request_timeout(Duration::from_millis(timeout_ms));
        }

        Some(config)
    }

    pub fn is_valid(&self) -> bool {
        !self.instance_id.trim().is_empty() && !self.endpoint.trim().is_empty()
    }

    pub fn normalized(mut self) -> Self {
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.instance_id = self.instance_id.trim().to_string();
        self.username = self.username.trim().to_string();
        self.password = self
            .password
            .filter(|password| !password.expose_secret().is_empty());
        self.poll = self.poll.normalized();
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".mimir"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn load_from_disk(path: &Path) -> ClientSettings {
        if !path.exists() {
            tracing::info!(
                "settings file not found at {:?}, using defaults and environment",
                path
            );
        }

        match Self::figment(path).extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_failure_backoff() -> f64 {
    1.0
}

fn default_max_interval_ms() -> u64 {
    DEFAULT_MAX_POLL_INTERVAL.as_millis() as u64
}

fn default_max_wait_secs() -> Option<u64> {
    Some(DEFAULT_MAX_WAIT.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{
                "endpoint": " http://chat.internal:8080/chat ",
                "instance_id": "dev274800",
                "username": "admin",
                "password": "from-file",
                "poll": {"interval_ms": 1500, "detection": "message-identity"}
            }"#,
        )
        .expect("write settings");

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.endpoint, "http://chat.internal:8080/chat");
        assert_eq!(settings.instance_id, "dev274800");
        assert_eq!(settings.poll.interval_ms, 1500);
        assert_eq!(settings.poll.detection, ReplyDetection::MessageIdentity);
        assert_eq!(
            settings.poll.max_wait_secs,
            Some(DEFAULT_MAX_WAIT.as_secs())
        );

        let config = settings.to_remote_config().expect("valid config");
        let credentials = config.credentials.expect("credentials");
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password.expose_secret(), "from-file");
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write settings");

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert!(settings.to_remote_config().is_none());
    }

    #[test]
    fn persisted_settings_never_contain_password() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        let settings = ClientSettings {
            instance_id: "dev274800".to_string(),
            username: "admin".to_string(),
            password: Some(SecretString::from("not-on-disk-7".to_string())),
            ..ClientSettings::default()
        };
        store.update(settings).expect("persist settings");

        let written = std::fs::read_to_string(&path).expect("read settings");
        assert!(!written.contains("not-on-disk-7"));
        assert!(!written.contains("password"));
        assert!(store.settings().password.is_some());
    }

    #[test]
    fn degenerate_poll_values_are_normalized() {
        let poll = PollSettings {
            interval_ms: 0,
            failure_backoff: f64::NAN,
            max_interval_ms: 10,
            max_wait_secs: Some(0),
            request_timeout_ms: Some(0),
            detection: ReplyDetection::ContentEquality,
        }
        .normalized();

        assert_eq!(poll.interval_ms, 3_000);
        assert_eq!(poll.failure_backoff, 1.0);
        assert_eq!(poll.max_interval_ms, 3_000);
        assert_eq!(poll.max_wait_secs, None);
        assert_eq!(poll.request_timeout_ms, None);

        let policy = poll.to_policy();
        assert_eq!(policy.interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(policy.max_wait, None);
    }
}

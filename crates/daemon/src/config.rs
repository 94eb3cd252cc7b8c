// Broker configuration.
//
// A TOML file (default `gitbroker.toml`) holds everything; deployment
// secrets and paths can be overridden through `GITBROKER_*` variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::git::credentials::{CredentialError, GitCredentials};
use crate::git::retry::RetryPolicy;
use crate::git::scheduler::SchedulerConfig;
use crate::git::working_copy::{RemoteSettings, WorkingCopySettings};

pub const DEFAULT_CONFIG_FILE: &str = "gitbroker.toml";

pub const ENV_LOCAL_PATH: &str = "GITBROKER_GIT_LOCAL_PATH";
pub const ENV_REMOTE_URL: &str = "GITBROKER_GIT_REMOTE_URL";
pub const ENV_BRANCH: &str = "GITBROKER_GIT_BRANCH";
pub const ENV_USERNAME: &str = "GITBROKER_GIT_USERNAME";
pub const ENV_PASSWORD: &str = "GITBROKER_GIT_PASSWORD";
pub const ENV_SSH_KEY: &str = "GITBROKER_GIT_SSH_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid git credentials: {0}")]
    Credentials(#[from] CredentialError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub git: GitConfig,
    pub retry: RetryConfig,
    pub sync: SyncConfig,
}

/// Working copy and remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Directory of the local working copy; created on first start.
    pub local_path: PathBuf,
    /// Remote repository. Unset disables synchronization entirely.
    pub remote_url: Option<String>,
    pub remote_name: String,
    pub branch: String,
    pub author_name: String,
    pub author_email: String,
    pub credentials: CredentialsConfig,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            local_path: PathBuf::from("broker-repo"),
            remote_url: None,
            remote_name: "origin".into(),
            branch: "main".into(),
            author_name: "Git Service Broker".into(),
            author_email: "gitbroker@localhost".into(),
            credentials: CredentialsConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialsConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM text of an unencrypted private key.
    pub ssh_key: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("ssh_key", &self.ssh_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Fetch/merge and push against the remote.
    pub remote_write: RetrySettings,
    /// Local git lock-file contention.
    pub lock: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            remote_write: RetrySettings::default(),
            lock: RetrySettings { attempts: 5, backoff_ms: 100 },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { attempts: 3, backoff_ms: 1_000 }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub initial_delay_ms: u64,
    pub period_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { initial_delay_ms: 10_000, period_ms: 30_000 }
    }
}

impl BrokerConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply `GITBROKER_*` overrides read through `lookup`. Empty values
    /// clear optional settings.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).map(|value| Some(value).filter(|v| !v.is_empty()));

        if let Some(path) = lookup(ENV_LOCAL_PATH).filter(|value| !value.is_empty()) {
            self.git.local_path = PathBuf::from(path);
        }
        if let Some(branch) = lookup(ENV_BRANCH).filter(|value| !value.is_empty()) {
            self.git.branch = branch;
        }
        if let Some(url) = optional(ENV_REMOTE_URL) {
            self.git.remote_url = url;
        }
        if let Some(username) = optional(ENV_USERNAME) {
            self.git.credentials.username = username;
        }
        if let Some(password) = optional(ENV_PASSWORD) {
            self.git.credentials.password = password;
        }
        if let Some(key) = optional(ENV_SSH_KEY) {
            self.git.credentials.ssh_key = key;
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env_overrides(|key| std::env::var(key).ok());
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.branch.trim().is_empty() {
            return Err(ConfigError::Invalid("git.branch must not be empty".into()));
        }
        if self.git.remote_name.trim().is_empty() {
            return Err(ConfigError::Invalid("git.remote_name must not be empty".into()));
        }
        if self.retry.remote_write.attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.remote_write.attempts must be at least 1".into(),
            ));
        }
        if self.retry.lock.attempts == 0 {
            return Err(ConfigError::Invalid("retry.lock.attempts must be at least 1".into()));
        }
        if self.sync.period_ms == 0 {
            return Err(ConfigError::Invalid("sync.period_ms must be positive".into()));
        }
        self.credentials()?;
        Ok(())
    }

    pub fn credentials(&self) -> Result<GitCredentials, ConfigError> {
        let credentials = &self.git.credentials;
        Ok(GitCredentials::from_parts(
            credentials.username.as_deref(),
            credentials.password.as_deref(),
            credentials.ssh_key.as_deref(),
        )?)
    }

    pub fn working_copy_settings(&self) -> Result<WorkingCopySettings, ConfigError> {
        let remote = match &self.git.remote_url {
            Some(url) => Some(RemoteSettings {
                name: self.git.remote_name.clone(),
                url: url.clone(),
                credentials: self.credentials()?,
            }),
            None => None,
        };
        Ok(WorkingCopySettings {
            path: self.git.local_path.clone(),
            branch: self.git.branch.clone(),
            author_name: self.git.author_name.clone(),
            author_email: self.git.author_email.clone(),
            remote,
            lock_retry: self.retry.lock.policy(),
        })
    }

    pub fn remote_write_policy(&self) -> RetryPolicy {
        self.retry.remote_write.policy()
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            initial_delay: Duration::from_millis(self.sync.initial_delay_ms),
            period: Duration::from_millis(self.sync.period_ms),
        }
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::BrokerConfig;
use crate::git::scheduler::{start_sync_scheduler, SyncSchedulerHandle};
use crate::git::working_copy::{redact_url, WorkingCopy};
use crate::store::{BindingRepository, GitRepository, InstanceRepository};

/// The opened storage core: one shared repository and the record views
/// built on it.
pub struct Broker {
    pub repository: Arc<GitRepository>,
    pub instances: InstanceRepository,
    pub bindings: BindingRepository,
}

impl Broker {
    /// Validate `config`, then open (or clone into) the working copy. Git
    /// runs synchronously, so opening happens on the blocking pool.
    pub async fn open(config: &BrokerConfig) -> Result<Self> {
        config.validate().context("invalid broker configuration")?;
        let settings = config.working_copy_settings()?;
        let remote_write = config.remote_write_policy();

        let copy = tokio::task::spawn_blocking(move || WorkingCopy::open(settings))
            .await
            .context("working copy setup task panicked")?
            .context("failed to prepare git working copy")?;

        let repository = Arc::new(GitRepository::new(copy, remote_write));
        Ok(Self {
            instances: InstanceRepository::new(repository.clone()),
            bindings: BindingRepository::new(repository.clone()),
            repository,
        })
    }

    /// Start periodic synchronization. `None` when no remote is configured.
    pub fn start_sync(&self, config: &BrokerConfig) -> Option<SyncSchedulerHandle> {
        if !self.repository.has_remote() {
            info!("no git remote configured; synchronization disabled");
            return None;
        }
        Some(start_sync_scheduler(config.scheduler(), self.repository.clone()))
    }
}

/// Run until ctrl-c, then let an in-flight sync cycle finish.
pub async fn run(config: BrokerConfig) -> Result<()> {
    let broker = Broker::open(&config).await?;
    info!(
        path = %config.git.local_path.display(),
        branch = %config.git.branch,
        remote = %config.git.remote_url.as_deref().map(redact_url).unwrap_or_default(),
        "git service broker storage ready"
    );

    let scheduler = broker.start_sync(&config);
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}

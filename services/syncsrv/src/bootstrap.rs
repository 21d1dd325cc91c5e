//! Wiring of configured clients into a running engine

use crate::clients::{MagentoClient, OdooClient};
use crate::config::SyncsrvConfig;
use crate::engine::SyncEngine;
use crate::guard::ConcurrencyGuard;
use crate::jobs::JobManager;
use crate::notifier;
use crate::retry::RetryPolicy;
use errors::BridgeResult;
use std::sync::Arc;
use tracing::info;

/// Build the engine with the Odoo and Magento clients from configuration
pub fn build_engine(config: &SyncsrvConfig) -> BridgeResult<Arc<SyncEngine>> {
    let source = Arc::new(OdooClient::new(&config.odoo)?);
    let target = Arc::new(MagentoClient::new(&config.magento)?);
    let notifier = notifier::from_config(&config.notifier)?;

    let engine = SyncEngine::new(source, target)
        .with_guard(ConcurrencyGuard::new(config.sync.lease_timeout()))
        .with_retry_policy(RetryPolicy::from_config(&config.sync.retry))
        .with_notifier(notifier)
        .with_parallelism(config.sync.parallelism);

    info!(
        "Engine ready: odoo={} magento={} parallelism={} lease_timeout={:?}",
        config.odoo.url,
        config.magento.url,
        config.sync.parallelism,
        config.sync.lease_timeout()
    );
    Ok(Arc::new(engine))
}

/// Job manager sized by `sync.max_concurrent_jobs`
pub fn build_job_manager(engine: Arc<SyncEngine>, config: &SyncsrvConfig) -> Arc<JobManager> {
    Arc::new(JobManager::new(engine, config.sync.max_concurrent_jobs))
}

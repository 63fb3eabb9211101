//! Test doubles shared by the daemon's unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use updater_core::{
    DnsProvider, Error, IpResolver, IpVersion, LogNotifier, MemoryPersistence, RecordConfig,
    RecordId, RecordStore, Result, Runner, RunnerConfig, UpdateResult,
};

pub struct NoResolver;

#[async_trait]
impl IpResolver for NoResolver {
    async fn resolve(&self, version: IpVersion) -> Result<IpAddr> {
        Err(Error::ip_resolution(format!("no {} in tests", version)))
    }
}

pub struct NoopProvider;

#[async_trait]
impl DnsProvider for NoopProvider {
    async fn update_record(&self, _record: &RecordId, _ip: IpAddr) -> Result<UpdateResult> {
        Ok(UpdateResult::Unchanged)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}

pub fn www() -> RecordConfig {
    RecordConfig::new("example.com", "www", "noop").with_ip_version(IpVersion::V4)
}

/// A store holding `www()` and an idle runner over it
pub async fn runner_with(persistence: MemoryPersistence) -> (Arc<RecordStore>, Runner) {
    let store = Arc::new(
        RecordStore::load(&[www()], Arc::new(persistence))
            .await
            .unwrap(),
    );

    let mut providers: HashMap<RecordId, Arc<dyn DnsProvider>> = HashMap::new();
    providers.insert(www().id(), Arc::new(NoopProvider));

    let (runner, _events) = Runner::new(
        store.clone(),
        Arc::new(NoResolver),
        providers,
        Arc::new(LogNotifier),
        Duration::from_secs(3600),
        RunnerConfig::default(),
    )
    .unwrap();

    (store, runner)
}

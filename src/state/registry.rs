use crate::clock::Clock;
use crate::config::Config;
use crate::db::repo::RegistryStore;
use crate::services::RenameService;
use std::sync::Arc;

/// Everything a request handler needs, built once at startup and shared.
pub struct Registry<S: RegistryStore> {
    pub config: Arc<Config>,
    pub rename: Arc<RenameService<S>>,
}

impl<S: RegistryStore> Registry<S> {
    pub fn new(config: Arc<Config>, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        let rename = Arc::new(RenameService::new(store, config.cooldown(), clock));

        Self { config, rename }
    }
}

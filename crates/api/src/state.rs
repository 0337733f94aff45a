use roomcast_config::Settings;
use roomcast_core::Scheduler;
use std::sync::Arc;

use crate::ws::storage::WsStorage;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub ws_storage: Arc<WsStorage>,
}

impl AppState {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let scheduler = Arc::new(Scheduler::new(settings).await?);
        let ws_storage = Arc::new(WsStorage::new());

        Ok(Self {
            scheduler,
            ws_storage,
        })
    }
}

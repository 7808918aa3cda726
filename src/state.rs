use crate::events::EventBus;
use crate::progress::ProgressEngine;
use crate::storage::FileStore;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<ProgressEngine<FileStore>>>,
    pub events: EventBus,
}

impl AppState {
    pub fn new(store: FileStore) -> Self {
        let events = EventBus::new();
        Self {
            engine: Arc::new(Mutex::new(ProgressEngine::new(store, events.clone()))),
            events,
        }
    }
}

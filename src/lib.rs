pub mod app;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod progress;
pub mod reports;
pub mod state;
pub mod stats;
pub mod storage;
pub mod streak;

pub use app::router;
pub use config::Config;
pub use events::{EventBus, ProgressEvent};
pub use progress::ProgressEngine;
pub use state::AppState;
pub use storage::{FileStore, KeyValueStore, MemoryStore};

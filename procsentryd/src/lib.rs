pub mod alerts;
pub mod anomaly;
pub mod api;
pub mod collectors;
pub mod config;
pub mod control;
pub mod error;
pub mod forecast;
pub mod history;
pub mod limits;
pub mod metrics;
pub mod monitor;
pub mod snapshot;
pub mod store;
pub mod types;

pub use config::{Config, ConfigError};
pub use control::{ActionOutcome, ProcessAction, ProcessControl, SignalController};
pub use error::StoreError;
pub use metrics::Metrics;
pub use monitor::{Monitor, TickReport};
pub use snapshot::{ProcessSource, Snapshotter};
pub use types::{
    AnomalyRecord, HistoryRecord, LeakWarning, ProcessRecord, ProcessTable, SystemSnapshot,
};

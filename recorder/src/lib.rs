//! Tallyman recorder library
//!
//! A runtime resource-monitoring engine for instrumented programs. Hooks
//! report method entry and exit, memory, I/O and timer events to a
//! [`RecorderStrategy`]; the engine attributes them to monitoring groups,
//! aggregates per group and per configuration, and writes reports through a
//! [`ResultFormatter`].

pub mod arena;
pub mod config;
pub mod element;
pub mod element_map;
pub mod error;
pub mod event;
pub mod formatter;
pub mod group;
pub mod listener;
pub mod pool;
pub mod process_data;
pub mod storage;
pub mod strategy;
pub mod thread_data;
pub mod timer;
pub mod wire;

use std::sync::Arc;

use tracing::info;

// Re-export commonly used types
pub use config::{RecorderConfig, RecordingConfig, StrategyKind};
pub use element::{ElementId, GroupSnapshot, MonitoringGroup, RecorderElement};
pub use element_map::{RecorderElementMap, EXCLUDED_ID, PROGRAM_ID, RECORDER_ID};
pub use error::{ConfigError, RecorderError, RecorderResult, WireError, WireResult};
pub use event::{EventKind, RecordingEvent};
pub use formatter::{ResultFormatter, TabFormatter};
pub use group::{DebugState, GroupAccountingType, MonitoringGroupSettings, ResourceType, StreamType};
pub use listener::{MonitoredValue, RecordingListener, ValueType};
pub use process_data::{Measurements, ProcessData, ProcessSampler};
pub use storage::StrategyStorage;
pub use strategy::{
    DefaultRecorderStrategy, EventRecorderStrategy, RecorderStrategy, TcpEventSink, ThreadsInfo, REGISTER_END,
    REGISTER_FORCE,
};
pub use thread_data::ThreadData;
pub use timer::{TimerInfo, TimerState};
pub use wire::{EventCodec, WireFrame};

/// Creates the strategy selected by `config.recording.strategy`
pub fn build_strategy(config: &RecorderConfig) -> RecorderResult<Arc<dyn RecorderStrategy>> {
    let strategy: Arc<dyn RecorderStrategy> = match config.recording.strategy {
        StrategyKind::Default => Arc::new(DefaultRecorderStrategy::new(config)),
        StrategyKind::Buffered => {
            let delegate = Arc::new(DefaultRecorderStrategy::new(config));
            Arc::new(EventRecorderStrategy::delegating(delegate)?)
        }
        StrategyKind::Tcp => Arc::new(EventRecorderStrategy::tcp(&config.tcp, &config.recording)?),
    };
    info!(strategy = ?config.recording.strategy, "Recorder strategy created");
    Ok(strategy)
}

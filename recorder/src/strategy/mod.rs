//! Recording strategies
//!
//! Instrumentation hooks talk to a [`RecorderStrategy`]. The [`DefaultRecorderStrategy`]
//! aggregates synchronously on the calling thread, the
//! [`EventRecorderStrategy`] queues every call as a [`RecordingEvent`] and
//! replays it on a consumer thread, either into another strategy or into the
//! [`TcpEventSink`] forwarding events to a recording server.
//!
//! [`RecordingEvent`]: crate::event::RecordingEvent

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RecorderResult;
use crate::group::{MonitoringGroupSettings, StreamType};
use crate::process_data::ProcessData;
use crate::timer::TimerState;

pub use crate::listener::{MonitoredValue, ValueType};

pub mod buffered;
pub mod default;
pub mod tcp;

pub use buffered::{DelegatingHandler, EventHandler, EventRecorderStrategy, FailurePolicy};
pub use default::DefaultRecorderStrategy;
pub use tcp::TcpEventSink;

/// `register` new id forcing the registration of the calling thread
pub const REGISTER_FORCE: i64 = -1;

/// `register` new id marking the end of the calling thread
pub const REGISTER_END: i64 = -2;

/// Identity and cpu ticks of the thread issuing an instrumentation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadsInfo {
    pub thread_id: i64,
    pub ticks: i64,
}

impl ThreadsInfo {
    pub fn new(thread_id: i64, ticks: i64) -> Self {
        Self { thread_id, ticks }
    }
}

/// Processing discipline behind the instrumentation hooks.
///
/// Instrumentation calls never fail; lookup misses and unknown ids are logged and
/// ignored. Only [`end_system`](RecorderStrategy::end_system) reports
/// errors, since it is the point where queued work is drained.
pub trait RecorderStrategy: Send + Sync {
    /// Registers `class_name` as a member of the groups in `settings`. More
    /// than one id declares the multi-group `rec_id`.
    fn register_for_recording(&self, class_name: &str, rec_id: Option<&str>, settings: &MonitoringGroupSettings);

    /// A monitored region was entered
    fn enter(&self, rec_id: Option<&str>, now: i64, threads: ThreadsInfo, exclude: bool);

    /// A monitored region was left
    fn exit(&self, rec_id: Option<&str>, now: i64, threads: ThreadsInfo, exclude: bool);

    /// Enters or exits the active variant registered for `rec_id`
    fn assign_all_to(&self, rec_id: &str, enter: bool, now: i64, threads: ThreadsInfo);

    /// Activates the comma separated variant ids
    fn enter_configuration(&self, ids: &str);

    /// Thread lifecycle: `new_id` is a spawned thread inheriting the stack of
    /// `thread_id`, [`REGISTER_FORCE`] or [`REGISTER_END`]
    fn register(&self, thread_id: i64, new_id: i64, thread_ticks: i64, now: i64);

    /// `size` bytes were allocated; `id >= 0` tags the allocation for
    /// [`memory_freed_by_id`](RecorderStrategy::memory_freed_by_id)
    fn memory_allocated(&self, rec_id: Option<&str>, thread_id: i64, id: i64, size: i64);

    fn memory_freed_by_rec_id(&self, rec_id: &str, size: i64);

    /// Frees a tagged allocation from the elements it was charged to
    fn memory_freed_by_id(&self, id: i64, size: i64);

    fn read_io(&self, rec_id: Option<&str>, caller: Option<&str>, thread_id: i64, bytes: i32, stream: StreamType);

    fn write_io(&self, rec_id: Option<&str>, caller: Option<&str>, thread_id: i64, bytes: i32, stream: StreamType);

    /// Recording of the whole program starts
    fn start_recording(&self, now: i64, thread_id: i64, thread_ticks: i64);

    fn stop_time_recording(&self, now: i64, threads: ThreadsInfo);

    /// Ends the still running threads listed with their current cpu ticks
    fn finish_recording(&self, now: i64, thread_id: i64, cpu_times: &HashMap<i64, i64>);

    fn print_statistics(&self, data: &ProcessData);

    fn print_current_state(&self, data: &ProcessData);

    fn notify_timer(&self, id: &str, state: TimerState, now: i64, thread_id: i64);

    fn notify_value_change(&self, id: &str, value: &MonitoredValue);

    /// Announces the program record to the creation listeners
    fn notify_program_record_creation(&self);

    fn clear_temporary_data(&self);

    /// Drains outstanding work and releases resources
    fn end_system(&self) -> RecorderResult<()>;
}

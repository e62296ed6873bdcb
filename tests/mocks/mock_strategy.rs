use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tallyman_recorder::{
    MonitoredValue, MonitoringGroupSettings, ProcessData, RecorderResult, RecorderStrategy, StreamType,
    ThreadsInfo, TimerState,
};

/// Ordered log of the calls a [`RecordingDelegate`] received
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Strategy that only writes one line per call into a [`CallLog`]
#[derive(Default)]
pub struct RecordingDelegate {
    calls: CallLog,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn push(&self, call: String) {
        self.calls.lock().push(call);
    }
}

fn name(rec_id: Option<&str>) -> &str {
    rec_id.unwrap_or("-")
}

impl RecorderStrategy for RecordingDelegate {
    fn register_for_recording(&self, class_name: &str, rec_id: Option<&str>, _settings: &MonitoringGroupSettings) {
        self.push(format!("register_group:{class_name}:{}", name(rec_id)));
    }

    fn enter(&self, rec_id: Option<&str>, _now: i64, threads: ThreadsInfo, _exclude: bool) {
        self.push(format!("enter:{}:{}", name(rec_id), threads.ticks));
    }

    fn exit(&self, rec_id: Option<&str>, _now: i64, threads: ThreadsInfo, _exclude: bool) {
        self.push(format!("exit:{}:{}", name(rec_id), threads.ticks));
    }

    fn assign_all_to(&self, rec_id: &str, enter: bool, _now: i64, _threads: ThreadsInfo) {
        self.push(format!("assign_all_to:{rec_id}:{enter}"));
    }

    fn enter_configuration(&self, ids: &str) {
        self.push(format!("enter_configuration:{ids}"));
    }

    fn register(&self, thread_id: i64, new_id: i64, _thread_ticks: i64, _now: i64) {
        self.push(format!("register:{thread_id}:{new_id}"));
    }

    fn memory_allocated(&self, rec_id: Option<&str>, _thread_id: i64, id: i64, size: i64) {
        self.push(format!("memory_allocated:{}:{id}:{size}", name(rec_id)));
    }

    fn memory_freed_by_rec_id(&self, rec_id: &str, size: i64) {
        self.push(format!("memory_freed_by_rec_id:{rec_id}:{size}"));
    }

    fn memory_freed_by_id(&self, id: i64, size: i64) {
        self.push(format!("memory_freed_by_id:{id}:{size}"));
    }

    fn read_io(&self, rec_id: Option<&str>, _caller: Option<&str>, _thread_id: i64, bytes: i32, stream: StreamType) {
        self.push(format!("read_io:{}:{bytes}:{stream:?}", name(rec_id)));
    }

    fn write_io(&self, rec_id: Option<&str>, _caller: Option<&str>, _thread_id: i64, bytes: i32, stream: StreamType) {
        self.push(format!("write_io:{}:{bytes}:{stream:?}", name(rec_id)));
    }

    fn start_recording(&self, _now: i64, thread_id: i64, _thread_ticks: i64) {
        self.push(format!("start_recording:{thread_id}"));
    }

    fn stop_time_recording(&self, _now: i64, threads: ThreadsInfo) {
        self.push(format!("stop_time_recording:{}", threads.thread_id));
    }

    fn finish_recording(&self, _now: i64, thread_id: i64, cpu_times: &HashMap<i64, i64>) {
        self.push(format!("finish_recording:{thread_id}:{}", cpu_times.len()));
    }

    fn print_statistics(&self, _data: &ProcessData) {
        self.push("print_statistics".to_string());
    }

    fn print_current_state(&self, _data: &ProcessData) {
        self.push("print_current_state".to_string());
    }

    fn notify_timer(&self, id: &str, state: TimerState, _now: i64, _thread_id: i64) {
        self.push(format!("notify_timer:{id}:{state:?}"));
    }

    fn notify_value_change(&self, id: &str, value: &MonitoredValue) {
        self.push(format!("notify_value:{id}:{value}"));
    }

    fn notify_program_record_creation(&self) {
        self.push("program_record_creation".to_string());
    }

    fn clear_temporary_data(&self) {
        self.push("clear_temporary_data".to_string());
    }

    fn end_system(&self) -> RecorderResult<()> {
        self.push("end_system".to_string());
        Ok(())
    }
}

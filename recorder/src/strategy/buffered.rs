//! Event-buffered strategy
//!
//! Instrumentation calls are turned into [`RecordingEvent`]s and queued on an
//! unbounded channel. A single consumer thread replays them in order into
//! an [`EventHandler`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{RecorderStrategy, ThreadsInfo};
use crate::error::{RecorderError, RecorderResult};
use crate::event::RecordingEvent;
use crate::group::{MonitoringGroupSettings, StreamType};
use crate::listener::MonitoredValue;
use crate::process_data::ProcessData;
use crate::timer::TimerState;

const CONSUMER_THREAD_NAME: &str = "tallyman-consumer";

/// Consumer side of a buffered strategy
pub trait EventHandler: Send {
    fn handle(&mut self, event: &RecordingEvent) -> RecorderResult<()>;
}

impl<F> EventHandler for F
where
    F: FnMut(&RecordingEvent) -> RecorderResult<()> + Send,
{
    fn handle(&mut self, event: &RecordingEvent) -> RecorderResult<()> {
        self(event)
    }
}

/// Replays events into another strategy
pub struct DelegatingHandler {
    delegate: Arc<dyn RecorderStrategy>,
}

impl DelegatingHandler {
    pub fn new(delegate: Arc<dyn RecorderStrategy>) -> Self {
        Self { delegate }
    }

    pub fn delegate(&self) -> &Arc<dyn RecorderStrategy> {
        &self.delegate
    }
}

impl EventHandler for DelegatingHandler {
    fn handle(&mut self, event: &RecordingEvent) -> RecorderResult<()> {
        event.apply(self.delegate.as_ref())
    }
}

/// What the consumer does when a handler fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Terminate the process
    #[default]
    Exit,
    /// Stop consuming and report the error from `end_system`
    Stop,
}

/// Strategy queueing every call for a consumer thread
pub struct EventRecorderStrategy {
    sender: Sender<RecordingEvent>,
    consumer: Mutex<Option<JoinHandle<RecorderResult<u64>>>>,
    recording: AtomicBool,
}

impl EventRecorderStrategy {
    /// Starts the consumer with the fail-fast policy
    pub fn new(handler: Box<dyn EventHandler>) -> RecorderResult<Self> {
        Self::with_policy(handler, FailurePolicy::Exit)
    }

    pub fn with_policy(handler: Box<dyn EventHandler>, policy: FailurePolicy) -> RecorderResult<Self> {
        let (sender, receiver) = unbounded();
        let consumer = thread::Builder::new()
            .name(CONSUMER_THREAD_NAME.to_string())
            .spawn(move || consume(receiver, handler, policy))?;
        info!("Started event consumer thread");
        Ok(Self {
            sender,
            consumer: Mutex::new(Some(consumer)),
            recording: AtomicBool::new(true),
        })
    }

    /// Buffered strategy replaying into `delegate`
    pub fn delegating(delegate: Arc<dyn RecorderStrategy>) -> RecorderResult<Self> {
        Self::new(Box::new(DelegatingHandler::new(delegate)))
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Events waiting for the consumer
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    fn submit(&self, event: RecordingEvent) {
        if !self.is_recording() {
            debug!(kind = %event.kind(), "Dropping event after end of recording");
            return;
        }
        if let Err(err) = self.sender.send(event) {
            debug!(kind = %err.0.kind(), "Event consumer is gone, dropping event");
        }
    }
}

fn consume(receiver: Receiver<RecordingEvent>, mut handler: Box<dyn EventHandler>, policy: FailurePolicy) -> RecorderResult<u64> {
    let mut handled = 0u64;
    for event in receiver.iter() {
        if let Err(err) = handler.handle(&event) {
            error!(kind = %event.kind(), error = %err, "Failed to handle recording event");
            match policy {
                FailurePolicy::Exit => std::process::exit(1),
                FailurePolicy::Stop => {
                    return Err(RecorderError::Handle {
                        kind: event.kind().name(),
                        reason: err.to_string(),
                    })
                }
            }
        }
        handled += 1;
        if event.is_end_system() {
            break;
        }
    }
    info!(handled, "Event consumer stopped");
    Ok(handled)
}

impl RecorderStrategy for EventRecorderStrategy {
    fn register_for_recording(&self, class_name: &str, rec_id: Option<&str>, settings: &MonitoringGroupSettings) {
        self.submit(RecordingEvent::RegisterGroup {
            class_name: class_name.to_string(),
            rec_id: rec_id.map(str::to_string),
            settings: settings.clone(),
        });
    }

    fn enter(&self, rec_id: Option<&str>, now: i64, threads: ThreadsInfo, exclude: bool) {
        self.submit(RecordingEvent::Enter {
            rec_id: rec_id.map(str::to_string),
            now,
            threads,
            exclude,
        });
    }

    fn exit(&self, rec_id: Option<&str>, now: i64, threads: ThreadsInfo, exclude: bool) {
        self.submit(RecordingEvent::Exit {
            rec_id: rec_id.map(str::to_string),
            now,
            threads,
            exclude,
        });
    }

    fn assign_all_to(&self, rec_id: &str, enter: bool, now: i64, threads: ThreadsInfo) {
        self.submit(RecordingEvent::AssignAllTo {
            rec_id: rec_id.to_string(),
            enter,
            now,
            threads,
        });
    }

    fn enter_configuration(&self, ids: &str) {
        self.submit(RecordingEvent::EnterConfiguration { ids: ids.to_string() });
    }

    fn register(&self, thread_id: i64, new_id: i64, thread_ticks: i64, now: i64) {
        self.submit(RecordingEvent::Register {
            thread_id,
            new_id,
            thread_ticks,
            now,
        });
    }

    fn memory_allocated(&self, rec_id: Option<&str>, thread_id: i64, id: i64, size: i64) {
        self.submit(RecordingEvent::MemoryAllocated {
            rec_id: rec_id.map(str::to_string),
            thread_id,
            id,
            size,
        });
    }

    fn memory_freed_by_rec_id(&self, rec_id: &str, size: i64) {
        self.submit(RecordingEvent::MemoryFreedByRecId {
            rec_id: rec_id.to_string(),
            size,
        });
    }

    fn memory_freed_by_id(&self, id: i64, size: i64) {
        self.submit(RecordingEvent::MemoryFreedById { id, size });
    }

    fn read_io(&self, rec_id: Option<&str>, caller: Option<&str>, thread_id: i64, bytes: i32, stream: StreamType) {
        self.submit(RecordingEvent::Io {
            rec_id: rec_id.map(str::to_string),
            caller: caller.map(str::to_string),
            thread_id,
            bytes,
            stream,
            write: false,
        });
    }

    fn write_io(&self, rec_id: Option<&str>, caller: Option<&str>, thread_id: i64, bytes: i32, stream: StreamType) {
        self.submit(RecordingEvent::Io {
            rec_id: rec_id.map(str::to_string),
            caller: caller.map(str::to_string),
            thread_id,
            bytes,
            stream,
            write: true,
        });
    }

    fn start_recording(&self, now: i64, thread_id: i64, thread_ticks: i64) {
        self.submit(RecordingEvent::StartRecording {
            now,
            thread_id,
            thread_ticks,
        });
    }

    fn stop_time_recording(&self, now: i64, threads: ThreadsInfo) {
        self.submit(RecordingEvent::StopTimeRecording { now, threads });
    }

    fn finish_recording(&self, now: i64, thread_id: i64, cpu_times: &HashMap<i64, i64>) {
        self.submit(RecordingEvent::FinishRecording {
            now,
            thread_id,
            cpu_times: cpu_times.clone(),
        });
    }

    fn print_statistics(&self, data: &ProcessData) {
        self.submit(RecordingEvent::PrintStatistics { data: data.clone() });
    }

    fn print_current_state(&self, data: &ProcessData) {
        self.submit(RecordingEvent::PrintCurrentState { data: data.clone() });
    }

    fn notify_timer(&self, id: &str, state: TimerState, now: i64, thread_id: i64) {
        self.submit(RecordingEvent::NotifyTimer {
            id: id.to_string(),
            state,
            now,
            thread_id,
        });
    }

    fn notify_value_change(&self, id: &str, value: &MonitoredValue) {
        self.submit(RecordingEvent::NotifyValue {
            id: id.to_string(),
            value: value.clone(),
        });
    }

    fn notify_program_record_creation(&self) {
        self.submit(RecordingEvent::ProgramRecordCreation);
    }

    fn clear_temporary_data(&self) {
        self.submit(RecordingEvent::ClearTemporaryData);
    }

    fn end_system(&self) -> RecorderResult<()> {
        self.submit(RecordingEvent::EndSystem);
        self.recording.store(false, Ordering::Release);
        let Some(consumer) = self.consumer.lock().take() else {
            return Ok(());
        };
        let handled = consumer.join().map_err(|_| RecorderError::ConsumerStopped)??;
        debug!(handled, "Joined event consumer");
        Ok(())
    }
}

impl Drop for EventRecorderStrategy {
    fn drop(&mut self) {
        if self.consumer.get_mut().is_some() {
            if let Err(err) = self.end_system() {
                error!(error = %err, "Event consumer failed during shutdown");
            }
        }
    }
}

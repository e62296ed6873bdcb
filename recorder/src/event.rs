//! Recording events
//!
//! Buffered strategies turn every instrumentation call into a [`RecordingEvent`]. The
//! consumer replays events into a strategy; the TCP sink serializes them
//! with the kind ids of [`EventKind`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RecorderResult, WireError};
use crate::group::{MonitoringGroupSettings, StreamType};
use crate::listener::MonitoredValue;
use crate::process_data::ProcessData;
use crate::strategy::{RecorderStrategy, ThreadsInfo};
use crate::timer::TimerState;

/// Wire ids of the event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EnterConfiguration,
    Enter,
    Exit,
    FinishRecording,
    MemoryAllocated,
    MemoryFreedByRecId,
    MemoryFreedById,
    PrintStatistics,
    Io,
    StartRecording,
    StopTimeRecording,
    EndSystem,
    Register,
    AssignAllTo,
    PrintCurrentState,
    NotifyTimer,
    NotifyValue,
    ProgramRecordCreation,
    ClearTemporaryData,
    RegisterGroup,
}

impl EventKind {
    pub const VALUES: [EventKind; 20] = [
        EventKind::EnterConfiguration,
        EventKind::Enter,
        EventKind::Exit,
        EventKind::FinishRecording,
        EventKind::MemoryAllocated,
        EventKind::MemoryFreedByRecId,
        EventKind::MemoryFreedById,
        EventKind::PrintStatistics,
        EventKind::Io,
        EventKind::StartRecording,
        EventKind::StopTimeRecording,
        EventKind::EndSystem,
        EventKind::Register,
        EventKind::AssignAllTo,
        EventKind::PrintCurrentState,
        EventKind::NotifyTimer,
        EventKind::NotifyValue,
        EventKind::ProgramRecordCreation,
        EventKind::ClearTemporaryData,
        EventKind::RegisterGroup,
    ];

    pub fn id(self) -> i32 {
        match self {
            EventKind::EnterConfiguration => 0,
            EventKind::Enter => 1,
            EventKind::Exit => 2,
            EventKind::FinishRecording => 3,
            EventKind::MemoryAllocated => 4,
            EventKind::MemoryFreedByRecId => 5,
            EventKind::MemoryFreedById => 6,
            EventKind::PrintStatistics => 8,
            EventKind::Io => 9,
            EventKind::StartRecording => 10,
            EventKind::StopTimeRecording => 11,
            EventKind::EndSystem => 13,
            EventKind::Register => 14,
            EventKind::AssignAllTo => 15,
            EventKind::PrintCurrentState => 16,
            EventKind::NotifyTimer => 17,
            EventKind::NotifyValue => 18,
            EventKind::ProgramRecordCreation => 19,
            EventKind::ClearTemporaryData => 20,
            EventKind::RegisterGroup => 21,
        }
    }

    pub fn from_id(id: i32) -> Result<Self, WireError> {
        Self::VALUES
            .iter()
            .copied()
            .find(|kind| kind.id() == id)
            .ok_or(WireError::UnknownEventKind { id })
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::EnterConfiguration => "enter_configuration",
            EventKind::Enter => "enter",
            EventKind::Exit => "exit",
            EventKind::FinishRecording => "finish_recording",
            EventKind::MemoryAllocated => "memory_allocated",
            EventKind::MemoryFreedByRecId => "memory_freed_by_rec_id",
            EventKind::MemoryFreedById => "memory_freed_by_id",
            EventKind::PrintStatistics => "print_statistics",
            EventKind::Io => "io",
            EventKind::StartRecording => "start_recording",
            EventKind::StopTimeRecording => "stop_time_recording",
            EventKind::EndSystem => "end_system",
            EventKind::Register => "register",
            EventKind::AssignAllTo => "assign_all_to",
            EventKind::PrintCurrentState => "print_current_state",
            EventKind::NotifyTimer => "notify_timer",
            EventKind::NotifyValue => "notify_value",
            EventKind::ProgramRecordCreation => "program_record_creation",
            EventKind::ClearTemporaryData => "clear_temporary_data",
            EventKind::RegisterGroup => "register_group",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One instrumentation call, owned so it can cross threads and the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RecordingEvent {
    EnterConfiguration {
        ids: String,
    },
    Enter {
        rec_id: Option<String>,
        now: i64,
        threads: ThreadsInfo,
        exclude: bool,
    },
    Exit {
        rec_id: Option<String>,
        now: i64,
        threads: ThreadsInfo,
        exclude: bool,
    },
    FinishRecording {
        now: i64,
        thread_id: i64,
        cpu_times: HashMap<i64, i64>,
    },
    MemoryAllocated {
        rec_id: Option<String>,
        thread_id: i64,
        id: i64,
        size: i64,
    },
    MemoryFreedByRecId {
        rec_id: String,
        size: i64,
    },
    MemoryFreedById {
        id: i64,
        size: i64,
    },
    PrintStatistics {
        data: ProcessData,
    },
    Io {
        rec_id: Option<String>,
        caller: Option<String>,
        thread_id: i64,
        bytes: i32,
        stream: StreamType,
        write: bool,
    },
    StartRecording {
        now: i64,
        thread_id: i64,
        thread_ticks: i64,
    },
    StopTimeRecording {
        now: i64,
        threads: ThreadsInfo,
    },
    EndSystem,
    Register {
        thread_id: i64,
        new_id: i64,
        thread_ticks: i64,
        now: i64,
    },
    AssignAllTo {
        rec_id: String,
        enter: bool,
        now: i64,
        threads: ThreadsInfo,
    },
    PrintCurrentState {
        data: ProcessData,
    },
    NotifyTimer {
        id: String,
        state: TimerState,
        now: i64,
        thread_id: i64,
    },
    NotifyValue {
        id: String,
        value: MonitoredValue,
    },
    ProgramRecordCreation,
    ClearTemporaryData,
    RegisterGroup {
        class_name: String,
        rec_id: Option<String>,
        settings: MonitoringGroupSettings,
    },
}

impl RecordingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RecordingEvent::EnterConfiguration { .. } => EventKind::EnterConfiguration,
            RecordingEvent::Enter { .. } => EventKind::Enter,
            RecordingEvent::Exit { .. } => EventKind::Exit,
            RecordingEvent::FinishRecording { .. } => EventKind::FinishRecording,
            RecordingEvent::MemoryAllocated { .. } => EventKind::MemoryAllocated,
            RecordingEvent::MemoryFreedByRecId { .. } => EventKind::MemoryFreedByRecId,
            RecordingEvent::MemoryFreedById { .. } => EventKind::MemoryFreedById,
            RecordingEvent::PrintStatistics { .. } => EventKind::PrintStatistics,
            RecordingEvent::Io { .. } => EventKind::Io,
            RecordingEvent::StartRecording { .. } => EventKind::StartRecording,
            RecordingEvent::StopTimeRecording { .. } => EventKind::StopTimeRecording,
            RecordingEvent::EndSystem => EventKind::EndSystem,
            RecordingEvent::Register { .. } => EventKind::Register,
            RecordingEvent::AssignAllTo { .. } => EventKind::AssignAllTo,
            RecordingEvent::PrintCurrentState { .. } => EventKind::PrintCurrentState,
            RecordingEvent::NotifyTimer { .. } => EventKind::NotifyTimer,
            RecordingEvent::NotifyValue { .. } => EventKind::NotifyValue,
            RecordingEvent::ProgramRecordCreation => EventKind::ProgramRecordCreation,
            RecordingEvent::ClearTemporaryData => EventKind::ClearTemporaryData,
            RecordingEvent::RegisterGroup { .. } => EventKind::RegisterGroup,
        }
    }

    pub fn is_end_system(&self) -> bool {
        matches!(self, RecordingEvent::EndSystem)
    }

    /// Replays the event into `strategy`
    pub fn apply(&self, strategy: &dyn RecorderStrategy) -> RecorderResult<()> {
        match self {
            RecordingEvent::EnterConfiguration { ids } => strategy.enter_configuration(ids),
            RecordingEvent::Enter {
                rec_id,
                now,
                threads,
                exclude,
            } => strategy.enter(rec_id.as_deref(), *now, *threads, *exclude),
            RecordingEvent::Exit {
                rec_id,
                now,
                threads,
                exclude,
            } => strategy.exit(rec_id.as_deref(), *now, *threads, *exclude),
            RecordingEvent::FinishRecording {
                now,
                thread_id,
                cpu_times,
            } => strategy.finish_recording(*now, *thread_id, cpu_times),
            RecordingEvent::MemoryAllocated {
                rec_id,
                thread_id,
                id,
                size,
            } => strategy.memory_allocated(rec_id.as_deref(), *thread_id, *id, *size),
            RecordingEvent::MemoryFreedByRecId { rec_id, size } => strategy.memory_freed_by_rec_id(rec_id, *size),
            RecordingEvent::MemoryFreedById { id, size } => strategy.memory_freed_by_id(*id, *size),
            RecordingEvent::PrintStatistics { data } => strategy.print_statistics(data),
            RecordingEvent::Io {
                rec_id,
                caller,
                thread_id,
                bytes,
                stream,
                write,
            } => {
                if *write {
                    strategy.write_io(rec_id.as_deref(), caller.as_deref(), *thread_id, *bytes, *stream);
                } else {
                    strategy.read_io(rec_id.as_deref(), caller.as_deref(), *thread_id, *bytes, *stream);
                }
            }
            RecordingEvent::StartRecording {
                now,
                thread_id,
                thread_ticks,
            } => strategy.start_recording(*now, *thread_id, *thread_ticks),
            RecordingEvent::StopTimeRecording { now, threads } => strategy.stop_time_recording(*now, *threads),
            RecordingEvent::EndSystem => strategy.end_system()?,
            RecordingEvent::Register {
                thread_id,
                new_id,
                thread_ticks,
                now,
            } => strategy.register(*thread_id, *new_id, *thread_ticks, *now),
            RecordingEvent::AssignAllTo {
                rec_id,
                enter,
                now,
                threads,
            } => strategy.assign_all_to(rec_id, *enter, *now, *threads),
            RecordingEvent::PrintCurrentState { data } => strategy.print_current_state(data),
            RecordingEvent::NotifyTimer {
                id,
                state,
                now,
                thread_id,
            } => strategy.notify_timer(id, *state, *now, *thread_id),
            RecordingEvent::NotifyValue { id, value } => strategy.notify_value_change(id, value),
            RecordingEvent::ProgramRecordCreation => strategy.notify_program_record_creation(),
            RecordingEvent::ClearTemporaryData => strategy.clear_temporary_data(),
            RecordingEvent::RegisterGroup {
                class_name,
                rec_id,
                settings,
            } => strategy.register_for_recording(class_name, rec_id.as_deref(), settings),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids() {
        assert_eq!(EventKind::Enter.id(), 1);
        assert_eq!(EventKind::PrintStatistics.id(), 8);
        assert_eq!(EventKind::EndSystem.id(), 13);
        assert_eq!(EventKind::RegisterGroup.id(), 21);
        for kind in EventKind::VALUES {
            assert_eq!(EventKind::from_id(kind.id()).unwrap(), kind);
        }
        assert!(EventKind::from_id(7).is_err());
        assert!(EventKind::from_id(12).is_err());
    }

    #[test]
    fn test_event_kinds() {
        let event = RecordingEvent::Enter {
            rec_id: Some("Foo".to_string()),
            now: 0,
            threads: ThreadsInfo::new(1, 100),
            exclude: false,
        };
        assert_eq!(event.kind(), EventKind::Enter);
        assert!(!event.is_end_system());
        assert!(RecordingEvent::EndSystem.is_end_system());
        assert_eq!(EventKind::MemoryFreedByRecId.to_string(), "memory_freed_by_rec_id");
    }

    #[test]
    fn test_json_shape() {
        let event = RecordingEvent::MemoryFreedById { id: 3, size: 8 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"kind":"memory_freed_by_id","id":3,"size":8}"#);
    }
}

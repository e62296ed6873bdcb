//! Binary event stream
//!
//! A connection starts with the recording settings of the sender followed
//! by a sequence of events. Every event is an `i32` kind id (see
//! [`EventKind::id`]) and a kind specific body. All numbers are big endian.
//!
//! Strings are a `u16` byte length followed by UTF-8. Optional strings carry
//! an `i16` marker before the string: `0` for absent, `1` for present.
//! Booleans take one byte.

use std::collections::{BTreeMap, HashMap};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::RecordingConfig;
use crate::error::{WireError, WireResult};
use crate::event::{EventKind, RecordingEvent};
use crate::group::{BooleanValue, DebugState, GroupAccountingType, MonitoringGroupSettings, ResourceType, StreamType};
use crate::listener::{MonitoredValue, ValueType};
use crate::process_data::{Measurements, ProcessData};
use crate::strategy::ThreadsInfo;
use crate::timer::TimerState;

const MARKER_ABSENT: i16 = 0;
const MARKER_PRESENT: i16 = 1;

/// Sentinel for "use the global default" accounting
const ACCOUNTING_DEFAULT: i32 = -1;

/// Item of an event stream
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Recording settings of the sender, first frame of a connection
    Settings(RecordingConfig),
    Event(RecordingEvent),
}

fn put_bool(dst: &mut BytesMut, value: bool) {
    dst.put_u8(u8::from(value));
}

fn put_str(dst: &mut BytesMut, value: &str) -> WireResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| WireError::StringTooLong { len: value.len() })?;
    dst.put_u16(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

fn put_opt_str(dst: &mut BytesMut, value: Option<&str>) -> WireResult<()> {
    match value {
        Some(value) => {
            dst.put_i16(MARKER_PRESENT);
            put_str(dst, value)
        }
        None => {
            dst.put_i16(MARKER_ABSENT);
            Ok(())
        }
    }
}

fn put_len(dst: &mut BytesMut, len: usize) -> WireResult<()> {
    let len = i32::try_from(len).map_err(|_| WireError::InvalidLength { len: i32::MAX })?;
    dst.put_i32(len);
    Ok(())
}

fn put_threads(dst: &mut BytesMut, threads: &ThreadsInfo) {
    dst.put_i64(threads.ticks);
    dst.put_i64(threads.thread_id);
}

fn put_resources(dst: &mut BytesMut, resources: &[ResourceType]) -> WireResult<()> {
    put_len(dst, resources.len())?;
    for resource in resources {
        dst.put_i32(resource.ordinal());
    }
    Ok(())
}

fn put_measurements(dst: &mut BytesMut, data: &Measurements) {
    dst.put_f64(data.avg_load);
    dst.put_f64(data.load);
    dst.put_f64(data.min_load);
    dst.put_f64(data.max_load);
    dst.put_f64(data.avg_mem_use);
    dst.put_f64(data.mem_use);
    dst.put_i64(data.min_mem_use);
    dst.put_i64(data.max_mem_use);
    dst.put_i64(data.system_time);
    dst.put_i64(data.io_read);
    dst.put_i64(data.io_write);
    dst.put_i32(data.status);
}

fn put_process_data(dst: &mut BytesMut, data: &ProcessData) {
    put_measurements(dst, &data.system);
    put_measurements(dst, &data.process);
}

fn put_value(dst: &mut BytesMut, value: &MonitoredValue) -> WireResult<()> {
    dst.put_i32(value.value_type().ordinal());
    match value {
        MonitoredValue::Double(value) => dst.put_f64(*value),
        MonitoredValue::Float(value) => dst.put_f32(*value),
        MonitoredValue::Int(value) => dst.put_i32(*value),
        MonitoredValue::Long(value) => dst.put_i64(*value),
        MonitoredValue::Char(value) => dst.put_u32(u32::from(*value)),
        MonitoredValue::Boolean(value) => put_bool(dst, *value),
        MonitoredValue::Short(value) => dst.put_i16(*value),
        MonitoredValue::Byte(value) => dst.put_i8(*value),
        MonitoredValue::String(value) | MonitoredValue::Object(value) => put_opt_str(dst, value.as_deref())?,
    }
    Ok(())
}

fn put_group_settings(dst: &mut BytesMut, settings: &MonitoringGroupSettings) -> WireResult<()> {
    put_len(dst, settings.ids.len())?;
    for id in &settings.ids {
        put_str(dst, id)?;
    }
    put_len(dst, settings.debug.len())?;
    for state in &settings.debug {
        dst.put_i32(state.ordinal());
    }
    dst.put_i32(settings.accounting.map_or(ACCOUNTING_DEFAULT, GroupAccountingType::ordinal));
    put_resources(dst, &settings.resources)?;
    dst.put_i32(settings.distribute_values.ordinal());
    dst.put_i32(settings.consider_contained.ordinal());
    Ok(())
}

/// Writes the settings block opening a connection
pub fn encode_settings(settings: &RecordingConfig, dst: &mut BytesMut) -> WireResult<()> {
    put_bool(dst, settings.variant_contributions);
    put_bool(dst, settings.configuration_detection);
    dst.put_i32(settings.group_accounting.ordinal());
    put_resources(dst, &settings.accountable_resources)?;
    put_resources(dst, &settings.default_group_resources)?;
    put_bool(dst, settings.multi_distribute_values);
    put_bool(dst, settings.multi_consider_contained);
    put_bool(dst, settings.account_excluded);
    put_bool(dst, settings.register_threads);
    put_len(dst, settings.extra.len())?;
    for (key, value) in &settings.extra {
        put_str(dst, key)?;
        put_str(dst, value)?;
    }
    Ok(())
}

/// Writes the kind id and body of `event`
pub fn encode_event(event: &RecordingEvent, dst: &mut BytesMut) -> WireResult<()> {
    dst.put_i32(event.kind().id());
    match event {
        RecordingEvent::EnterConfiguration { ids } => put_str(dst, ids)?,
        RecordingEvent::Enter {
            rec_id,
            now,
            threads,
            exclude,
        }
        | RecordingEvent::Exit {
            rec_id,
            now,
            threads,
            exclude,
        } => {
            put_opt_str(dst, rec_id.as_deref())?;
            dst.put_i64(*now);
            put_threads(dst, threads);
            put_bool(dst, *exclude);
        }
        RecordingEvent::FinishRecording {
            now,
            thread_id,
            cpu_times,
        } => {
            dst.put_i64(*now);
            dst.put_i64(*thread_id);
            put_len(dst, cpu_times.len())?;
            for (thread, ticks) in cpu_times {
                dst.put_i64(*thread);
                dst.put_i64(*ticks);
            }
        }
        RecordingEvent::MemoryAllocated {
            rec_id,
            thread_id,
            id,
            size,
        } => {
            put_opt_str(dst, rec_id.as_deref())?;
            dst.put_i64(*id);
            dst.put_i64(*size);
            dst.put_i64(*thread_id);
        }
        RecordingEvent::MemoryFreedByRecId { rec_id, size } => {
            put_str(dst, rec_id)?;
            dst.put_i64(*size);
        }
        RecordingEvent::MemoryFreedById { id, size } => {
            dst.put_i64(*id);
            dst.put_i64(*size);
        }
        RecordingEvent::PrintStatistics { data } | RecordingEvent::PrintCurrentState { data } => {
            put_process_data(dst, data);
        }
        RecordingEvent::Io {
            rec_id,
            caller,
            thread_id,
            bytes,
            stream,
            write,
        } => {
            put_opt_str(dst, rec_id.as_deref())?;
            put_opt_str(dst, caller.as_deref())?;
            dst.put_i32(*bytes);
            put_str(dst, stream.name())?;
            dst.put_i64(*thread_id);
            put_bool(dst, *write);
        }
        RecordingEvent::StartRecording {
            now,
            thread_id,
            thread_ticks,
        } => {
            dst.put_i64(*now);
            dst.put_i64(*thread_id);
            dst.put_i64(*thread_ticks);
        }
        RecordingEvent::StopTimeRecording { now, threads } => {
            dst.put_i64(*now);
            put_threads(dst, threads);
        }
        RecordingEvent::Register {
            thread_id,
            new_id,
            thread_ticks,
            now,
        } => {
            dst.put_i64(*thread_id);
            dst.put_i64(*new_id);
            dst.put_i64(*thread_ticks);
            dst.put_i64(*now);
        }
        RecordingEvent::AssignAllTo {
            rec_id,
            enter,
            now,
            threads,
        } => {
            put_str(dst, rec_id)?;
            put_bool(dst, *enter);
            dst.put_i64(*now);
            put_threads(dst, threads);
        }
        RecordingEvent::NotifyTimer {
            id,
            state,
            now,
            thread_id,
        } => {
            put_str(dst, id)?;
            dst.put_i64(*now);
            dst.put_i64(*thread_id);
            dst.put_i32(state.ordinal());
        }
        RecordingEvent::NotifyValue { id, value } => {
            put_str(dst, id)?;
            put_value(dst, value)?;
        }
        RecordingEvent::RegisterGroup {
            class_name,
            rec_id,
            settings,
        } => {
            put_str(dst, class_name)?;
            put_opt_str(dst, rec_id.as_deref())?;
            put_group_settings(dst, settings)?;
        }
        RecordingEvent::EndSystem | RecordingEvent::ProgramRecordCreation | RecordingEvent::ClearTemporaryData => {}
    }
    Ok(())
}

/// Cursor over a buffered, possibly incomplete frame
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, what: &'static str, needed: usize) -> WireResult<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if available < needed {
            return Err(WireError::Truncated {
                what,
                needed,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.take("bool", 1)?[0] != 0)
    }

    pub fn read_i8(&mut self) -> WireResult<i8> {
        Ok(self.take("byte", 1)?.get_i8())
    }

    pub fn read_i16(&mut self) -> WireResult<i16> {
        Ok(self.take("short", 2)?.get_i16())
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        Ok(self.take("length", 2)?.get_u16())
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        Ok(self.take("int", 4)?.get_i32())
    }

    pub fn read_u32(&mut self) -> WireResult<u32> {
        Ok(self.take("char", 4)?.get_u32())
    }

    pub fn read_i64(&mut self) -> WireResult<i64> {
        Ok(self.take("long", 8)?.get_i64())
    }

    pub fn read_f32(&mut self) -> WireResult<f32> {
        Ok(self.take("float", 4)?.get_f32())
    }

    pub fn read_f64(&mut self) -> WireResult<f64> {
        Ok(self.take("double", 8)?.get_f64())
    }

    pub fn read_string(&mut self) -> WireResult<String> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.take("string", len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn read_opt_string(&mut self) -> WireResult<Option<String>> {
        match self.read_i16()? {
            MARKER_ABSENT => Ok(None),
            MARKER_PRESENT => self.read_string().map(Some),
            marker => Err(WireError::InvalidMarker { marker }),
        }
    }

    /// Reads a collection length. Lengths beyond the buffered bytes are
    /// left to the element reads to detect.
    pub fn read_len(&mut self) -> WireResult<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| WireError::InvalidLength { len })
    }

    fn capacity(&self, len: usize) -> usize {
        len.min(self.buf.len() - self.pos)
    }

    fn read_threads(&mut self) -> WireResult<ThreadsInfo> {
        let ticks = self.read_i64()?;
        let thread_id = self.read_i64()?;
        Ok(ThreadsInfo::new(thread_id, ticks))
    }

    fn read_resources(&mut self) -> WireResult<Vec<ResourceType>> {
        let len = self.read_len()?;
        let mut resources = Vec::with_capacity(self.capacity(len));
        for _ in 0..len {
            resources.push(ResourceType::from_ordinal(self.read_i32()?)?);
        }
        Ok(resources)
    }

    fn read_measurements(&mut self) -> WireResult<Measurements> {
        Ok(Measurements {
            avg_load: self.read_f64()?,
            load: self.read_f64()?,
            min_load: self.read_f64()?,
            max_load: self.read_f64()?,
            avg_mem_use: self.read_f64()?,
            mem_use: self.read_f64()?,
            min_mem_use: self.read_i64()?,
            max_mem_use: self.read_i64()?,
            system_time: self.read_i64()?,
            io_read: self.read_i64()?,
            io_write: self.read_i64()?,
            status: self.read_i32()?,
        })
    }

    fn read_process_data(&mut self) -> WireResult<ProcessData> {
        let system = self.read_measurements()?;
        let process = self.read_measurements()?;
        Ok(ProcessData { system, process })
    }

    fn read_value(&mut self) -> WireResult<MonitoredValue> {
        let value = match ValueType::from_ordinal(self.read_i32()?)? {
            ValueType::Double => MonitoredValue::Double(self.read_f64()?),
            ValueType::Float => MonitoredValue::Float(self.read_f32()?),
            ValueType::Int => MonitoredValue::Int(self.read_i32()?),
            ValueType::Long => MonitoredValue::Long(self.read_i64()?),
            ValueType::Char => {
                let code = self.read_u32()?;
                let value = char::from_u32(code).ok_or(WireError::InvalidOrdinal {
                    kind: "char",
                    ordinal: code as i32,
                })?;
                MonitoredValue::Char(value)
            }
            ValueType::Boolean => MonitoredValue::Boolean(self.read_bool()?),
            ValueType::Short => MonitoredValue::Short(self.read_i16()?),
            ValueType::Byte => MonitoredValue::Byte(self.read_i8()?),
            ValueType::String => MonitoredValue::String(self.read_opt_string()?),
            ValueType::Object => MonitoredValue::Object(self.read_opt_string()?),
        };
        Ok(value)
    }

    fn read_group_settings(&mut self) -> WireResult<MonitoringGroupSettings> {
        let len = self.read_len()?;
        let mut ids = Vec::with_capacity(self.capacity(len));
        for _ in 0..len {
            ids.push(self.read_string()?);
        }
        let len = self.read_len()?;
        let mut debug = Vec::with_capacity(self.capacity(len));
        for _ in 0..len {
            debug.push(DebugState::from_ordinal(self.read_i32()?)?);
        }
        let accounting = match self.read_i32()? {
            ACCOUNTING_DEFAULT => None,
            ordinal => Some(GroupAccountingType::from_ordinal(ordinal)?),
        };
        let resources = self.read_resources()?;
        let distribute_values = BooleanValue::from_ordinal(self.read_i32()?)?;
        let consider_contained = BooleanValue::from_ordinal(self.read_i32()?)?;
        Ok(MonitoringGroupSettings {
            ids,
            debug,
            accounting,
            resources,
            distribute_values,
            consider_contained,
        })
    }

    /// Reads the settings block opening a connection
    pub fn read_settings(&mut self) -> WireResult<RecordingConfig> {
        let variant_contributions = self.read_bool()?;
        let configuration_detection = self.read_bool()?;
        let group_accounting = GroupAccountingType::from_ordinal(self.read_i32()?)?;
        let accountable_resources = self.read_resources()?;
        let default_group_resources = self.read_resources()?;
        let multi_distribute_values = self.read_bool()?;
        let multi_consider_contained = self.read_bool()?;
        let account_excluded = self.read_bool()?;
        let register_threads = self.read_bool()?;
        let len = self.read_len()?;
        let mut extra = BTreeMap::new();
        for _ in 0..len {
            let key = self.read_string()?;
            let value = self.read_string()?;
            extra.insert(key, value);
        }
        Ok(RecordingConfig {
            variant_contributions,
            configuration_detection,
            group_accounting,
            accountable_resources,
            default_group_resources,
            multi_distribute_values,
            multi_consider_contained,
            account_excluded,
            register_threads,
            extra,
            ..RecordingConfig::default()
        })
    }

    /// Reads one event, kind id included
    pub fn read_event(&mut self) -> WireResult<RecordingEvent> {
        let kind = EventKind::from_id(self.read_i32()?)?;
        let event = match kind {
            EventKind::EnterConfiguration => RecordingEvent::EnterConfiguration {
                ids: self.read_string()?,
            },
            EventKind::Enter | EventKind::Exit => {
                let rec_id = self.read_opt_string()?;
                let now = self.read_i64()?;
                let threads = self.read_threads()?;
                let exclude = self.read_bool()?;
                if kind == EventKind::Enter {
                    RecordingEvent::Enter {
                        rec_id,
                        now,
                        threads,
                        exclude,
                    }
                } else {
                    RecordingEvent::Exit {
                        rec_id,
                        now,
                        threads,
                        exclude,
                    }
                }
            }
            EventKind::FinishRecording => {
                let now = self.read_i64()?;
                let thread_id = self.read_i64()?;
                let len = self.read_len()?;
                let mut cpu_times = HashMap::with_capacity(self.capacity(len));
                for _ in 0..len {
                    let thread = self.read_i64()?;
                    let ticks = self.read_i64()?;
                    cpu_times.insert(thread, ticks);
                }
                RecordingEvent::FinishRecording {
                    now,
                    thread_id,
                    cpu_times,
                }
            }
            EventKind::MemoryAllocated => {
                let rec_id = self.read_opt_string()?;
                let id = self.read_i64()?;
                let size = self.read_i64()?;
                let thread_id = self.read_i64()?;
                RecordingEvent::MemoryAllocated {
                    rec_id,
                    thread_id,
                    id,
                    size,
                }
            }
            EventKind::MemoryFreedByRecId => RecordingEvent::MemoryFreedByRecId {
                rec_id: self.read_string()?,
                size: self.read_i64()?,
            },
            EventKind::MemoryFreedById => RecordingEvent::MemoryFreedById {
                id: self.read_i64()?,
                size: self.read_i64()?,
            },
            EventKind::PrintStatistics => RecordingEvent::PrintStatistics {
                data: self.read_process_data()?,
            },
            EventKind::PrintCurrentState => RecordingEvent::PrintCurrentState {
                data: self.read_process_data()?,
            },
            EventKind::Io => {
                let rec_id = self.read_opt_string()?;
                let caller = self.read_opt_string()?;
                let bytes = self.read_i32()?;
                let stream = StreamType::from_name(&self.read_string()?)?;
                let thread_id = self.read_i64()?;
                let write = self.read_bool()?;
                RecordingEvent::Io {
                    rec_id,
                    caller,
                    thread_id,
                    bytes,
                    stream,
                    write,
                }
            }
            EventKind::StartRecording => RecordingEvent::StartRecording {
                now: self.read_i64()?,
                thread_id: self.read_i64()?,
                thread_ticks: self.read_i64()?,
            },
            EventKind::StopTimeRecording => RecordingEvent::StopTimeRecording {
                now: self.read_i64()?,
                threads: self.read_threads()?,
            },
            EventKind::EndSystem => RecordingEvent::EndSystem,
            EventKind::Register => RecordingEvent::Register {
                thread_id: self.read_i64()?,
                new_id: self.read_i64()?,
                thread_ticks: self.read_i64()?,
                now: self.read_i64()?,
            },
            EventKind::AssignAllTo => RecordingEvent::AssignAllTo {
                rec_id: self.read_string()?,
                enter: self.read_bool()?,
                now: self.read_i64()?,
                threads: self.read_threads()?,
            },
            EventKind::NotifyTimer => {
                let id = self.read_string()?;
                let now = self.read_i64()?;
                let thread_id = self.read_i64()?;
                let state = TimerState::from_ordinal(self.read_i32()?)?;
                RecordingEvent::NotifyTimer {
                    id,
                    state,
                    now,
                    thread_id,
                }
            }
            EventKind::NotifyValue => RecordingEvent::NotifyValue {
                id: self.read_string()?,
                value: self.read_value()?,
            },
            EventKind::ProgramRecordCreation => RecordingEvent::ProgramRecordCreation,
            EventKind::ClearTemporaryData => RecordingEvent::ClearTemporaryData,
            EventKind::RegisterGroup => RecordingEvent::RegisterGroup {
                class_name: self.read_string()?,
                rec_id: self.read_opt_string()?,
                settings: self.read_group_settings()?,
            },
        };
        Ok(event)
    }
}

/// `tokio_util` codec for event streams
#[derive(Debug, Clone, Default)]
pub struct EventCodec {
    expect_settings: bool,
}

impl EventCodec {
    /// Codec for a stream of events only
    pub fn new() -> Self {
        Self { expect_settings: false }
    }

    /// Codec for a connection opening with the settings block
    pub fn with_settings() -> Self {
        Self { expect_settings: true }
    }

    pub fn expects_settings(&self) -> bool {
        self.expect_settings
    }
}

impl Decoder for EventCodec {
    type Item = WireFrame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut reader = WireReader::new(&src[..]);
        let frame = if self.expect_settings {
            reader.read_settings().map(WireFrame::Settings)
        } else {
            reader.read_event().map(WireFrame::Event)
        };
        match frame {
            Ok(frame) => {
                let consumed = reader.position();
                src.advance(consumed);
                if matches!(frame, WireFrame::Settings(_)) {
                    self.expect_settings = false;
                }
                Ok(Some(frame))
            }
            Err(WireError::Truncated { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Encoder<WireFrame> for EventCodec {
    type Error = WireError;

    fn encode(&mut self, item: WireFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            WireFrame::Settings(settings) => encode_settings(&settings, dst),
            WireFrame::Event(event) => encode_event(&event, dst),
        }
    }
}

impl Encoder<&RecordingEvent> for EventCodec {
    type Error = WireError;

    fn encode(&mut self, item: &RecordingEvent, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_event(item, dst)
    }
}

//! Synchronous in-process strategy
//!
//! Every instrumentation call is applied under one lock: the element the call belongs
//! to is resolved against the calling thread's stack, time recording of the
//! enclosing element is suspended or resumed and the active configuration
//! record is charged alongside the group. Listener notifications raised
//! under the lock are delivered after it is released.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{OutputConfig, RecorderConfig};
use crate::element::{ElementId, GroupSnapshot, RecorderElement};
use crate::element_map::{EXCLUDED_ID, PROGRAM_ID, RECORDER_ID};
use crate::error::RecorderResult;
use crate::formatter::{InfoCategory, ResultFormatter, StateReport, TabFormatter};
use crate::group::{DebugState, MonitoringGroupSettings, ResourceType, StreamType};
use crate::listener::{MonitoredValue, Notification, Notifications, RecordingListener};
use crate::pool::{StackCopy, StackPool};
use crate::process_data::ProcessData;
use crate::storage::StrategyStorage;
use crate::thread_data::ThreadData;
use crate::timer::{TimerInfo, TimerState};

use super::{RecorderStrategy, ThreadsInfo, REGISTER_END, REGISTER_FORCE};

const CONFIGURATION_SEPARATOR: &str = ", ";

/// Elements a tagged allocation was charged to
#[derive(Debug)]
struct Allocation {
    charged: StackCopy,
    size: i64,
}

struct StrategyState {
    storage: StrategyStorage,
    program: ElementId,
    excluded: ElementId,
    threads: HashMap<i64, ThreadData>,
    timers: HashMap<String, TimerInfo>,
    stacks: StackPool,
    allocations: HashMap<i64, Allocation>,
    formatter: Box<dyn ResultFormatter>,
    output_opened: bool,
}

/// Aggregates instrumentation calls synchronously on the calling thread
pub struct DefaultRecorderStrategy {
    state: Mutex<StrategyState>,
    output: OutputConfig,
    listeners: Vec<Arc<dyn RecordingListener>>,
}

impl DefaultRecorderStrategy {
    /// Creates a strategy reporting through a [`TabFormatter`]
    pub fn new(config: &RecorderConfig) -> Self {
        Self::with_listeners(config, Box::new(TabFormatter::new()), Vec::new())
    }

    pub fn with_formatter(config: &RecorderConfig, formatter: Box<dyn ResultFormatter>) -> Self {
        Self::with_listeners(config, formatter, Vec::new())
    }

    /// Creates a strategy notifying `listeners` synchronously
    pub fn with_listeners(
        config: &RecorderConfig,
        formatter: Box<dyn ResultFormatter>,
        listeners: Vec<Arc<dyn RecordingListener>>,
    ) -> Self {
        let mut storage = StrategyStorage::new(config.recording.clone());
        let mut notifications = Notifications::for_listeners(&listeners);
        let default_conf = Arc::clone(storage.default_configuration());
        let program = storage.create(Arc::clone(&default_conf), true);
        storage.register_default(PROGRAM_ID, program);

        let class_name = std::any::type_name::<Self>();
        let excluded = if config.recording.account_excluded {
            let settings = MonitoringGroupSettings::with_ids([EXCLUDED_ID]);
            storage.register_for_recording(class_name, Some(EXCLUDED_ID), &settings, &mut notifications);
            storage.recorder_element(EXCLUDED_ID)
        } else {
            None
        };
        let excluded = match excluded {
            Some(excluded) => excluded,
            None => storage
                .arena_mut()
                .insert(RecorderElement::blocking(Arc::clone(&default_conf))),
        };
        let settings = MonitoringGroupSettings::with_ids([RECORDER_ID]);
        storage.register_for_recording(class_name, Some(RECORDER_ID), &settings, &mut notifications);
        notifications.deliver(&listeners);

        Self {
            state: Mutex::new(StrategyState {
                storage,
                program,
                excluded,
                threads: HashMap::new(),
                timers: HashMap::new(),
                stacks: StackPool::new(),
                allocations: HashMap::new(),
                formatter,
                output_opened: false,
            }),
            output: config.output.clone(),
            listeners,
        }
    }

    /// Element accounting the whole program
    pub fn program_element(&self) -> ElementId {
        self.state.lock().program
    }

    /// Element excluded regions are attributed to
    pub fn excluded_element(&self) -> ElementId {
        self.state.lock().excluded
    }

    /// Runs `f` on the storage while holding the strategy lock
    pub fn inspect<R>(&self, f: impl FnOnce(&StrategyStorage) -> R) -> R {
        f(&self.state.lock().storage)
    }

    /// Current counters of the group (or default element) `rec_id`
    pub fn snapshot(&self, rec_id: &str) -> Option<GroupSnapshot> {
        let state = self.state.lock();
        state
            .storage
            .recorder_element(rec_id)
            .map(|element| state.storage.arena().snapshot(element))
    }

    pub fn thread_stack_size(&self, thread_id: i64) -> usize {
        self.state
            .lock()
            .threads
            .get(&thread_id)
            .map_or(0, ThreadData::stack_size)
    }

    pub fn timer(&self, id: &str) -> Option<TimerInfo> {
        self.state.lock().timers.get(id).cloned()
    }

    /// Number of tagged allocations not freed yet
    pub fn pending_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Runs `f` under the state lock and delivers what it queued for the
    /// listeners once the lock is released
    fn with_state<R>(&self, f: impl FnOnce(&mut StrategyState, &mut Notifications) -> R) -> R {
        let mut notifications = Notifications::for_listeners(&self.listeners);
        let result = {
            let mut guard = self.state.lock();
            f(&mut *guard, &mut notifications)
        };
        notifications.deliver(&self.listeners);
        result
    }

    fn account_io(
        &self,
        rec_id: Option<&str>,
        caller: Option<&str>,
        thread_id: i64,
        bytes: i32,
        stream: StreamType,
        write: bool,
    ) {
        let resource = stream.resource();
        if resource == ResourceType::None {
            return;
        }
        let bytes = i64::from(bytes);
        self.with_state(|state, notifications| {
            let (_, target) = state.account(rec_id, caller, thread_id, resource, notifications, |storage, element| {
                if write {
                    storage.arena_mut().write_io(element, bytes, stream);
                } else {
                    storage.arena_mut().read_io(element, bytes, stream);
                }
            });
            if let Some((element, configuration)) = target {
                let debug_state = match (stream, write) {
                    (StreamType::Net, false) => DebugState::NetIn,
                    (StreamType::Net, true) => DebugState::NetOut,
                    (_, false) => DebugState::FileIn,
                    (_, true) => DebugState::FileOut,
                };
                trace_debug(&state.storage, element, configuration, debug_state, bytes, resource);
            }
        });
    }

    fn write_statistics(&self, state: &mut StrategyState, data: &ProcessData) -> io::Result<()> {
        self.configure_formatter(state);
        let StrategyState {
            storage,
            program,
            threads,
            formatter,
            ..
        } = state;
        let storage: &StrategyStorage = storage;
        let arena = storage.arena();
        let elements = storage.elements();

        let mut groups: Vec<(String, ElementId)> = elements
            .entries()
            .map(|(id, element)| (id.to_string(), element))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));

        let total = arena.snapshot(*program);
        if self.output.out_interval > 0 {
            let reported = state_groups(storage, &groups);
            let report = StateReport {
                program: &total,
                overhead: None,
                groups: &reported,
            };
            formatter.print_current_state_statistics_footer(&report)?;
        }
        let mapping = elements.configuration_mapping();
        formatter.set_process_data(data, &total);
        formatter.print_headline()?;

        if !threads.is_empty() {
            formatter.print_info(InfoCategory::Threaded)?;
            let mut ids: Vec<&i64> = threads.keys().collect();
            ids.sort_unstable();
            for id in ids {
                if let Some(thread) = threads.get(id).filter(|thread| thread.is_ended()) {
                    formatter.print_thread_data(&id.to_string(), thread)?;
                }
            }
        }
        formatter.print_individual(Some("Program"), &total)?;

        for (id, element) in &groups {
            let snapshot = arena.snapshot(*element);
            if snapshot.recorded && arena.get(*element).is_visible() && id != RECORDER_ID {
                formatter.print_individual(Some(id.as_str()), &snapshot)?;
            }
        }

        formatter.print_info(InfoCategory::Breakdown)?;
        formatter.print_process_statistics()?;
        formatter.print_compare("Process vs. System", None, true)?;
        for (id, element) in &groups {
            let snapshot = arena.snapshot(*element);
            if (snapshot.recorded && arena.get(*element).is_visible()) || id == RECORDER_ID {
                formatter.print_compare(&format!("{id} vs. sys"), Some(&snapshot), true)?;
                formatter.print_compare(&format!("{id} vs. process"), Some(&snapshot), false)?;
            }
        }

        formatter.print_info(InfoCategory::Configurations)?;
        let mut configurations: Vec<(&str, ElementId)> = elements.configurations().collect();
        configurations.sort_by(|a, b| a.0.cmp(b.0));
        for (key, element) in configurations {
            let snapshot = arena.snapshot(element);
            if !snapshot.recorded {
                continue;
            }
            let Some(text) = elements.configuration_key_to_string(key, true) else {
                continue;
            };
            let description = format!(
                "{} {}",
                text,
                mapping.format_configuration(key, CONFIGURATION_SEPARATOR)
            );
            formatter.print_individual(Some(&description), &snapshot)?;
            formatter.print_compare(&format!("{description} vs. sys"), Some(&snapshot), true)?;
            formatter.print_compare(&format!("{description} vs. process"), Some(&snapshot), false)?;
            for index in 0..arena.contributing_size(element) {
                if let Some(contribution) = arena.contributing(element, index) {
                    let contribution = arena.snapshot(contribution);
                    formatter.print_individual(Some(mapping.name(index)), &contribution)?;
                }
            }
        }

        if elements.is_empty() {
            warn!("No group registered for statistics calculation, the instrumentation might not be active");
        }
        formatter.clear()
    }

    fn configure_formatter(&self, state: &mut StrategyState) {
        if state.formatter.is_configured() {
            return;
        }
        let out: Box<dyn Write + Send> = match self.output.resolved_out_file() {
            Some(path) => {
                let opened = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(state.output_opened)
                    .truncate(!state.output_opened)
                    .open(&path);
                match opened {
                    Ok(file) => {
                        if !state.output_opened {
                            info!("Writing results to {}", path.display());
                        }
                        state.output_opened = true;
                        Box::new(BufWriter::new(file))
                    }
                    Err(e) => {
                        warn!("Cannot open {}, writing results to stdout: {}", path.display(), e);
                        Box::new(io::stdout())
                    }
                }
            }
            None => Box::new(io::stdout()),
        };
        state.formatter.configure(out, false);
    }
}

fn group_changed(storage: &StrategyStorage, element: ElementId, notifications: &mut Notifications) {
    notifications.push(|| Notification::GroupChanged(storage.arena().snapshot(element)));
}

fn configuration_changed(storage: &StrategyStorage, record: ElementId, notifications: &mut Notifications) {
    notifications.push(|| Notification::ConfigurationChanged(storage.arena().snapshot(record)));
}

fn current_configuration(
    storage: &mut StrategyStorage,
    rec_id: Option<&str>,
    notifications: &mut Notifications,
) -> Option<ElementId> {
    let (arena, elements) = storage.parts_mut();
    elements.current_configuration_record(arena, rec_id.unwrap_or_default(), notifications)
}

fn state_groups(storage: &StrategyStorage, groups: &[(String, ElementId)]) -> Vec<(String, GroupSnapshot)> {
    let arena = storage.arena();
    groups
        .iter()
        .filter(|(id, element)| id != RECORDER_ID && arena.get(*element).is_visible())
        .map(|(id, element)| (id.clone(), arena.snapshot(*element)))
        .collect()
}

/// Emits a debug line for groups declaring `debug_state`
fn trace_debug(
    storage: &StrategyStorage,
    element: ElementId,
    configuration: Option<ElementId>,
    debug_state: DebugState,
    value: i64,
    resource: ResourceType,
) {
    let arena = storage.arena();
    if !arena.has_debug_state(element, debug_state) {
        return;
    }
    let group = storage.elements().recorder_id_of(element).unwrap_or("?");
    if arena.has_debug_state(element, DebugState::Configuration) {
        let Some(record) = configuration.filter(|record| arena.account_resource(*record, resource)) else {
            return;
        };
        let elements = storage.elements();
        let active = elements
            .configuration_mapping()
            .format_configuration(&elements.current_configuration_id(), ",");
        debug!(group, state = ?debug_state, configuration = %active, record = %record, "{}", value);
    } else {
        debug!(group, state = ?debug_state, "{}", value);
    }
}

impl StrategyState {
    /// Charges `value` of `resource` to the group of the call, to the stack
    /// below it for indirect groups and to the active configuration
    fn account(
        &mut self,
        rec_id: Option<&str>,
        caller: Option<&str>,
        thread_id: i64,
        resource: ResourceType,
        notifications: &mut Notifications,
        mut apply: impl FnMut(&mut StrategyStorage, ElementId),
    ) -> (Vec<ElementId>, Option<(ElementId, Option<ElementId>)>) {
        let mut charged = Vec::new();
        let program = self.program;
        if self.storage.arena().account_resource(program, resource) {
            apply(&mut self.storage, program);
            group_changed(&self.storage, program, notifications);
            charged.push(program);
        }

        let Some(element) = self.assign_by_stack_trace(rec_id, caller, thread_id, false) else {
            return (charged, None);
        };
        if !self.storage.arena().account_resource(element, resource) {
            return (charged, None);
        }
        apply(&mut self.storage, element);
        group_changed(&self.storage, element, notifications);
        charged.push(element);

        if self.storage.arena().is_indirect_accounting(element) {
            if let Some(thread) = self.threads.get(&thread_id) {
                for position in (0..thread.stack_size().saturating_sub(1)).rev() {
                    if thread.is_stack_element_duplicated(position) {
                        continue;
                    }
                    let Some(below) = thread.stack_element(position) else {
                        continue;
                    };
                    if below != element && self.storage.arena().account_resource(below, resource) {
                        apply(&mut self.storage, below);
                        group_changed(&self.storage, below, notifications);
                        charged.push(below);
                    }
                }
            }
        }

        let configuration = current_configuration(&mut self.storage, rec_id, notifications);
        if let Some(record) = configuration {
            if self.storage.arena().account_resource(record, resource) {
                apply(&mut self.storage, record);
                configuration_changed(&self.storage, record, notifications);
                charged.push(record);
            }
        }
        (charged, Some((element, configuration)))
    }

    /// The thread record of `thread_id`, created on first use
    fn thread(&mut self, thread_id: i64, thread_ticks: i64) -> &mut ThreadData {
        let thread = self.threads.entry(thread_id).or_default();
        thread.start(thread_ticks);
        thread
    }

    /// Resolves the element a call is attributed to. Excluded calls go to
    /// the excluded element. Otherwise the nearest element of the group's
    /// variability on the thread's stack wins over the group's own element,
    /// a registered caller overrides both, and the thread's top or fallback
    /// element is used when nothing matched.
    fn assign_by_stack_trace(
        &self,
        rec_id: Option<&str>,
        caller: Option<&str>,
        thread_id: i64,
        exclude: bool,
    ) -> Option<ElementId> {
        if exclude {
            return Some(self.excluded);
        }
        let thread = self.threads.get(&thread_id);
        let mut result = None;
        if let Some(rec_id) = rec_id {
            let var_id = self.storage.elements().variability_id_num(rec_id);
            if var_id >= 0 {
                result = thread.and_then(|thread| thread.top_var(self.storage.arena(), var_id));
            }
            if result.is_none() {
                result = self.storage.recorder_element(rec_id);
            }
        }
        if let Some(id) = caller.and_then(|caller| self.storage.recorder_id(caller)) {
            result = self.storage.recorder_element(id);
        }
        if result.is_none() {
            result = thread.and_then(|thread| thread.top().or_else(|| thread.fallback()));
        }
        result
    }
}

impl RecorderStrategy for DefaultRecorderStrategy {
    fn register_for_recording(&self, class_name: &str, rec_id: Option<&str>, settings: &MonitoringGroupSettings) {
        self.with_state(|state, notifications| {
            state
                .storage
                .register_for_recording(class_name, rec_id, settings, notifications);
        });
    }

    fn enter(&self, rec_id: Option<&str>, now: i64, threads: ThreadsInfo, exclude: bool) {
        let ThreadsInfo { thread_id, ticks } = threads;
        self.with_state(|state, notifications| {
            state.thread(thread_id, ticks);

            if let Some(element) = state.assign_by_stack_trace(rec_id, None, thread_id, exclude) {
                let indirect = state.storage.arena().is_indirect_accounting(element);
                if !indirect {
                    // the enclosing element pauses while the nested one runs
                    let top = state.threads.get(&thread_id).and_then(ThreadData::top);
                    if let Some(top) = top.filter(|top| *top != element) {
                        if state.storage.arena().account_resource(top, ResourceType::CpuTime) {
                            state.storage.arena_mut().stop_time_recording(top, now, ticks, thread_id);
                        }
                    }
                }
                if let Some(thread) = state.threads.get_mut(&thread_id) {
                    thread.push(element);
                }

                if state.storage.arena().account_resource(element, ResourceType::CpuTime) {
                    let started = state
                        .storage
                        .arena_mut()
                        .start_time_recording(element, now, ticks, thread_id);
                    if started && state.storage.is_variability_detection_enabled() {
                        if let Some(rec_id) = rec_id {
                            let (arena, elements) = state.storage.parts_mut();
                            elements.enter_configuration(arena, rec_id);
                        }
                    }
                    group_changed(&state.storage, element, notifications);

                    let configuration = current_configuration(&mut state.storage, rec_id, notifications);
                    if let Some(record) = configuration {
                        if state.storage.arena().account_resource(record, ResourceType::CpuTime) {
                            state
                                .storage
                                .arena_mut()
                                .start_time_recording(record, now, ticks, thread_id);
                            configuration_changed(&state.storage, record, notifications);
                        }
                    }
                    trace_debug(
                        &state.storage,
                        element,
                        configuration,
                        DebugState::MethodEnter,
                        now,
                        ResourceType::CpuTime,
                    );
                }
            }

            if let Some(thread) = state.threads.get_mut(&thread_id) {
                thread.start_time_recording(ticks);
            }
        });
    }

    fn exit(&self, rec_id: Option<&str>, now: i64, threads: ThreadsInfo, exclude: bool) {
        let ThreadsInfo { thread_id, ticks } = threads;
        self.with_state(|state, notifications| {
            if let Some(element) = state.assign_by_stack_trace(rec_id, None, thread_id, exclude) {
                let indirect = state.storage.arena().is_indirect_accounting(element);
                let still_below = state
                    .threads
                    .get(&thread_id)
                    .is_some_and(|thread| thread.is_on_stack(element, false));
                // indirect groups keep running while an outer call of the group is open
                if state.storage.arena().account_resource(element, ResourceType::CpuTime)
                    && (!indirect || !still_below)
                {
                    state
                        .storage
                        .arena_mut()
                        .stop_time_recording(element, now, ticks, thread_id);
                    group_changed(&state.storage, element, notifications);

                    let configuration = current_configuration(&mut state.storage, rec_id, notifications);
                    if let Some(record) = configuration {
                        if state.storage.arena().account_resource(record, ResourceType::CpuTime) {
                            state
                                .storage
                                .arena_mut()
                                .stop_time_recording(record, now, ticks, thread_id);
                            configuration_changed(&state.storage, record, notifications);
                        }
                    }
                    trace_debug(
                        &state.storage,
                        element,
                        configuration,
                        DebugState::MethodExit,
                        now,
                        ResourceType::CpuTime,
                    );
                }

                if let Some(thread) = state.threads.get_mut(&thread_id) {
                    thread.pop(element);
                    if !indirect {
                        if let Some(top) = thread.top().filter(|top| *top != element) {
                            if state.storage.arena().account_resource(top, ResourceType::CpuTime) {
                                state.storage.arena_mut().start_time_recording(top, now, ticks, thread_id);
                            }
                        }
                    }
                }
            }

            if let Some(thread) = state.threads.get_mut(&thread_id) {
                thread.stop_time_recording(ticks);
            }
        });
    }

    fn assign_all_to(&self, rec_id: &str, enter: bool, now: i64, threads: ThreadsInfo) {
        let rec_id = self
            .state
            .lock()
            .storage
            .elements()
            .possible_aggregated_recorder_id(rec_id);
        if enter {
            self.enter(Some(&rec_id), now, threads, false);
        } else {
            self.exit(Some(&rec_id), now, threads, false);
        }
    }

    fn enter_configuration(&self, ids: &str) {
        self.with_state(|state, notifications| {
            let (arena, elements) = state.storage.parts_mut();
            elements.enter_complete_configuration(arena, ids, true, notifications);
        });
    }

    fn register(&self, thread_id: i64, new_id: i64, thread_ticks: i64, now: i64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match new_id {
            REGISTER_END => {
                if let Some(thread) = state.threads.get_mut(&thread_id) {
                    thread.end(thread_ticks);
                }
            }
            REGISTER_FORCE => {
                state.thread(thread_id, thread_ticks);
            }
            _ => {
                let element = state.assign_by_stack_trace(None, None, thread_id, false);
                let thread = state.thread(thread_id, thread_ticks);
                if element.is_some() {
                    thread.set_fallback(element);
                }
                let parent = thread.clone();
                state.thread(new_id, 0).copy_stack_from(&parent);
                debug!("Thread {} started by {} at {}", new_id, thread_id, now);
            }
        }
    }

    fn memory_allocated(&self, rec_id: Option<&str>, thread_id: i64, id: i64, size: i64) {
        self.with_state(|state, notifications| {
            let (charged, target) = state.account(
                rec_id,
                None,
                thread_id,
                ResourceType::Memory,
                notifications,
                |storage, element| storage.arena_mut().memory_allocated(element, size),
            );
            if let Some((element, configuration)) = target {
                trace_debug(
                    &state.storage,
                    element,
                    configuration,
                    DebugState::MemoryAllocation,
                    size,
                    ResourceType::Memory,
                );
            }
            if id >= 0 && !charged.is_empty() {
                let charged = state.stacks.acquire(&charged);
                if let Some(previous) = state.allocations.insert(id, Allocation { charged, size }) {
                    state.stacks.release(previous.charged);
                }
            }
        });
    }

    fn memory_freed_by_rec_id(&self, rec_id: &str, size: i64) {
        self.with_state(|state, notifications| {
            let Some(element) = state.storage.recorder_element(rec_id) else {
                debug!("Freeing memory of unknown group {}", rec_id);
                return;
            };
            state.storage.arena_mut().memory_freed(element, size);
            group_changed(&state.storage, element, notifications);

            let configuration = current_configuration(&mut state.storage, Some(rec_id), notifications);
            if rec_id != RECORDER_ID {
                if let Some(record) = configuration {
                    if state.storage.arena().account_resource(record, ResourceType::Memory) {
                        state.storage.arena_mut().memory_freed(record, size);
                        configuration_changed(&state.storage, record, notifications);
                    }
                }
                trace_debug(
                    &state.storage,
                    element,
                    configuration,
                    DebugState::MemoryFree,
                    size,
                    ResourceType::Memory,
                );
            }
        });
    }

    fn memory_freed_by_id(&self, id: i64, size: i64) {
        self.with_state(|state, notifications| {
            let Some(allocation) = state.allocations.remove(&id) else {
                debug!("Freeing untracked allocation {}", id);
                return;
            };
            let size = if size > 0 { size } else { allocation.size };
            for element in allocation.charged.iter() {
                state.storage.arena_mut().memory_freed(*element, size);
                group_changed(&state.storage, *element, notifications);
            }
            state.stacks.release(allocation.charged);
        });
    }

    fn read_io(&self, rec_id: Option<&str>, caller: Option<&str>, thread_id: i64, bytes: i32, stream: StreamType) {
        self.account_io(rec_id, caller, thread_id, bytes, stream, false);
    }

    fn write_io(&self, rec_id: Option<&str>, caller: Option<&str>, thread_id: i64, bytes: i32, stream: StreamType) {
        self.account_io(rec_id, caller, thread_id, bytes, stream, true);
    }

    fn start_recording(&self, now: i64, thread_id: i64, thread_ticks: i64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let program = state.program;
        state
            .storage
            .arena_mut()
            .start_time_recording(program, now, thread_ticks, thread_id);
        if let Some(thread) = state.threads.get_mut(&thread_id) {
            thread.start_time_recording(thread_ticks);
        }
    }

    fn stop_time_recording(&self, now: i64, threads: ThreadsInfo) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let program = state.program;
        state
            .storage
            .arena_mut()
            .stop_time_recording(program, now, threads.ticks, -1);
        if let Some(thread) = state.threads.get_mut(&threads.thread_id) {
            thread.stop_time_recording(threads.ticks);
        }
    }

    fn finish_recording(&self, _now: i64, _thread_id: i64, cpu_times: &HashMap<i64, i64>) {
        self.with_state(|state, notifications| {
            let mut elapsed = 0;
            for (id, thread) in state.threads.iter_mut() {
                if let Some(ticks) = cpu_times.get(id) {
                    thread.end(*ticks);
                }
                elapsed += thread.total_use_time_ticks();
            }
            let program = state.program;
            if state.storage.arena().account_resource(program, ResourceType::CpuTime) {
                state.storage.arena_mut().set_cpu_time_ticks(program, elapsed);
                group_changed(&state.storage, program, notifications);
            }
        });
    }

    fn print_statistics(&self, data: &ProcessData) {
        let mut state = self.state.lock();
        if let Err(e) = self.write_statistics(&mut state, data) {
            warn!("Writing statistics failed: {}", e);
        }
    }

    fn print_current_state(&self, data: &ProcessData) {
        for listener in &self.listeners {
            listener.notify_burst_change(&data.system, &data.process);
            listener.measurements_changed(&data.system, &data.process);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.configure_formatter(state);
        let mut groups: Vec<(String, ElementId)> = state
            .storage
            .elements()
            .entries()
            .map(|(id, element)| (id.to_string(), element))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        let reported = state_groups(&state.storage, &groups);
        let total = state.storage.arena().snapshot(state.program);
        state.formatter.set_process_data(data, &total);
        let report = StateReport {
            program: &total,
            overhead: None,
            groups: &reported,
        };
        if let Err(e) = state.formatter.print_current_state_statistics(&report) {
            warn!("Writing current state failed: {}", e);
        }
    }

    fn notify_timer(&self, id: &str, state: TimerState, now: i64, thread_id: i64) {
        let key = if thread_id >= 0 {
            format!("{id}{thread_id}")
        } else {
            id.to_string()
        };
        self.with_state(|recording, notifications| match recording.timers.get_mut(&key) {
            Some(timer) => {
                if timer.handle_state(state, now) {
                    let value = timer.value();
                    notifications.push(|| Notification::TimerFinished { id: key, value });
                }
            }
            None => {
                if state == TimerState::Start {
                    recording.timers.insert(key, TimerInfo::new(now));
                }
            }
        });
    }

    fn notify_value_change(&self, id: &str, value: &MonitoredValue) {
        for listener in &self.listeners {
            listener.notify_value_change(id, value);
        }
    }

    fn notify_program_record_creation(&self) {
        self.with_state(|state, notifications| {
            notifications.push(|| Notification::GroupCreated {
                rec_id: PROGRAM_ID.to_string(),
                group: state.storage.arena().snapshot(state.program),
            });
        });
    }

    fn clear_temporary_data(&self) {
        self.state.lock().storage.clear_temporary_data();
    }

    fn end_system(&self) -> RecorderResult<()> {
        let mut state = self.state.lock();
        let live = state.allocations.len();
        if live > 0 {
            debug!("{} tagged allocations still live at shutdown", live);
        }
        state.formatter.clear()?;
        Ok(())
    }
}

//! Recorder elements
//!
//! A recorder element aggregates the resource consumption of one monitoring
//! group or configuration. Elements live in an [`ElementArena`] and refer to
//! each other through [`ElementId`]s; the arena implements the operations
//! that fan out across composite elements.
//!
//! [`ElementArena`]: crate::arena::ElementArena

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::group::{
    DebugState, GroupAccountingType, MonitoringGroupConfiguration, ResourceType, StreamType,
};

/// Sentinel for "not recording" start times and unset variability ids
pub const NOT_RECORDING: i64 = -1;

/// Variability id of elements that belong to no variability
pub const NO_VARIABILITY: i32 = -1;

/// Index of an element in its arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u32);

impl ElementId {
    pub fn new(index: usize) -> Self {
        ElementId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StartTimes {
    cpu: i64,
    system: i64,
}

impl StartTimes {
    const IDLE: StartTimes = StartTimes {
        cpu: NOT_RECORDING,
        system: NOT_RECORDING,
    };
}

/// Counters of a leaf element
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Counters {
    start_times: HashMap<i64, StartTimes>,
    cpu_time_ticks: i64,
    system_time_ticks: i64,
    mem_allocated: i64,
    mem_use: i64,
    net_in: i64,
    net_out: i64,
    file_in: i64,
    file_out: i64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts time recording for `thread_id`; a running recording is kept
    pub fn start_time_recording(&mut self, now: i64, thread_ticks: i64, thread_id: i64) -> bool {
        let entry = self.start_times.entry(thread_id).or_insert(StartTimes::IDLE);
        let mut recorded = false;
        if entry.cpu < 0 {
            entry.cpu = thread_ticks;
            recorded = true;
        }
        if entry.system < 0 {
            entry.system = now;
            recorded = true;
        }
        recorded
    }

    /// Stops time recording for `thread_id`, or for every thread if it is
    /// negative, and accumulates the elapsed time
    pub fn stop_time_recording(&mut self, now: i64, thread_ticks: i64, thread_id: i64) -> bool {
        if thread_id >= 0 {
            self.stop_thread(now, thread_ticks, thread_id)
        } else {
            let threads: Vec<i64> = self.start_times.keys().copied().collect();
            threads
                .into_iter()
                .fold(false, |recorded, thread| self.stop_thread(now, thread_ticks, thread) | recorded)
        }
    }

    fn stop_thread(&mut self, now: i64, thread_ticks: i64, thread_id: i64) -> bool {
        let entry = self.start_times.entry(thread_id).or_insert(StartTimes::IDLE);
        let mut recorded = false;
        if entry.cpu >= 0 {
            self.cpu_time_ticks += thread_ticks - entry.cpu;
            entry.cpu = NOT_RECORDING;
            recorded = true;
        }
        if entry.system >= 0 {
            self.system_time_ticks += now - entry.system;
            entry.system = NOT_RECORDING;
            recorded = true;
        }
        recorded
    }

    pub fn start_cpu_time(&self, thread_id: i64) -> i64 {
        self.start_times
            .get(&thread_id)
            .map_or(NOT_RECORDING, |times| times.cpu)
    }

    pub fn start_system_time(&self, thread_id: i64) -> i64 {
        self.start_times
            .get(&thread_id)
            .map_or(NOT_RECORDING, |times| times.system)
    }

    pub fn memory_allocated(&mut self, size: i64) {
        self.mem_use += size;
        self.mem_allocated += size;
    }

    pub fn memory_freed(&mut self, size: i64) {
        self.mem_use = (self.mem_use - size).max(0);
    }

    pub fn read_io(&mut self, bytes: i64, stream: StreamType) {
        match stream {
            StreamType::File => self.file_in += bytes,
            StreamType::Net => self.net_in += bytes,
            StreamType::None => {}
        }
    }

    pub fn write_io(&mut self, bytes: i64, stream: StreamType) {
        match stream {
            StreamType::File => self.file_out += bytes,
            StreamType::Net => self.net_out += bytes,
            StreamType::None => {}
        }
    }

    pub fn set_cpu_time_ticks(&mut self, ticks: i64) {
        self.cpu_time_ticks = ticks;
    }

    pub fn add_net_bytes(&mut self, net_in: i64, net_out: i64) {
        self.net_in += net_in;
        self.net_out += net_out;
    }

    /// Corrects the system time by `diff`. With `decrement`, a thread that is
    /// currently recording gives the time back instead.
    pub fn time_correction(&mut self, diff: i64, _thread_fraction: i64, decrement: bool, thread_id: i64) {
        if decrement {
            let entry = self.start_times.entry(thread_id).or_insert(StartTimes::IDLE);
            if entry.cpu > 0 && entry.system > 0 {
                if self.system_time_ticks > 0 {
                    self.system_time_ticks -= diff;
                }
            } else {
                self.system_time_ticks += diff;
            }
        } else {
            self.system_time_ticks += diff;
        }
    }

    pub fn was_recorded(&self) -> bool {
        self.cpu_time_ticks > 0 || self.system_time_ticks > 0
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            cpu_time_ticks: self.cpu_time_ticks,
            system_time_ticks: self.system_time_ticks,
            mem_allocated: self.mem_allocated,
            mem_use: self.mem_use,
            net_in: self.net_in,
            net_out: self.net_out,
            file_in: self.file_in,
            file_out: self.file_out,
            recorded: self.was_recorded(),
        }
    }
}

/// Sub-elements of a composite element
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub(crate) elements: Vec<Option<ElementId>>,
    pub(crate) distribute_values: bool,
    pub(crate) consider_contained: bool,
}

impl Composite {
    pub fn new(elements: Vec<Option<ElementId>>, distribute_values: bool, consider_contained: bool) -> Self {
        Self {
            elements,
            distribute_values,
            consider_contained,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ElementId> {
        self.elements.get(index).copied().flatten()
    }

    pub fn first(&self) -> Option<ElementId> {
        self.elements.iter().flatten().next().copied()
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains(&Some(id))
    }

    pub fn distribute_values(&self) -> bool {
        self.distribute_values
    }

    /// Grows the slot vector so that `index` fits, at least to `max` slots
    pub(crate) fn ensure_size(&mut self, index: usize, max: usize) {
        if index >= self.elements.len() {
            self.elements.resize(max.max(index + 1), None);
        }
    }
}

/// The concrete behavior of an element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    /// Leaf owning its counters
    Default(Counters),
    /// Excluded region, records nothing
    Blocking,
    /// Multi-group feeding the elements of its member groups
    Multiple(Composite),
    /// Configuration record broken down by variant
    Contributing(Composite),
    /// Per-instance leaf forwarding everything to its parent
    Instance { counters: Counters, parent: ElementId },
}

/// Target variants of [`ElementArena::convert_into`](crate::arena::ElementArena::convert_into)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementVariant {
    Default,
    Blocking,
    Multiple,
    Contributing,
}

/// Aggregation unit of one monitoring group or configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderElement {
    conf: Arc<MonitoringGroupConfiguration>,
    var_id: i32,
    kind: ElementKind,
}

impl RecorderElement {
    pub fn new(conf: Arc<MonitoringGroupConfiguration>, kind: ElementKind) -> Self {
        Self {
            conf,
            var_id: NO_VARIABILITY,
            kind,
        }
    }

    pub fn leaf(conf: Arc<MonitoringGroupConfiguration>) -> Self {
        Self::new(conf, ElementKind::Default(Counters::new()))
    }

    pub fn blocking(conf: Arc<MonitoringGroupConfiguration>) -> Self {
        Self::new(conf, ElementKind::Blocking)
    }

    pub fn configuration(&self) -> &Arc<MonitoringGroupConfiguration> {
        &self.conf
    }

    /// Replaces a stub configuration, keeps any other
    pub fn check_conf(&mut self, conf: &Arc<MonitoringGroupConfiguration>) {
        if self.conf.is_stub() {
            self.conf = Arc::clone(conf);
        }
    }

    pub fn var_id(&self) -> i32 {
        self.var_id
    }

    pub fn set_var_id(&mut self, var_id: i32) {
        self.var_id = var_id;
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ElementKind {
        &mut self.kind
    }

    pub(crate) fn with_kind(&self, kind: ElementKind) -> Self {
        Self {
            conf: Arc::clone(&self.conf),
            var_id: self.var_id,
            kind,
        }
    }

    pub fn variant(&self) -> ElementVariant {
        match self.kind {
            ElementKind::Default(_) | ElementKind::Instance { .. } => ElementVariant::Default,
            ElementKind::Blocking => ElementVariant::Blocking,
            ElementKind::Multiple(_) => ElementVariant::Multiple,
            ElementKind::Contributing(_) => ElementVariant::Contributing,
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.kind, ElementKind::Blocking)
    }

    pub fn composite(&self) -> Option<&Composite> {
        match &self.kind {
            ElementKind::Multiple(composite) | ElementKind::Contributing(composite) => Some(composite),
            _ => None,
        }
    }

    pub fn group_accounting(&self) -> GroupAccountingType {
        match self.kind {
            ElementKind::Blocking => GroupAccountingType::Direct,
            _ => self.conf.accounting(),
        }
    }

    pub fn resources(&self) -> &[ResourceType] {
        match self.kind {
            ElementKind::Blocking => ResourceType::SET_NONE,
            _ => self.conf.resources(),
        }
    }

    pub fn account_resource(&self, resource: ResourceType) -> bool {
        ResourceType::contains(self.resources(), resource)
    }

    /// Whether consumption propagates to enclosing groups. `Default`
    /// accounting defers to `global`.
    pub fn is_indirect_accounting(&self, global: GroupAccountingType) -> bool {
        let relevant = match self.group_accounting() {
            GroupAccountingType::Default => global,
            accounting => accounting,
        };
        relevant == GroupAccountingType::Indirect
    }

    /// Checks the element's own debug states
    pub fn has_own_debug_state(&self, state: DebugState) -> bool {
        !self.is_blocking() && self.conf.debug().contains(&state)
    }

    /// Multi-groups only exist to feed their members and are not reported
    pub fn is_visible(&self) -> bool {
        !matches!(self.kind, ElementKind::Multiple(_))
    }
}

/// Read-only view on the counters of a monitoring group
pub trait MonitoringGroup {
    fn cpu_time_ticks(&self) -> i64;
    fn system_time_ticks(&self) -> i64;
    fn mem_allocated(&self) -> i64;
    fn mem_use(&self) -> i64;
    fn net_in(&self) -> i64;
    fn net_out(&self) -> i64;
    fn file_in(&self) -> i64;
    fn file_out(&self) -> i64;
    fn was_recorded(&self) -> bool;

    fn io_read(&self) -> i64 {
        self.net_in() + self.file_in()
    }

    fn io_write(&self) -> i64 {
        self.net_out() + self.file_out()
    }
}

/// Counters of an element at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub cpu_time_ticks: i64,
    pub system_time_ticks: i64,
    pub mem_allocated: i64,
    pub mem_use: i64,
    pub net_in: i64,
    pub net_out: i64,
    pub file_in: i64,
    pub file_out: i64,
    pub recorded: bool,
}

impl GroupSnapshot {
    /// Adds the counters of `other`
    pub fn accumulate(&mut self, other: &GroupSnapshot) {
        self.cpu_time_ticks += other.cpu_time_ticks;
        self.system_time_ticks += other.system_time_ticks;
        self.mem_allocated += other.mem_allocated;
        self.mem_use += other.mem_use;
        self.net_in += other.net_in;
        self.net_out += other.net_out;
        self.file_in += other.file_in;
        self.file_out += other.file_out;
        self.recorded |= other.recorded;
    }
}

impl MonitoringGroup for GroupSnapshot {
    fn cpu_time_ticks(&self) -> i64 {
        self.cpu_time_ticks
    }

    fn system_time_ticks(&self) -> i64 {
        self.system_time_ticks
    }

    fn mem_allocated(&self) -> i64 {
        self.mem_allocated
    }

    fn mem_use(&self) -> i64 {
        self.mem_use
    }

    fn net_in(&self) -> i64 {
        self.net_in
    }

    fn net_out(&self) -> i64 {
        self.net_out
    }

    fn file_in(&self) -> i64 {
        self.file_in
    }

    fn file_out(&self) -> i64 {
        self.file_out
    }

    fn was_recorded(&self) -> bool {
        self.recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;

    fn conf() -> Arc<MonitoringGroupConfiguration> {
        MonitoringGroupConfiguration::default_for(&RecordingConfig::default())
    }

    #[test]
    fn test_reentrant_start_is_noop() {
        let mut counters = Counters::new();
        assert!(counters.start_time_recording(1_000, 100, 1));
        assert!(!counters.start_time_recording(1_500, 120, 1));
        assert!(counters.stop_time_recording(2_000, 140, 1));
        assert!(!counters.stop_time_recording(2_500, 160, 1));

        assert_eq!(counters.snapshot().cpu_time_ticks, 40);
        assert_eq!(counters.snapshot().system_time_ticks, 1_000);
        assert!(counters.was_recorded());
    }

    #[test]
    fn test_stop_all_threads() {
        let mut counters = Counters::new();
        counters.start_time_recording(0, 10, 1);
        counters.start_time_recording(0, 20, 2);
        assert!(counters.stop_time_recording(100, 50, -1));
        assert_eq!(counters.snapshot().cpu_time_ticks, 40 + 30);
        assert_eq!(counters.start_cpu_time(1), NOT_RECORDING);
        assert_eq!(counters.start_cpu_time(2), NOT_RECORDING);
    }

    #[test]
    fn test_memory_use_clamped() {
        let mut counters = Counters::new();
        counters.memory_allocated(100);
        counters.memory_freed(250);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.mem_use, 0);
        assert_eq!(snapshot.mem_allocated, 100);
    }

    #[test]
    fn test_io_by_stream() {
        let mut counters = Counters::new();
        counters.read_io(10, StreamType::File);
        counters.read_io(5, StreamType::Net);
        counters.write_io(7, StreamType::Net);
        counters.write_io(99, StreamType::None);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.io_read(), 15);
        assert_eq!(snapshot.io_write(), 7);
        assert_eq!(snapshot.file_out, 0);
    }

    #[test]
    fn test_time_correction_while_recording() {
        let mut counters = Counters::new();
        counters.start_time_recording(10, 10, 3);
        counters.time_correction(5, 0, true, 3);
        // nothing accumulated yet, so nothing to give back
        assert_eq!(counters.snapshot().system_time_ticks, 0);

        counters.time_correction(5, 0, false, 3);
        counters.time_correction(2, 0, true, 3);
        assert_eq!(counters.snapshot().system_time_ticks, 3);

        counters.time_correction(4, 0, true, 9);
        assert_eq!(counters.snapshot().system_time_ticks, 7);
    }

    #[test]
    fn test_blocking_accounts_nothing() {
        let element = RecorderElement::blocking(conf());
        assert!(!element.account_resource(ResourceType::CpuTime));
        assert!(!element.is_indirect_accounting(GroupAccountingType::Indirect));
        assert_eq!(element.group_accounting(), GroupAccountingType::Direct);
    }

    #[test]
    fn test_check_conf_replaces_stub_only() {
        let mut element = RecorderElement::leaf(MonitoringGroupConfiguration::stub());
        let real = conf();
        element.check_conf(&real);
        assert!(Arc::ptr_eq(element.configuration(), &real));

        let other = MonitoringGroupConfiguration::stub();
        element.check_conf(&other);
        assert!(Arc::ptr_eq(element.configuration(), &real));
    }

    #[test]
    fn test_composite_growth() {
        let mut composite = Composite::new(Vec::new(), false, false);
        composite.ensure_size(0, 3);
        assert_eq!(composite.len(), 3);
        composite.ensure_size(5, 3);
        assert_eq!(composite.len(), 6);
        assert!(composite.first().is_none());
    }

    proptest::proptest! {
        #[test]
        fn prop_nested_starts_keep_outer_interval(
            start in 0i64..1_000_000,
            nested in proptest::collection::vec(0i64..1_000, 0..8),
            length in 0i64..1_000_000,
        ) {
            let mut counters = Counters::new();
            proptest::prop_assert!(counters.start_time_recording(0, start, 7));
            for offset in nested {
                proptest::prop_assert!(!counters.start_time_recording(0, start + offset, 7));
            }
            proptest::prop_assert!(counters.stop_time_recording(0, start + length, 7));
            proptest::prop_assert_eq!(counters.snapshot().cpu_time_ticks, length);
        }
    }
}

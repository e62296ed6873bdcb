//! Element arena
//!
//! Owns every recorder element of a monitoring session. Elements are never
//! removed, so an [`ElementId`] stays valid for the whole run. Operations on
//! composites (multi-groups, contributing records) and instance elements
//! are resolved here because they touch more than one element.

use std::collections::HashMap;
use std::sync::Arc;

use crate::element::{
    Composite, Counters, ElementId, ElementKind, ElementVariant, GroupSnapshot, RecorderElement,
    NOT_RECORDING,
};
use crate::group::{DebugState, GroupAccountingType, MonitoringGroupConfiguration, ResourceType, StreamType};

/// Storage for all recorder elements of one session
#[derive(Debug, Clone)]
pub struct ElementArena {
    elements: Vec<RecorderElement>,
    instances: HashMap<(ElementId, i64), ElementId>,
    default_accounting: GroupAccountingType,
}

impl ElementArena {
    /// Creates an arena; `default_accounting` resolves `Default` accounting
    pub fn new(default_accounting: GroupAccountingType) -> Self {
        Self {
            elements: Vec::new(),
            instances: HashMap::new(),
            default_accounting,
        }
    }

    pub fn insert(&mut self, element: RecorderElement) -> ElementId {
        let id = ElementId::new(self.elements.len());
        self.elements.push(element);
        id
    }

    pub fn get(&self, id: ElementId) -> &RecorderElement {
        &self.elements[id.index()]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut RecorderElement {
        &mut self.elements[id.index()]
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn default_accounting(&self) -> GroupAccountingType {
        self.default_accounting
    }

    pub fn account_resource(&self, id: ElementId, resource: ResourceType) -> bool {
        self.get(id).account_resource(resource)
    }

    pub fn is_indirect_accounting(&self, id: ElementId) -> bool {
        self.get(id).is_indirect_accounting(self.default_accounting)
    }

    fn composite(&self, id: ElementId) -> Option<&Composite> {
        self.get(id).composite()
    }

    fn child_at(&self, id: ElementId, index: usize) -> Option<ElementId> {
        self.composite(id).and_then(|composite| composite.get(index))
    }

    fn child_count(&self, id: ElementId) -> usize {
        self.composite(id).map_or(0, Composite::len)
    }

    /// Whether a composite feeds `child` for `resource`
    fn enable_recording(&self, id: ElementId, child: ElementId, resource: ResourceType) -> bool {
        match &self.get(id).kind() {
            ElementKind::Multiple(composite) if composite.consider_contained => {
                self.account_resource(child, resource)
            }
            _ => true,
        }
    }

    /// Number of children sharing a distributed value, 0 when values are
    /// passed whole
    pub fn count_accountable(&self, id: ElementId, resource: ResourceType) -> usize {
        match self.composite(id) {
            Some(composite) if composite.distribute_values => composite
                .elements
                .iter()
                .flatten()
                .filter(|child| self.enable_recording(id, **child, resource))
                .count(),
            _ => 0,
        }
    }

    fn distribute(&self, id: ElementId, value: i64, resource: ResourceType) -> i64 {
        match self.count_accountable(id, resource) {
            0 => value,
            count => value / count as i64,
        }
    }

    /// Calls `op` for every child of composite `id` enabled for `resource`
    fn for_each_enabled<F>(&mut self, id: ElementId, resource: ResourceType, mut op: F) -> bool
    where
        F: FnMut(&mut Self, ElementId) -> bool,
    {
        let mut result = false;
        if !self.account_resource(id, resource) {
            return result;
        }
        for index in 0..self.child_count(id) {
            if let Some(child) = self.child_at(id, index) {
                if self.enable_recording(id, child, resource) {
                    result |= op(self, child);
                }
            }
        }
        result
    }

    /// Starts time recording; `false` if the element was already recording
    pub fn start_time_recording(&mut self, id: ElementId, now: i64, thread_ticks: i64, thread_id: i64) -> bool {
        match self.get_mut(id).kind_mut() {
            ElementKind::Default(counters) => counters.start_time_recording(now, thread_ticks, thread_id),
            ElementKind::Blocking => false,
            ElementKind::Instance { counters, parent } => {
                let parent = *parent;
                let result = counters.start_time_recording(now, thread_ticks, thread_id);
                self.start_time_recording(parent, now, thread_ticks, thread_id);
                result
            }
            ElementKind::Multiple(_) | ElementKind::Contributing(_) => {
                self.for_each_enabled(id, ResourceType::CpuTime, |arena, child| {
                    arena.start_time_recording(child, now, thread_ticks, thread_id)
                })
            }
        }
    }

    /// Stops time recording; `false` if the element was not recording
    pub fn stop_time_recording(&mut self, id: ElementId, now: i64, thread_ticks: i64, thread_id: i64) -> bool {
        match self.get_mut(id).kind_mut() {
            ElementKind::Default(counters) => counters.stop_time_recording(now, thread_ticks, thread_id),
            ElementKind::Blocking => false,
            ElementKind::Instance { counters, parent } => {
                let parent = *parent;
                let result = counters.stop_time_recording(now, thread_ticks, thread_id);
                self.stop_time_recording(parent, now, thread_ticks, thread_id);
                result
            }
            ElementKind::Multiple(_) | ElementKind::Contributing(_) => {
                let count = self.count_accountable(id, ResourceType::CpuTime) as i64;
                if count > 0 {
                    // every child receives the share of the first child's interval
                    let cpu_share = (thread_ticks - self.start_cpu_time(id, thread_id)) / count;
                    let system_share = (now - self.start_system_time(id, thread_id)) / count;
                    self.for_each_enabled(id, ResourceType::CpuTime, |arena, child| {
                        let child_now = arena.start_system_time(child, thread_id) + system_share;
                        let child_ticks = arena.start_cpu_time(child, thread_id) + cpu_share;
                        arena.stop_time_recording(child, child_now, child_ticks, thread_id)
                    })
                } else {
                    self.for_each_enabled(id, ResourceType::CpuTime, |arena, child| {
                        arena.stop_time_recording(child, now, thread_ticks, thread_id)
                    })
                }
            }
        }
    }

    /// Start cpu ticks of `thread_id`; composites report their first child
    pub fn start_cpu_time(&self, id: ElementId, thread_id: i64) -> i64 {
        match self.get(id).kind() {
            ElementKind::Default(counters) | ElementKind::Instance { counters, .. } => {
                counters.start_cpu_time(thread_id)
            }
            ElementKind::Blocking => NOT_RECORDING,
            ElementKind::Multiple(composite) | ElementKind::Contributing(composite) => composite
                .first()
                .map_or(0, |first| self.start_cpu_time(first, thread_id)),
        }
    }

    /// Start system time of `thread_id`; composites report their first child
    pub fn start_system_time(&self, id: ElementId, thread_id: i64) -> i64 {
        match self.get(id).kind() {
            ElementKind::Default(counters) | ElementKind::Instance { counters, .. } => {
                counters.start_system_time(thread_id)
            }
            ElementKind::Blocking => NOT_RECORDING,
            ElementKind::Multiple(composite) | ElementKind::Contributing(composite) => composite
                .first()
                .map_or(0, |first| self.start_system_time(first, thread_id)),
        }
    }

    /// Applies `leaf` to the element's own counters and forwards through
    /// instances and composites, dividing `value` when distributing
    fn apply<F>(&mut self, id: ElementId, resource: ResourceType, value: i64, leaf: F)
    where
        F: Fn(&mut Counters, i64) + Copy,
    {
        match self.get_mut(id).kind_mut() {
            ElementKind::Default(counters) => leaf(counters, value),
            ElementKind::Blocking => {}
            ElementKind::Instance { counters, parent } => {
                let parent = *parent;
                leaf(counters, value);
                self.apply(parent, resource, value, leaf);
            }
            ElementKind::Multiple(_) | ElementKind::Contributing(_) => {
                let value = self.distribute(id, value, resource);
                self.for_each_enabled(id, resource, |arena, child| {
                    arena.apply(child, resource, value, leaf);
                    false
                });
            }
        }
    }

    pub fn memory_allocated(&mut self, id: ElementId, size: i64) {
        self.apply(id, ResourceType::Memory, size, |counters, size| {
            counters.memory_allocated(size)
        });
    }

    pub fn memory_freed(&mut self, id: ElementId, size: i64) {
        self.apply(id, ResourceType::Memory, size, |counters, size| counters.memory_freed(size));
    }

    pub fn read_io(&mut self, id: ElementId, bytes: i64, stream: StreamType) {
        self.apply(id, stream.resource(), bytes, move |counters, bytes| {
            counters.read_io(bytes, stream)
        });
    }

    pub fn write_io(&mut self, id: ElementId, bytes: i64, stream: StreamType) {
        self.apply(id, stream.resource(), bytes, move |counters, bytes| {
            counters.write_io(bytes, stream)
        });
    }

    pub fn set_cpu_time_ticks(&mut self, id: ElementId, ticks: i64) {
        self.apply(id, ResourceType::CpuTime, ticks, |counters, ticks| {
            counters.set_cpu_time_ticks(ticks)
        });
    }

    /// Adds network bytes; never divided among composite children
    pub fn add_net_bytes(&mut self, id: ElementId, net_in: i64, net_out: i64) {
        match self.get_mut(id).kind_mut() {
            ElementKind::Default(counters) => counters.add_net_bytes(net_in, net_out),
            ElementKind::Blocking => {}
            ElementKind::Instance { counters, parent } => {
                let parent = *parent;
                counters.add_net_bytes(net_in, net_out);
                self.add_net_bytes(parent, net_in, net_out);
            }
            ElementKind::Multiple(_) | ElementKind::Contributing(_) => {
                self.for_each_enabled(id, ResourceType::NetIo, |arena, child| {
                    arena.add_net_bytes(child, net_in, net_out);
                    false
                });
            }
        }
    }

    pub fn time_correction(&mut self, id: ElementId, diff: i64, thread_fraction: i64, decrement: bool, thread_id: i64) {
        match self.get_mut(id).kind_mut() {
            ElementKind::Default(counters) => counters.time_correction(diff, thread_fraction, decrement, thread_id),
            ElementKind::Blocking => {}
            ElementKind::Instance { counters, parent } => {
                let parent = *parent;
                counters.time_correction(diff, thread_fraction, decrement, thread_id);
                self.time_correction(parent, diff, thread_fraction, decrement, thread_id);
            }
            ElementKind::Multiple(_) | ElementKind::Contributing(_) => {
                let (diff, thread_fraction) = match self.count_accountable(id, ResourceType::CpuTime) as i64 {
                    0 => (diff, thread_fraction),
                    count => (diff / count, thread_fraction / count),
                };
                self.for_each_enabled(id, ResourceType::CpuTime, |arena, child| {
                    arena.time_correction(child, diff, thread_fraction, decrement, thread_id);
                    false
                });
            }
        }
    }

    /// Current counters; composites sum over their children
    pub fn snapshot(&self, id: ElementId) -> GroupSnapshot {
        match self.get(id).kind() {
            ElementKind::Default(counters) | ElementKind::Instance { counters, .. } => counters.snapshot(),
            ElementKind::Blocking => GroupSnapshot::default(),
            ElementKind::Multiple(composite) | ElementKind::Contributing(composite) => {
                let mut total = GroupSnapshot::default();
                for child in composite.elements.iter().flatten() {
                    total.accumulate(&self.snapshot(*child));
                }
                total
            }
        }
    }

    pub fn was_recorded(&self, id: ElementId) -> bool {
        self.snapshot(id).recorded
    }

    pub fn has_debug_state(&self, id: ElementId, state: DebugState) -> bool {
        let element = self.get(id);
        match element.kind() {
            ElementKind::Multiple(composite) => {
                element.has_own_debug_state(state)
                    || composite
                        .elements
                        .iter()
                        .flatten()
                        .any(|child| self.has_debug_state(*child, state))
            }
            ElementKind::Contributing(composite) => composite
                .first()
                .is_some_and(|first| self.has_debug_state(first, state)),
            _ => element.has_own_debug_state(state),
        }
    }

    /// Number of variant slots of a contributing record
    pub fn contributing_size(&self, id: ElementId) -> usize {
        match self.get(id).kind() {
            ElementKind::Contributing(composite) => composite.len(),
            _ => 0,
        }
    }

    /// The sub-element at `index`. Contributing records return the slot, or
    /// themselves when `index` is out of range; every other variant returns
    /// itself.
    pub fn contributing(&self, id: ElementId, index: usize) -> Option<ElementId> {
        match self.get(id).kind() {
            ElementKind::Contributing(composite) if index < composite.len() => composite.get(index),
            _ => Some(id),
        }
    }

    /// Child at `index` of a composite, the composite itself out of range
    pub fn element_at(&self, id: ElementId, index: usize) -> Option<ElementId> {
        match self.composite(id) {
            Some(composite) if index < composite.len() => composite.get(index),
            _ => Some(id),
        }
    }

    pub fn has_element(&self, id: ElementId, child: ElementId) -> bool {
        self.composite(id).is_some_and(|composite| composite.contains(child))
    }

    /// Narrows a configuration record to the variant at `index`, creating the
    /// sub-element on first use. Returns the element to account to and
    /// whether it was created by this call.
    pub fn contributing_for(&mut self, id: ElementId, index: i32, max: usize) -> (ElementId, bool) {
        let index = match usize::try_from(index) {
            Ok(index) => index,
            Err(_) => return (id, false),
        };
        let conf = match self.get(id).kind() {
            ElementKind::Contributing(_) => Arc::clone(self.get(id).configuration()),
            _ => return (id, false),
        };
        if let Some(existing) = self.child_at(id, index) {
            return (existing, false);
        }

        let created = self.insert(RecorderElement::leaf(conf));
        if let ElementKind::Contributing(composite) = self.get_mut(id).kind_mut() {
            composite.ensure_size(index, max);
            composite.elements[index] = Some(created);
        }
        (created, true)
    }

    /// The instance element of `parent` for `instance_id`, created on first use
    pub fn instance(&mut self, parent: ElementId, instance_id: i64) -> ElementId {
        if let Some(existing) = self.instances.get(&(parent, instance_id)) {
            return *existing;
        }
        let conf = Arc::clone(self.get(parent).configuration());
        let id = self.insert(RecorderElement::new(
            conf,
            ElementKind::Instance {
                counters: Counters::new(),
                parent,
            },
        ));
        self.instances.insert((parent, instance_id), id);
        id
    }

    /// Instance elements of `parent`, sorted by instance id
    pub fn instances_of(&self, parent: ElementId) -> Vec<(i64, ElementId)> {
        let mut result: Vec<(i64, ElementId)> = self
            .instances
            .iter()
            .filter(|((owner, _), _)| *owner == parent)
            .map(|((_, instance), id)| (*instance, *id))
            .collect();
        result.sort_unstable();
        result
    }

    /// Deep copy of `id` as a new element. Contributing records copy their
    /// sub-elements, multi-groups share their members.
    pub fn copy(&mut self, id: ElementId) -> ElementId {
        let variant = self.get(id).variant();
        self.convert_into(id, variant)
    }

    /// Creates a new element of `target` variant carrying over the
    /// configuration, variability id and whatever state both variants share
    pub fn convert_into(&mut self, id: ElementId, target: ElementVariant) -> ElementId {
        let source = self.get(id).clone();
        let kind = match (source.kind(), target) {
            (ElementKind::Default(counters), ElementVariant::Default)
            | (ElementKind::Instance { counters, .. }, ElementVariant::Default) => {
                ElementKind::Default(counters.clone())
            }
            (_, ElementVariant::Default) => ElementKind::Default(Counters::new()),
            (_, ElementVariant::Blocking) => ElementKind::Blocking,
            (ElementKind::Multiple(composite), ElementVariant::Multiple)
            | (ElementKind::Contributing(composite), ElementVariant::Multiple) => {
                ElementKind::Multiple(composite.clone())
            }
            (_, ElementVariant::Multiple) => ElementKind::Multiple(Composite::new(Vec::new(), false, false)),
            (ElementKind::Multiple(composite), ElementVariant::Contributing)
            | (ElementKind::Contributing(composite), ElementVariant::Contributing) => {
                let mut copied = composite.clone();
                for slot in copied.elements.iter_mut() {
                    if let Some(child) = *slot {
                        *slot = Some(self.copy(child));
                    }
                }
                ElementKind::Contributing(copied)
            }
            (_, ElementVariant::Contributing) => {
                ElementKind::Contributing(Composite::new(Vec::new(), false, false))
            }
        };
        self.insert(source.with_kind(kind))
    }

    /// Creates a leaf for `conf`
    pub fn create_leaf(&mut self, conf: Arc<MonitoringGroupConfiguration>) -> ElementId {
        self.insert(RecorderElement::leaf(conf))
    }
}

//! Group and configuration registry
//!
//! [`RecorderElementMap`] maps class names and group ids to their elements
//! and tracks the active variability configuration. A configuration is a
//! vector holding one value per variability; every distinct vector gets its
//! own aggregate record, created when the configuration is first entered.
//!
//! Group ids of the form `name@variant` belong to the variability `name`.
//! Each new variant of a variability takes the value following the last one
//! handed out for that variability, so variants of one variability share a
//! vector position.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::arena::ElementArena;
use crate::config::RecordingConfig;
use crate::element::{Composite, ElementId, ElementKind, RecorderElement, NO_VARIABILITY};
use crate::group::{MonitoringGroupConfiguration, MonitoringGroupSettings};
use crate::listener::{Notification, Notifications};

/// Id of the whole-program record
pub const PROGRAM_ID: &str = "program";

/// Id of the group accounting the recorder's own overhead
pub const RECORDER_ID: &str = "*recorder*";

/// Id of the group accounting excluded regions
pub const EXCLUDED_ID: &str = "*excluded*";

/// Separates a variability name from the variant in a group id
pub const VARIABILITY_SEPARATOR: char = '@';

/// Separates ids in a configuration activation
pub const ID_SEPARATOR: char = ',';

/// Placeholder for configuration positions without an active variant
pub const NOT_AVAILABLE: &str = "N/A";

const UNSET: char = '\0';
const FIRST_VALUE: char = '\u{1}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PositionRecord {
    index: usize,
    value: char,
}

/// Creates elements for new groups and configuration records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementFactory {
    variant_contributions: bool,
}

impl ElementFactory {
    pub fn new(variant_contributions: bool) -> Self {
        Self { variant_contributions }
    }

    /// A contributing record when variant contributions are measured and
    /// `force_default` is not set, a leaf otherwise
    pub fn create(&self, conf: Arc<MonitoringGroupConfiguration>, force_default: bool) -> RecorderElement {
        if !force_default && self.variant_contributions {
            RecorderElement::new(conf, ElementKind::Contributing(Composite::new(Vec::new(), false, false)))
        } else {
            RecorderElement::leaf(conf)
        }
    }
}

/// Registry of monitoring groups and configuration records
#[derive(Debug)]
pub struct RecorderElementMap {
    factory: ElementFactory,
    default_conf: Arc<MonitoringGroupConfiguration>,
    multi_distribute_values: bool,
    multi_consider_contained: bool,
    class_name_to_id: HashMap<String, String>,
    mapped_classes: HashMap<String, ElementId>,
    recorder_ids: Vec<String>,
    mapped_configurations: HashMap<String, ElementId>,
    current_record: Option<ElementId>,
    id_to_configuration: BTreeMap<String, PositionRecord>,
    lru_records: HashMap<String, PositionRecord>,
    var_ids: HashMap<String, i32>,
    pseudo_elements: Vec<ElementId>,
    current: Vec<char>,
}

impl RecorderElementMap {
    pub fn new(settings: &RecordingConfig, default_conf: Arc<MonitoringGroupConfiguration>) -> Self {
        Self {
            factory: ElementFactory::new(settings.variant_contributions),
            default_conf,
            multi_distribute_values: settings.multi_distribute_values,
            multi_consider_contained: settings.multi_consider_contained,
            class_name_to_id: HashMap::new(),
            mapped_classes: HashMap::new(),
            recorder_ids: Vec::new(),
            mapped_configurations: HashMap::new(),
            current_record: None,
            id_to_configuration: BTreeMap::new(),
            lru_records: HashMap::new(),
            var_ids: HashMap::new(),
            pseudo_elements: Vec::new(),
            current: Vec::new(),
        }
    }

    pub fn factory(&self) -> ElementFactory {
        self.factory
    }

    /// The variability name of `rec_id`, if it has one
    pub fn variability_id(rec_id: &str) -> Option<&str> {
        match rec_id.find(VARIABILITY_SEPARATOR) {
            Some(pos) if pos > 0 => Some(&rec_id[..pos]),
            _ => None,
        }
    }

    /// Numeric id of the variability of `rec_id`, -1 if there is none
    pub fn variability_id_num(&self, rec_id: &str) -> i32 {
        Self::variability_id(rec_id)
            .and_then(|name| self.var_ids.get(name).copied())
            .unwrap_or(NO_VARIABILITY)
    }

    /// Registers `class_name` under `id` (or its own name if `id` is empty)
    /// and returns the group's element. A group registered before keeps its
    /// element and only replaces a placeholder configuration.
    ///
    /// With variant contributions on, ids of one variability (`name@variant`)
    /// share a configuration position. An id without `@` is keyed by its whole
    /// name, so each such id gets a position of its own instead of all of them
    /// sharing one.
    pub fn put(
        &mut self,
        arena: &mut ElementArena,
        class_name: Option<&str>,
        id: Option<&str>,
        conf: &Arc<MonitoringGroupConfiguration>,
        notifications: &mut Notifications,
    ) -> Option<ElementId> {
        let mapping_name = match id.filter(|id| !id.is_empty()) {
            Some(id) => {
                if let Some(class_name) = class_name {
                    self.class_name_to_id.insert(class_name.to_string(), id.to_string());
                }
                id
            }
            None => class_name?,
        };

        if let Some(existing) = self.mapped_classes.get(mapping_name).copied() {
            arena.get_mut(existing).check_conf(conf);
            return Some(existing);
        }

        let mut var_id = NO_VARIABILITY;
        let mut position = None;
        if self.factory.variant_contributions
            && mapping_name != RECORDER_ID
            && !self.id_to_configuration.contains_key(mapping_name)
        {
            self.recorder_ids.push(mapping_name.to_string());
            let (variability, num) = match Self::variability_id(mapping_name) {
                Some(name) => {
                    let next = self.var_ids.len() as i32;
                    (name, Some(*self.var_ids.entry(name.to_string()).or_insert(next)))
                }
                None => (mapping_name, None),
            };
            if let Some(num) = num {
                var_id = num;
            }

            let record = match self.lru_records.get(variability) {
                Some(last) => PositionRecord {
                    index: last.index,
                    value: next_value(last.value),
                },
                None => {
                    self.current.push(UNSET);
                    PositionRecord {
                        index: self.current.len() - 1,
                        value: FIRST_VALUE,
                    }
                }
            };
            self.lru_records.insert(variability.to_string(), record);
            self.id_to_configuration.insert(mapping_name.to_string(), record);
            position = Some(record);
            debug!(
                "Configuration position {} value {} for {}",
                record.index,
                u32::from(record.value),
                mapping_name
            );
        }

        let mut element = self.factory.create(Arc::clone(conf), true);
        element.set_var_id(var_id);
        let registered = arena.insert(element);
        self.mapped_classes.insert(mapping_name.to_string(), registered);

        notifications.push(|| {
            let rec_id = mapping_name.to_string();
            let group = arena.snapshot(registered);
            if position.is_some() {
                Notification::ConfigurationCreated { rec_id, group }
            } else {
                Notification::GroupCreated { rec_id, group }
            }
        });
        Some(registered)
    }

    /// Registers the multi-group `rec_id` feeding `elements`
    pub fn put_multiple(
        &mut self,
        arena: &mut ElementArena,
        rec_id: &str,
        elements: Vec<Option<ElementId>>,
        conf: &Arc<MonitoringGroupConfiguration>,
        settings: &MonitoringGroupSettings,
    ) -> ElementId {
        let distribute = settings.distribute_values.resolve(self.multi_distribute_values);
        let consider_contained = settings.consider_contained.resolve(self.multi_consider_contained);
        let element = RecorderElement::new(
            Arc::clone(conf),
            ElementKind::Multiple(Composite::new(elements, distribute, consider_contained)),
        );
        let id = arena.insert(element);
        self.mapped_classes.insert(rec_id.to_string(), id);
        self.pseudo_elements.push(id);
        id
    }

    /// Multi-groups in registration order
    pub fn pseudo_elements(&self) -> &[ElementId] {
        &self.pseudo_elements
    }

    fn set_current_configuration_record(&mut self, arena: &mut ElementArena) {
        let key = self.current_configuration_id();
        let record = match self.mapped_configurations.get(&key) {
            Some(record) => *record,
            None => {
                let record = arena.insert(self.factory.create(Arc::clone(&self.default_conf), false));
                self.mapped_configurations.insert(key, record);
                record
            }
        };
        self.current_record = Some(record);
    }

    /// Activates the variant `id`; returns whether the configuration changed
    pub fn enter_configuration(&mut self, arena: &mut ElementArena, id: &str) -> bool {
        match self.id_to_configuration.get(id).copied() {
            Some(position) if self.current[position.index] != position.value => {
                self.current[position.index] = position.value;
                self.set_current_configuration_record(arena);
                true
            }
            _ => false,
        }
    }

    /// Activates all variants in the comma separated `ids`. Unknown ids are
    /// registered first when `force` is set and skipped otherwise.
    pub fn enter_complete_configuration(
        &mut self,
        arena: &mut ElementArena,
        ids: &str,
        force: bool,
        notifications: &mut Notifications,
    ) -> bool {
        let mut changed = false;
        for id in ids.split(ID_SEPARATOR).map(str::trim).filter(|id| !id.is_empty()) {
            if force && !self.id_to_configuration.contains_key(id) {
                let default_conf = Arc::clone(&self.default_conf);
                self.put(arena, None, Some(id), &default_conf, notifications);
            }
            match self.id_to_configuration.get(id).copied() {
                Some(position) => {
                    if self.current[position.index] != position.value {
                        self.current[position.index] = position.value;
                        changed = true;
                    }
                }
                None => warn!("Configuration id not found: {}", id),
            }
        }
        if changed {
            self.set_current_configuration_record(arena);
        }
        changed
    }

    /// The record of the active configuration. With variant contributions
    /// the record is narrowed to the sub-element of `rec_id`'s position,
    /// created on first use.
    pub fn current_configuration_record(
        &self,
        arena: &mut ElementArena,
        rec_id: &str,
        notifications: &mut Notifications,
    ) -> Option<ElementId> {
        let record = self.current_record?;
        if !self.factory.variant_contributions {
            return Some(record);
        }
        let Some(position) = self.id_to_configuration.get(rec_id) else {
            return Some(record);
        };

        let (contribution, created) = arena.contributing_for(record, position.index as i32, self.current.len());
        if created {
            notifications.push(|| Notification::ContributionCreated {
                rec_id: rec_id.to_string(),
                contribution: self.configuration_mapping().name(position.index).to_string(),
                group: arena.snapshot(contribution),
            });
        }
        Some(contribution)
    }

    pub fn current_record(&self) -> Option<ElementId> {
        self.current_record
    }

    /// `rec_id` itself if it names a group, otherwise the registered variant
    /// id starting with `rec_id` that is currently active
    pub fn possible_aggregated_recorder_id(&self, rec_id: &str) -> String {
        if self.mapped_classes.contains_key(rec_id) {
            return rec_id.to_string();
        }
        self.id_to_configuration
            .iter()
            .find(|(id, position)| id.starts_with(rec_id) && self.current[position.index] == position.value)
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| rec_id.to_string())
    }

    /// Key of the active configuration
    pub fn current_configuration_id(&self) -> String {
        self.current.iter().collect()
    }

    /// Names of the variabilities and variants of the configuration vector
    pub fn configuration_mapping(&self) -> ConfigurationToName {
        let mut result = ConfigurationToName::new(self.current.len());
        for (id, position) in &self.id_to_configuration {
            result.put(id, position.index, position.value);
        }
        result
    }

    /// The group id `class_name` is registered under, if registered
    pub fn recorder_id(&self, class_name: &str) -> Option<&str> {
        let id = self
            .class_name_to_id
            .get(class_name)
            .map_or(class_name, String::as_str);
        self.mapped_classes.get_key_value(id).map(|(key, _)| key.as_str())
    }

    /// Reverse lookup of the id an element is registered under
    pub fn recorder_id_of(&self, element: ElementId) -> Option<&str> {
        self.mapped_classes
            .iter()
            .find(|(_, id)| **id == element)
            .map(|(key, _)| key.as_str())
    }

    pub fn contains_key(&self, rec_id: &str) -> bool {
        self.mapped_classes.contains_key(rec_id)
    }

    pub fn aggregated_record(&self, rec_id: &str) -> Option<ElementId> {
        self.mapped_classes.get(rec_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped_classes.is_empty()
    }

    /// Registered groups as (id, element) pairs, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = (&str, ElementId)> {
        self.mapped_classes.iter().map(|(key, id)| (key.as_str(), *id))
    }

    /// Ids taking part in configuration tracking, in registration order
    pub fn recorder_ids(&self) -> &[String] {
        &self.recorder_ids
    }

    /// Configuration records as (key, element) pairs, in no particular order
    pub fn configurations(&self) -> impl Iterator<Item = (&str, ElementId)> {
        self.mapped_configurations.iter().map(|(key, id)| (key.as_str(), *id))
    }

    /// Number of variabilities known so far; never decreases
    pub fn configuration_length(&self) -> usize {
        self.current.len()
    }

    /// Renders a configuration key as its values joined by `|`. With
    /// `check`, keys of another length or with unset positions give `None`.
    pub fn configuration_key_to_string(&self, key: &str, check: bool) -> Option<String> {
        if check && key.chars().count() != self.current.len() {
            return None;
        }
        let mut values = Vec::with_capacity(self.current.len());
        for value in key.chars().map(u32::from) {
            if check && value == 0 {
                return None;
            }
            values.push(value.to_string());
        }
        Some(values.join("|"))
    }
}

fn next_value(value: char) -> char {
    char::from_u32(u32::from(value) + 1).unwrap_or(char::REPLACEMENT_CHARACTER)
}

#[derive(Debug, Clone, Default)]
struct PositionNames {
    name: String,
    variants: HashMap<char, String>,
}

/// Human readable names of configuration positions and values
#[derive(Debug, Clone)]
pub struct ConfigurationToName {
    positions: Vec<Option<PositionNames>>,
    not_available: String,
}

impl ConfigurationToName {
    pub fn new(size: usize) -> Self {
        Self {
            positions: vec![None; size],
            not_available: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn set_not_available(&mut self, not_available: impl Into<String>) {
        self.not_available = not_available.into();
    }

    fn put(&mut self, id: &str, index: usize, value: char) {
        if index >= self.positions.len() {
            self.positions.resize(index + 1, None);
        }
        let entry = self.positions[index].get_or_insert_with(|| PositionNames {
            name: RecorderElementMap::variability_id(id).unwrap_or(id).to_string(),
            variants: HashMap::new(),
        });
        entry.variants.insert(value, id.to_string());
    }

    /// Names of all positions joined by `separator`
    pub fn configuration_headline(&self, separator: &str) -> String {
        self.positions
            .iter()
            .map(|entry| entry.as_ref().map_or(self.not_available.as_str(), |entry| entry.name.as_str()))
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Variant ids of `configuration` joined by `separator`
    pub fn format_configuration(&self, configuration: &str, separator: &str) -> String {
        configuration
            .chars()
            .zip(self.positions.iter())
            .map(|(value, entry)| {
                entry
                    .as_ref()
                    .and_then(|entry| entry.variants.get(&value))
                    .map_or(self.not_available.as_str(), String::as_str)
            })
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Name of the variability at `index`
    pub fn name(&self, index: usize) -> &str {
        self.positions
            .get(index)
            .and_then(Option::as_ref)
            .map_or(self.not_available.as_str(), |entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

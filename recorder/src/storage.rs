//! Strategy storage
//!
//! Owns the element arena and the group registry of one recording session
//! and implements group registration, including multi-groups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::arena::ElementArena;
use crate::config::RecordingConfig;
use crate::element::ElementId;
use crate::element_map::RecorderElementMap;
use crate::group::{MonitoringGroupConfiguration, MonitoringGroupSettings};
use crate::listener::Notifications;

/// State shared by all strategies of a session
#[derive(Debug)]
pub struct StrategyStorage {
    settings: RecordingConfig,
    default_conf: Arc<MonitoringGroupConfiguration>,
    arena: ElementArena,
    elements: RecorderElementMap,
    defaults: HashMap<String, ElementId>,
    group_configurations: HashMap<String, Arc<MonitoringGroupConfiguration>>,
    variability_detection: bool,
    reported: HashSet<(String, String)>,
}

impl StrategyStorage {
    pub fn new(settings: RecordingConfig) -> Self {
        let default_conf = MonitoringGroupConfiguration::default_for(&settings);
        Self {
            arena: ElementArena::new(settings.group_accounting),
            elements: RecorderElementMap::new(&settings, Arc::clone(&default_conf)),
            variability_detection: settings.configuration_detection,
            settings,
            default_conf,
            defaults: HashMap::new(),
            group_configurations: HashMap::new(),
            reported: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &RecordingConfig {
        &self.settings
    }

    pub fn default_configuration(&self) -> &Arc<MonitoringGroupConfiguration> {
        &self.default_conf
    }

    pub fn arena(&self) -> &ElementArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut ElementArena {
        &mut self.arena
    }

    pub fn elements(&self) -> &RecorderElementMap {
        &self.elements
    }

    /// Arena and registry borrowed together
    pub fn parts_mut(&mut self) -> (&mut ElementArena, &mut RecorderElementMap) {
        (&mut self.arena, &mut self.elements)
    }

    /// Creates an element through the registry's factory
    pub fn create(&mut self, conf: Arc<MonitoringGroupConfiguration>, force_default: bool) -> ElementId {
        let element = self.elements.factory().create(conf, force_default);
        self.arena.insert(element)
    }

    /// Resolves the accounting policy declared by `settings`
    pub fn resolve_configuration(&self, settings: &MonitoringGroupSettings) -> Arc<MonitoringGroupConfiguration> {
        MonitoringGroupConfiguration::from_settings(settings, &self.settings, &self.default_conf)
    }

    /// Policy a group id was registered with
    pub fn group_configuration(&self, rec_id: &str) -> Option<&Arc<MonitoringGroupConfiguration>> {
        self.group_configurations.get(rec_id)
    }

    /// Registers `class_name` for recording. More than one id in `settings`
    /// declares a multi-group named `rec_id` feeding the groups of those ids.
    pub fn register_for_recording(
        &mut self,
        class_name: &str,
        rec_id: Option<&str>,
        settings: &MonitoringGroupSettings,
        notifications: &mut Notifications,
    ) {
        if self.elements.contains_key(class_name) {
            return;
        }
        debug!("Mapping {} -> {:?}", class_name, settings.ids);
        let conf = self.resolve_configuration(settings);

        if settings.ids.len() > 1 {
            let multi_id = rec_id.unwrap_or(class_name);
            let mut members = Vec::with_capacity(settings.ids.len());
            for id in &settings.ids {
                let member_id = id.trim();
                let member_conf = match self.group_configurations.get(member_id).cloned() {
                    Some(member_conf) => {
                        if !conf.is_consistent(&member_conf) {
                            self.report_inconsistency(member_id, multi_id);
                        }
                        member_conf
                    }
                    None => MonitoringGroupConfiguration::stub(),
                };
                self.elements
                    .put(&mut self.arena, Some(class_name), Some(member_id), &member_conf, notifications);
                members.push(self.elements.aggregated_record(member_id));
            }
            self.elements
                .put_multiple(&mut self.arena, multi_id, members, &conf, settings);
            return;
        }

        let rec_id = settings.ids.first().map(|id| id.trim()).or(rec_id);
        self.elements
            .put(&mut self.arena, Some(class_name), rec_id, &conf, notifications);
        let out_id = rec_id.filter(|id| !id.is_empty()).unwrap_or(class_name);
        self.group_configurations
            .insert(out_id.to_string(), Arc::clone(&conf));

        if self.elements.pseudo_elements().is_empty() {
            return;
        }
        let Some(element) = self.elements.aggregated_record(out_id) else {
            return;
        };
        let element_conf = Arc::clone(self.arena.get(element).configuration());
        let inconsistent = self.elements.pseudo_elements().iter().any(|multi| {
            self.arena.has_element(*multi, element)
                && !self.arena.get(*multi).configuration().is_consistent(&element_conf)
        });
        if inconsistent {
            self.report_inconsistency(out_id, "at least one multiple group");
        }
    }

    fn report_inconsistency(&mut self, rec_id: &str, other: &str) {
        if self.reported.insert((rec_id.to_string(), other.to_string())) {
            warn!(
                "Monitoring group configuration of {} is not consistent with {}",
                rec_id, other
            );
        }
    }

    /// Registers an element reachable by id without being a group
    pub fn register_default(&mut self, rec_id: &str, element: ElementId) {
        self.defaults.insert(rec_id.to_string(), element);
    }

    /// Element of a group id, falling back to the default elements
    pub fn recorder_element(&self, rec_id: &str) -> Option<ElementId> {
        self.elements
            .aggregated_record(rec_id)
            .or_else(|| self.defaults.get(rec_id).copied())
    }

    pub fn recorder_id(&self, class_name: &str) -> Option<&str> {
        self.elements.recorder_id(class_name)
    }

    pub fn enable_variability_detection(&mut self, enable: bool) {
        self.variability_detection = enable;
    }

    pub fn is_variability_detection_enabled(&self) -> bool {
        self.variability_detection
    }

    /// Forgets which inconsistencies were already reported
    pub fn clear_temporary_data(&mut self) {
        self.reported.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementKind, MonitoringGroup};
    use crate::group::{BooleanValue, GroupAccountingType, ResourceType};

    fn storage() -> StrategyStorage {
        StrategyStorage::new(RecordingConfig::default())
    }

    fn register(storage: &mut StrategyStorage, class_name: &str, rec_id: Option<&str>, settings: &MonitoringGroupSettings) {
        storage.register_for_recording(class_name, rec_id, settings, &mut Notifications::default());
    }

    #[test]
    fn test_register_single_group() {
        let mut storage = storage();
        register(&mut storage, "app.Foo", None, &MonitoringGroupSettings::default());
        assert!(storage.recorder_element("app.Foo").is_some());

        let settings = MonitoringGroupSettings::with_ids([" db "]);
        register(&mut storage, "app.Dao", None, &settings);
        assert!(storage.recorder_element("db").is_some());
        assert_eq!(storage.recorder_id("app.Dao"), Some("db"));
        assert!(storage.group_configuration("db").is_some());
    }

    #[test]
    fn test_register_multi_group() {
        let mut storage = storage();
        register(&mut storage, "app.A", None, &MonitoringGroupSettings::with_ids(["a"]));
        let mut settings = MonitoringGroupSettings::with_ids(["a", "b"]);
        settings.distribute_values = BooleanValue::False;
        register(&mut storage, "app.AB", Some("ab"), &settings);

        let multi = storage.recorder_element("ab").unwrap();
        let a = storage.recorder_element("a").unwrap();
        let b = storage.recorder_element("b").unwrap();
        assert!(storage.arena().has_element(multi, a));
        assert!(storage.arena().has_element(multi, b));
        assert!(!storage.arena().get(multi).is_visible());
        match storage.arena().get(multi).kind() {
            ElementKind::Multiple(composite) => assert!(!composite.distribute_values()),
            other => panic!("unexpected kind {other:?}"),
        }

        // b was unknown and waits for its real configuration
        assert!(storage.arena().get(b).configuration().is_stub());
        register(&mut storage, "app.B", None, &MonitoringGroupSettings::with_ids(["b"]));
        assert!(!storage.arena().get(b).configuration().is_stub());

        storage.arena_mut().memory_allocated(multi, 10);
        assert_eq!(storage.arena().snapshot(a).mem_allocated(), 10);
        assert_eq!(storage.arena().snapshot(b).mem_allocated(), 10);
    }

    #[test]
    fn test_inconsistent_members_are_reported_once() {
        let mut storage = storage();
        let mut indirect = MonitoringGroupSettings::with_ids(["a"]);
        indirect.accounting = Some(GroupAccountingType::Indirect);
        register(&mut storage, "app.A", None, &indirect);

        let mut settings = MonitoringGroupSettings::with_ids(["a", "b"]);
        settings.resources = vec![ResourceType::Memory];
        register(&mut storage, "app.AB", Some("ab"), &settings);
        assert_eq!(storage.reported.len(), 1);
        storage.clear_temporary_data();
        assert!(storage.reported.is_empty());
    }

    #[test]
    fn test_defaults_fallback() {
        let mut storage = storage();
        let conf = Arc::clone(storage.default_configuration());
        let program = storage.create(conf, true);
        storage.register_default("program", program);
        assert_eq!(storage.recorder_element("program"), Some(program));
        assert_eq!(storage.recorder_element("missing"), None);
        assert!(storage.is_variability_detection_enabled());
        storage.enable_variability_detection(false);
        assert!(!storage.is_variability_detection_enabled());
    }
}

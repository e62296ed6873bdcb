//! Notification contract towards plugins
//!
//! Listeners are informed synchronously by the in-process strategy. Every
//! method has a no-op default so a listener implements only what it needs.
//! Callbacks raised while the recording state is locked are queued in
//! [`Notifications`] and delivered after the lock is released, so a listener
//! may call back into the strategy.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::element::{GroupSnapshot, MonitoringGroup};
use crate::error::WireError;
use crate::process_data::Measurements;

/// Type tag of a monitored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Double,
    Float,
    Int,
    Long,
    Char,
    Boolean,
    Short,
    Byte,
    String,
    Object,
}

impl ValueType {
    pub const VALUES: [ValueType; 10] = [
        ValueType::Double,
        ValueType::Float,
        ValueType::Int,
        ValueType::Long,
        ValueType::Char,
        ValueType::Boolean,
        ValueType::Short,
        ValueType::Byte,
        ValueType::String,
        ValueType::Object,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, WireError> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| Self::VALUES.get(index).copied())
            .ok_or(WireError::InvalidOrdinal { kind: "value type", ordinal })
    }
}

/// A value reported by the instrumented program. Objects travel as their
/// textual representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum MonitoredValue {
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Char(char),
    Boolean(bool),
    Short(i16),
    Byte(i8),
    String(Option<String>),
    Object(Option<String>),
}

impl MonitoredValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            MonitoredValue::Double(_) => ValueType::Double,
            MonitoredValue::Float(_) => ValueType::Float,
            MonitoredValue::Int(_) => ValueType::Int,
            MonitoredValue::Long(_) => ValueType::Long,
            MonitoredValue::Char(_) => ValueType::Char,
            MonitoredValue::Boolean(_) => ValueType::Boolean,
            MonitoredValue::Short(_) => ValueType::Short,
            MonitoredValue::Byte(_) => ValueType::Byte,
            MonitoredValue::String(_) => ValueType::String,
            MonitoredValue::Object(_) => ValueType::Object,
        }
    }
}

impl fmt::Display for MonitoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitoredValue::Double(value) => write!(f, "{value}"),
            MonitoredValue::Float(value) => write!(f, "{value}"),
            MonitoredValue::Int(value) => write!(f, "{value}"),
            MonitoredValue::Long(value) => write!(f, "{value}"),
            MonitoredValue::Char(value) => write!(f, "{value}"),
            MonitoredValue::Boolean(value) => write!(f, "{value}"),
            MonitoredValue::Short(value) => write!(f, "{value}"),
            MonitoredValue::Byte(value) => write!(f, "{value}"),
            MonitoredValue::String(value) | MonitoredValue::Object(value) => {
                write!(f, "{}", value.as_deref().unwrap_or("null"))
            }
        }
    }
}

/// Receives change and creation notifications of a recording session
pub trait RecordingListener: Send + Sync {
    /// Counters of a monitoring group changed
    fn monitoring_group_changed(&self, _group: &dyn MonitoringGroup) {}

    /// Counters of the active configuration record changed
    fn configuration_changed(&self, _group: &dyn MonitoringGroup) {}

    /// A monitoring group element was created for `rec_id`
    fn monitoring_group_created(&self, _rec_id: &str, _group: &dyn MonitoringGroup) {}

    /// A group taking part in configuration tracking was created
    fn configuration_created(&self, _rec_id: &str, _group: &dyn MonitoringGroup) {}

    /// The per-variant sub-element `contribution` of a configuration record
    /// was created for `rec_id`
    fn contribution_created(&self, _rec_id: &str, _contribution: &str, _group: &dyn MonitoringGroup) {}

    /// A user timer finished with `value`
    fn timer_finished(&self, _id: &str, _value: i64) {}

    /// The instrumented program reported a value
    fn notify_value_change(&self, _id: &str, _value: &MonitoredValue) {}

    /// A new burst of system and process measurements is available
    fn notify_burst_change(&self, _system: &Measurements, _process: &Measurements) {}

    /// System and process measurements were updated
    fn measurements_changed(&self, _system: &Measurements, _process: &Measurements) {}
}

/// A listener callback waiting for delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    GroupChanged(GroupSnapshot),
    ConfigurationChanged(GroupSnapshot),
    GroupCreated {
        rec_id: String,
        group: GroupSnapshot,
    },
    ConfigurationCreated {
        rec_id: String,
        group: GroupSnapshot,
    },
    ContributionCreated {
        rec_id: String,
        contribution: String,
        group: GroupSnapshot,
    },
    TimerFinished {
        id: String,
        value: i64,
    },
}

impl Notification {
    pub fn deliver(&self, listener: &dyn RecordingListener) {
        match self {
            Notification::GroupChanged(group) => listener.monitoring_group_changed(group),
            Notification::ConfigurationChanged(group) => listener.configuration_changed(group),
            Notification::GroupCreated { rec_id, group } => listener.monitoring_group_created(rec_id, group),
            Notification::ConfigurationCreated { rec_id, group } => listener.configuration_created(rec_id, group),
            Notification::ContributionCreated {
                rec_id,
                contribution,
                group,
            } => listener.contribution_created(rec_id, contribution, group),
            Notification::TimerFinished { id, value } => listener.timer_finished(id, *value),
        }
    }
}

/// Callbacks collected under the recording lock. A disabled queue drops
/// everything without building it.
#[derive(Debug, Default)]
pub struct Notifications {
    enabled: bool,
    pending: Vec<Notification>,
}

impl Notifications {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            pending: Vec::new(),
        }
    }

    /// A queue collecting only when there is someone to deliver to
    pub fn for_listeners(listeners: &[Arc<dyn RecordingListener>]) -> Self {
        Self::new(!listeners.is_empty())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queues the notification built by `notification`
    pub fn push(&mut self, notification: impl FnOnce() -> Notification) {
        if self.enabled {
            self.pending.push(notification());
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[Notification] {
        &self.pending
    }

    /// Delivers the queued notifications in order
    pub fn deliver(self, listeners: &[Arc<dyn RecordingListener>]) {
        for notification in &self.pending {
            for listener in listeners {
                notification.deliver(listener.as_ref());
            }
        }
    }
}

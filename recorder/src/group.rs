//! Monitoring group vocabulary
//!
//! Resource kinds, stream kinds, debug states, accounting modes and the
//! immutable accounting policy attached to every recorder element.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RecordingConfig;
use crate::error::WireError;

/// A resource that can be accounted to a monitoring group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    None,
    All,
    CpuTime,
    Memory,
    FileIo,
    NetIo,
}

impl ResourceType {
    /// All variants in ordinal order
    pub const VALUES: [ResourceType; 6] = [
        ResourceType::None,
        ResourceType::All,
        ResourceType::CpuTime,
        ResourceType::Memory,
        ResourceType::FileIo,
        ResourceType::NetIo,
    ];

    /// Resource set accounting everything
    pub const SET_ALL: &'static [ResourceType] = &[ResourceType::All];

    /// Resource set accounting nothing
    pub const SET_NONE: &'static [ResourceType] = &[ResourceType::None];

    /// Checks `resource` against a resource set. A set holding only `None`
    /// contains nothing, a set holding only `All` contains everything.
    pub fn contains(resources: &[ResourceType], resource: ResourceType) -> bool {
        match resources {
            [ResourceType::None] => false,
            [ResourceType::All] => true,
            _ => resources.contains(&resource),
        }
    }

    /// Restricts `target` to the resources in `source`. `All` and `None`
    /// sets pass unchanged, as does anything restricted by an `All` source;
    /// an empty intersection becomes `{None}`.
    pub fn ensure_subset(source: &[ResourceType], target: &[ResourceType]) -> Vec<ResourceType> {
        match (source, target) {
            (_, [] | [ResourceType::All] | [ResourceType::None]) | ([ResourceType::All], _) => target.to_vec(),
            _ => {
                let subset: Vec<ResourceType> = source
                    .iter()
                    .copied()
                    .filter(|resource| target.contains(resource))
                    .collect();
                if subset.is_empty() {
                    vec![ResourceType::None]
                } else {
                    subset
                }
            }
        }
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, WireError> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| Self::VALUES.get(index).copied())
            .ok_or(WireError::InvalidOrdinal { kind: "resource type", ordinal })
    }
}

/// The kind of stream an I/O event happened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    None,
    Net,
    File,
}

impl StreamType {
    /// The resource accounting this stream, `None` for untyped streams
    pub fn resource(self) -> ResourceType {
        match self {
            StreamType::None => ResourceType::None,
            StreamType::Net => ResourceType::NetIo,
            StreamType::File => ResourceType::FileIo,
        }
    }

    /// Name used on the wire
    pub fn name(self) -> &'static str {
        match self {
            StreamType::None => "NONE",
            StreamType::Net => "NET",
            StreamType::File => "FILE",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, WireError> {
        match name {
            "NONE" => Ok(StreamType::None),
            "NET" => Ok(StreamType::Net),
            "FILE" => Ok(StreamType::File),
            _ => Err(WireError::InvalidOrdinal { kind: "stream type", ordinal: -1 }),
        }
    }
}

/// Events for which a group may emit debug output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugState {
    Configuration,
    MemoryFree,
    MethodEnter,
    MethodExit,
    MemoryAllocation,
    NetIn,
    NetOut,
    FileIn,
    FileOut,
}

impl DebugState {
    pub const VALUES: [DebugState; 9] = [
        DebugState::Configuration,
        DebugState::MemoryFree,
        DebugState::MethodEnter,
        DebugState::MethodExit,
        DebugState::MemoryAllocation,
        DebugState::NetIn,
        DebugState::NetOut,
        DebugState::FileIn,
        DebugState::FileOut,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, WireError> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| Self::VALUES.get(index).copied())
            .ok_or(WireError::InvalidOrdinal { kind: "debug state", ordinal })
    }
}

/// How resource consumption is attributed along the call stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAccountingType {
    /// Use the global setting
    Default,
    /// Only the innermost group accrues
    Direct,
    /// Every enclosing group on the stack accrues as well
    Indirect,
    /// Like direct, restricted to the group's own code
    Local,
}

impl GroupAccountingType {
    pub const VALUES: [GroupAccountingType; 4] = [
        GroupAccountingType::Default,
        GroupAccountingType::Direct,
        GroupAccountingType::Indirect,
        GroupAccountingType::Local,
    ];

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, WireError> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|index| Self::VALUES.get(index).copied())
            .ok_or(WireError::InvalidOrdinal { kind: "group accounting", ordinal })
    }
}

/// A tri-state flag that may defer to a global default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanValue {
    #[default]
    Default,
    True,
    False,
}

impl BooleanValue {
    pub fn resolve(self, default: bool) -> bool {
        match self {
            BooleanValue::Default => default,
            BooleanValue::True => true,
            BooleanValue::False => false,
        }
    }

    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(ordinal: i32) -> Result<Self, WireError> {
        match ordinal {
            0 => Ok(BooleanValue::Default),
            1 => Ok(BooleanValue::True),
            2 => Ok(BooleanValue::False),
            _ => Err(WireError::InvalidOrdinal { kind: "boolean value", ordinal }),
        }
    }
}

impl From<bool> for BooleanValue {
    fn from(value: bool) -> Self {
        if value {
            BooleanValue::True
        } else {
            BooleanValue::False
        }
    }
}

/// Registration settings of a monitoring group as declared at an instrumentation site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringGroupSettings {
    /// Group ids; more than one id declares a multi-group
    #[serde(default)]
    pub ids: Vec<String>,

    /// Debug states
    #[serde(default)]
    pub debug: Vec<DebugState>,

    /// Accounting mode, `None` for the global default
    #[serde(default)]
    pub accounting: Option<GroupAccountingType>,

    /// Accounted resources, empty for the global default
    #[serde(default)]
    pub resources: Vec<ResourceType>,

    /// Whether multi-groups divide values among their members
    #[serde(default)]
    pub distribute_values: BooleanValue,

    /// Whether multi-groups only feed members accounting a resource
    #[serde(default)]
    pub consider_contained: BooleanValue,
}

impl MonitoringGroupSettings {
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Marks the two shared sentinel configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationKind {
    Regular,
    /// The global default policy
    Default,
    /// Placeholder until the real policy is known
    Stub,
}

/// Immutable accounting policy of a monitoring group
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringGroupConfiguration {
    accounting: GroupAccountingType,
    resources: Vec<ResourceType>,
    debug: Vec<DebugState>,
    kind: ConfigurationKind,
}

impl MonitoringGroupConfiguration {
    /// The global default policy derived from the recording settings
    pub fn default_for(settings: &RecordingConfig) -> Arc<Self> {
        Arc::new(Self {
            accounting: settings.group_accounting,
            resources: settings.default_group_resources.clone(),
            debug: Vec::new(),
            kind: ConfigurationKind::Default,
        })
    }

    /// A placeholder replaced by the first real configuration
    pub fn stub() -> Arc<Self> {
        Arc::new(Self {
            accounting: GroupAccountingType::Default,
            resources: Vec::new(),
            debug: Vec::new(),
            kind: ConfigurationKind::Stub,
        })
    }

    /// Resolves a declared policy against the recording settings. Resources
    /// are restricted to the accountable ones, `Default` accounting becomes
    /// the global mode and a global `Local` mode overrides everything.
    /// Returns `default` itself if the result equals it.
    pub fn create(
        debug: &[DebugState],
        accounting: Option<GroupAccountingType>,
        resources: &[ResourceType],
        settings: &RecordingConfig,
        default: &Arc<Self>,
    ) -> Arc<Self> {
        let mut resources = ResourceType::ensure_subset(&settings.accountable_resources, resources);
        if resources.is_empty() {
            resources = settings.default_group_resources.clone();
        }

        let mut accounting = accounting.unwrap_or(GroupAccountingType::Default);
        if settings.group_accounting == GroupAccountingType::Local {
            accounting = GroupAccountingType::Local;
        } else if accounting == GroupAccountingType::Local {
            accounting = GroupAccountingType::Default;
        }
        if accounting == GroupAccountingType::Default {
            accounting = settings.group_accounting;
        }

        if accounting == default.accounting && resources == default.resources && debug.is_empty() {
            return Arc::clone(default);
        }
        Arc::new(Self {
            accounting,
            resources,
            debug: debug.to_vec(),
            kind: ConfigurationKind::Regular,
        })
    }

    /// Resolves registration settings, see [`MonitoringGroupConfiguration::create`]
    pub fn from_settings(
        group: &MonitoringGroupSettings,
        settings: &RecordingConfig,
        default: &Arc<Self>,
    ) -> Arc<Self> {
        Self::create(&group.debug, group.accounting, &group.resources, settings, default)
    }

    pub fn accounting(&self) -> GroupAccountingType {
        self.accounting
    }

    pub fn resources(&self) -> &[ResourceType] {
        &self.resources
    }

    pub fn debug(&self) -> &[DebugState] {
        &self.debug
    }

    pub fn kind(&self) -> ConfigurationKind {
        self.kind
    }

    pub fn is_stub(&self) -> bool {
        self.kind == ConfigurationKind::Stub
    }

    pub fn is_default(&self) -> bool {
        self.kind == ConfigurationKind::Default
    }

    /// Two policies are consistent if accounting and resources agree
    pub fn is_consistent(&self, other: &MonitoringGroupConfiguration) -> bool {
        self.accounting == other.accounting && self.resources == other.resources
    }
}

impl fmt::Display for MonitoringGroupConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?}", self.accounting, self.resources)?;
        if !self.debug.is_empty() {
            write!(f, " debug {:?}", self.debug)?;
        }
        Ok(())
    }
}

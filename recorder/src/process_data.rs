//! System and process measurements
//!
//! [`ProcessData`] pairs a system-wide and a process [`Measurements`]
//! snapshot. [`ProcessSampler`] fills them from `sysinfo` and hands out one
//! pooled snapshot per output interval.

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::debug;

use crate::pool::{ObjectPool, Poolable, Pooled};

/// Status bit: file I/O figures are included
pub const STATUS_FILE: i32 = 1;

/// Status bit: network I/O figures are included
pub const STATUS_NET: i32 = 2;

/// Load, memory and I/O figures of the system or the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub min_load: f64,
    pub avg_load: f64,
    pub load: f64,
    pub max_load: f64,
    pub min_mem_use: i64,
    pub avg_mem_use: f64,
    pub mem_use: f64,
    pub max_mem_use: i64,
    pub system_time: i64,
    pub io_read: i64,
    pub io_write: i64,
    /// Combination of [`STATUS_FILE`] and [`STATUS_NET`]
    pub status: i32,
}

impl Default for Measurements {
    fn default() -> Self {
        Self {
            min_load: f64::MAX,
            avg_load: 0.0,
            load: 0.0,
            max_load: f64::MIN_POSITIVE,
            min_mem_use: i64::MAX,
            avg_mem_use: 0.0,
            mem_use: 0.0,
            max_mem_use: i64::MIN,
            system_time: 0,
            io_read: 0,
            io_write: 0,
            status: 0,
        }
    }
}

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets min values to their maximum and max values to their minimum
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn copy_from(&mut self, other: &Measurements) {
        self.clone_from(other);
    }

    /// Records the current load and widens the min/max range
    pub fn set_min_max_load(&mut self, load: f64) {
        self.min_load = self.min_load.min(load);
        self.max_load = self.max_load.max(load);
        self.load = load;
    }

    /// Records the current memory use and widens the min/max range
    pub fn set_min_max_mem_use(&mut self, mem_use: i64) {
        self.min_mem_use = self.min_mem_use.min(mem_use);
        self.max_mem_use = self.max_mem_use.max(mem_use);
        self.mem_use = mem_use as f64;
    }

    pub fn has_status(&self, flag: i32) -> bool {
        self.status & flag != 0
    }

    pub fn set_status_flag(&mut self, flag: i32, enabled: bool) {
        if enabled {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }
}

/// System and process snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessData {
    pub system: Measurements,
    pub process: Measurements,
}

impl ProcessData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copy_from(&mut self, other: &ProcessData) {
        self.system.copy_from(&other.system);
        self.process.copy_from(&other.process);
    }
}

impl Poolable for ProcessData {
    fn create() -> Self {
        ProcessData::new()
    }

    fn clear(&mut self) {
        self.system.clear();
        self.process.clear();
    }
}

/// Idle snapshots kept by a sampler
const SNAPSHOT_POOL_SIZE: usize = 4;

/// Samples system and process figures through `sysinfo`
pub struct ProcessSampler {
    system: System,
    pid: Option<Pid>,
    samples: u32,
    totals: ProcessData,
    snapshots: ObjectPool<ProcessData>,
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(reason) => {
                debug!("Process figures unavailable: {}", reason);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
            samples: 0,
            totals: ProcessData::new(),
            snapshots: ObjectPool::new(SNAPSHOT_POOL_SIZE),
        }
    }

    /// Takes one more sample and returns the running figures in a pooled
    /// record; the record goes back to the pool when dropped
    pub fn interval(&mut self) -> Pooled<ProcessData> {
        let mut totals = std::mem::take(&mut self.totals);
        self.sample(&mut totals);
        self.totals = totals;
        let mut snapshot = self.snapshots.acquire();
        snapshot.copy_from(&self.totals);
        snapshot
    }

    /// Records waiting for the next interval
    pub fn idle_snapshots(&self) -> usize {
        self.snapshots.idle()
    }

    /// Adds one sample to `data`, keeping running averages over all samples
    pub fn sample(&mut self, data: &mut ProcessData) {
        self.system.refresh_memory();
        self.samples += 1;
        let samples = f64::from(self.samples);

        let load = System::load_average().one;
        let system = &mut data.system;
        system.set_min_max_load(load);
        system.avg_load += (load - system.avg_load) / samples;
        let used = i64::try_from(self.system.used_memory()).unwrap_or(i64::MAX);
        system.set_min_max_mem_use(used);
        system.avg_mem_use += (used as f64 - system.avg_mem_use) / samples;

        let Some(pid) = self.pid else {
            return;
        };
        if !self.system.refresh_process(pid) {
            return;
        }
        if let Some(process) = self.system.process(pid) {
            let process_data = &mut data.process;
            let cpu = f64::from(process.cpu_usage()) / 100.0;
            process_data.set_min_max_load(cpu);
            process_data.avg_load += (cpu - process_data.avg_load) / samples;
            let memory = i64::try_from(process.memory()).unwrap_or(i64::MAX);
            process_data.set_min_max_mem_use(memory);
            process_data.avg_mem_use += (memory as f64 - process_data.avg_mem_use) / samples;
            process_data.system_time = i64::try_from(process.run_time())
                .unwrap_or(i64::MAX)
                .saturating_mul(1_000_000_000);

            let disk = process.disk_usage();
            process_data.io_read = i64::try_from(disk.total_read_bytes).unwrap_or(i64::MAX);
            process_data.io_write = i64::try_from(disk.total_written_bytes).unwrap_or(i64::MAX);
            process_data.set_status_flag(STATUS_FILE, true);
            process_data.set_status_flag(STATUS_NET, false);
        }
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }
}

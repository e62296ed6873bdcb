//! Report output
//!
//! The in-process strategy feeds its aggregates through a [`ResultFormatter`].
//! [`TabFormatter`] writes one tab separated line per row, suitable for
//! spreadsheets and `cut`.

use std::fmt::Display;
use std::io::{self, Write};

use chrono::Utc;

use crate::element::{GroupSnapshot, MonitoringGroup};
use crate::process_data::{Measurements, ProcessData, STATUS_FILE, STATUS_NET};
use crate::thread_data::ThreadData;

/// Section markers of a statistics report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoCategory {
    /// Follows the headline when thread data is included
    Threaded,
    /// Starts the comparison against system and process figures
    Breakdown,
    /// Starts the per-configuration records
    Configurations,
}

/// Groups reported in one current-state line
#[derive(Debug, Clone, Copy)]
pub struct StateReport<'a> {
    pub program: &'a GroupSnapshot,
    pub overhead: Option<&'a GroupSnapshot>,
    pub groups: &'a [(String, GroupSnapshot)],
}

/// Renders statistics rows to an output stream
pub trait ResultFormatter: Send {
    /// Attaches the output stream; nothing is written before this call
    fn configure(&mut self, out: Box<dyn Write + Send>, show_percentages: bool);

    fn is_configured(&self) -> bool;

    /// Process figures and the program totals percentages refer to
    fn set_process_data(&mut self, data: &ProcessData, total: &GroupSnapshot);

    fn print_headline(&mut self) -> io::Result<()>;

    fn print_info(&mut self, info: InfoCategory) -> io::Result<()>;

    fn print_thread_data(&mut self, description: &str, thread: &ThreadData) -> io::Result<()>;

    fn print_individual(&mut self, description: Option<&str>, individual: &dyn MonitoringGroup) -> io::Result<()>;

    fn print_process_statistics(&mut self) -> io::Result<()>;

    /// Compares `individual` against the system (`system`) or the process
    /// figures; without an individual the process is compared to the system
    fn print_compare(
        &mut self,
        description: &str,
        individual: Option<&dyn MonitoringGroup>,
        system: bool,
    ) -> io::Result<()>;

    fn print_current_state_statistics(&mut self, state: &StateReport<'_>) -> io::Result<()>;

    /// Column legend of the current-state lines
    fn print_current_state_statistics_footer(&mut self, state: &StateReport<'_>) -> io::Result<()>;

    /// Flushes and detaches the output stream
    fn clear(&mut self) -> io::Result<()>;
}

/// Tab separated [`ResultFormatter`]
pub struct TabFormatter {
    out: Option<Box<dyn Write + Send>>,
    separator: char,
    show_percentages: bool,
    data: ProcessData,
    total: GroupSnapshot,
}

impl Default for TabFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TabFormatter {
    pub fn new() -> Self {
        Self {
            out: None,
            separator: '\t',
            show_percentages: false,
            data: ProcessData::new(),
            total: GroupSnapshot::default(),
        }
    }

    fn cell(&mut self, value: impl Display) -> io::Result<()> {
        let separator = self.separator;
        match self.out.as_mut() {
            Some(out) => write!(out, "{value}{separator}"),
            None => Ok(()),
        }
    }

    fn blank(&mut self, count: usize) -> io::Result<()> {
        for _ in 0..count {
            self.cell("")?;
        }
        Ok(())
    }

    fn line_end(&mut self) -> io::Result<()> {
        match self.out.as_mut() {
            Some(out) => writeln!(out),
            None => Ok(()),
        }
    }

    fn percent(&mut self, value: f64) -> io::Result<()> {
        self.cell(format!("{value:.2}%"))
    }

    fn ratio(&mut self, fraction: f64, total: f64) -> io::Result<()> {
        if self.show_percentages {
            let cell = format!("{fraction:.2} ({:.2}%)", percentage(fraction, total));
            self.cell(cell)
        } else {
            self.cell(format!("{fraction:.2}"))
        }
    }

    fn ratio_int(&mut self, fraction: i64, total: i64) -> io::Result<()> {
        if self.show_percentages {
            let cell = format!("{fraction} ({:.2}%)", percentage(fraction as f64, total as f64));
            self.cell(cell)
        } else {
            self.cell(fraction)
        }
    }

    /// I/O read of `measurements`, completed by the program totals for the
    /// stream kinds the measurements do not cover
    fn io_read(&self, measurements: &Measurements) -> i64 {
        let mut result = measurements.io_read;
        if !measurements.has_status(STATUS_FILE) {
            result += self.total.file_in;
        }
        if !measurements.has_status(STATUS_NET) {
            result += self.total.net_in;
        }
        result
    }

    fn io_write(&self, measurements: &Measurements) -> i64 {
        let mut result = measurements.io_write;
        if !measurements.has_status(STATUS_FILE) {
            result += self.total.file_out;
        }
        if !measurements.has_status(STATUS_NET) {
            result += self.total.net_out;
        }
        result
    }

    fn time_fraction(&self, individual: &dyn MonitoringGroup) -> f64 {
        if self.total.cpu_time_ticks == 0 {
            0.0
        } else {
            individual.cpu_time_ticks() as f64 / self.total.cpu_time_ticks as f64
        }
    }

    fn measurement_rows(&mut self, description: &str, process: bool) -> io::Result<()> {
        let measure = if process {
            self.data.process.clone()
        } else {
            self.data.system.clone()
        };
        let rows = [
            ("min", measure.min_mem_use as f64, None, measure.min_load),
            ("avg", measure.avg_mem_use, Some(&measure), measure.avg_load),
            ("max", measure.max_mem_use as f64, None, measure.max_load),
        ];
        for (suffix, mem_use, io, load) in rows {
            self.cell(format!("{description} {suffix}"))?;
            self.cell(format!("{mem_use:.2}"))?;
            self.blank(4)?;
            match io {
                Some(measure) => {
                    let read = self.io_read(measure);
                    let write = self.io_write(measure);
                    self.cell(read)?;
                    self.blank(2)?;
                    self.cell(write)?;
                }
                None => self.blank(4)?,
            }
            self.blank(3)?;
            self.percent(load)?;
            self.line_end()?;
        }
        Ok(())
    }

    fn measurement_state(&mut self, process: bool) -> io::Result<()> {
        let measure = if process {
            self.data.process.clone()
        } else {
            self.data.system.clone()
        };
        let read = self.io_read(&measure);
        let write = self.io_write(&measure);
        self.cell(measure.system_time)?;
        self.cell(format!("{:.2}", measure.avg_mem_use))?;
        self.cell(read)?;
        self.cell(write)?;
        self.cell(format!("{:.2}", measure.avg_load))
    }

    fn group_state(&mut self, group: Option<&GroupSnapshot>) -> io::Result<()> {
        match group {
            Some(group) => {
                self.cell(group.system_time_ticks)?;
                self.cell(group.mem_allocated)?;
                self.cell(group.mem_use)?;
                self.cell(group.io_read())?;
                self.cell(group.net_in)?;
                self.cell(group.file_in)?;
                self.cell(group.io_write())?;
                self.cell(group.net_out)?;
                self.cell(group.file_out)
            }
            None => self.blank(9),
        }
    }

    fn group_legend(&mut self, description: &str) -> io::Result<()> {
        for column in [
            description,
            "sys time",
            "mem alloc",
            "mem use",
            "io read",
            "net read",
            "file read",
            "io write",
            "net write",
            "file write",
        ] {
            self.cell(column)?;
        }
        Ok(())
    }

    fn measurement_legend(&mut self, description: &str) -> io::Result<()> {
        for column in [description, "sys time", "mem use", "io read", "io write", "avg load"] {
            self.cell(column)?;
        }
        Ok(())
    }
}

fn percentage(fraction: f64, total: f64) -> f64 {
    if total == 0.0 || fraction == 0.0 {
        0.0
    } else {
        fraction / total * 100.0
    }
}

impl ResultFormatter for TabFormatter {
    fn configure(&mut self, out: Box<dyn Write + Send>, show_percentages: bool) {
        self.out = Some(out);
        self.show_percentages = show_percentages;
    }

    fn is_configured(&self) -> bool {
        self.out.is_some()
    }

    fn set_process_data(&mut self, data: &ProcessData, total: &GroupSnapshot) {
        self.data.copy_from(data);
        self.total = *total;
    }

    fn print_headline(&mut self) -> io::Result<()> {
        for column in [
            "description",
            "mem use",
            "mem alloc",
            "sys time",
            "agg sys time",
            "cpu time",
            "in",
            "netin",
            "filein",
            "out",
            "netout",
            "filout",
            "process load",
            "sys load",
        ] {
            self.cell(column)?;
        }
        self.line_end()
    }

    fn print_info(&mut self, info: InfoCategory) -> io::Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        match info {
            InfoCategory::Threaded => writeln!(out, " (threaded)"),
            InfoCategory::Breakdown => writeln!(out, "\n\nBREAKDOWN"),
            InfoCategory::Configurations => writeln!(out, "\n\nCONFIGURATIONS"),
        }
    }

    fn print_thread_data(&mut self, description: &str, thread: &ThreadData) -> io::Result<()> {
        self.cell(description)?;
        self.blank(4)?;
        self.cell(thread.cpu_time_ticks())?;
        self.blank(8)?;
        self.line_end()
    }

    fn print_individual(&mut self, description: Option<&str>, individual: &dyn MonitoringGroup) -> io::Result<()> {
        if let Some(description) = description {
            self.cell(description)?;
        }
        let total = self.total;
        self.ratio_int(individual.mem_use(), total.mem_use)?;
        self.ratio_int(individual.mem_allocated(), total.mem_allocated)?;
        self.cell(individual.system_time_ticks())?;
        self.cell(0)?;
        self.ratio_int(individual.cpu_time_ticks(), total.cpu_time_ticks)?;
        self.ratio_int(individual.io_read(), total.io_read())?;
        self.ratio_int(individual.net_in(), total.net_in)?;
        self.ratio_int(individual.file_in(), total.file_in)?;
        self.ratio_int(individual.io_write(), total.io_write())?;
        self.ratio_int(individual.net_out(), total.net_out)?;
        self.ratio_int(individual.file_out(), total.file_out)?;
        let fraction = self.time_fraction(individual);
        self.percent(100.0 * fraction)?;
        self.percent(self.data.process.avg_load * fraction)?;
        self.line_end()
    }

    fn print_process_statistics(&mut self) -> io::Result<()> {
        self.measurement_rows("System", false)?;
        self.measurement_rows("Process", true)
    }

    fn print_compare(
        &mut self,
        description: &str,
        individual: Option<&dyn MonitoringGroup>,
        system: bool,
    ) -> io::Result<()> {
        let process = self.data.process.clone();
        let sys = self.data.system.clone();
        self.cell(description)?;
        match individual {
            None => {
                self.ratio(process.avg_mem_use, sys.avg_mem_use)?;
                self.blank(4)?;
                let (read, sys_read) = (self.io_read(&process), self.io_read(&sys));
                self.ratio_int(read, sys_read)?;
                self.blank(2)?;
                let (write, sys_write) = (self.io_write(&process), self.io_write(&sys));
                self.ratio_int(write, sys_write)?;
                self.blank(2)?;
                self.percent(process.avg_load)?;
                self.percent(sys.avg_load)?;
            }
            Some(individual) => {
                let reference = if system { &sys } else { &process };
                let (read, write) = (self.io_read(reference), self.io_write(reference));
                self.ratio(individual.mem_use() as f64, reference.avg_mem_use)?;
                self.cell(individual.mem_allocated())?;
                self.cell(individual.system_time_ticks())?;
                self.cell(0)?;
                self.cell(individual.cpu_time_ticks())?;
                self.ratio_int(individual.io_read(), read)?;
                self.cell(individual.net_in())?;
                self.cell(individual.file_in())?;
                self.ratio_int(individual.io_write(), write)?;
                self.cell(individual.net_out())?;
                self.cell(individual.file_out())?;
                let fraction = self.time_fraction(individual);
                if system {
                    self.blank(1)?;
                    self.percent(process.avg_load * fraction)?;
                } else {
                    self.percent(fraction * 100.0)?;
                    self.blank(1)?;
                }
            }
        }
        self.line_end()
    }

    fn print_current_state_statistics(&mut self, state: &StateReport<'_>) -> io::Result<()> {
        self.cell(Utc::now().timestamp_millis())?;
        self.blank(1)?;
        self.measurement_state(false)?;
        self.blank(1)?;
        self.measurement_state(true)?;
        self.blank(1)?;
        self.group_state(Some(state.program))?;
        self.blank(1)?;
        self.group_state(state.overhead)?;
        self.blank(1)?;
        for (_, group) in state.groups {
            self.group_state(Some(group))?;
            self.blank(1)?;
        }
        self.line_end()
    }

    fn print_current_state_statistics_footer(&mut self, state: &StateReport<'_>) -> io::Result<()> {
        self.cell("current ms")?;
        self.measurement_legend("sys")?;
        self.measurement_legend("process")?;
        self.group_legend("program")?;
        self.group_legend("overhead")?;
        for (id, _) in state.groups {
            self.group_legend(id)?;
        }
        self.line_end()?;
        self.line_end()
    }

    fn clear(&mut self) -> io::Result<()> {
        let result = match self.out.as_mut() {
            Some(out) => out.flush(),
            None => Ok(()),
        };
        self.out = None;
        self.show_percentages = false;
        self.data = ProcessData::new();
        self.total = GroupSnapshot::default();
        result
    }
}

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tallyman_recorder::formatter::{InfoCategory, StateReport};
use tallyman_recorder::{GroupSnapshot, MonitoringGroup, ProcessData, ResultFormatter, TabFormatter, ThreadData};

/// In-memory sink that can be read while a strategy still holds a clone
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Tab formatter writing into a [`SharedBuffer`] instead of the stream the
/// strategy opens
pub struct CapturingFormatter {
    inner: TabFormatter,
    buffer: SharedBuffer,
}

impl CapturingFormatter {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self {
            inner: TabFormatter::new(),
            buffer,
        }
    }
}

impl ResultFormatter for CapturingFormatter {
    fn configure(&mut self, _out: Box<dyn Write + Send>, show_percentages: bool) {
        self.inner.configure(Box::new(self.buffer.clone()), show_percentages);
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    fn set_process_data(&mut self, data: &ProcessData, total: &GroupSnapshot) {
        self.inner.set_process_data(data, total);
    }

    fn print_headline(&mut self) -> io::Result<()> {
        self.inner.print_headline()
    }

    fn print_info(&mut self, info: InfoCategory) -> io::Result<()> {
        self.inner.print_info(info)
    }

    fn print_thread_data(&mut self, description: &str, thread: &ThreadData) -> io::Result<()> {
        self.inner.print_thread_data(description, thread)
    }

    fn print_individual(&mut self, description: Option<&str>, individual: &dyn MonitoringGroup) -> io::Result<()> {
        self.inner.print_individual(description, individual)
    }

    fn print_process_statistics(&mut self) -> io::Result<()> {
        self.inner.print_process_statistics()
    }

    fn print_compare(
        &mut self,
        description: &str,
        individual: Option<&dyn MonitoringGroup>,
        system: bool,
    ) -> io::Result<()> {
        self.inner.print_compare(description, individual, system)
    }

    fn print_current_state_statistics(&mut self, state: &StateReport<'_>) -> io::Result<()> {
        self.inner.print_current_state_statistics(state)
    }

    fn print_current_state_statistics_footer(&mut self, state: &StateReport<'_>) -> io::Result<()> {
        self.inner.print_current_state_statistics_footer(state)
    }

    fn clear(&mut self) -> io::Result<()> {
        self.inner.clear()
    }
}

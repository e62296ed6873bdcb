use parking_lot::Mutex;
use tallyman_recorder::{MonitoredValue, MonitoringGroup, RecordingListener};

/// Listener remembering timer, value and creation notifications
#[derive(Default)]
pub struct TimerListener {
    finished: Mutex<Vec<(String, i64)>>,
    values: Mutex<Vec<(String, MonitoredValue)>>,
    created: Mutex<Vec<String>>,
    contributions: Mutex<Vec<(String, String)>>,
}

impl TimerListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> Vec<(String, i64)> {
        self.finished.lock().clone()
    }

    pub fn values(&self) -> Vec<(String, MonitoredValue)> {
        self.values.lock().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    /// (group id, variability name) of every contribution created
    pub fn contributions(&self) -> Vec<(String, String)> {
        self.contributions.lock().clone()
    }
}

impl RecordingListener for TimerListener {
    fn monitoring_group_created(&self, rec_id: &str, _group: &dyn MonitoringGroup) {
        self.created.lock().push(rec_id.to_string());
    }

    fn contribution_created(&self, rec_id: &str, contribution: &str, _group: &dyn MonitoringGroup) {
        self.contributions
            .lock()
            .push((rec_id.to_string(), contribution.to_string()));
    }

    fn timer_finished(&self, id: &str, value: i64) {
        self.finished.lock().push((id.to_string(), value));
    }

    fn notify_value_change(&self, id: &str, value: &MonitoredValue) {
        self.values.lock().push((id.to_string(), value.clone()));
    }
}

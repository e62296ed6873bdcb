//! End-to-end behavior of the recorder strategies through their public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tallyman_recorder::{
    DefaultRecorderStrategy, EventRecorderStrategy, GroupAccountingType, Measurements, MonitoringGroup,
    MonitoringGroupSettings, ProcessData, RecorderConfig, RecorderStrategy, RecordingListener, TabFormatter,
    ThreadsInfo, TimerState, PROGRAM_ID,
};

fn thread(ticks: i64) -> ThreadsInfo {
    ThreadsInfo::new(1, ticks)
}

#[derive(Default)]
struct MeasurementCounter {
    bursts: AtomicUsize,
    changes: AtomicUsize,
}

impl RecordingListener for MeasurementCounter {
    fn notify_burst_change(&self, _system: &Measurements, _process: &Measurements) {
        self.bursts.fetch_add(1, Ordering::SeqCst);
    }

    fn measurements_changed(&self, _system: &Measurements, _process: &Measurements) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener reading the strategy back from inside its callbacks
#[derive(Default)]
struct QueryingListener {
    strategy: OnceLock<Weak<DefaultRecorderStrategy>>,
    timers: Mutex<Vec<(String, i64, Option<i64>, usize)>>,
    program_reads: AtomicUsize,
}

impl QueryingListener {
    fn strategy(&self) -> Option<Arc<DefaultRecorderStrategy>> {
        self.strategy.get().and_then(Weak::upgrade)
    }
}

impl RecordingListener for QueryingListener {
    fn monitoring_group_changed(&self, _group: &dyn MonitoringGroup) {
        if let Some(strategy) = self.strategy() {
            if strategy.snapshot(PROGRAM_ID).is_some() {
                self.program_reads.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn timer_finished(&self, id: &str, value: i64) {
        if let Some(strategy) = self.strategy() {
            let stored = strategy.timer(id).map(|timer| timer.value());
            let pending = strategy.pending_allocations();
            self.timers.lock().push((id.to_string(), value, stored, pending));
        }
    }
}

#[test]
fn test_listeners_can_query_the_strategy() {
    let listener = Arc::new(QueryingListener::default());
    let listeners: Vec<Arc<dyn RecordingListener>> = vec![listener.clone()];
    let strategy = Arc::new(DefaultRecorderStrategy::with_listeners(
        &RecorderConfig::default(),
        Box::new(TabFormatter::new()),
        listeners,
    ));
    assert!(listener.strategy.set(Arc::downgrade(&strategy)).is_ok());
    strategy.register_for_recording("app.Dao", None, &MonitoringGroupSettings::with_ids(["db"]));

    let (done, finished) = mpsc::channel();
    let worker = Arc::clone(&strategy);
    thread::spawn(move || {
        worker.notify_timer("t", TimerState::Start, 0, -1);
        worker.notify_timer("t", TimerState::Finish, 10, -1);
        worker.memory_allocated(Some("db"), 1, 3, 64);
        let _ = done.send(());
    });
    finished
        .recv_timeout(Duration::from_secs(5))
        .expect("listener callbacks blocked on the strategy lock");

    assert_eq!(*listener.timers.lock(), vec![("t".to_string(), 10, Some(10), 0)]);
    assert_eq!(listener.program_reads.load(Ordering::SeqCst), 2);
    assert_eq!(strategy.pending_allocations(), 1);
}

#[test]
fn test_configuration_record_follows_variant() {
    let strategy = DefaultRecorderStrategy::new(&RecorderConfig::default());
    strategy.register_for_recording("app.Postgres", None, &MonitoringGroupSettings::with_ids(["db@pg"]));

    strategy.enter(Some("db@pg"), 0, thread(10), false);
    strategy.exit(Some("db@pg"), 5, thread(40), false);

    assert_eq!(strategy.snapshot("db@pg").unwrap().cpu_time_ticks, 30);
    let record = strategy.inspect(|storage| {
        let record = storage.elements().current_record().expect("active configuration");
        storage.arena().snapshot(record)
    });
    assert_eq!(record.cpu_time_ticks, 30);
    assert!(record.recorded);
}

#[test]
fn test_tagged_allocation_freed_through_buffer() {
    let delegate = Arc::new(DefaultRecorderStrategy::new(&RecorderConfig::default()));
    let strategy = EventRecorderStrategy::delegating(delegate.clone()).unwrap();
    for (class_name, id) in [("app.Service", "service"), ("app.Cache", "cache")] {
        let mut settings = MonitoringGroupSettings::with_ids([id]);
        settings.accounting = Some(GroupAccountingType::Indirect);
        strategy.register_for_recording(class_name, None, &settings);
    }

    strategy.enter(Some("service"), 0, thread(1), false);
    strategy.enter(Some("cache"), 0, thread(2), false);
    strategy.memory_allocated(Some("cache"), 1, 42, 100);
    strategy.exit(Some("cache"), 0, thread(3), false);
    strategy.exit(Some("service"), 0, thread(4), false);
    strategy.memory_freed_by_id(42, 0);
    strategy.end_system().unwrap();

    assert_eq!(delegate.pending_allocations(), 0);
    for id in ["service", "cache", PROGRAM_ID] {
        let snapshot = delegate.snapshot(id).unwrap();
        assert_eq!(snapshot.mem_allocated, 100, "{id}");
        assert_eq!(snapshot.mem_use, 0, "{id}");
    }
}

#[test]
fn test_current_state_notifies_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RecorderConfig::default();
    config.output.out_file = Some(dir.path().join("state.tsv").display().to_string());
    let counter = Arc::new(MeasurementCounter::default());
    let listeners: Vec<Arc<dyn RecordingListener>> = vec![counter.clone()];
    let strategy = DefaultRecorderStrategy::with_listeners(&config, Box::new(TabFormatter::new()), listeners);

    strategy.print_current_state(&ProcessData::new());
    strategy.print_current_state(&ProcessData::new());
    strategy.end_system().unwrap();

    assert_eq!(counter.bursts.load(Ordering::SeqCst), 2);
    assert_eq!(counter.changes.load(Ordering::SeqCst), 2);
    assert!(dir.path().join("state.tsv").exists());
}

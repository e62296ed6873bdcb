use std::sync::Arc;

use proptest::prelude::*;
use tallyman_recorder::arena::ElementArena;
use tallyman_recorder::element::{Composite, ElementKind};
use tallyman_recorder::group::MonitoringGroupConfiguration;
use tallyman_recorder::listener::Notifications;
use tallyman_recorder::{
    DefaultRecorderStrategy, ElementId, GroupAccountingType, MonitoringGroupSettings, RecorderConfig,
    RecorderElement, RecorderElementMap, RecorderStrategy, RecordingConfig, RecordingListener, ResourceType,
    ThreadData, ThreadsInfo, TimerInfo, TimerState, PROGRAM_ID,
};

use crate::mocks::{CapturingFormatter, SharedBuffer, TimerListener};
use crate::test_setup;

const ALL_RESOURCES: [ResourceType; 6] = [
    ResourceType::None,
    ResourceType::All,
    ResourceType::CpuTime,
    ResourceType::Memory,
    ResourceType::FileIo,
    ResourceType::NetIo,
];

fn default_conf() -> Arc<MonitoringGroupConfiguration> {
    MonitoringGroupConfiguration::default_for(&RecordingConfig::default())
}

fn thread(ticks: i64) -> ThreadsInfo {
    ThreadsInfo::new(1, ticks)
}

#[test]
fn test_reentrant_start_keeps_outer_interval() {
    test_setup!("reentrancy");
    let mut arena = ElementArena::new(GroupAccountingType::Direct);
    let leaf = arena.create_leaf(default_conf());

    assert!(arena.start_time_recording(leaf, 0, 100, 1));
    assert!(!arena.start_time_recording(leaf, 5, 120, 1));
    assert!(arena.stop_time_recording(leaf, 10, 150, 1));
    assert!(!arena.stop_time_recording(leaf, 12, 170, 1));

    let snapshot = arena.snapshot(leaf);
    assert_eq!(snapshot.cpu_time_ticks, 50);
    assert_eq!(snapshot.system_time_ticks, 10);
    assert!(snapshot.recorded);
}

#[test]
fn test_threads_record_independently() {
    let mut arena = ElementArena::new(GroupAccountingType::Direct);
    let leaf = arena.create_leaf(default_conf());

    assert!(arena.start_time_recording(leaf, 0, 10, 1));
    assert!(arena.start_time_recording(leaf, 0, 500, 2));
    assert!(arena.stop_time_recording(leaf, 0, 30, 1));
    assert!(arena.stop_time_recording(leaf, 0, 505, 2));
    assert_eq!(arena.snapshot(leaf).cpu_time_ticks, 25);
}

proptest! {
    #[test]
    fn prop_distribution_is_conserved(members in 1usize..8, value in 0i64..100_000) {
        let mut arena = ElementArena::new(GroupAccountingType::Direct);
        let ids: Vec<ElementId> = (0..members).map(|_| arena.create_leaf(default_conf())).collect();
        let composite = Composite::new(ids.iter().copied().map(Some).collect(), true, true);
        let multi = arena.insert(RecorderElement::new(default_conf(), ElementKind::Multiple(composite)));

        arena.memory_allocated(multi, value);

        let share = value / members as i64;
        let mut sum = 0;
        for id in &ids {
            let allocated = arena.snapshot(*id).mem_allocated;
            prop_assert_eq!(allocated, share);
            sum += allocated;
        }
        prop_assert_eq!(arena.snapshot(multi).mem_allocated, sum);
    }

    #[test]
    fn prop_contributions_receive_whole_values(variants in 1usize..6, value in 0i64..100_000) {
        let mut arena = ElementArena::new(GroupAccountingType::Direct);
        let record = arena.insert(RecorderElement::new(
            default_conf(),
            ElementKind::Contributing(Composite::new(Vec::new(), false, false)),
        ));
        let contributions: Vec<ElementId> = (0..variants)
            .map(|index| arena.contributing_for(record, index as i32, variants).0)
            .collect();
        prop_assert_eq!(arena.contributing_size(record), variants);

        arena.memory_allocated(record, value);

        for contribution in &contributions {
            prop_assert_eq!(arena.snapshot(*contribution).mem_allocated, value);
        }
        prop_assert_eq!(arena.snapshot(record).mem_allocated, value * variants as i64);
    }
}

#[test]
fn test_duplicate_stack_entry_survives_pop() {
    let outer = ElementId::new(0);
    let inner = ElementId::new(1);
    let mut data = ThreadData::new();
    data.push(outer);
    data.push(inner);
    data.push(outer);

    assert!(!data.is_stack_element_duplicated(0));
    assert!(data.is_stack_element_duplicated(2));

    data.pop(outer);
    assert!(data.is_on_stack(outer, true));
    assert_eq!(data.stack_size(), 2);
}

#[test]
fn test_recursion_is_not_charged_twice() {
    test_setup!("recursion");
    let strategy = DefaultRecorderStrategy::new(&RecorderConfig::default());
    for (class_name, id) in [("app.Outer", "outer"), ("app.Inner", "inner")] {
        let mut settings = MonitoringGroupSettings::with_ids([id]);
        settings.accounting = Some(GroupAccountingType::Indirect);
        strategy.register_for_recording(class_name, None, &settings);
    }

    strategy.enter(Some("outer"), 0, thread(1), false);
    strategy.enter(Some("inner"), 0, thread(2), false);
    strategy.enter(Some("outer"), 0, thread(3), false);
    strategy.enter(Some("inner"), 0, thread(4), false);
    strategy.memory_allocated(Some("inner"), 1, -1, 64);

    assert_eq!(strategy.thread_stack_size(1), 4);
    assert_eq!(strategy.snapshot("inner").unwrap().mem_allocated, 64);
    assert_eq!(strategy.snapshot("outer").unwrap().mem_allocated, 64);
    assert_eq!(strategy.snapshot(PROGRAM_ID).unwrap().mem_allocated, 64);
}

#[test]
fn test_configuration_length_is_monotonic() {
    let settings = RecordingConfig {
        variant_contributions: true,
        ..RecordingConfig::default()
    };
    let conf = MonitoringGroupConfiguration::default_for(&settings);
    let mut map = RecorderElementMap::new(&settings, Arc::clone(&conf));
    let mut arena = ElementArena::new(GroupAccountingType::Direct);
    let mut quiet = Notifications::default();

    let mut lengths = Vec::new();
    for variabilities in 1..=6 {
        for variant in 0..variabilities {
            let id = format!("feature{variabilities}@on{variant}");
            map.put(&mut arena, None, Some(&id), &conf, &mut quiet);
        }
        lengths.push(map.configuration_length());
    }

    assert!(lengths.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(lengths.last().copied(), Some(6));
}

#[test]
fn test_foo_records_forty_ticks() {
    test_setup!("foo");
    let buffer = SharedBuffer::new();
    let strategy = DefaultRecorderStrategy::with_formatter(
        &RecorderConfig::default(),
        Box::new(CapturingFormatter::new(buffer.clone())),
    );

    strategy.register_for_recording("Foo", None, &MonitoringGroupSettings::default());
    strategy.enter(Some("Foo"), 1_000, thread(100), false);
    strategy.exit(Some("Foo"), 2_000, thread(140), false);

    let foo = strategy.snapshot("Foo").unwrap();
    assert_eq!(foo.cpu_time_ticks, 40);
    assert!(foo.recorded);

    strategy.print_statistics(&tallyman_recorder::ProcessData::new());
    strategy.end_system().unwrap();
    assert!(buffer.lines().iter().any(|line| line.starts_with("Foo\t")));
}

#[test]
fn test_variant_contributions_follow_active_configuration() {
    test_setup!("contributions");
    let mut config = RecorderConfig::default();
    config.recording.variant_contributions = true;
    let buffer = SharedBuffer::new();
    let listener = Arc::new(TimerListener::new());
    let listeners: Vec<Arc<dyn RecordingListener>> = vec![listener.clone()];
    let strategy = DefaultRecorderStrategy::with_listeners(
        &config,
        Box::new(CapturingFormatter::new(buffer.clone())),
        listeners,
    );
    strategy.register_for_recording("app.FeatureA", None, &MonitoringGroupSettings::with_ids(["feat@a"]));
    strategy.register_for_recording("app.FeatureB", None, &MonitoringGroupSettings::with_ids(["feat@b"]));

    strategy.enter(Some("feat@a"), 0, thread(1), false);
    strategy.memory_allocated(Some("feat@a"), 1, -1, 64);
    strategy.exit(Some("feat@a"), 0, thread(31), false);

    strategy.enter(Some("feat@b"), 0, thread(50), false);
    strategy.memory_allocated(Some("feat@b"), 1, -1, 128);
    strategy.exit(Some("feat@b"), 0, thread(60), false);

    let (with_a, with_b) = strategy.inspect(|storage| {
        let elements = storage.elements();
        assert_eq!(elements.configuration_length(), 1);
        let arena = storage.arena();
        let contribution = |key: &str| {
            let (_, record) = elements
                .configurations()
                .find(|(candidate, _)| *candidate == key)
                .expect("configuration record");
            assert_eq!(arena.contributing_size(record), 1);
            let slot = arena.contributing(record, 0).expect("contribution");
            assert_ne!(slot, record);
            assert_eq!(arena.snapshot(slot), arena.snapshot(record));
            arena.snapshot(slot)
        };
        (contribution("\u{1}"), contribution("\u{2}"))
    });
    assert_eq!((with_a.cpu_time_ticks, with_a.mem_allocated), (30, 64));
    assert_eq!((with_b.cpu_time_ticks, with_b.mem_allocated), (10, 128));
    assert_eq!(
        listener.contributions(),
        vec![
            ("feat@a".to_string(), "feat".to_string()),
            ("feat@b".to_string(), "feat".to_string()),
        ]
    );

    strategy.print_statistics(&tallyman_recorder::ProcessData::new());
    strategy.end_system().unwrap();
    let lines = buffer.lines();
    assert!(lines.iter().any(|line| line.starts_with("1 feat@a\t")));
    assert!(lines.iter().any(|line| line.starts_with("2 feat@b\t")));
    assert_eq!(lines.iter().filter(|line| line.starts_with("feat\t")).count(), 2);
}

#[test]
fn test_blocking_element_records_nothing() {
    let mut arena = ElementArena::new(GroupAccountingType::Direct);
    let blocking = arena.insert(RecorderElement::blocking(default_conf()));

    assert!(!arena.start_time_recording(blocking, 0, 10, 1));
    assert!(!arena.stop_time_recording(blocking, 5, 90, 1));
    arena.memory_allocated(blocking, 128);

    let snapshot = arena.snapshot(blocking);
    assert_eq!(snapshot.cpu_time_ticks, 0);
    assert_eq!(snapshot.mem_allocated, 0);
    assert!(!snapshot.recorded);
    for resource in ALL_RESOURCES {
        assert!(!arena.account_resource(blocking, resource), "{resource:?}");
    }
}

#[test]
fn test_excluded_regions_stay_empty() {
    let strategy = DefaultRecorderStrategy::new(&RecorderConfig::default());
    strategy.enter(None, 0, thread(10), true);
    strategy.memory_allocated(None, 1, -1, 32);
    strategy.exit(None, 100, thread(90), true);

    let excluded = strategy.excluded_element();
    strategy.inspect(|storage| {
        let arena = storage.arena();
        assert_eq!(arena.snapshot(excluded).cpu_time_ticks, 0);
        assert!(!arena.was_recorded(excluded));
        for resource in ALL_RESOURCES {
            assert!(!arena.account_resource(excluded, resource));
        }
    });
}

#[test]
fn test_timer_state_machine() {
    let mut timer = TimerInfo::new(0);
    assert!(!timer.handle_state(TimerState::Suspend, 50));
    assert_eq!(timer.value(), 50);
    assert!(timer.is_stopped());
    assert!(!timer.handle_state(TimerState::Resume, 80));
    assert!(timer.handle_state(TimerState::Finish, 130));
    assert_eq!(timer.value(), 100);
    assert!(!timer.handle_state(TimerState::Finish, 200));
    assert_eq!(timer.value(), 100);
}

#[test]
fn test_timer_finished_notified_once() {
    test_setup!("timer");
    let listener = Arc::new(TimerListener::new());
    let listeners: Vec<Arc<dyn RecordingListener>> = vec![listener.clone()];
    let strategy = DefaultRecorderStrategy::with_listeners(
        &RecorderConfig::default(),
        Box::new(CapturingFormatter::new(SharedBuffer::new())),
        listeners,
    );

    strategy.notify_timer("batch", TimerState::Start, 0, -1);
    strategy.notify_timer("batch", TimerState::Suspend, 50, -1);
    assert!(listener.finished().is_empty());
    strategy.notify_timer("batch", TimerState::Resume, 80, -1);
    strategy.notify_timer("batch", TimerState::Finish, 130, -1);
    strategy.notify_timer("batch", TimerState::Finish, 150, -1);

    assert_eq!(listener.finished(), vec![("batch".to_string(), 100)]);
    assert_eq!(strategy.timer("batch").unwrap().value(), 100);
}

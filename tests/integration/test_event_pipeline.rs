use std::sync::Arc;
use std::thread;

use futures::StreamExt;
use tallyctl::commands::serve::replay_session;
use tallyctl::CliError;
use tallyman_recorder::config::TcpConfig;
use tallyman_recorder::{
    DefaultRecorderStrategy, EventCodec, EventKind, EventRecorderStrategy, MonitoringGroupSettings, RecorderConfig,
    RecorderStrategy, RecordingConfig, RecordingEvent, StreamType, ThreadsInfo, WireFrame, PROGRAM_ID,
};
use tokio_util::codec::FramedRead;

use crate::mocks::RecordingDelegate;
use crate::test_setup;
use crate::utils::{generators, session_bytes};

#[test]
fn test_buffered_strategy_is_fifo() {
    test_setup!("fifo");
    let delegate = Arc::new(RecordingDelegate::new());
    let strategy = EventRecorderStrategy::delegating(delegate.clone()).unwrap();

    strategy.enter(Some("e1"), 0, ThreadsInfo::new(1, 1), false);
    strategy.memory_allocated(Some("e2"), 1, -1, 16);
    strategy.exit(Some("e3"), 0, ThreadsInfo::new(1, 2), false);
    strategy.end_system().unwrap();

    assert_eq!(
        delegate.calls(),
        vec![
            "enter:e1:1".to_string(),
            "memory_allocated:e2:-1:16".to_string(),
            "exit:e3:2".to_string(),
            "end_system".to_string(),
        ]
    );
    assert!(!strategy.is_recording());
}

#[test]
fn test_producers_keep_their_order() {
    let delegate = Arc::new(RecordingDelegate::new());
    let strategy = Arc::new(EventRecorderStrategy::delegating(delegate.clone()).unwrap());

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let strategy = Arc::clone(&strategy);
            thread::spawn(move || {
                let group = format!("p{producer}");
                for ticks in 0..250 {
                    strategy.enter(Some(&group), 0, ThreadsInfo::new(producer, ticks), false);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    strategy.end_system().unwrap();

    let calls = delegate.calls();
    assert_eq!(calls.len(), 4 * 250 + 1);
    for producer in 0..4 {
        let prefix = format!("enter:p{producer}:");
        let ticks: Vec<i64> = calls
            .iter()
            .filter_map(|call| call.strip_prefix(&prefix))
            .map(|ticks| ticks.parse().unwrap())
            .collect();
        assert_eq!(ticks, (0..250).collect::<Vec<_>>());
    }
}

#[test]
fn test_buffered_default_strategy_aggregates() {
    let delegate = Arc::new(DefaultRecorderStrategy::new(&RecorderConfig::default()));
    let strategy = EventRecorderStrategy::delegating(delegate.clone()).unwrap();

    strategy.register_for_recording("Foo", None, &MonitoringGroupSettings::default());
    strategy.enter(Some("Foo"), 0, ThreadsInfo::new(1, 100), false);
    strategy.write_io(Some("Foo"), None, 1, 300, StreamType::Net);
    strategy.exit(Some("Foo"), 10, ThreadsInfo::new(1, 140), false);
    strategy.end_system().unwrap();

    // events after the end are dropped
    strategy.memory_allocated(Some("Foo"), 1, -1, 1_000);

    let foo = delegate.snapshot("Foo").unwrap();
    assert_eq!(foo.cpu_time_ticks, 40);
    assert_eq!(foo.net_out, 300);
    assert_eq!(foo.mem_allocated, 0);
}

#[test]
fn test_generated_session_is_attributed() {
    let groups = ["alpha", "beta", "gamma"];
    let (events, charged) = generators::balanced_calls(&groups, 90, 1);
    let strategy = DefaultRecorderStrategy::new(&RecorderConfig::default());
    for (class_name, group) in groups.iter().enumerate() {
        generators::register(&format!("app.C{class_name}"), group)
            .apply(&strategy)
            .unwrap();
    }

    let allocated: i64 = events
        .iter()
        .filter_map(|event| match event {
            RecordingEvent::MemoryAllocated { size, .. } => Some(*size),
            _ => None,
        })
        .sum();
    for event in &events {
        event.apply(&strategy).unwrap();
    }

    for (group, ticks) in groups.iter().zip(&charged) {
        assert_eq!(strategy.snapshot(group).unwrap().cpu_time_ticks, *ticks, "{group}");
    }
    assert_eq!(strategy.snapshot(PROGRAM_ID).unwrap().mem_allocated, allocated);
    assert_eq!(strategy.thread_stack_size(1), 0);
}

#[tokio::test]
async fn test_framed_session_decodes_in_order() {
    let (events, _) = generators::balanced_calls(&["alpha"], 20, 7);
    let bytes = session_bytes(&RecordingConfig::default(), &events);

    let frames: Vec<WireFrame> = FramedRead::new(&bytes[..], EventCodec::with_settings())
        .map(|frame| frame.unwrap())
        .collect()
        .await;

    assert!(matches!(frames.first(), Some(WireFrame::Settings(_))));
    let decoded: Vec<RecordingEvent> = frames
        .into_iter()
        .skip(1)
        .map(|frame| match frame {
            WireFrame::Event(event) => event,
            WireFrame::Settings(_) => panic!("settings block repeated"),
        })
        .collect();
    assert_eq!(decoded, events);
}

#[tokio::test]
async fn test_replay_rejects_truncated_session() {
    let mut bytes = session_bytes(
        &RecordingConfig::default(),
        &[generators::enter("alpha", 1, 1), generators::exit("alpha", 1, 5)],
    );
    bytes.truncate(bytes.len() - 3);

    let result = replay_session(&bytes[..], RecorderConfig::default()).await;
    assert!(matches!(result, Err(CliError::Wire(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_strategy_reaches_recording_server() {
    test_setup!("tcp");
    let dir = tempfile::tempdir().unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = tokio::task::spawn_blocking(move || {
        let tcp = TcpConfig {
            port,
            ..TcpConfig::default()
        };
        let strategy = EventRecorderStrategy::tcp(&tcp, &RecordingConfig::default())?;
        strategy.register_for_recording("Foo", None, &MonitoringGroupSettings::default());
        strategy.enter(Some("Foo"), 0, ThreadsInfo::new(1, 100), false);
        strategy.read_io(Some("Foo"), None, 1, 64, StreamType::File);
        strategy.clear_temporary_data();
        strategy.exit(Some("Foo"), 10, ThreadsInfo::new(1, 140), false);
        strategy.end_system()
    });

    let (socket, _) = listener.accept().await.unwrap();
    let mut config = RecorderConfig::default();
    config.output.out_file = Some(dir.path().join("session.tsv").display().to_string());
    let report = replay_session(socket, config).await.unwrap();
    client.await.unwrap().unwrap();

    assert!(report.ended);
    assert_eq!(report.count(EventKind::RegisterGroup), 1);
    assert_eq!(report.count(EventKind::Enter), 1);
    assert_eq!(report.count(EventKind::Io), 1);
    assert_eq!(report.count(EventKind::Exit), 1);
    assert_eq!(report.count(EventKind::ClearTemporaryData), 0);
    assert_eq!(report.total(), 5);

    let text = std::fs::read_to_string(dir.path().join("session.tsv")).unwrap();
    assert!(text.contains("\nFoo\t"));
}

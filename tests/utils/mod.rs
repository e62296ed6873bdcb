use bytes::BytesMut;
use tallyman_recorder::wire::{encode_event, encode_settings};
use tallyman_recorder::{RecordingConfig, RecordingEvent};

/// Encodes `settings` followed by `events` the way a recording client sends them
pub fn session_bytes(settings: &RecordingConfig, events: &[RecordingEvent]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_settings(settings, &mut buf).expect("settings encode");
    for event in events {
        encode_event(event, &mut buf).expect("event encode");
    }
    buf.to_vec()
}

pub mod generators {
    use rand::Rng;
    use tallyman_recorder::{MonitoringGroupSettings, RecordingEvent, StreamType, ThreadsInfo};

    pub fn register(class_name: &str, rec_id: &str) -> RecordingEvent {
        RecordingEvent::RegisterGroup {
            class_name: class_name.to_string(),
            rec_id: None,
            settings: MonitoringGroupSettings::with_ids([rec_id]),
        }
    }

    pub fn enter(rec_id: &str, thread_id: i64, ticks: i64) -> RecordingEvent {
        RecordingEvent::Enter {
            rec_id: Some(rec_id.to_string()),
            now: ticks,
            threads: ThreadsInfo::new(thread_id, ticks),
            exclude: false,
        }
    }

    pub fn exit(rec_id: &str, thread_id: i64, ticks: i64) -> RecordingEvent {
        RecordingEvent::Exit {
            rec_id: Some(rec_id.to_string()),
            now: ticks,
            threads: ThreadsInfo::new(thread_id, ticks),
            exclude: false,
        }
    }

    /// Balanced enter/exit calls with allocations and I/O on one thread.
    /// Returns the events and the ticks charged to each group.
    pub fn balanced_calls(groups: &[&str], calls: usize, thread_id: i64) -> (Vec<RecordingEvent>, Vec<i64>) {
        let mut rng = rand::thread_rng();
        let mut events = Vec::with_capacity(calls * 4);
        let mut charged = vec![0; groups.len()];
        let mut ticks = 1;

        for call in 0..calls {
            let index = call % groups.len();
            let group = groups[index];
            events.push(enter(group, thread_id, ticks));

            events.push(RecordingEvent::MemoryAllocated {
                rec_id: Some(group.to_string()),
                thread_id,
                id: -1,
                size: rng.gen_range(1..512),
            });
            events.push(RecordingEvent::Io {
                rec_id: Some(group.to_string()),
                caller: None,
                thread_id,
                bytes: rng.gen_range(1..256),
                stream: StreamType::File,
                write: rng.gen_bool(0.5),
            });

            let spent = rng.gen_range(1..100);
            ticks += spent;
            charged[index] += spent;
            events.push(exit(group, thread_id, ticks));
        }
        (events, charged)
    }
}

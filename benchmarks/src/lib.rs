//! Tallyman benchmark workloads
//!
//! Builders for the synthetic instrumentation traffic the criterion benches replay
//! against the strategies and the wire codec.

use bytes::BytesMut;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tallyman_recorder::wire::{encode_event, encode_settings};
use tallyman_recorder::{
    MonitoringGroupSettings, RecorderStrategy, RecordingConfig, RecordingEvent, StreamType, ThreadsInfo, WireResult,
};

/// Seed shared by all workloads so runs stay comparable
pub const WORKLOAD_SEED: u64 = 0x7a11_0000;

/// Ids of the monitoring groups a workload spreads its calls over
pub fn group_ids(groups: usize) -> Vec<String> {
    (0..groups).map(|index| format!("bench-{index}")).collect()
}

/// Registers the groups of [`group_ids`] with `strategy`
pub fn register_groups(strategy: &dyn RecorderStrategy, groups: usize) {
    for (index, id) in group_ids(groups).iter().enumerate() {
        strategy.register_for_recording(
            &format!("bench::Group{index}"),
            None,
            &MonitoringGroupSettings::with_ids([id.as_str()]),
        );
    }
}

/// One monitored call per group turn: enter, allocation, I/O and exit
pub fn call_events(groups: usize, calls: usize, thread_id: i64) -> Vec<RecordingEvent> {
    let mut rng = StdRng::seed_from_u64(WORKLOAD_SEED);
    let ids = group_ids(groups.max(1));
    let mut events = Vec::with_capacity(calls * 4);
    let mut ticks = 1;

    for call in 0..calls {
        let rec_id = Some(ids[call % ids.len()].clone());
        events.push(RecordingEvent::Enter {
            rec_id: rec_id.clone(),
            now: ticks,
            threads: ThreadsInfo::new(thread_id, ticks),
            exclude: false,
        });
        events.push(RecordingEvent::MemoryAllocated {
            rec_id: rec_id.clone(),
            thread_id,
            id: -1,
            size: rng.gen_range(16..4096),
        });
        events.push(RecordingEvent::Io {
            rec_id: rec_id.clone(),
            caller: None,
            thread_id,
            bytes: rng.gen_range(1..1500),
            stream: if call % 2 == 0 { StreamType::Net } else { StreamType::File },
            write: call % 3 == 0,
        });
        ticks += rng.gen_range(1..100);
        events.push(RecordingEvent::Exit {
            rec_id,
            now: ticks,
            threads: ThreadsInfo::new(thread_id, ticks),
            exclude: false,
        });
    }
    events
}

/// Encodes a whole session as a recording client would send it
pub fn encoded_session(events: &[RecordingEvent]) -> WireResult<BytesMut> {
    let mut buf = BytesMut::with_capacity(events.len() * 48);
    encode_settings(&RecordingConfig::default(), &mut buf)?;
    for event in events {
        encode_event(event, &mut buf)?;
    }
    Ok(buf)
}

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::{Args, ValueEnum};
use rand::Rng;
use serde::Serialize;
use tallyman_recorder::{
    build_strategy, MonitoringGroupSettings, ProcessSampler, RecorderConfig, RecorderStrategy,
    StrategyKind, StreamType, ThreadsInfo, REGISTER_END, REGISTER_FORCE,
};
use tracing::{debug, info};

use crate::error::{CliError, Result};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    Default,
    Buffered,
    Tcp,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Default => StrategyKind::Default,
            StrategyArg::Buffered => StrategyKind::Buffered,
            StrategyArg::Tcp => StrategyKind::Tcp,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of simulated program threads
    #[arg(short, long, default_value = "4")]
    pub threads: usize,

    /// Monitored calls per thread
    #[arg(short, long, default_value = "1000")]
    pub iterations: usize,

    /// Number of monitoring groups
    #[arg(short, long, default_value = "4")]
    pub groups: usize,

    /// Strategy to drive (overrides recording.strategy)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Report file (overrides output.out_file)
    #[arg(short, long)]
    pub out_file: Option<String>,

    /// Seconds between current-state reports (overrides output.out_interval)
    #[arg(long)]
    pub report_interval: Option<u32>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Figures of a finished simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub threads: usize,
    pub calls: u64,
    pub allocated: i64,
    pub io_bytes: i64,
}

pub fn run(mut args: SimulateArgs, mut config: RecorderConfig) -> Result<()> {
    if let Some(strategy) = args.strategy {
        config.recording.strategy = strategy.into();
    }
    if args.out_file.is_some() {
        config.output.out_file = args.out_file.clone();
    }
    match args.report_interval {
        Some(interval) => config.output.out_interval = interval,
        None => args.report_interval = Some(config.output.out_interval),
    }

    let strategy = build_strategy(&config)?;
    let summary = simulate(strategy, &args)?;
    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!(
            "Simulated {} calls on {} threads: {} bytes allocated, {} bytes of I/O",
            summary.calls, summary.threads, summary.allocated, summary.io_bytes
        );
    }
    Ok(())
}

fn group_id(index: usize) -> String {
    format!("group-{index}")
}

/// Drives `strategy` with synthetic load and ends the recording
pub fn simulate(strategy: Arc<dyn RecorderStrategy>, args: &SimulateArgs) -> Result<SimulationSummary> {
    if args.threads == 0 || args.groups == 0 {
        return Err(CliError::InvalidArgument(
            "threads and groups must be greater than zero".to_string(),
        ));
    }

    let mut sampler = ProcessSampler::new();
    let clock = Instant::now();
    let now = move || i64::try_from(clock.elapsed().as_micros()).unwrap_or(i64::MAX);

    strategy.start_recording(now(), 0, 0);
    for index in 0..args.groups {
        strategy.register_for_recording(
            &format!("sim::Group{index}"),
            None,
            &MonitoringGroupSettings::with_ids([group_id(index)]),
        );
    }

    let workers: Vec<_> = (0..args.threads)
        .map(|worker| {
            let strategy = Arc::clone(&strategy);
            let iterations = args.iterations;
            let groups = args.groups;
            thread::Builder::new()
                .name(format!("sim-{worker}"))
                .spawn(move || run_worker(strategy.as_ref(), worker, iterations, groups, now))
        })
        .collect::<std::io::Result<_>>()?;

    if let Some(interval) = args.report_interval.filter(|interval| *interval > 0) {
        let period = Duration::from_secs(u64::from(interval));
        let reports = report_until_done(strategy.as_ref(), &mut sampler, &workers, period);
        debug!(reports, "Reported current state while simulating");
    }

    let mut summary = SimulationSummary {
        threads: args.threads,
        calls: 0,
        allocated: 0,
        io_bytes: 0,
    };
    let mut cpu_times = HashMap::new();
    for (worker, handle) in workers.into_iter().enumerate() {
        let (allocated, io_bytes, ticks) = handle
            .join()
            .map_err(|_| CliError::Worker(format!("simulation thread {worker} panicked")))?;
        summary.calls += args.iterations as u64;
        summary.allocated += allocated;
        summary.io_bytes += io_bytes;
        cpu_times.insert(thread_id(worker), ticks);
    }

    strategy.finish_recording(now(), 0, &cpu_times);
    strategy.print_statistics(&sampler.interval());
    strategy.end_system()?;

    info!(calls = summary.calls, "Simulation finished");
    Ok(summary)
}

/// Prints the current state every `period` until all `workers` finished
fn report_until_done<T>(
    strategy: &dyn RecorderStrategy,
    sampler: &mut ProcessSampler,
    workers: &[JoinHandle<T>],
    period: Duration,
) -> usize {
    let poll = period.min(Duration::from_millis(10));
    let mut reports = 0;
    let mut next = Instant::now() + period;
    while !workers.iter().all(JoinHandle::is_finished) {
        if Instant::now() >= next {
            strategy.print_current_state(&sampler.interval());
            reports += 1;
            next += period;
        }
        thread::sleep(poll);
    }
    reports
}

fn thread_id(worker: usize) -> i64 {
    worker as i64 + 1
}

fn run_worker(
    strategy: &dyn RecorderStrategy,
    worker: usize,
    iterations: usize,
    groups: usize,
    now: impl Fn() -> i64,
) -> (i64, i64, i64) {
    let mut rng = rand::thread_rng();
    let tid = thread_id(worker);
    let mut ticks = 1i64;
    let mut allocated = 0i64;
    let mut io_bytes = 0i64;

    strategy.register(tid, REGISTER_FORCE, ticks, now());
    for call in 0..iterations {
        let group = group_id((call + worker) % groups);
        strategy.enter(Some(&group), now(), ThreadsInfo::new(tid, ticks), false);

        ticks += rng.gen_range(1..50);
        let size = rng.gen_range(16..4096);
        strategy.memory_allocated(Some(&group), tid, -1, size);
        allocated += size;

        let bytes = rng.gen_range(1..1500);
        let stream = if call % 2 == 0 { StreamType::Net } else { StreamType::File };
        if call % 3 == 0 {
            strategy.write_io(Some(&group), None, tid, bytes, stream);
        } else {
            strategy.read_io(Some(&group), None, tid, bytes, stream);
        }
        io_bytes += i64::from(bytes);

        ticks += rng.gen_range(1..50);
        strategy.exit(Some(&group), now(), ThreadsInfo::new(tid, ticks), false);
    }
    strategy.register(tid, REGISTER_END, ticks, now());
    (allocated, io_bytes, ticks)
}

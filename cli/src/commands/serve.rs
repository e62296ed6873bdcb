use std::collections::BTreeMap;
use std::io::{self, Write};

use clap::Args;
use crossbeam_channel::{unbounded, Receiver};
use futures::StreamExt;
use serde::Serialize;
use tallyman_recorder::{
    DefaultRecorderStrategy, EventCodec, EventKind, ProcessData, RecorderConfig, RecorderResult, RecorderStrategy,
    RecordingConfig, RecordingEvent, StrategyKind, WireFrame,
};
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to bind (overrides tcp.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides tcp.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Stop after the first recording session
    #[arg(long)]
    pub once: bool,

    /// Report file (overrides output.out_file)
    #[arg(short, long)]
    pub out_file: Option<String>,

    /// Print session reports as JSON
    #[arg(long)]
    pub json: bool,
}

/// Events received during one recording session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub counts: BTreeMap<EventKind, u64>,
    /// The sender announced the end of recording
    pub ended: bool,
}

impl ReplayReport {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn count(&self, kind: EventKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Writes the per-kind table followed by the total
    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{:<28}{:>12}", "event", "count")?;
        for (kind, count) in &self.counts {
            writeln!(out, "{:<28}{:>12}", kind.name(), count)?;
        }
        writeln!(out, "{:<28}{:>12}", "total", self.total())
    }

    fn print(&self, json: bool) -> Result<()> {
        let mut stdout = io::stdout().lock();
        if json {
            writeln!(stdout, "{}", serde_json::to_string(self)?)?;
        } else {
            self.render(&mut stdout)?;
        }
        Ok(())
    }
}

pub async fn run(args: ServeArgs, mut config: RecorderConfig) -> Result<()> {
    if let Some(host) = args.host {
        config.tcp.host = host;
    }
    if let Some(port) = args.port {
        config.tcp.port = port;
    }
    if args.out_file.is_some() {
        config.output.out_file = args.out_file;
    }

    let listener = TcpListener::bind(config.tcp.address()).await?;
    info!(address = %listener.local_addr()?, "Recording server listening");
    serve(listener, config, args.once, args.json).await
}

/// Accepts recording sessions on `listener`
pub async fn serve(listener: TcpListener, config: RecorderConfig, once: bool, json: bool) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "Accepted recording session");
        let config = config.clone();

        if once {
            let report = replay_session(socket, config).await?;
            return report.print(json);
        }

        tokio::spawn(async move {
            match replay_session(socket, config).await {
                Ok(report) => {
                    if let Err(e) = report.print(json) {
                        warn!(%peer, error = %e, "Printing session report failed");
                    }
                }
                Err(e) => warn!(%peer, error = %e, "Recording session failed"),
            }
        });
    }
}

/// Reads the settings block and the events of one session and replays them
/// into a default strategy on a blocking worker.
pub async fn replay_session<R>(reader: R, mut config: RecorderConfig) -> Result<ReplayReport>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, EventCodec::with_settings());
    let settings = match frames.next().await {
        Some(Ok(WireFrame::Settings(settings))) => settings,
        Some(Ok(WireFrame::Event(event))) => {
            return Err(CliError::Protocol(format!("expected the settings block, got {}", event.kind())))
        }
        Some(Err(e)) => return Err(e.into()),
        None => return Err(CliError::Protocol("connection closed before the settings block".to_string())),
    };
    config.recording = RecordingConfig {
        strategy: StrategyKind::Default,
        ..settings
    };

    let (sender, receiver) = unbounded();
    let worker = tokio::task::spawn_blocking(move || replay_events(receiver, &config));

    let mut report = ReplayReport::default();
    while let Some(frame) = frames.next().await {
        let event = match frame? {
            WireFrame::Event(event) => event,
            WireFrame::Settings(_) => return Err(CliError::Protocol("settings block repeated".to_string())),
        };
        *report.counts.entry(event.kind()).or_default() += 1;
        let end = event.is_end_system();
        if sender.send(event).is_err() {
            break;
        }
        if end {
            report.ended = true;
            break;
        }
    }
    drop(sender);

    worker.await.map_err(|e| CliError::Worker(e.to_string()))??;
    if !report.ended {
        warn!("Recording session closed without end of recording");
    }
    info!(events = report.total(), "Recording session replayed");
    Ok(report)
}

fn replay_events(receiver: Receiver<RecordingEvent>, config: &RecorderConfig) -> RecorderResult<()> {
    let strategy = DefaultRecorderStrategy::new(config);
    let mut printed = false;

    for event in receiver.iter() {
        match event {
            RecordingEvent::EndSystem => break,
            RecordingEvent::PrintStatistics { .. } => printed = true,
            _ => {}
        }
        event.apply(&strategy)?;
    }

    if !printed && config.output.print_statistics {
        debug!("Printing statistics at end of session");
        strategy.print_statistics(&ProcessData::new());
    }
    strategy.end_system()
}

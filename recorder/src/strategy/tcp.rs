//! Forwarding of recording events to a recording server

use std::io::{BufWriter, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info};

use super::buffered::{EventHandler, EventRecorderStrategy};
use crate::config::{RecordingConfig, TcpConfig};
use crate::error::RecorderResult;
use crate::event::RecordingEvent;
use crate::wire::{encode_event, encode_settings};

/// Writes events to a TCP connection using the wire format
pub struct TcpEventSink {
    writer: BufWriter<TcpStream>,
    buf: BytesMut,
    sent: u64,
}

impl TcpEventSink {
    /// Connects and sends the settings block
    pub fn connect(tcp: &TcpConfig, settings: &RecordingConfig) -> RecorderResult<Self> {
        let address = tcp.address();
        let stream = TcpStream::connect(&address)?;
        stream.set_read_timeout(Some(Duration::from_secs(tcp.read_timeout_secs)))?;
        stream.set_nodelay(true)?;
        info!(%address, "Connected to recording server");
        Self::from_stream(stream, settings)
    }

    pub fn from_stream(stream: TcpStream, settings: &RecordingConfig) -> RecorderResult<Self> {
        let mut sink = Self {
            writer: BufWriter::new(stream),
            buf: BytesMut::with_capacity(256),
            sent: 0,
        };
        encode_settings(settings, &mut sink.buf)?;
        sink.write_buffered()?;
        Ok(sink)
    }

    /// Events written so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn write_buffered(&mut self) -> RecorderResult<()> {
        self.writer.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }
}

impl EventHandler for TcpEventSink {
    fn handle(&mut self, event: &RecordingEvent) -> RecorderResult<()> {
        match event {
            RecordingEvent::ClearTemporaryData => return Ok(()),
            _ => encode_event(event, &mut self.buf)?,
        }
        self.write_buffered()?;
        self.sent += 1;

        match event {
            RecordingEvent::EndSystem => {
                self.writer.flush()?;
                self.writer.get_ref().shutdown(Shutdown::Write)?;
                debug!(sent = self.sent, "Closed connection to recording server");
            }
            RecordingEvent::PrintStatistics { .. } | RecordingEvent::PrintCurrentState { .. } => {
                self.writer.flush()?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl EventRecorderStrategy {
    /// Buffered strategy forwarding to the recording server in `tcp`
    pub fn tcp(tcp: &TcpConfig, settings: &RecordingConfig) -> RecorderResult<Self> {
        let sink = TcpEventSink::connect(tcp, settings)?;
        Self::new(Box::new(sink))
    }
}

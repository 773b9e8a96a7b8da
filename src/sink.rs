use std::io::{self, Write};

use log::{info, warn};
use serde::Serialize;

use crate::pipeline::StatusRecord;
use crate::protocol::HostCommand;

// ---------------------------------------------------------------------------
// Alarm
// ---------------------------------------------------------------------------

/// Write one host command byte and flush.
pub fn send_command<W: Write>(out: &mut W, command: HostCommand) -> io::Result<()> {
    out.write_all(&[command.byte()])?;
    out.flush()
}

/// Receives confirmed detections and notifies the remote controller.
pub trait AlarmSink {
    /// Returns `true` if an alarm was actually sent.
    fn raise(&mut self) -> bool;
}

/// Sends the single-byte alarm command to a writer (usually the serial
/// port's write half).
pub struct CommandAlarm<W: Write> {
    out: W,
    enabled: bool,
    sent: u64,
}

impl<W: Write> CommandAlarm<W> {
    pub fn new(out: W, enabled: bool) -> Self {
        Self {
            out,
            enabled,
            sent: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn send(&mut self) -> io::Result<()> {
        send_command(&mut self.out, HostCommand::TriggerAlarm)
    }
}

impl<W: Write> AlarmSink for CommandAlarm<W> {
    fn raise(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.send() {
            Ok(()) => {
                self.sent += 1;
                info!("alarm command sent ({} total)", self.sent);
                true
            }
            Err(e) => {
                warn!("alarm command not delivered: {e}");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Status and event writers
// ---------------------------------------------------------------------------

/// Writes status records as CSV rows with a header.
pub struct StatusCsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> StatusCsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
        }
    }

    pub fn write(&mut self, record: &StatusRecord) -> csv::Result<()> {
        self.writer.serialize(record)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// One JSON document per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

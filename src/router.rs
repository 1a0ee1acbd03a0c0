//! Channel router: the single entry point for user-visible text.
//!
//! Per call, in this order: channel log files, packet log, sieve, then
//! either the top redirection frame or the visible destination.

use std::borrow::Cow;
use std::io::{self, Write};

use msg_protocol::{Channel, Severity, encode_packets};
use tracing::trace;

use crate::context::{BusError, MsgContext, Output};
use crate::escape::encode_backslash;
use crate::lock::{acquire, acquire_or_recover, report_raw};

impl Output {
    fn write_visible(&mut self, channel: Channel, text: &str, packets: &[String], packet_mode: bool) -> io::Result<()> {
        if channel == Channel::None {
            return Ok(());
        }
        if packet_mode {
            for line in packets {
                self.stdout.write_all(line.as_bytes())?;
            }
            return self.stdout.flush();
        }
        let sink = match channel {
            Channel::Result => &mut self.stdout,
            _ => &mut self.stderr,
        };
        sink.write_all(text.as_bytes())?;
        sink.flush()
    }
}

impl MsgContext {
    /// Routes `text` on `channel`.
    ///
    /// Logging and sieve evaluation happen exactly once per call whatever
    /// the capture state. The channel-write lock is held for the whole call,
    /// so concurrent emits reach logs and visible output in the same order.
    /// A failing lock or log write is reported on raw stderr and returned
    /// after the remaining steps were attempted.
    pub fn emit(&self, text: &str, channel: Channel) -> Result<(), BusError> {
        let text = if self.config.encodes(channel) { encode_backslash(text) } else { Cow::Borrowed(text) };
        let packet_mode = self.config.packet_output;
        let mut failure: Option<BusError> = None;

        let mut out = acquire_or_recover(&self.output, "channel write");
        if let Err(e) = out.logs.record(channel, &text) {
            report_raw("channel log", &e.to_string());
            failure.get_or_insert(e.into());
        }
        let packets = if packet_mode || out.logs.has_packet_log() {
            encode_packets(&text, channel)
        } else {
            Vec::new()
        };
        if let Err(e) = out.logs.record_packets(&packets) {
            report_raw("packet log", &e.to_string());
            failure.get_or_insert(e.into());
        }

        let stored = match acquire(&self.sieve, "sieve") {
            Ok(mut sieve) => sieve.evaluate(&text, channel),
            Err(e) => {
                failure.get_or_insert(e.into());
                true
            }
        };
        if !stored {
            self.out_of_memory("sieve result");
        }

        // Without packets, marks share the info destination and its capture.
        let capture_as = match channel {
            Channel::Mark if !packet_mode => Channel::Info,
            other => other,
        };
        let captured = self.stack.capture(capture_as, &text).unwrap_or_else(|e| {
            failure.get_or_insert(e.into());
            false
        });

        if captured {
            trace!(%channel, "line captured");
        } else if let Err(e) = out.write_visible(channel, &text, &packets, packet_mode) {
            report_raw("message output", &e.to_string());
            failure.get_or_insert(e.into());
        }

        failure.map_or(Ok(()), Err)
    }

    pub fn result(&self, text: &str) -> Result<(), BusError> {
        self.emit(text, Channel::Result)
    }

    pub fn info(&self, text: &str) -> Result<(), BusError> {
        self.emit(text, Channel::Info)
    }

    pub fn mark(&self, text: &str) -> Result<(), BusError> {
        self.emit(text, Channel::Mark)
    }

    /// Records `severity` in the problem status and, if it is at least
    /// `report_about`, emits `"<program> : <SEVERITY> : <text>"` as info.
    ///
    /// Returns whether the problem status now reaches `abort_on`.
    pub fn submit(&self, text: &str, severity: Severity) -> Result<bool, BusError> {
        let status = self.raise_problem(severity);
        if severity != Severity::Never && severity >= self.config.report_about {
            let line = format!(
                "{} : {} : {}\n",
                self.config.program_name,
                severity,
                text.trim_end_matches('\n')
            );
            self.emit(&line, Channel::Info)?;
        }
        Ok(status.reaches(self.config.abort_on))
    }
}

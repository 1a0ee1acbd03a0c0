//! Per-channel log files and the consolidated packet log.
//!
//! Slot `.` receives the raw text of every channel; slots `R`, `I` and `M`
//! only their own. Each slot file gets a banner line on open and on close.
//! The packet log receives packet lines verbatim and has no banners.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use msg_protocol::Channel;
use tracing::debug;

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y.%m.%d.%H%M%S").to_string()
}

pub fn open_banner(program: &str, channel: Channel) -> String {
    format!("{} {program} log : {} : {}\n", "!".repeat(63), channel.letter(), timestamp())
}

pub fn close_banner(program: &str, channel: Channel) -> String {
    format!("{}{program} log : {} : {}\n", "! end ".repeat(8), channel.letter(), timestamp())
}

#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: File,
    /// Channel whose banners frame this file; `None` for the packet log.
    banner: Option<Channel>,
}

impl LogFile {
    fn open(path: &Path, banner: Option<(Channel, &str)>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut log = Self { path: path.to_path_buf(), file, banner: banner.map(|(c, _)| c) };
        if let Some((channel, program)) = banner {
            log.append(&open_banner(program, channel))?;
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, text: &str) -> io::Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.flush()
    }

    fn close(mut self, program: &str) -> io::Result<()> {
        if let Some(channel) = self.banner {
            self.append(&close_banner(program, channel))?;
        }
        debug!(path = %self.path.display(), "closed log file");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ChannelLogs {
    program: String,
    slots: [Option<LogFile>; 4],
    packets: Option<LogFile>,
}

impl ChannelLogs {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Default::default() }
    }

    /// Opens (replacing any previous file of) the slot for `channel`.
    pub fn open(&mut self, channel: Channel, path: &Path) -> io::Result<()> {
        self.close(channel)?;
        let log = LogFile::open(path, Some((channel, self.program.as_str())))?;
        debug!(channel = %channel.letter(), path = %path.display(), "opened channel log");
        self.slots[channel.index()] = Some(log);
        Ok(())
    }

    pub fn close(&mut self, channel: Channel) -> io::Result<()> {
        match self.slots[channel.index()].take() {
            Some(log) => log.close(&self.program),
            None => Ok(()),
        }
    }

    pub fn open_packet_log(&mut self, path: &Path) -> io::Result<()> {
        self.close_packet_log()?;
        self.packets = Some(LogFile::open(path, None)?);
        Ok(())
    }

    pub fn close_packet_log(&mut self) -> io::Result<()> {
        match self.packets.take() {
            Some(log) => log.close(&self.program),
            None => Ok(()),
        }
    }

    pub fn is_open(&self, channel: Channel) -> bool {
        self.slots[channel.index()].is_some()
    }

    pub fn has_packet_log(&self) -> bool {
        self.packets.is_some()
    }

    /// Appends raw text to the slot of `channel` and to the all-channel slot.
    pub fn record(&mut self, channel: Channel, text: &str) -> io::Result<()> {
        if channel != Channel::None {
            if let Some(log) = self.slots[channel.index()].as_mut() {
                log.append(text)?;
            }
        }
        if let Some(log) = self.slots[Channel::None.index()].as_mut() {
            log.append(text)?;
        }
        Ok(())
    }

    pub fn record_packets(&mut self, lines: &[String]) -> io::Result<()> {
        if let Some(log) = self.packets.as_mut() {
            for line in lines {
                log.append(line)?;
            }
        }
        Ok(())
    }

    pub fn close_all(&mut self) -> io::Result<()> {
        let mut first_err = None;
        for channel in Channel::ALL {
            if let Err(e) = self.close(channel) {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.close_packet_log() {
            first_err.get_or_insert(e);
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn banners_frame_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.log");
        let mut logs = ChannelLogs::new("xorriso");
        logs.open(Channel::Result, &path).unwrap();
        logs.record(Channel::Result, "hello\n").unwrap();
        logs.record(Channel::Info, "not here\n").unwrap();
        logs.close(Channel::Result).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("!!!!!!!!"));
        assert!(lines[0].contains(" xorriso log : R : "));
        assert_eq!(lines[1], "hello");
        assert!(lines[2].starts_with("! end ! end "));
        assert!(lines[2].contains("xorriso log : R : "));
    }

    #[test]
    fn dot_slot_gets_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("all.log");
        let mut logs = ChannelLogs::new("xorriso");
        logs.open(Channel::None, &path).unwrap();
        logs.record(Channel::Result, "r\n").unwrap();
        logs.record(Channel::Mark, "m\n").unwrap();
        logs.close_all().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\nr\nm\n"));
    }

    #[test]
    fn packet_log_has_no_banner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pkt.log");
        let mut logs = ChannelLogs::new("xorriso");
        logs.open_packet_log(&path).unwrap();
        logs.record_packets(&["R:1: a\n".to_string()]).unwrap();
        logs.close_all().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "R:1: a\n");
    }
}

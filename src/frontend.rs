//! Frontend bridge: lets an external program drive this process through a
//! command pipe and a reply pipe.
//!
//! The driven process reads commands on stdin and writes replies, usually
//! in packet form, on stdout and stderr. The frontend writes commands on
//! its stdout and reads replies on its stdin. Pipes are either anonymous
//! (a spawned frontend) or named FIFOs on disk.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::stat::Mode;
use nix::unistd::{dup2_stderr, dup2_stdin, dup2_stdout, geteuid, getuid, mkfifo, pipe2};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BusConfig;

#[derive(Error, Debug)]
pub enum FrontendError {
    #[error("frontend bridge is banned: {0}")]
    Banned(&'static str),

    #[error("frontend program path `{0}` contains no directory separator")]
    NoSeparator(String),

    #[error("no frontend program and no named pipes given")]
    NothingToLaunch,

    #[error("cannot create or open pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("cannot create frontend process: {0}")]
    Fork(#[source] io::Error),

    #[error("cannot execute frontend program `{program}`: {source}")]
    Exec { program: String, source: io::Error },
}

/// Side of the bridge a process ends up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Commands arrive on stdin, replies leave on stdout and stderr.
    Driven,
    /// The spawned program. Never returned to the caller.
    Frontend,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    pub argv: Vec<String>,
    pub cmd_pipe: Option<PathBuf>,
    pub reply_pipe: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn spawn(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { argv: argv.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    pub fn named_pipes(mut self, cmd_pipe: impl Into<PathBuf>, reply_pipe: impl Into<PathBuf>) -> Self {
        self.cmd_pipe = Some(cmd_pipe.into());
        self.reply_pipe = Some(reply_pipe.into());
        self
    }

    /// Both pipe paths given and non-empty.
    fn named(&self) -> Option<(&Path, &Path)> {
        match (&self.cmd_pipe, &self.reply_pipe) {
            (Some(c), Some(r)) if !c.as_os_str().is_empty() && !r.as_os_str().is_empty() => {
                Some((c.as_path(), r.as_path()))
            }
            _ => None,
        }
    }
}

/// The pipe ends the driven process keeps.
#[derive(Debug)]
pub struct DrivenEnds {
    /// Read end of the command pipe.
    pub commands: File,
    /// Write end of the reply pipe.
    pub replies: File,
}

#[derive(Debug)]
pub struct Bridge {
    pub role: Role,
    pub ends: DrivenEnds,
    pub frontend: Option<Child>,
}

impl Bridge {
    /// Rebinds stdin to the command pipe and stdout and stderr to the
    /// reply pipe.
    pub fn rewire_stdio(self) -> Result<Launched, FrontendError> {
        dup2_stdin(&self.ends.commands).map_err(errno_pipe)?;
        dup2_stdout(&self.ends.replies).map_err(errno_pipe)?;
        dup2_stderr(&self.ends.replies).map_err(errno_pipe)?;
        info!("standard streams now bound to the frontend pipes");
        Ok(Launched { role: self.role, frontend: self.frontend })
    }
}

#[derive(Debug)]
pub struct Launched {
    pub role: Role,
    pub frontend: Option<Child>,
}

fn errno_pipe(e: Errno) -> FrontendError {
    FrontendError::Pipe(e.into())
}

/// Refuses the bridge when the configuration disables it or when running
/// with differing real and effective user without permission to exec.
pub fn check_policy(config: &BusConfig) -> Result<(), FrontendError> {
    if !config.frontend_allowed {
        return Err(FrontendError::Banned("disabled by configuration"));
    }
    if getuid() != geteuid() && !config.allow_setuid_exec {
        return Err(FrontendError::Banned("real and effective user differ"));
    }
    Ok(())
}

/// Creates the pipes and, if `argv` is given, the frontend process, but
/// leaves this process' standard streams alone.
#[tracing::instrument(skip(config))]
pub fn prepare(config: &BusConfig, request: &LaunchRequest) -> Result<Bridge, FrontendError> {
    check_policy(config)?;
    let named = request.named();

    let Some(program) = request.argv.first() else {
        let Some((cmd_path, reply_path)) = named else {
            return Err(FrontendError::NothingToLaunch);
        };
        // The frontend is started elsewhere and opens the other ends.
        ensure_fifo(cmd_path)?;
        ensure_fifo(reply_path)?;
        let commands = File::open(cmd_path).map_err(FrontendError::Pipe)?;
        let replies = OpenOptions::new().write(true).open(reply_path).map_err(FrontendError::Pipe)?;
        debug!(cmd = %cmd_path.display(), reply = %reply_path.display(), "attached to named pipes");
        return Ok(Bridge { role: Role::Driven, ends: DrivenEnds { commands, replies }, frontend: None });
    };
    if !program.contains('/') {
        return Err(FrontendError::NoSeparator(program.clone()));
    }

    let pipes = match named {
        Some((cmd_path, reply_path)) => PipeSet::named(cmd_path, reply_path)?,
        None => PipeSet::anonymous()?,
    };

    let child = Command::new(program)
        .args(&request.argv[1..])
        .stdin(Stdio::from(pipes.reply_read))
        .stdout(Stdio::from(pipes.cmd_write))
        .spawn()
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                FrontendError::Exec { program: program.clone(), source }
            }
            _ => FrontendError::Fork(source),
        })?;
    info!(pid = child.id(), %program, "frontend started");

    Ok(Bridge {
        role: Role::Driven,
        ends: DrivenEnds { commands: File::from(pipes.cmd_read), replies: File::from(pipes.reply_write) },
        frontend: Some(child),
    })
}

/// Sets up the bridge and turns this process into the driven side.
pub fn launch(config: &BusConfig, request: &LaunchRequest) -> Result<Launched, FrontendError> {
    prepare(config, request)?.rewire_stdio()
}

struct PipeSet {
    cmd_read: OwnedFd,
    cmd_write: OwnedFd,
    reply_read: OwnedFd,
    reply_write: OwnedFd,
}

impl PipeSet {
    /// Close-on-exec, so the frontend only inherits the ends bound to its
    /// standard streams.
    fn anonymous() -> Result<Self, FrontendError> {
        let (cmd_read, cmd_write) = pipe2(OFlag::O_CLOEXEC).map_err(errno_pipe)?;
        let (reply_read, reply_write) = pipe2(OFlag::O_CLOEXEC).map_err(errno_pipe)?;
        Ok(Self { cmd_read, cmd_write, reply_read, reply_write })
    }

    /// Opens all four ends of two FIFOs without blocking: each read end is
    /// opened non-blocking first so the matching write end finds a reader.
    fn named(cmd_path: &Path, reply_path: &Path) -> Result<Self, FrontendError> {
        ensure_fifo(cmd_path)?;
        ensure_fifo(reply_path)?;
        let (cmd_read, cmd_write) = open_fifo_pair(cmd_path)?;
        let (reply_read, reply_write) = open_fifo_pair(reply_path)?;
        Ok(Self { cmd_read, cmd_write, reply_read, reply_write })
    }
}

fn open_fifo_pair(path: &Path) -> Result<(OwnedFd, OwnedFd), FrontendError> {
    let read = OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
        .map_err(FrontendError::Pipe)?;
    let write = OpenOptions::new().write(true).open(path).map_err(FrontendError::Pipe)?;
    set_blocking(&read)?;
    Ok((read.into(), write.into()))
}

fn set_blocking(file: &File) -> Result<(), FrontendError> {
    let flags = OFlag::from_bits_truncate(fcntl(file, FcntlArg::F_GETFL).map_err(errno_pipe)?);
    fcntl(file, FcntlArg::F_SETFL(flags - OFlag::O_NONBLOCK)).map_err(errno_pipe)?;
    Ok(())
}

fn ensure_fifo(path: &Path) -> Result<(), FrontendError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => {
            warn!(path = %path.display(), "pipe path exists but is not a FIFO");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(errno_pipe)?;
            debug!(path = %path.display(), "created named pipe");
            Ok(())
        }
        Err(e) => Err(FrontendError::Pipe(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};

    #[test]
    fn banned_by_configuration() {
        let config = BusConfig { frontend_allowed: false, ..Default::default() };
        let err = prepare(&config, &LaunchRequest::spawn(["/bin/cat"])).unwrap_err();
        assert!(matches!(err, FrontendError::Banned(_)));
    }

    #[test]
    fn program_needs_a_path() {
        let err = prepare(&BusConfig::default(), &LaunchRequest::spawn(["cat"])).unwrap_err();
        assert!(matches!(err, FrontendError::NoSeparator(p) if p == "cat"));
    }

    #[test]
    fn nothing_to_launch() {
        let err = prepare(&BusConfig::default(), &LaunchRequest::default()).unwrap_err();
        assert!(matches!(err, FrontendError::NothingToLaunch));
    }

    #[test]
    fn fifo_read_end_ends_up_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmd");
        ensure_fifo(&path).unwrap();
        let (read, _write) = open_fifo_pair(&path).unwrap();
        let flags = OFlag::from_bits_truncate(fcntl(&read, FcntlArg::F_GETFL).unwrap());
        assert!(!flags.contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn missing_program_is_exec_error() {
        let err = prepare(&BusConfig::default(), &LaunchRequest::spawn(["/nonexistent/frontend"])).unwrap_err();
        assert!(matches!(err, FrontendError::Exec { .. }));
    }

    fn echo_through(bridge: Bridge) {
        let Bridge { ends, frontend, .. } = bridge;
        let DrivenEnds { commands, mut replies } = ends;
        // `cat` as frontend: what we reply comes back as a command.
        replies.write_all(b"R:1: hello\n").unwrap();
        drop(replies);
        let mut line = String::new();
        BufReader::new(commands).read_line(&mut line).unwrap();
        assert_eq!(line, "R:1: hello\n");
        let status = frontend.unwrap().wait().unwrap();
        assert!(status.success());
    }

    #[test]
    fn anonymous_pipes_reach_the_frontend() {
        let bridge = prepare(&BusConfig::default(), &LaunchRequest::spawn(["/bin/cat"])).unwrap();
        assert_eq!(bridge.role, Role::Driven);
        echo_through(bridge);
    }

    #[test]
    fn named_pipes_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = dir.path().join("cmd");
        let reply = dir.path().join("reply");
        let request = LaunchRequest::spawn(["/bin/cat"]).named_pipes(&cmd, &reply);
        let bridge = prepare(&BusConfig::default(), &request).unwrap();
        assert!(std::fs::metadata(&cmd).unwrap().file_type().is_fifo());
        assert!(std::fs::metadata(&reply).unwrap().file_type().is_fifo());
        echo_through(bridge);
    }
}

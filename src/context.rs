//! The message bus context: every piece of process-wide message state in
//! one object, created at start-up and torn down with [`MsgContext::shutdown`].

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msg_protocol::{Channel, ProtocolError, Severity};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::BusConfig;
use crate::frontend::FrontendError;
use crate::lock::{LockError, acquire, acquire_or_recover, report_raw};
use crate::logfile::ChannelLogs;
use crate::problem::ProblemStatus;
use crate::sieve::{FilterId, SieveEngine, SieveError, SieveFilter, SieveResult};
use crate::stack::{Capture, Captured, FrameHandle, RedirectionStack, StackError};
use crate::watcher::{MessageHandler, MsgWatcher, WatcherError, WatcherState};

#[derive(Error, Debug)]
pub enum BusError {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Sieve(#[from] SieveError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error(transparent)]
    Frontend(#[from] FrontendError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("message output failed: {0}")]
    Io(#[from] io::Error),
}

pub(crate) type Sink = Box<dyn Write + Send>;

/// Everything guarded by the channel-write lock.
pub(crate) struct Output {
    pub(crate) stdout: Sink,
    pub(crate) stderr: Sink,
    pub(crate) logs: ChannelLogs,
}

pub struct MsgContext {
    pub(crate) config: BusConfig,
    pub(crate) stack: Arc<RedirectionStack>,
    pub(crate) output: Mutex<Output>,
    pub(crate) sieve: Mutex<SieveEngine>,
    problem: Mutex<ProblemStatus>,
    watcher: MsgWatcher,
}

impl std::fmt::Debug for MsgContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgContext")
            .field("config", &self.config)
            .field("stack", &self.stack)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

pub struct MsgContextBuilder {
    config: BusConfig,
    stdout: Option<Sink>,
    stderr: Option<Sink>,
}

impl MsgContextBuilder {
    pub fn stdout(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    pub fn stderr(mut self, sink: impl Write + Send + 'static) -> Self {
        self.stderr = Some(Box::new(sink));
        self
    }

    /// Opens the configured log files and assembles the context.
    pub fn build(self) -> Result<MsgContext, BusError> {
        let config = self.config;
        let mut logs = ChannelLogs::new(config.program_name.clone());
        for (letter, path) in &config.log_files {
            let channel = channel_of_key(letter)?;
            logs.open(channel, path)?;
        }
        if let Some(path) = &config.packet_log {
            logs.open_packet_log(path)?;
        }

        let stack = Arc::new(RedirectionStack::new(config.max_stack_depth));
        let watcher = MsgWatcher::new(stack.clone(), Duration::from_millis(config.watcher_poll_ms));
        let output = Output {
            stdout: self.stdout.unwrap_or_else(|| Box::new(io::stdout())),
            stderr: self.stderr.unwrap_or_else(|| Box::new(io::stderr())),
            logs,
        };
        debug!(program = %config.program_name, packet_output = config.packet_output, "message context ready");
        Ok(MsgContext {
            config,
            stack,
            output: Mutex::new(output),
            sieve: Mutex::new(SieveEngine::new()),
            problem: Mutex::new(ProblemStatus::default()),
            watcher,
        })
    }
}

fn channel_of_key(key: &str) -> Result<Channel, ProtocolError> {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => Channel::from_letter(letter),
        _ => Err(ProtocolError::MalformedPrefix(key.to_string())),
    }
}

impl MsgContext {
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        Self::builder(config).build()
    }

    pub fn builder(config: BusConfig) -> MsgContextBuilder {
        MsgContextBuilder { config, stdout: None, stderr: None }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Stops a running watcher and closes all log files.
    #[tracing::instrument(skip(self))]
    pub fn shutdown(&self) -> Result<(), BusError> {
        self.watcher.stop(true)?;
        acquire_or_recover(&self.output, "channel write").logs.close_all()?;
        info!("message context shut down");
        Ok(())
    }

    // Redirection stack

    pub fn push(&self, capture: Capture) -> Result<FrameHandle, BusError> {
        match self.stack.push(capture) {
            Err(StackError::Overflow(max)) => {
                error!(max, "redirection stack overflow");
                self.raise_problem(Severity::Fatal);
                Err(StackError::Overflow(max).into())
            }
            other => Ok(other?),
        }
    }

    pub fn fetch(&self, handle: FrameHandle, want: Capture) -> Result<Captured, BusError> {
        Ok(self.stack.fetch(handle, want)?)
    }

    pub fn pull(&self, handle: FrameHandle, want: Capture) -> Result<Captured, BusError> {
        Ok(self.stack.pull(handle, want)?)
    }

    pub fn drain(&self, handle: FrameHandle, want: Capture) -> Result<Captured, BusError> {
        Ok(self.stack.drain(handle, want)?)
    }

    pub fn peek(
        &self,
        handle: Option<FrameHandle>,
        timeout: Duration,
        want: Capture,
        poll: bool,
    ) -> Result<bool, BusError> {
        Ok(self.stack.peek(handle, timeout, want, poll)?)
    }

    pub fn depth(&self) -> Result<usize, BusError> {
        Ok(self.stack.depth()?)
    }

    // Problem status

    pub fn problem_status(&self) -> Result<Severity, BusError> {
        Ok(acquire(&self.problem, "problem status")?.worst())
    }

    pub fn set_problem_status(&self, severity: Severity, force: bool) -> Result<Severity, BusError> {
        Ok(acquire(&self.problem, "problem status")?.raise(severity, force))
    }

    pub fn reset_problem_status(&self) -> Result<(), BusError> {
        acquire(&self.problem, "problem status")?.reset();
        Ok(())
    }

    /// Whether the problem status has reached the configured `abort_on`.
    pub fn should_abort(&self) -> Result<bool, BusError> {
        Ok(acquire(&self.problem, "problem status")?.reaches(self.config.abort_on))
    }

    pub(crate) fn raise_problem(&self, severity: Severity) -> ProblemStatus {
        let mut problem = acquire_or_recover(&self.problem, "problem status");
        problem.raise(severity, false);
        *problem
    }

    pub(crate) fn out_of_memory(&self, what: &str) {
        report_raw(what, "out of virtual memory");
        self.raise_problem(Severity::Fatal);
    }

    // Sieve

    pub fn add_filter(&self, filter: SieveFilter) -> Result<FilterId, BusError> {
        let name = filter.name().to_string();
        let added = acquire(&self.sieve, "sieve")?.add_filter(filter);
        if let Err(SieveError::OutOfMemory(_)) = &added {
            self.out_of_memory(&format!("sieve filter `{name}`"));
        }
        Ok(added?)
    }

    pub fn get_result(&self, name: &str, reset: bool, count_only: bool) -> Result<SieveResult, BusError> {
        Ok(acquire(&self.sieve, "sieve")?.get_result(name, reset, count_only)?)
    }

    pub fn clear_results(&self) -> Result<(), BusError> {
        acquire(&self.sieve, "sieve")?.clear_results();
        Ok(())
    }

    pub fn dispose_sieve(&self) -> Result<(), BusError> {
        acquire(&self.sieve, "sieve")?.dispose();
        Ok(())
    }

    pub fn install_default_filters(&self) -> Result<usize, BusError> {
        let installed = acquire(&self.sieve, "sieve")?.install_defaults();
        if let Err(SieveError::OutOfMemory(name)) = &installed {
            self.out_of_memory(&format!("sieve filter `{name}`"));
        }
        Ok(installed?)
    }

    pub fn filter_names(&self) -> Result<Vec<String>, BusError> {
        Ok(acquire(&self.sieve, "sieve")?.filter_names())
    }

    // Log files

    pub fn open_log(&self, channel: Channel, path: &Path) -> Result<(), BusError> {
        acquire(&self.output, "channel write")?.logs.open(channel, path)?;
        Ok(())
    }

    pub fn close_log(&self, channel: Channel) -> Result<(), BusError> {
        acquire(&self.output, "channel write")?.logs.close(channel)?;
        Ok(())
    }

    pub fn open_packet_log(&self, path: &Path) -> Result<(), BusError> {
        acquire(&self.output, "channel write")?.logs.open_packet_log(path)?;
        Ok(())
    }

    pub fn close_packet_log(&self) -> Result<(), BusError> {
        acquire(&self.output, "channel write")?.logs.close_packet_log()?;
        Ok(())
    }

    // Watcher

    pub fn start_watcher(&self, handler: Box<dyn MessageHandler>) -> Result<(), BusError> {
        Ok(self.watcher.start(handler)?)
    }

    /// With `soft`, stopping an inactive watcher is not an error. Otherwise
    /// it is reported as a SORRY message and returned as `NotRunning`.
    pub fn stop_watcher(&self, soft: bool) -> Result<(), BusError> {
        match self.watcher.stop(soft) {
            Err(WatcherError::NotRunning) => {
                self.submit("-msg_op stop_watcher : Message watcher is not active", Severity::Sorry)?;
                Err(WatcherError::NotRunning.into())
            }
            other => Ok(other?),
        }
    }

    pub fn watcher_state(&self) -> Result<WatcherState, BusError> {
        Ok(self.watcher.state()?)
    }

    pub fn watcher_pending(&self) -> Result<bool, BusError> {
        Ok(self.watcher.has_pending()?)
    }
}

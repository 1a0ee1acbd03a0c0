//! Message watcher: a background thread that takes over result and info
//! output by draining a dedicated capture frame into a [`MessageHandler`].
//!
//! Lifecycle: `Inactive -> Registered -> Running -> StopRequested -> Inactive`.
//! `start` blocks until the thread is `Running`, `stop` until it is
//! `Inactive` again, after which lines that arrived late are handed over
//! synchronously.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::lock::{LockError, acquire, poisoned, report_raw};
use crate::stack::{Capture, Captured, FrameHandle, RedirectionStack, StackError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatcherError {
    #[error("message watcher already active")]
    AlreadyRunning,

    #[error("message watcher not active")]
    NotRunning,

    #[error("cannot start message watcher thread: {0}")]
    ThreadStartFailed(String),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherState {
    #[default]
    Inactive,
    Registered,
    Running,
    StopRequested,
}

/// What a handler wants after seeing a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFlow {
    Continue,
    /// Ends the watcher loop; the lines not yet handed over, including the
    /// rest of the current batch, wait for `stop`.
    Abort,
}

/// Receives the lines drained by the watcher, one call per line.
pub trait MessageHandler: Send {
    fn on_result(&mut self, line: &str) -> HandlerFlow;
    fn on_info(&mut self, line: &str) -> HandlerFlow;
}

/// A [`MessageHandler`] made of two closures.
pub struct FnHandler<R, I> {
    result: R,
    info: I,
}

impl<R, I> FnHandler<R, I>
where
    R: FnMut(&str) -> HandlerFlow + Send,
    I: FnMut(&str) -> HandlerFlow + Send,
{
    pub fn new(result: R, info: I) -> Self {
        Self { result, info }
    }
}

impl<R, I> MessageHandler for FnHandler<R, I>
where
    R: FnMut(&str) -> HandlerFlow + Send,
    I: FnMut(&str) -> HandlerFlow + Send,
{
    fn on_result(&mut self, line: &str) -> HandlerFlow {
        (self.result)(line)
    }

    fn on_info(&mut self, line: &str) -> HandlerFlow {
        (self.info)(line)
    }
}

type SharedHandler = Arc<Mutex<Box<dyn MessageHandler>>>;

struct Session {
    frame: FrameHandle,
    handler: SharedHandler,
    thread: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Slot {
    state: WatcherState,
    session: Option<Session>,
    /// Drained lines the handler has not seen because it aborted mid-batch.
    held: Captured,
}

struct Shared {
    stack: Arc<RedirectionStack>,
    /// Lifecycle lock; `changed` signals every state transition.
    slot: Mutex<Slot>,
    changed: Condvar,
    /// Held while the thread drains its frame; the flag says a drain is underway.
    fetch: Mutex<bool>,
    poll: Duration,
}

impl Shared {
    fn slot(&self) -> Result<MutexGuard<'_, Slot>, LockError> {
        acquire(&self.slot, "message watcher lifecycle")
    }

    fn set_state(&self, state: WatcherState) -> Result<(), LockError> {
        self.slot()?.state = state;
        self.changed.notify_all();
        Ok(())
    }

    fn drain(&self, frame: FrameHandle) -> Result<Captured, WatcherError> {
        let mut busy = acquire(&self.fetch, "message watcher fetch")?;
        *busy = true;
        let drained = self.stack.drain(frame, Capture::BOTH);
        *busy = false;
        Ok(drained?)
    }
}

pub struct MsgWatcher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MsgWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgWatcher").field("state", &self.state().ok()).finish()
    }
}

impl MsgWatcher {
    /// `poll` bounds how long the idle thread waits before re-checking
    /// for a stop request.
    pub fn new(stack: Arc<RedirectionStack>, poll: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                stack,
                slot: Mutex::new(Slot::default()),
                changed: Condvar::new(),
                fetch: Mutex::new(false),
                poll: poll.max(Duration::from_millis(1)),
            }),
        }
    }

    pub fn state(&self) -> Result<WatcherState, LockError> {
        Ok(self.shared.slot()?.state)
    }

    /// Whether a watcher session exists, including one whose thread
    /// ended on a handler abort and still awaits `stop`.
    pub fn is_active(&self) -> Result<bool, LockError> {
        Ok(self.shared.slot()?.session.is_some())
    }

    /// Handle of the frame the watcher drains.
    pub fn frame(&self) -> Result<Option<FrameHandle>, LockError> {
        Ok(self.shared.slot()?.session.as_ref().map(|s| s.frame))
    }

    /// Reports whether the watcher's frame holds undrained lines, without
    /// racing a drain in progress.
    pub fn has_pending(&self) -> Result<bool, WatcherError> {
        let Some(frame) = self.frame()? else {
            return Ok(false);
        };
        let _busy = acquire(&self.shared.fetch, "message watcher fetch")?;
        Ok(self.shared.stack.peek(Some(frame), Duration::ZERO, Capture::BOTH, false)?)
    }

    #[tracing::instrument(skip_all)]
    pub fn start(&self, handler: Box<dyn MessageHandler>) -> Result<(), WatcherError> {
        let mut slot = self.shared.slot()?;
        if slot.state != WatcherState::Inactive || slot.session.is_some() {
            return Err(WatcherError::AlreadyRunning);
        }
        let frame = self.shared.stack.push(Capture::BOTH)?;
        let handler: SharedHandler = Arc::new(Mutex::new(handler));
        slot.state = WatcherState::Registered;

        let shared = Arc::clone(&self.shared);
        let thread_handler = Arc::clone(&handler);
        let spawned = thread::Builder::new()
            .name("msg-watcher".to_string())
            .spawn(move || watch(shared, frame, thread_handler));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                slot.state = WatcherState::Inactive;
                drop(slot);
                warn!("watcher thread failed to start: {e}");
                let mut leftover = self.shared.stack.pull(frame, Capture::BOTH)?;
                dispatch(&handler, &mut leftover)?;
                return Err(WatcherError::ThreadStartFailed(e.to_string()));
            }
        };
        slot.session = Some(Session { frame, handler, thread: Some(thread) });

        while slot.state == WatcherState::Registered {
            slot = self
                .shared
                .changed
                .wait(slot)
                .map_err(|_| poisoned("message watcher lifecycle"))?;
        }
        info!(%frame, "message watcher started");
        Ok(())
    }

    /// Stops the thread and hands over whatever is still captured.
    ///
    /// Without a session this is `NotRunning`, or silently Ok when `soft`.
    #[tracing::instrument(skip(self))]
    pub fn stop(&self, soft: bool) -> Result<(), WatcherError> {
        let mut slot = self.shared.slot()?;
        let Some(mut session) = slot.session.take() else {
            return if soft { Ok(()) } else { Err(WatcherError::NotRunning) };
        };
        // A concurrent `start` may still be waiting for the thread to come
        // up, so the request is made whenever `Running` shows up.
        loop {
            match slot.state {
                WatcherState::Inactive => break,
                WatcherState::Running => {
                    slot.state = WatcherState::StopRequested;
                    self.shared.changed.notify_all();
                }
                WatcherState::Registered | WatcherState::StopRequested => {}
            }
            slot = self
                .shared
                .changed
                .wait(slot)
                .map_err(|_| poisoned("message watcher lifecycle"))?;
        }
        if let Some(thread) = session.thread.take() {
            if thread.join().is_err() {
                report_raw("message watcher", "watcher thread panicked");
            }
        }
        // Still under the lifecycle lock so no new session pushes above us.
        let leftover = self.shared.stack.pull(session.frame, Capture::BOTH);
        let mut rest = std::mem::take(&mut slot.held);
        drop(slot);

        rest.append(leftover?);
        dispatch(&session.handler, &mut rest)?;
        info!(frame = %session.frame, "message watcher stopped");
        Ok(())
    }
}

fn watch(shared: Arc<Shared>, frame: FrameHandle, handler: SharedHandler) {
    if let Err(e) = shared.set_state(WatcherState::Running) {
        report_raw("message watcher", &e.to_string());
        return;
    }
    loop {
        match shared.slot().map(|s| s.state) {
            Ok(WatcherState::StopRequested) => break,
            Ok(_) => {}
            Err(e) => {
                report_raw("message watcher", &e.to_string());
                break;
            }
        }
        let mut batch = match shared.drain(frame) {
            Ok(batch) => batch,
            Err(e) => {
                report_raw("message watcher", &e.to_string());
                break;
            }
        };
        if batch.is_empty() {
            if let Err(e) = shared.stack.peek(Some(frame), shared.poll, Capture::BOTH, true) {
                report_raw("message watcher", &e.to_string());
                break;
            }
            continue;
        }
        match dispatch(&handler, &mut batch) {
            Ok(HandlerFlow::Continue) => {}
            Ok(HandlerFlow::Abort) => {
                debug!(held = batch.result.len() + batch.info.len(), "handler aborted the watcher loop");
                match shared.slot() {
                    Ok(mut slot) => slot.held = batch,
                    Err(e) => report_raw("message watcher", &e.to_string()),
                }
                break;
            }
            Err(e) => {
                report_raw("message watcher", &e.to_string());
                break;
            }
        }
    }
    if let Err(e) = shared.set_state(WatcherState::Inactive) {
        report_raw("message watcher", &e.to_string());
    }
}

/// All result lines first, then all info lines. Stops at the first abort.
///
/// Handed-over lines are removed from `batch`; after an abort it holds
/// exactly the lines the handler has not seen.
fn dispatch(handler: &SharedHandler, batch: &mut Captured) -> Result<HandlerFlow, LockError> {
    if batch.is_empty() {
        return Ok(HandlerFlow::Continue);
    }
    let mut handler = acquire(handler, "message watcher handler")?;
    if hand_over(&mut batch.result, |line| handler.on_result(line)) == HandlerFlow::Abort {
        return Ok(HandlerFlow::Abort);
    }
    Ok(hand_over(&mut batch.info, |line| handler.on_info(line)))
}

fn hand_over(lines: &mut Vec<String>, mut deliver: impl FnMut(&str) -> HandlerFlow) -> HandlerFlow {
    match lines.iter().position(|line| deliver(line) == HandlerFlow::Abort) {
        Some(n) => {
            lines.drain(..=n);
            HandlerFlow::Abort
        }
        None => {
            lines.clear();
            HandlerFlow::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msg_protocol::Channel;
    use std::sync::mpsc;

    type Lines = Arc<Mutex<Vec<String>>>;

    fn recording() -> (Box<dyn MessageHandler>, Lines, Lines) {
        let results: Lines = Default::default();
        let infos: Lines = Default::default();
        let (r, i) = (results.clone(), infos.clone());
        let handler = FnHandler::new(
            move |line: &str| {
                r.lock().unwrap().push(line.to_string());
                HandlerFlow::Continue
            },
            move |line: &str| {
                i.lock().unwrap().push(line.to_string());
                HandlerFlow::Continue
            },
        );
        (Box::new(handler), results, infos)
    }

    fn watcher() -> (Arc<RedirectionStack>, MsgWatcher) {
        let stack = Arc::new(RedirectionStack::new(8));
        let watcher = MsgWatcher::new(stack.clone(), Duration::from_millis(1));
        (stack, watcher)
    }

    #[test]
    fn start_twice_fails() {
        let (_stack, w) = watcher();
        let (h, _, _) = recording();
        w.start(h).unwrap();
        assert_eq!(w.state().unwrap(), WatcherState::Running);
        let (h2, _, _) = recording();
        assert_eq!(w.start(h2), Err(WatcherError::AlreadyRunning));
        w.stop(false).unwrap();
        assert_eq!(w.state().unwrap(), WatcherState::Inactive);
    }

    #[test]
    fn stop_without_start() {
        let (_stack, w) = watcher();
        assert_eq!(w.stop(false), Err(WatcherError::NotRunning));
        assert_eq!(w.stop(true), Ok(()));
    }

    #[test]
    fn every_line_arrives_once_in_order() {
        let (stack, w) = watcher();
        let (h, results, infos) = recording();
        w.start(h).unwrap();
        for n in 0..200 {
            stack.capture(Channel::Result, &format!("r{n}\n")).unwrap();
            if n % 3 == 0 {
                stack.capture(Channel::Info, &format!("i{n}\n")).unwrap();
            }
        }
        w.stop(false).unwrap();

        let results = results.lock().unwrap();
        let expected: Vec<String> = (0..200).map(|n| format!("r{n}\n")).collect();
        assert_eq!(*results, expected);
        let infos = infos.lock().unwrap();
        let expected: Vec<String> = (0..200).step_by(3).map(|n| format!("i{n}\n")).collect();
        assert_eq!(*infos, expected);
        assert_eq!(stack.depth().unwrap(), 0);
    }

    #[test]
    fn abort_leaves_lines_for_stop() {
        let (stack, w) = watcher();
        let seen: Lines = Default::default();
        let s = seen.clone();
        let handler = FnHandler::new(
            move |line: &str| {
                s.lock().unwrap().push(line.to_string());
                HandlerFlow::Abort
            },
            |_: &str| HandlerFlow::Continue,
        );
        w.start(Box::new(handler)).unwrap();
        stack.capture(Channel::Result, "first\n").unwrap();
        while w.state().unwrap() != WatcherState::Inactive {
            thread::sleep(Duration::from_millis(1));
        }
        stack.capture(Channel::Result, "second\n").unwrap();
        assert!(w.is_active().unwrap());
        assert!(w.has_pending().unwrap());

        w.stop(false).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first\n", "second\n"]);
        assert!(!w.is_active().unwrap());
    }

    #[test]
    fn abort_mid_batch_keeps_the_rest_for_stop() {
        let (stack, w) = watcher();
        let results: Lines = Default::default();
        let infos: Lines = Default::default();
        let (r, i) = (results.clone(), infos.clone());
        let handler = FnHandler::new(
            move |line: &str| {
                r.lock().unwrap().push(line.to_string());
                if line == "first\n" { HandlerFlow::Abort } else { HandlerFlow::Continue }
            },
            move |line: &str| {
                i.lock().unwrap().push(line.to_string());
                HandlerFlow::Continue
            },
        );
        w.start(Box::new(handler)).unwrap();
        {
            // The thread cannot drain while this is held, so all lines form one batch.
            let _busy = w.shared.fetch.lock().unwrap();
            stack.capture(Channel::Result, "first\n").unwrap();
            stack.capture(Channel::Info, "note\n").unwrap();
            stack.capture(Channel::Result, "second\n").unwrap();
            stack.capture(Channel::Result, "third\n").unwrap();
        }
        while w.state().unwrap() != WatcherState::Inactive {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*results.lock().unwrap(), vec!["first\n"]);
        assert!(infos.lock().unwrap().is_empty());
        stack.capture(Channel::Result, "late\n").unwrap();

        w.stop(false).unwrap();
        assert_eq!(*results.lock().unwrap(), vec!["first\n", "second\n", "third\n", "late\n"]);
        assert_eq!(*infos.lock().unwrap(), vec!["note\n"]);
        assert_eq!(stack.depth().unwrap(), 0);
    }

    #[test]
    fn stop_racing_start_returns() {
        for _ in 0..50 {
            let (stack, w) = watcher();
            let w = Arc::new(w);
            let starter = {
                let w = w.clone();
                thread::spawn(move || {
                    let (h, _, _) = recording();
                    w.start(h)
                })
            };
            let (done_tx, done_rx) = mpsc::channel();
            let stopper = {
                let w = w.clone();
                thread::spawn(move || {
                    while !w.is_active().unwrap() {
                        thread::yield_now();
                    }
                    done_tx.send(w.stop(true)).unwrap();
                })
            };
            let stopped = done_rx.recv_timeout(Duration::from_secs(5)).expect("stop did not return");
            assert_eq!(stopped, Ok(()));
            assert_eq!(starter.join().unwrap(), Ok(()));
            stopper.join().unwrap();
            assert_eq!(w.state().unwrap(), WatcherState::Inactive);
            assert_eq!(stack.depth().unwrap(), 0);
        }
    }

    #[test]
    fn frame_sits_on_the_stack_while_running() {
        let (stack, w) = watcher();
        let (h, _, _) = recording();
        w.start(h).unwrap();
        assert_eq!(stack.depth().unwrap(), 1);
        assert_eq!(w.frame().unwrap().map(FrameHandle::index), Some(0));
        w.stop(true).unwrap();
        assert_eq!(stack.depth().unwrap(), 0);
        assert_eq!(w.frame().unwrap(), None);
    }
}

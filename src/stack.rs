//! Redirection stack: a bounded LIFO of capture frames.
//!
//! While a frame is on top of the stack, the channels it captures are
//! appended to its queues instead of being printed. Handles are the frame's
//! index, assigned at push time; a frame keeps its index until it is popped.

use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use msg_protocol::Channel;
use thiserror::Error;
use tracing::{debug, trace};

use crate::lock::{LockError, acquire, poisoned};

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// Depth tracks nesting of operations, so this is a caller bug.
    #[error("message output redirection stack overflow (maximum depth {0})")]
    Overflow(usize),

    #[error("wrong message output redirection stack handle {handle} (depth {depth})")]
    BadHandle { handle: FrameHandle, depth: usize },

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(usize);

impl FrameHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which of the two capturable channels an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capture {
    pub result: bool,
    pub info: bool,
}

impl Capture {
    pub const NONE: Capture = Capture { result: false, info: false };
    pub const RESULT: Capture = Capture { result: true, info: false };
    pub const INFO: Capture = Capture { result: false, info: true };
    pub const BOTH: Capture = Capture { result: true, info: true };

    pub fn new(result: bool, info: bool) -> Self {
        Self { result, info }
    }
}

/// Lines taken out of one or more frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub result: Vec<String>,
    pub info: Vec<String>,
}

impl Captured {
    pub fn is_empty(&self) -> bool {
        self.result.is_empty() && self.info.is_empty()
    }

    /// Appends `later` behind the lines already held, channel by channel.
    pub fn append(&mut self, mut later: Captured) {
        self.result.append(&mut later.result);
        self.info.append(&mut later.info);
    }

    fn absorb(&mut self, frame: RedirectionFrame, want: Capture) {
        if want.result {
            self.result.extend(frame.result_queue);
        }
        if want.info {
            self.info.extend(frame.info_queue);
        }
    }
}

#[derive(Debug, Default)]
struct RedirectionFrame {
    capture: Capture,
    result_queue: Vec<String>,
    info_queue: Vec<String>,
}

impl RedirectionFrame {
    fn has_data(&self, want: Capture) -> bool {
        (want.result && !self.result_queue.is_empty()) || (want.info && !self.info_queue.is_empty())
    }

    fn take(&mut self, want: Capture) -> Captured {
        Captured {
            result: if want.result { std::mem::take(&mut self.result_queue) } else { Vec::new() },
            info: if want.info { std::mem::take(&mut self.info_queue) } else { Vec::new() },
        }
    }
}

pub struct RedirectionStack {
    max_depth: usize,
    frames: Mutex<Vec<RedirectionFrame>>,
    /// Signalled on every captured line and when waiters should re-check.
    arrived: Condvar,
}

impl fmt::Debug for RedirectionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectionStack")
            .field("max_depth", &self.max_depth)
            .field("depth", &self.depth().ok())
            .finish()
    }
}

impl RedirectionStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            frames: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn depth(&self) -> Result<usize, StackError> {
        Ok(acquire(&self.frames, "redirection stack")?.len())
    }

    pub fn push(&self, capture: Capture) -> Result<FrameHandle, StackError> {
        let mut frames = acquire(&self.frames, "redirection stack")?;
        if frames.len() >= self.max_depth {
            return Err(StackError::Overflow(self.max_depth));
        }
        frames.push(RedirectionFrame { capture, ..Default::default() });
        let handle = FrameHandle(frames.len() - 1);
        debug!(%handle, result = capture.result, info = capture.info, "pushed redirection frame");
        Ok(handle)
    }

    /// Removes the top frame, which must be `handle`, and returns its queues.
    pub fn fetch(&self, handle: FrameHandle, want: Capture) -> Result<Captured, StackError> {
        let mut frames = acquire(&self.frames, "redirection stack")?;
        if handle.0 + 1 != frames.len() {
            return Err(StackError::BadHandle { handle, depth: frames.len() });
        }
        let mut out = Captured::default();
        if let Some(frame) = frames.pop() {
            out.absorb(frame, want);
        }
        debug!(%handle, "fetched redirection frame");
        Ok(out)
    }

    /// Removes every frame from the top down to and including `handle`.
    /// Queues are concatenated bottom frame first.
    pub fn pull(&self, handle: FrameHandle, want: Capture) -> Result<Captured, StackError> {
        let mut frames = acquire(&self.frames, "redirection stack")?;
        check(handle, frames.len())?;
        let mut out = Captured::default();
        for frame in frames.drain(handle.0..) {
            out.absorb(frame, want);
        }
        debug!(%handle, "pulled redirection frames");
        Ok(out)
    }

    /// Empties the wanted queues of `handle` but leaves the frame in place.
    pub fn drain(&self, handle: FrameHandle, want: Capture) -> Result<Captured, StackError> {
        let mut frames = acquire(&self.frames, "redirection stack")?;
        check(handle, frames.len())?;
        Ok(frames[handle.0].take(want))
    }

    /// Reports whether the frame (`None` = current top) has queued data.
    ///
    /// With `poll`, waits up to `timeout` for data to arrive. Never
    /// mutates the queues. An empty stack has no data.
    pub fn peek(
        &self,
        handle: Option<FrameHandle>,
        timeout: Duration,
        want: Capture,
        poll: bool,
    ) -> Result<bool, StackError> {
        let mut frames = acquire(&self.frames, "redirection stack")?;
        let deadline = Instant::now() + timeout;
        loop {
            let index = match handle {
                Some(h) => {
                    check(h, frames.len())?;
                    h.0
                }
                None if frames.is_empty() => return Ok(false),
                None => frames.len() - 1,
            };
            if frames[index].has_data(want) {
                return Ok(true);
            }
            let now = Instant::now();
            if !poll || now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .arrived
                .wait_timeout(frames, deadline - now)
                .map_err(|_| poisoned("redirection stack"))?;
            frames = guard;
        }
    }

    /// Appends `text` to the top frame if that frame captures `channel`.
    /// Returns whether the line was captured.
    pub(crate) fn capture(&self, channel: Channel, text: &str) -> Result<bool, LockError> {
        let mut frames = acquire(&self.frames, "redirection stack")?;
        let Some(top) = frames.last_mut() else {
            return Ok(false);
        };
        let queue = match channel {
            Channel::Result if top.capture.result => &mut top.result_queue,
            Channel::Info if top.capture.info => &mut top.info_queue,
            _ => return Ok(false),
        };
        queue.push(text.to_string());
        trace!(?channel, "captured line");
        drop(frames);
        self.arrived.notify_all();
        Ok(true)
    }
}

fn check(handle: FrameHandle, depth: usize) -> Result<(), StackError> {
    if handle.0 >= depth {
        return Err(StackError::BadHandle { handle, depth });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_fetch_is_empty_and_restores_depth() {
        let stack = RedirectionStack::new(4);
        let before = stack.depth().unwrap();
        let h = stack.push(Capture::BOTH).unwrap();
        let got = stack.fetch(h, Capture::BOTH).unwrap();
        assert!(got.is_empty());
        assert_eq!(stack.depth().unwrap(), before);
    }

    #[test]
    fn overflow_at_max_depth() {
        let stack = RedirectionStack::new(2);
        stack.push(Capture::BOTH).unwrap();
        stack.push(Capture::BOTH).unwrap();
        assert_eq!(stack.push(Capture::BOTH), Err(StackError::Overflow(2)));
    }

    #[test]
    fn fetch_requires_top() {
        let stack = RedirectionStack::new(4);
        let low = stack.push(Capture::BOTH).unwrap();
        let _high = stack.push(Capture::BOTH).unwrap();
        assert!(matches!(stack.fetch(low, Capture::BOTH), Err(StackError::BadHandle { .. })));
    }

    #[test]
    fn popped_handle_is_rejected() {
        let stack = RedirectionStack::new(4);
        let h = stack.push(Capture::BOTH).unwrap();
        stack.pull(h, Capture::BOTH).unwrap();
        assert!(matches!(stack.pull(h, Capture::BOTH), Err(StackError::BadHandle { .. })));
        assert!(matches!(stack.drain(h, Capture::BOTH), Err(StackError::BadHandle { .. })));
    }

    #[test]
    fn pull_concatenates_bottom_first() {
        let stack = RedirectionStack::new(4);
        let outer = stack.push(Capture::BOTH).unwrap();
        stack.capture(Channel::Result, "outer 1\n").unwrap();
        let _inner = stack.push(Capture::RESULT).unwrap();
        stack.capture(Channel::Result, "inner 1\n").unwrap();
        assert!(!stack.capture(Channel::Info, "not captured\n").unwrap());

        let got = stack.pull(outer, Capture::BOTH).unwrap();
        assert_eq!(got.result, vec!["outer 1\n", "inner 1\n"]);
        assert!(got.info.is_empty());
        assert_eq!(stack.depth().unwrap(), 0);
    }

    #[test]
    fn unwanted_queue_is_not_returned() {
        let stack = RedirectionStack::new(4);
        let h = stack.push(Capture::BOTH).unwrap();
        stack.capture(Channel::Result, "r\n").unwrap();
        stack.capture(Channel::Info, "i\n").unwrap();
        let got = stack.fetch(h, Capture::INFO).unwrap();
        assert!(got.result.is_empty());
        assert_eq!(got.info, vec!["i\n"]);
    }

    #[test]
    fn drain_keeps_frame() {
        let stack = RedirectionStack::new(4);
        let h = stack.push(Capture::BOTH).unwrap();
        stack.capture(Channel::Info, "first\n").unwrap();
        assert_eq!(stack.drain(h, Capture::BOTH).unwrap().info, vec!["first\n"]);
        assert_eq!(stack.depth().unwrap(), 1);
        assert!(stack.drain(h, Capture::BOTH).unwrap().is_empty());
    }

    #[test]
    fn mark_and_none_are_never_captured_directly() {
        let stack = RedirectionStack::new(4);
        stack.push(Capture::BOTH).unwrap();
        assert!(!stack.capture(Channel::Mark, "m\n").unwrap());
        assert!(!stack.capture(Channel::None, "n\n").unwrap());
    }

    #[test]
    fn peek_does_not_consume() {
        let stack = RedirectionStack::new(4);
        assert!(!stack.peek(None, Duration::ZERO, Capture::BOTH, false).unwrap());
        let h = stack.push(Capture::BOTH).unwrap();
        assert!(!stack.peek(Some(h), Duration::ZERO, Capture::BOTH, false).unwrap());
        stack.capture(Channel::Result, "x\n").unwrap();
        assert!(stack.peek(None, Duration::ZERO, Capture::RESULT, false).unwrap());
        assert!(!stack.peek(Some(h), Duration::ZERO, Capture::INFO, false).unwrap());
        assert_eq!(stack.fetch(h, Capture::BOTH).unwrap().result, vec!["x\n"]);
    }

    #[test]
    fn polling_peek_times_out() {
        let stack = RedirectionStack::new(4);
        let h = stack.push(Capture::BOTH).unwrap();
        let start = Instant::now();
        let got = stack.peek(Some(h), Duration::from_millis(30), Capture::BOTH, true).unwrap();
        assert!(!got);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn polling_peek_sees_data_from_other_thread() {
        let stack = Arc::new(RedirectionStack::new(4));
        let h = stack.push(Capture::BOTH).unwrap();
        let producer = {
            let stack = stack.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                stack.capture(Channel::Info, "late\n").unwrap();
            })
        };
        assert!(stack.peek(Some(h), Duration::from_secs(5), Capture::INFO, true).unwrap());
        producer.join().unwrap();
    }
}

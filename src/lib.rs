pub mod config;
pub mod context;
pub mod escape;
pub mod frontend;
pub mod lock;
pub mod logfile;
pub mod logger;
pub mod problem;
pub mod router;
pub mod sieve;
pub mod sink;
pub mod stack;
pub mod watcher;

pub use context::{BusError, MsgContext, MsgContextBuilder};
pub use msg_protocol::{Channel, ChannelMask, Severity};
pub use stack::{Capture, Captured, FrameHandle};
pub use watcher::{FnHandler, HandlerFlow, MessageHandler, WatcherState};

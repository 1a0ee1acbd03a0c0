use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::error;

/// A mutex guarding bus state was poisoned by a panicking thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot acquire {0} lock")]
pub struct LockError(pub &'static str);

/// Writes straight to the process' stderr, bypassing the message channels.
///
/// Used for failures of the message path itself (lock poisoning, allocation
/// failure) where `emit` cannot be trusted.
pub fn report_raw(context: &str, msg: &str) {
    eprintln!("discbus : FATAL : {context} : {msg}");
    error!(%context, "{msg}");
}

pub(crate) fn acquire<'a, T>(
    mutex: &'a Mutex<T>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, LockError> {
    mutex.lock().map_err(|_| poisoned(what))
}

/// Like [`acquire`] but keeps going with the inner data after reporting.
pub(crate) fn acquire_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e: PoisonError<_>| {
        report_raw(what, "lock poisoned, continuing with raw write");
        e.into_inner()
    })
}

pub(crate) fn poisoned(what: &'static str) -> LockError {
    report_raw(what, "lock poisoned");
    LockError(what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn poisoned_mutex_is_reported() {
        let m = Arc::new(Mutex::new(0));
        let m2 = m.clone();
        let _ = std::thread::spawn(move || {
            let _g = m2.lock().unwrap();
            panic!("poison it");
        })
        .join();

        assert_eq!(acquire(&m, "test").unwrap_err(), LockError("test"));
        assert_eq!(*acquire_or_recover(&m, "test"), 0);
    }
}

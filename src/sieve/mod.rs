//! Sieve: filters that turn free-text output lines into structured tuples.
//!
//! Every emitted line is tested against every filter listening on its
//! channel. Matches are split into words and the configured subset is kept
//! in a small ring per filter, from where callers poll it by filter name.

pub mod defaults;
pub mod filter;
pub mod words;

pub use filter::{SieveFilter, SieveResult, Tuple};
pub use words::{match_prefix, parse_words};

use msg_protocol::Channel;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SieveError {
    #[error("sieve filter `{0}` is already registered")]
    DuplicateName(String),

    #[error("no sieve filter named `{0}`")]
    UnknownFilter(String),

    #[error("no result available from sieve filter `{0}`")]
    NoData(String),

    /// The engine discarded all filters.
    #[error("out of memory while registering sieve filter `{0}`")]
    OutOfMemory(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(usize);

impl FilterId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ordered filter collection. Insertion order is the test order.
#[derive(Debug, Default)]
pub struct SieveEngine {
    filters: Vec<SieveFilter>,
}

impl SieveEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn add_filter(&mut self, filter: SieveFilter) -> Result<FilterId, SieveError> {
        if self.position(filter.name()).is_some() {
            return Err(SieveError::DuplicateName(filter.name().to_string()));
        }
        if self.filters.try_reserve(1).is_err() {
            warn!(name = filter.name(), "allocation failed, discarding the whole sieve");
            self.dispose();
            return Err(SieveError::OutOfMemory(filter.name().to_string()));
        }
        debug!(name = filter.name(), channels = %filter.channels().letters(), "added sieve filter");
        self.filters.push(filter);
        Ok(FilterId(self.filters.len() - 1))
    }

    /// Tests `text` against every filter listening on `channel`.
    ///
    /// Never fails; returns `false` if some match could not be stored for
    /// lack of memory, in which case the engine has disposed all filters.
    pub fn evaluate(&mut self, text: &str, channel: Channel) -> bool {
        let mut stored_all = true;
        for filter in self.filters.iter_mut().filter(|f| f.listens_on(channel)) {
            if filter.evaluate(text).is_err() {
                stored_all = false;
            }
        }
        self.settle(stored_all)
    }

    fn settle(&mut self, stored_all: bool) -> bool {
        if !stored_all {
            warn!(filters = self.filters.len(), "sieve out of memory, disabling");
            self.dispose();
        }
        stored_all
    }

    /// Hands out the next undelivered tuple of filter `name`.
    ///
    /// `reset` restarts delivery at the oldest tuple still in the ring;
    /// `count_only` reports the remaining count without advancing.
    pub fn get_result(
        &mut self,
        name: &str,
        reset: bool,
        count_only: bool,
    ) -> Result<SieveResult, SieveError> {
        let index = self
            .position(name)
            .ok_or_else(|| SieveError::UnknownFilter(name.to_string()))?;
        self.filters[index]
            .next_result(reset, count_only)
            .ok_or_else(|| SieveError::NoData(name.to_string()))
    }

    /// Empties all result rings, keeping the registrations.
    pub fn clear_results(&mut self) {
        self.filters.iter_mut().for_each(SieveFilter::clear);
    }

    /// Removes every filter.
    pub fn dispose(&mut self) {
        self.filters = Vec::new();
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn filter(&self, name: &str) -> Option<&SieveFilter> {
        self.filters.iter().find(|f| f.name() == name)
    }

    /// Registers the standard filter set, skipping names already present.
    pub fn install_defaults(&mut self) -> Result<usize, SieveError> {
        let mut added = 0;
        for filter in defaults::standard_filters() {
            match self.add_filter(filter) {
                Ok(_) => added += 1,
                Err(SieveError::DuplicateName(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.filters.iter().position(|f| f.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msg_protocol::ChannelMask;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut sieve = SieveEngine::new();
        sieve.add_filter(SieveFilter::new("dev", ChannelMask::RESULT, "-dev")).unwrap();
        assert_eq!(
            sieve.add_filter(SieveFilter::new("dev", ChannelMask::INFO, "x")),
            Err(SieveError::DuplicateName("dev".into()))
        );
        assert_eq!(sieve.len(), 1);
    }

    #[test]
    fn channel_mask_selects_filters() {
        let mut sieve = SieveEngine::new();
        sieve
            .add_filter(SieveFilter::new("r", ChannelMask::RESULT, "x").words(vec![0]))
            .unwrap();
        sieve
            .add_filter(SieveFilter::new("i", ChannelMask::INFO, "x").words(vec![0]))
            .unwrap();
        assert!(sieve.evaluate("x line\n", Channel::Info));
        assert_eq!(sieve.get_result("r", true, true), Err(SieveError::NoData("r".into())));
        assert_eq!(sieve.get_result("i", true, true).unwrap().remaining, 1);
    }

    #[test]
    fn unknown_filter() {
        let mut sieve = SieveEngine::new();
        assert_eq!(
            sieve.get_result("nope", false, false),
            Err(SieveError::UnknownFilter("nope".into()))
        );
    }

    #[test]
    fn most_recent_single_result() {
        let mut sieve = SieveEngine::new();
        sieve
            .add_filter(
                SieveFilter::new("dev", ChannelMask::RESULT, "-dev")
                    .words(vec![0, 1])
                    .max_results(1),
            )
            .unwrap();
        sieve.evaluate("-dev /dev/sr0\n", Channel::Result);
        sieve.evaluate("-dev /dev/sr1\n", Channel::Result);
        let r = sieve.get_result("dev", true, false).unwrap();
        assert_eq!(r.tuple, vec!["-dev", "/dev/sr1"]);
        assert!(matches!(sieve.get_result("dev", false, false), Err(SieveError::NoData(_))));
    }

    #[test]
    fn clear_keeps_registrations() {
        let mut sieve = SieveEngine::new();
        sieve.install_defaults().unwrap();
        let names = sieve.filter_names();
        sieve.evaluate("-changes_pending yes\n", Channel::Result);
        sieve.clear_results();
        assert_eq!(sieve.filter_names(), names);
        assert!(matches!(
            sieve.get_result("-changes_pending", true, false),
            Err(SieveError::NoData(_))
        ));
        sieve.dispose();
        assert!(sieve.is_empty());
    }

    #[test]
    fn failed_store_disables_the_sieve() {
        let mut sieve = SieveEngine::new();
        sieve.install_defaults().unwrap();
        assert!(sieve.settle(true));
        assert!(!sieve.is_empty());
        assert!(!sieve.settle(false));
        assert!(sieve.is_empty());
        assert!(sieve.evaluate("-changes_pending yes\n", Channel::Result));
        assert!(matches!(
            sieve.get_result("-changes_pending", true, false),
            Err(SieveError::UnknownFilter(_))
        ));
    }

    #[test]
    fn defaults_install_once() {
        let mut sieve = SieveEngine::new();
        let first = sieve.install_defaults().unwrap();
        assert!(first > 0);
        assert_eq!(sieve.install_defaults().unwrap(), 0);
    }
}

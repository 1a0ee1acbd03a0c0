use std::collections::TryReserveError;
use std::collections::VecDeque;

use msg_protocol::{Channel, ChannelMask};
use serde::Serialize;

use super::words::{Splitter, match_prefix};

/// One extracted record: the configured subset of a matching line's words.
pub type Tuple = Vec<String>;

/// A named pattern that mines word tuples out of matching lines.
///
/// Built with the chained setters, then handed to
/// [`SieveEngine::add_filter`](super::SieveEngine::add_filter).
#[derive(Debug, Clone)]
pub struct SieveFilter {
    name: String,
    channels: ChannelMask,
    prefix: String,
    separators: String,
    word_indices: Vec<usize>,
    rest_of_line: bool,
    quotes: bool,
    max_results: usize,
    results: VecDeque<Tuple>,
    /// Tuples at the ring front that were already handed out. Doubles as the
    /// delivery cursor: the next tuple to deliver is `results[delivered]`.
    delivered: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SieveResult {
    pub tuple: Tuple,
    /// Undelivered tuples before this call, the returned one included.
    pub remaining: usize,
}

impl SieveFilter {
    pub fn new(name: impl Into<String>, channels: ChannelMask, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels,
            prefix: prefix.into(),
            separators: String::new(),
            word_indices: Vec::new(),
            rest_of_line: false,
            quotes: false,
            max_results: 1,
            results: VecDeque::new(),
            delivered: 0,
        }
    }

    /// Word separators; empty means whitespace.
    pub fn separators(mut self, separators: impl Into<String>) -> Self {
        self.separators = separators.into();
        self
    }

    /// Which words to keep, word 0 being the matched prefix.
    pub fn words(mut self, indices: impl Into<Vec<usize>>) -> Self {
        self.word_indices = indices.into();
        self
    }

    /// The highest kept word takes the rest of the line unsplit.
    pub fn rest_of_line(mut self, yes: bool) -> Self {
        self.rest_of_line = yes;
        self
    }

    /// `'...'` and `"..."` enclose one word; the quotes are removed.
    pub fn with_quotes(mut self, yes: bool) -> Self {
        self.quotes = yes;
        self
    }

    /// Ring capacity; 0 is treated as 1.
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> ChannelMask {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        self.max_results.max(1)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub(crate) fn listens_on(&self, channel: Channel) -> bool {
        self.channels.contains(channel)
    }

    /// Tests one line and records a tuple on match. Returns whether it matched.
    pub(crate) fn evaluate(&mut self, line: &str) -> Result<bool, TryReserveError> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let Some(matched) = match_prefix(line, &self.prefix) else {
            return Ok(false);
        };

        let tuple = if self.word_indices.is_empty() {
            vec![line[matched..].to_string()]
        } else {
            let words = self.split(line, matched);
            let mut tuple = Vec::new();
            tuple.try_reserve_exact(self.word_indices.len())?;
            tuple.extend(
                self.word_indices
                    .iter()
                    .map(|&i| words.get(i).cloned().unwrap_or_default()),
            );
            tuple
        };

        if self.results.len() >= self.capacity() {
            self.results.pop_front();
            self.delivered = self.delivered.saturating_sub(1);
        }
        self.results.try_reserve(1)?;
        self.results.push_back(tuple);
        Ok(true)
    }

    fn split(&self, line: &str, matched: usize) -> Vec<String> {
        let splitter = Splitter::new(&self.separators, self.quotes);
        let highest = self.word_indices.iter().copied().max().unwrap_or(0);
        let prefix_word = !self.prefix.is_empty();
        // Number of words the remainder is split into before the last one
        // swallows the rest; 0 = unlimited.
        let limit = match (self.rest_of_line, prefix_word) {
            (false, _) => 0,
            (true, true) if highest == 0 => 0,
            (true, true) => highest,
            (true, false) => highest + 1,
        };

        if prefix_word {
            let mut words = vec![line[..matched].to_string()];
            words.extend(splitter.split(&line[matched..], limit));
            words
        } else {
            splitter.split(line, limit)
        }
    }

    pub(crate) fn next_result(&mut self, reset: bool, count_only: bool) -> Option<SieveResult> {
        if reset {
            self.delivered = 0;
        }
        let remaining = self.results.len().saturating_sub(self.delivered);
        if remaining == 0 {
            return None;
        }
        if count_only {
            return Some(SieveResult { tuple: Vec::new(), remaining });
        }
        let tuple = self.results[self.delivered].clone();
        self.delivered += 1;
        Some(SieveResult { tuple, remaining })
    }

    pub(crate) fn clear(&mut self) {
        self.results.clear();
        self.delivered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_filter(max: usize) -> SieveFilter {
        SieveFilter::new("dev", ChannelMask::RESULT, "-dev").words(vec![0, 1]).max_results(max)
    }

    #[test]
    fn extracts_configured_words() {
        let mut f = dev_filter(4);
        assert!(f.evaluate("-dev /dev/sr0\n").unwrap());
        assert!(!f.evaluate("Drive current: -dev /dev/sr1\n").unwrap());
        assert_eq!(f.len(), 1);
        let r = f.next_result(true, false).unwrap();
        assert_eq!(r.tuple, vec!["-dev", "/dev/sr0"]);
    }

    #[test]
    fn out_of_range_index_is_empty() {
        let mut f = SieveFilter::new("x", ChannelMask::INFO, "").words(vec![0, 7]);
        f.evaluate("only two\n").unwrap();
        assert_eq!(f.next_result(false, false).unwrap().tuple, vec!["only", ""]);
    }

    #[test]
    fn no_indices_keeps_remainder() {
        let mut f = SieveFilter::new("pending", ChannelMask::RESULT, "-changes_pending ");
        f.evaluate("-changes_pending no\n").unwrap();
        assert_eq!(f.next_result(false, false).unwrap().tuple, vec!["no"]);
    }

    #[test]
    fn rest_of_line_keeps_separators() {
        let mut f = SieveFilter::new("media", ChannelMask::RESULT, "Media current:")
            .words(vec![1])
            .rest_of_line(true);
        f.evaluate("Media current: DVD+RW sequential recording\n").unwrap();
        assert_eq!(
            f.next_result(false, false).unwrap().tuple,
            vec!["DVD+RW sequential recording"]
        );
    }

    #[test]
    fn ring_keeps_most_recent() {
        let mut f = dev_filter(2);
        for n in 0..5 {
            f.evaluate(&format!("-dev /dev/sr{n}\n")).unwrap();
        }
        assert_eq!(f.len(), 2);
        let first = f.next_result(true, false).unwrap();
        assert_eq!(first.remaining, 2);
        assert_eq!(first.tuple[1], "/dev/sr3");
        assert_eq!(f.next_result(false, false).unwrap().tuple[1], "/dev/sr4");
        assert!(f.next_result(false, false).is_none());
    }

    #[test]
    fn zero_capacity_means_one() {
        let mut f = dev_filter(0);
        f.evaluate("-dev a\n").unwrap();
        f.evaluate("-dev b\n").unwrap();
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn eviction_rebases_cursor() {
        let mut f = dev_filter(3);
        for n in 0..3 {
            f.evaluate(&format!("-dev {n}\n")).unwrap();
        }
        // Consumer has read tuple 0 and is about to read tuple 1.
        assert_eq!(f.next_result(true, false).unwrap().tuple[1], "0");
        assert_eq!(f.delivered(), 1);

        // Tuple 0 is evicted; the cursor still points at tuple 1.
        f.evaluate("-dev 3\n").unwrap();
        assert_eq!(f.delivered(), 0);
        assert_eq!(f.next_result(false, false).unwrap().tuple[1], "1");

        // Evicting the tuple the cursor points at moves it to the new oldest.
        f.evaluate("-dev 4\n").unwrap();
        f.evaluate("-dev 5\n").unwrap();
        assert_eq!(f.delivered(), 0);
        assert_eq!(f.next_result(false, false).unwrap().tuple[1], "3");
    }

    #[test]
    fn count_only_does_not_advance() {
        let mut f = dev_filter(3);
        f.evaluate("-dev a\n").unwrap();
        assert_eq!(f.next_result(false, true).unwrap().remaining, 1);
        assert_eq!(f.next_result(false, true).unwrap().remaining, 1);
        assert_eq!(f.next_result(false, false).unwrap().tuple[1], "a");
        assert!(f.next_result(false, true).is_none());
    }
}

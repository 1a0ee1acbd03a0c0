//! Prefix matching and word splitting shared by the sieve filters and the
//! stand-alone line parser.

/// Leading run of this character in a prefix accepts any character.
pub const WILDCARD: char = '?';

/// Matches `prefix` at the start of `line` and returns the byte length of the
/// matched text in `line`.
///
/// A prefix that starts with k wildcard markers accepts any k characters and
/// then requires the rest of the prefix verbatim. An empty prefix always
/// matches with length 0.
pub fn match_prefix(line: &str, prefix: &str) -> Option<usize> {
    let literal = prefix.trim_start_matches(WILDCARD);
    let wildcards = prefix.len() - literal.len();
    if wildcards == 0 {
        return line.starts_with(prefix).then_some(prefix.len());
    }

    let mut chars = line.char_indices();
    let mut skipped = 0;
    for _ in 0..wildcards {
        let (i, c) = chars.next()?;
        skipped = i + c.len_utf8();
    }
    line[skipped..]
        .starts_with(literal)
        .then_some(skipped + literal.len())
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Splitter<'a> {
    separators: &'a str,
    quotes: bool,
}

impl<'a> Splitter<'a> {
    pub(crate) fn new(separators: &'a str, quotes: bool) -> Self {
        Self { separators, quotes }
    }

    fn is_separator(&self, c: char) -> bool {
        if self.separators.is_empty() {
            c.is_whitespace()
        } else {
            self.separators.contains(c)
        }
    }

    /// Splits `text` into words. With `max_words > 0` the last word takes
    /// the rest of the text verbatim, embedded separators included.
    pub(crate) fn split(&self, text: &str, max_words: usize) -> Vec<String> {
        let mut words = Vec::new();
        let mut rest = text;
        loop {
            rest = rest.trim_start_matches(|c| self.is_separator(c));
            if rest.is_empty() {
                break;
            }
            if max_words > 0 && words.len() + 1 == max_words {
                words.push(rest.to_string());
                break;
            }
            let (word, remainder) = self.next_word(rest);
            words.push(word);
            rest = remainder;
        }
        words
    }

    fn next_word<'t>(&self, text: &'t str) -> (String, &'t str) {
        let mut word = String::new();
        let mut quote: Option<char> = None;
        for (i, c) in text.char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => word.push(c),
                None if self.quotes && (c == '\'' || c == '"') => quote = Some(c),
                None if self.is_separator(c) => return (word, &text[i..]),
                None => word.push(c),
            }
        }
        (word, "")
    }
}

/// Splits `line` the way sieve filters do.
///
/// Returns `None` if `prefix` does not match. Otherwise word 0 is the matched
/// prefix text (when `prefix` is not empty) and the following words come
/// from the rest of the line. `max_words` counts all words including the
/// prefix word; 0 means no limit, otherwise the last word takes the rest of
/// the line. A trailing line break is ignored.
pub fn parse_words(
    line: &str,
    prefix: &str,
    separators: &str,
    max_words: usize,
    quotes: bool,
) -> Option<Vec<String>> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let matched = match_prefix(line, prefix)?;
    let splitter = Splitter::new(separators, quotes);
    if prefix.is_empty() {
        return Some(splitter.split(line, max_words));
    }

    let mut words = vec![line[..matched].to_string()];
    match max_words {
        1 => {}
        0 => words.extend(splitter.split(&line[matched..], 0)),
        n => words.extend(splitter.split(&line[matched..], n - 1)),
    }
    Some(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_prefix() {
        assert_eq!(match_prefix("-dev /dev/sr0", "-dev"), Some(4));
        assert_eq!(match_prefix(" -dev /dev/sr0", "-dev"), None);
        assert_eq!(match_prefix("anything", ""), Some(0));
    }

    #[test]
    fn wildcard_prefix_ignores_leading_chars() {
        assert_eq!(match_prefix("0   -dev '/dev/sr0'", "??  -dev"), Some(8));
        assert_eq!(match_prefix("12  -dev '/dev/sr1'", "??  -dev"), Some(8));
        assert_eq!(match_prefix("12 -dev", "??  -dev"), None);
        assert_eq!(match_prefix("1", "??"), None);
    }

    #[test]
    fn wildcards_count_characters_not_bytes() {
        assert_eq!(match_prefix("äb:x", "??:"), Some(4));
    }

    #[test]
    fn whitespace_split_by_default() {
        let words = parse_words("-dev  /dev/sr0 rw\n", "", "", 0, false).unwrap();
        assert_eq!(words, vec!["-dev", "/dev/sr0", "rw"]);
    }

    #[test]
    fn prefix_is_word_zero() {
        let words = parse_words("Media current: DVD+RW\n", "Media current:", "", 0, false).unwrap();
        assert_eq!(words, vec!["Media current:", "DVD+RW"]);
        assert!(parse_words("Media status", "Media current:", "", 0, false).is_none());
    }

    #[test]
    fn last_word_takes_rest() {
        let words = parse_words("Drive type   : vendor 'X' product 'Y Z'", "Drive type   :", "", 3, false)
            .unwrap();
        assert_eq!(words, vec!["Drive type   :", "vendor", "'X' product 'Y Z'"]);
    }

    #[test]
    fn custom_separators() {
        let words = parse_words("a:b::c", "", ":", 0, false).unwrap();
        assert_eq!(words, vec!["a", "b", "c"]);
    }

    #[test]
    fn quotes_group_words() {
        let words = parse_words("0  -dev '/dev/sr0' rwrw-- :  'HL-DT-ST' 'DVDRAM GH22'", "", "", 0, true)
            .unwrap();
        assert_eq!(words, vec!["0", "-dev", "/dev/sr0", "rwrw--", ":", "HL-DT-ST", "DVDRAM GH22"]);
    }
}

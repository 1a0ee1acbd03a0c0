//! The standard filter set for status reports of drives, media and images.
//!
//! Frontends install these to poll recurring report lines without parsing
//! the human-readable text themselves.

use msg_protocol::ChannelMask;

use super::SieveFilter;

struct Preset {
    name: &'static str,
    channels: ChannelMask,
    prefix: &'static str,
    separators: &'static str,
    words: &'static [usize],
    max_results: usize,
    rest_of_line: bool,
}

const R: ChannelMask = ChannelMask::RESULT;
const I: ChannelMask = ChannelMask::INFO;

const PRESETS: &[Preset] = &[
    Preset { name: "-changes_pending", channels: R, prefix: "-changes_pending ", separators: "", words: &[], max_results: 1, rest_of_line: false },
    Preset { name: "-abort_on", channels: R, prefix: "-abort_on ", separators: "", words: &[1], max_results: 1, rest_of_line: false },
    Preset { name: "-report_about", channels: R, prefix: "-report_about ", separators: "", words: &[1], max_results: 1, rest_of_line: false },
    Preset { name: "?  -dev", channels: R, prefix: "?  -dev", separators: "", words: &[0, 1, 4, 5], max_results: 10, rest_of_line: false },
    Preset { name: "??  -dev", channels: R, prefix: "??  -dev", separators: "", words: &[0, 1, 4, 5], max_results: 90, rest_of_line: false },
    Preset { name: "Drive current:", channels: R, prefix: "Drive current:", separators: "", words: &[1, 2], max_results: 2, rest_of_line: true },
    Preset { name: "Drive type   :", channels: R, prefix: "Drive type   :", separators: "", words: &[2, 4, 6], max_results: 1, rest_of_line: false },
    Preset { name: "Drive access :", channels: R, prefix: "Drive access :", separators: ": ", words: &[1, 2], max_results: 2, rest_of_line: false },
    Preset { name: "Media current:", channels: R, prefix: "Media current:", separators: "", words: &[1], max_results: 2, rest_of_line: true },
    Preset { name: "Media status :", channels: R, prefix: "Media status :", separators: "", words: &[1], max_results: 2, rest_of_line: true },
    Preset { name: "Media blocks :", channels: R, prefix: "Media blocks :", separators: "", words: &[1, 4, 7], max_results: 2, rest_of_line: false },
    Preset { name: "Media summary:", channels: R, prefix: "Media summary:", separators: "", words: &[1, 3, 5, 6], max_results: 2, rest_of_line: false },
    Preset { name: "Media nwa    :", channels: R, prefix: "Media nwa    :", separators: "", words: &[1], max_results: 1, rest_of_line: false },
    Preset { name: "Volume id    :", channels: R, prefix: "Volume id    :", separators: "", words: &[1], max_results: 2, rest_of_line: true },
    Preset { name: "Image size   :", channels: R, prefix: "Image size   :", separators: "", words: &[1], max_results: 1, rest_of_line: false },
    Preset { name: "Write speed  :", channels: R, prefix: "Write speed  :", separators: "", words: &[1, 2], max_results: 100, rest_of_line: false },
    Preset { name: "Write speed L:", channels: R, prefix: "Write speed L:", separators: "", words: &[1, 2], max_results: 1, rest_of_line: false },
    Preset { name: "Write speed H:", channels: R, prefix: "Write speed H:", separators: "", words: &[1, 2], max_results: 1, rest_of_line: false },
    Preset { name: "Boot record  :", channels: R, prefix: "Boot record  :", separators: "", words: &[1, 3], max_results: 1, rest_of_line: true },
    Preset { name: "ISO session  :", channels: R, prefix: "ISO session  :", separators: "", words: &[1, 3, 5, 7], max_results: 10000, rest_of_line: false },
    Preset { name: "Local ACL    :", channels: R, prefix: "Local ACL    :", separators: "", words: &[1], max_results: 1, rest_of_line: false },
    Preset { name: "Local xattr  :", channels: R, prefix: "Local xattr  :", separators: "", words: &[1], max_results: 1, rest_of_line: false },
    Preset { name: "libisofs   in use", channels: I, prefix: "libisofs   in use", separators: "", words: &[2], max_results: 1, rest_of_line: false },
    Preset { name: "libburn    in use", channels: I, prefix: "libburn    in use", separators: "", words: &[2], max_results: 1, rest_of_line: false },
];

pub fn standard_filters() -> Vec<SieveFilter> {
    PRESETS
        .iter()
        .map(|s| {
            SieveFilter::new(s.name, s.channels, s.prefix)
                .separators(s.separators)
                .words(s.words.to_vec())
                .max_results(s.max_results)
                .rest_of_line(s.rest_of_line)
                .with_quotes(true)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sieve::SieveEngine;
    use msg_protocol::Channel;

    #[test]
    fn names_are_unique() {
        let mut sieve = SieveEngine::new();
        assert_eq!(sieve.install_defaults().unwrap(), PRESETS.len());
    }

    #[test]
    fn device_list_lines() {
        let mut sieve = SieveEngine::new();
        sieve.install_defaults().unwrap();
        sieve.evaluate("0  -dev '/dev/sr0' rwrw-- :  'HL-DT-ST' 'DVDRAM GH22NS50'\n", Channel::Result);
        sieve.evaluate("11  -dev '/dev/sr11' rwrw-- :  'TSSTcorp' 'CDDVDW SH-224DB'\n", Channel::Result);

        let one = sieve.get_result("?  -dev", true, false).unwrap();
        assert_eq!(one.tuple, vec!["0  -dev", "/dev/sr0", "HL-DT-ST", "DVDRAM GH22NS50"]);
        let two = sieve.get_result("??  -dev", true, false).unwrap();
        assert_eq!(two.tuple[1], "/dev/sr11");
    }

    #[test]
    fn media_current_takes_rest() {
        let mut sieve = SieveEngine::new();
        sieve.install_defaults().unwrap();
        sieve.evaluate("Media current: DVD+RW restricted overwrite\n", Channel::Result);
        let r = sieve.get_result("Media current:", true, false).unwrap();
        assert_eq!(r.tuple, vec!["DVD+RW restricted overwrite"]);
    }
}

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Message severities in ascending rank.
///
/// `ALL` and `NEVER` are only meaningful as thresholds: `report_about ALL`
/// prints everything, `abort_on NEVER` never aborts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, JsonSchema, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    All,
    Debug,
    Update,
    Note,
    Hint,
    Warning,
    Sorry,
    Mishap,
    Failure,
    Fatal,
    Abort,
    Never,
}

impl Severity {
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// True for severities that indicate the requested work was not done.
    pub fn is_problem(self) -> bool {
        self >= Severity::Sorry && self < Severity::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_rank() {
        assert!(Severity::Sorry > Severity::Warning);
        assert!(Severity::Fatal > Severity::Failure);
        assert!(Severity::All < Severity::Debug);
        assert_eq!(Severity::Update.rank(), 2);
    }

    #[test]
    fn parses_names() {
        let s: Severity = "failure".parse().unwrap();
        assert_eq!(s, Severity::Failure);
        assert_eq!(Severity::Mishap.to_string(), "MISHAP");
        assert!("BOGUS".parse::<Severity>().is_err());
    }

    #[test]
    fn problem_band() {
        assert!(!Severity::Warning.is_problem());
        assert!(Severity::Sorry.is_problem());
        assert!(!Severity::Never.is_problem());
    }
}

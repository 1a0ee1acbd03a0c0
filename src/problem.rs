use msg_protocol::Severity;

/// Highest severity seen since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProblemStatus {
    worst: Severity,
}

impl ProblemStatus {
    pub fn worst(&self) -> Severity {
        self.worst
    }

    /// Raises to `severity` if higher; `force` sets it unconditionally.
    /// Returns the resulting status.
    pub fn raise(&mut self, severity: Severity, force: bool) -> Severity {
        if force || severity > self.worst {
            self.worst = severity;
        }
        self.worst
    }

    pub fn reset(&mut self) {
        self.worst = Severity::All;
    }

    pub fn reaches(&self, threshold: Severity) -> bool {
        threshold != Severity::Never && self.worst >= threshold
    }
}

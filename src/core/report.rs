use colored::Colorize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

/// Canonical error-code registry. Every finding surfaced by the workflow must
/// carry one of these codes; anything else is treated as a lifecycle violation
/// so a typo can never masquerade as a benign failure.
pub const ERROR_CODES: &[&str] = &[
    "OK",
    "INPUT_INVALID",
    "IO_ERROR",
    "SNAPSHOT_INVALID",
    "APPROVAL_MISSING",
    "FINGERPRINT_MISSING",
    "FINGERPRINT_MISMATCH",
    "LIFECYCLE_VIOLATION",
    "MERGE_STATE_INVALID",
    "DELIVERABLES_CHECK_FAILED",
    "NODE_COVERAGE_INCOMPLETE",
    "ANCHORS_INVALID",
    "BRIDGE_FAILED",
    "OUTPUT_NOT_JSON",
    "OUTPUT_TRUNCATED",
];

pub fn is_known_code(code: &str) -> bool {
    ERROR_CODES.contains(&code)
}

/// Severity of a finding. The process exit code is the worst severity seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Pass,
    Fail,
    Blocker,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Pass => "PASS",
            Level::Fail => "FAIL",
            Level::Blocker => "BLOCKER",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Level::Pass => 0,
            Level::Fail => 1,
            Level::Blocker => 2,
        }
    }

    fn painted(&self) -> colored::ColoredString {
        match self {
            Level::Pass => self.as_str().green(),
            Level::Fail => self.as_str().yellow(),
            Level::Blocker => self.as_str().red(),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One validation outcome: `[LEVEL] CODE: message` plus optional structured
/// evidence rendered as a sorted-key JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub level: Level,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<JsonValue>,
}

impl Finding {
    pub fn render_line(&self) -> String {
        format!("[{}] {}: {}", self.level, self.code, self.message)
    }
}

pub fn status_line(level: Level, code: &str, message: &str) -> String {
    format!("[{}] {}: {}", level.painted(), code, message)
}

/// Accumulates findings for multi-check commands. The registry gate lives in
/// `add`: an unrecognized code produces an extra BLOCKER finding and the
/// offending finding is re-coded as a lifecycle violation.
#[derive(Debug, Default)]
pub struct Reporter {
    pub findings: Vec<Finding>,
}

impl Reporter {
    pub fn new() -> Self {
        Reporter {
            findings: Vec::new(),
        }
    }

    pub fn pass(&mut self, code: &str, message: impl Into<String>) {
        self.add(Level::Pass, code, message.into(), None);
    }

    pub fn fail(&mut self, code: &str, message: impl Into<String>, evidence: Option<JsonValue>) {
        self.add(Level::Fail, code, message.into(), evidence);
    }

    pub fn blocker(&mut self, code: &str, message: impl Into<String>, evidence: Option<JsonValue>) {
        self.add(Level::Blocker, code, message.into(), evidence);
    }

    fn add(&mut self, level: Level, code: &str, message: String, evidence: Option<JsonValue>) {
        let mut code = code.to_string();
        if !is_known_code(&code) {
            self.findings.push(Finding {
                level: Level::Blocker,
                code: "LIFECYCLE_VIOLATION".to_string(),
                message: format!("unknown error code used: {}", code),
                evidence: None,
            });
            code = "LIFECYCLE_VIOLATION".to_string();
        }
        self.findings.push(Finding {
            level,
            code,
            message,
            evidence,
        });
    }

    pub fn has_blocker(&self) -> bool {
        self.findings.iter().any(|f| f.level == Level::Blocker)
    }

    pub fn has_fail(&self) -> bool {
        self.findings.iter().any(|f| f.level == Level::Fail)
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_blocker() {
            2
        } else if self.has_fail() {
            1
        } else {
            0
        }
    }

    pub fn emit(&self) {
        for f in &self.findings {
            println!("{}", status_line(f.level, &f.code, &f.message));
            if let Some(ev) = &f.evidence {
                // serde_json maps are sorted, so this line is deterministic
                println!("  evidence: {}", serde_json::to_string(ev).unwrap());
            }
        }
    }
}

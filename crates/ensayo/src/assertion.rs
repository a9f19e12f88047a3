//! Assertion Engine.
//!
//! One vocabulary for UI and API verification. DOM checks are polled until
//! they hold or their timeout passes; payload checks run once against a
//! stored HTTP response. Every assertion yields exactly one
//! [`AssertionOutcome`], so a run reports all violated expectations at once.

mod dom;
pub mod payload;

pub use payload::{ElementCheck, FieldRule, JsonType, Mismatch};

use crate::driver::BrowserDriver;
use crate::http::ResponseStore;
use crate::locator::{TargetDescriptor, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS};
use crate::result::EnsayoError;
use crate::vars::Vars;
use crate::wait::Deadline;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// A predicate over DOM state or an HTTP payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    /// Target resolves to a visible element
    Visible(TargetDescriptor),
    /// No visible element matches the target
    Hidden(TargetDescriptor),
    /// Trimmed text of the target equals the value
    TextEquals {
        /// Element to read
        target: TargetDescriptor,
        /// Expected text
        value: String,
    },
    /// Text of the target contains the value
    TextContains {
        /// Element to read
        target: TargetDescriptor,
        /// Expected fragment
        value: String,
    },
    /// Attribute of the target is present (and equal to `value` when given)
    Attribute {
        /// Element to read
        target: TargetDescriptor,
        /// Attribute name
        name: String,
        /// Expected value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// Main frame URL contains the value
    UrlContains(String),
    /// Field of a response body satisfies a rule
    Field {
        /// Response name (`last` when omitted)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        /// JSON pointer into the body
        path: String,
        /// Rule to apply
        rule: FieldRule,
    },
    /// Sum of numeric fields is at most another field
    SumAtMost {
        /// Response name (`last` when omitted)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        /// Pointers of the summed fields
        parts: Vec<String>,
        /// Pointer of the limit
        total: String,
    },
    /// Response status is one of the listed codes
    Status {
        /// Response name (`last` when omitted)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        /// Accepted codes
        one_of: Vec<u16>,
    },
}

impl Check {
    /// Whether the check reads the DOM (and is therefore polled)
    #[must_use]
    pub const fn is_dom(&self) -> bool {
        !matches!(
            self,
            Self::Field { .. } | Self::SumAtMost { .. } | Self::Status { .. }
        )
    }

    /// Short kind name
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Visible(_) => "visible",
            Self::Hidden(_) => "hidden",
            Self::TextEquals { .. } => "text_equals",
            Self::TextContains { .. } => "text_contains",
            Self::Attribute { .. } => "attribute",
            Self::UrlContains(_) => "url_contains",
            Self::Field { .. } => "field",
            Self::SumAtMost { .. } => "sum_at_most",
            Self::Status { .. } => "status",
        }
    }

    /// Target descriptors the check refers to
    pub fn targets(&self) -> impl Iterator<Item = &TargetDescriptor> {
        let target = match self {
            Self::Visible(t)
            | Self::Hidden(t)
            | Self::TextEquals { target: t, .. }
            | Self::TextContains { target: t, .. }
            | Self::Attribute { target: t, .. } => Some(t),
            _ => None,
        };
        target.into_iter()
    }
}

/// A named check with an optional timeout override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    /// Label shown in reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Polling window for DOM checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// The predicate
    #[serde(flatten)]
    pub check: Check,
}

impl Assertion {
    /// Unnamed assertion with the default timeout
    #[must_use]
    pub const fn new(check: Check) -> Self {
        Self {
            name: None,
            timeout_ms: None,
            check,
        }
    }

    /// Field rule against the last response
    #[must_use]
    pub fn field(path: impl Into<String>, rule: FieldRule) -> Self {
        Self::new(Check::Field {
            response: None,
            path: path.into(),
            rule,
        })
    }

    /// Set label
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set polling window
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Label of the assertion at `index`
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} #{index}", self.check.kind()))
    }
}

/// Result of one assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Predicate held
    Pass,
    /// Predicate did not hold
    Fail {
        /// Expected state
        expected: String,
        /// Observed state
        actual: String,
    },
    /// Predicate could not be evaluated
    Error {
        /// Underlying cause
        cause: String,
    },
}

impl Verdict {
    /// Check if passed
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Error equivalent of a non-passing verdict
    #[must_use]
    pub fn to_error(&self) -> Option<EnsayoError> {
        match self {
            Self::Pass => None,
            Self::Fail { expected, actual } => Some(EnsayoError::AssertionFailure {
                expected: expected.clone(),
                actual: actual.clone(),
            }),
            Self::Error { cause } => Some(EnsayoError::AssertionFailure {
                expected: "evaluable assertion".to_string(),
                actual: cause.clone(),
            }),
        }
    }

    fn from_mismatch(m: Mismatch) -> Self {
        Self::Fail {
            expected: format!("{} {}", m.path, m.expected),
            actual: m.actual,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Fail { expected, actual } => write!(f, "expected {expected}, got {actual}"),
            Self::Error { cause } => write!(f, "error: {cause}"),
        }
    }
}

/// Outcome of one declared assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    /// Position in the declared list
    pub index: usize,
    /// Label
    pub name: String,
    /// Verdict
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Evaluates assertion lists
#[derive(Debug, Clone, Copy)]
pub struct AssertionEngine {
    default_timeout: Duration,
    poll_interval: Duration,
}

impl Default for AssertionEngine {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl AssertionEngine {
    /// Create an engine with default timings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Polling window for DOM checks without their own timeout
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Interval between DOM polls
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Evaluate every assertion independently, in order
    pub async fn evaluate_all(
        &self,
        assertions: &[Assertion],
        mut driver: Option<&mut dyn BrowserDriver>,
        responses: &ResponseStore,
        vars: &Vars,
    ) -> Vec<AssertionOutcome> {
        let mut outcomes = Vec::with_capacity(assertions.len());
        for (index, assertion) in assertions.iter().enumerate() {
            let verdict = self
                .evaluate(assertion, driver.as_mut().map(|d| &mut **d as &mut dyn BrowserDriver), responses, vars)
                .await;
            let name = assertion.label(index);
            if !verdict.is_pass() {
                debug!(assertion = %name, verdict = %verdict, "assertion did not pass");
            }
            outcomes.push(AssertionOutcome {
                index,
                name,
                verdict,
            });
        }
        outcomes
    }

    /// Evaluate one assertion
    pub async fn evaluate(
        &self,
        assertion: &Assertion,
        driver: Option<&mut dyn BrowserDriver>,
        responses: &ResponseStore,
        vars: &Vars,
    ) -> Verdict {
        let check = match vars.expand(&assertion.check) {
            Ok(check) => check,
            Err(e) => {
                return Verdict::Error {
                    cause: e.to_string(),
                }
            }
        };

        if !check.is_dom() {
            return evaluate_payload(&check, responses);
        }
        let Some(driver) = driver else {
            return Verdict::Error {
                cause: format!("{} check needs a browser session", check.kind()),
            };
        };

        let timeout = assertion
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);
        let deadline = Deadline::after(timeout);
        loop {
            let observation = match dom::observe(driver, self.poll_interval, &check).await {
                Ok(observation) => observation,
                Err(e) => {
                    return Verdict::Error {
                        cause: e.to_string(),
                    }
                }
            };
            if observation.holds {
                return Verdict::Pass;
            }
            if !deadline.tick(self.poll_interval).await {
                return Verdict::Fail {
                    expected: observation.expected,
                    actual: observation.actual,
                };
            }
        }
    }
}

/// Evaluate a payload check once against stored responses
pub fn evaluate_payload(check: &Check, responses: &ResponseStore) -> Verdict {
    let response = match check {
        Check::Field { response, .. }
        | Check::SumAtMost { response, .. }
        | Check::Status { response, .. } => response.as_deref(),
        _ => {
            return Verdict::Error {
                cause: format!("{} is not a payload check", check.kind()),
            }
        }
    };
    let Some(exchange) = responses.get(response) else {
        return Verdict::Error {
            cause: format!(
                "no HTTP response named `{}`",
                response.unwrap_or(crate::http::LAST_RESPONSE)
            ),
        };
    };

    let result = match check {
        Check::Field { path, rule, .. } => {
            let pointer = payload::normalize_pointer(path);
            rule.check(payload::lookup(&exchange.body, &pointer), &pointer)
        }
        Check::SumAtMost { parts, total, .. } => {
            payload::check_sum_at_most(&exchange.body, parts, total)
        }
        Check::Status { one_of, .. } => {
            if one_of.contains(&exchange.status) {
                Ok(())
            } else {
                return Verdict::Fail {
                    expected: format!("status one of {one_of:?}"),
                    actual: format!("status {}", exchange.status),
                };
            }
        }
        _ => Ok(()),
    };
    match result {
        Ok(()) => Verdict::Pass,
        Err(m) => Verdict::from_mismatch(m),
    }
}

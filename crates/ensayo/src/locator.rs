//! Locator resolution for element selection.
//!
//! A [`TargetDescriptor`] is a ranked list of [`Strategy`] values. Semantic
//! strategies (role, text, label, test id) go first and structural ones
//! (CSS, XPath) act as fallbacks. [`LocatorResolver`] evaluates them in
//! declared order across the main document and every embedded frame and
//! stops at the first strategy that yields exactly one visible element.
//!
//! # Guarantees
//!
//! - **Strict**: never returns a handle when more than one element qualifies
//! - **Bounded**: each wave is limited by a wall-clock window, with exactly
//!   one retry wave before the failure surfaces
//! - **Bound handles**: the returned handle addresses the element that
//!   matched, later use does not search again

use crate::driver::{BrowserDriver, ElementHandle};
use crate::result::{EnsayoResult, ResolutionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default timeout for a resolution wave (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default polling interval inside a wave (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Attribute used to bind an element to a handle
pub const HANDLE_ATTRIBUTE: &str = "data-ensayo-handle";

/// A point in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Point `t` of the way from `self` to `other`
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

/// Bounding box for an element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the center point
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Check if a point is inside this bounding box
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// One way of selecting an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// ARIA role with optional accessible name
    Role {
        /// Role (explicit or implied by the tag)
        role: String,
        /// Accessible name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Innermost element whose text contains the value
    Text(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// Form control by label text or aria-label
    Label(String),
    /// CSS selector filtered by text content
    CssWithText {
        /// Base CSS selector
        css: String,
        /// Text content to match
        text: String,
    },
    /// CSS selector
    Css(String),
    /// XPath expression
    #[serde(rename = "xpath")]
    XPath(String),
}

/// Encode a string as a JavaScript literal
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl Strategy {
    /// Create a CSS strategy
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an XPath strategy
    #[must_use]
    pub fn xpath(path: impl Into<String>) -> Self {
        Self::XPath(path.into())
    }

    /// Create a text strategy
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a test-id strategy
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Create a label strategy
    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        Self::Label(label.into())
    }

    /// Create a role strategy
    #[must_use]
    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.map(str::to_string),
        }
    }

    /// JavaScript expression evaluating to an array of candidate elements
    /// in the document bound to `doc`
    #[must_use]
    pub fn to_query_all(&self) -> String {
        match self {
            Self::Css(s) => format!("Array.from(doc.querySelectorAll({}))", js_str(s)),
            Self::XPath(s) => format!(
                "(() => {{ const r = doc.evaluate({}, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                 const out = []; for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); return out; }})()",
                js_str(s)
            ),
            Self::Text(t) => format!(
                "Array.from(doc.querySelectorAll('body *')).filter(el => el.textContent.includes({t}) \
                 && !Array.from(el.children).some(c => c.textContent.includes({t})))",
                t = js_str(t)
            ),
            Self::TestId(id) => format!(
                "Array.from(doc.querySelectorAll('[data-testid=' + JSON.stringify({}) + ']'))",
                js_str(id)
            ),
            Self::Label(l) => format!(
                "Array.from(doc.querySelectorAll('[aria-label]')).filter(el => el.getAttribute('aria-label') === {l})\
                 .concat(Array.from(doc.querySelectorAll('label')).filter(x => x.textContent.trim() === {l}).map(x => x.control).filter(Boolean))",
                l = js_str(l)
            ),
            Self::Role { role, name } => {
                let base = format!(
                    "Array.from(doc.querySelectorAll({}))",
                    js_str(&role_selector(role))
                );
                match name {
                    Some(n) => format!(
                        "{base}.filter(el => ((el.getAttribute('aria-label') || el.textContent || el.value || el.title || '').trim()) === {})",
                        js_str(n)
                    ),
                    None => base,
                }
            }
            Self::CssWithText { css, text } => format!(
                "Array.from(doc.querySelectorAll({})).filter(el => el.textContent.includes({}))",
                js_str(css),
                js_str(text)
            ),
        }
    }
}

/// CSS selector covering explicit and implicit carriers of an ARIA role
fn role_selector(role: &str) -> String {
    let implicit = match role {
        "button" => "button, input[type=button], input[type=submit], input[type=reset]",
        "link" => "a[href]",
        "textbox" => "input:not([type]), input[type=text], input[type=email], input[type=search], textarea",
        "checkbox" => "input[type=checkbox]",
        "radio" => "input[type=radio]",
        "combobox" => "select",
        "heading" => "h1, h2, h3, h4, h5, h6",
        "listitem" => "li",
        "row" => "tr",
        "dialog" => "dialog",
        _ => "",
    };
    if implicit.is_empty() {
        format!("[role={role}]")
    } else {
        format!("{implicit}, [role={role}]")
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role {
                role,
                name: Some(name),
            } => write!(f, "role={role}[name={name}]"),
            Self::Role { role, name: None } => write!(f, "role={role}"),
            Self::Text(t) => write!(f, "text={t}"),
            Self::TestId(t) => write!(f, "testid={t}"),
            Self::Label(l) => write!(f, "label={l}"),
            Self::CssWithText { css, text } => write!(f, "css={css}:has-text({text})"),
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Ranked list of strategies identifying one element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetDescriptor(Vec<Strategy>);

impl TargetDescriptor {
    /// Create a descriptor from ranked strategies
    #[must_use]
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self(strategies)
    }

    /// Descriptor with a single strategy
    #[must_use]
    pub fn single(strategy: Strategy) -> Self {
        Self(vec![strategy])
    }

    /// Append a lower-ranked fallback
    #[must_use]
    pub fn or(mut self, fallback: Strategy) -> Self {
        self.0.push(fallback);
        self
    }

    /// Strategies in evaluation order
    #[must_use]
    pub fn strategies(&self) -> &[Strategy] {
        &self.0
    }

    /// Whether no strategy is declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(" | "))
    }
}

/// Result of evaluating every strategy once
enum Attempt {
    Resolved(ElementHandle),
    Ambiguous { strategy: String, count: usize },
    Missing,
}

/// Resolves target descriptors to bound element handles
#[derive(Debug, Clone, Copy)]
pub struct LocatorResolver {
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for LocatorResolver {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl LocatorResolver {
    /// Create a resolver with the default window and poll interval
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window of each wave
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval inside a wave
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Window of each wave
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `descriptor` to exactly one visible element.
    ///
    /// Runs one wave and, if it ends without a match, exactly one retry wave.
    /// `FrameDetached` surfaces immediately; the caller re-resolves before
    /// trying again.
    pub async fn resolve(
        &self,
        driver: &mut dyn BrowserDriver,
        descriptor: &TargetDescriptor,
    ) -> EnsayoResult<ElementHandle> {
        let mut ambiguous = None;
        for wave in 0..2 {
            if wave == 1 {
                debug!(descriptor = %descriptor, "resolution retry wave");
            }
            match self.wave(driver, descriptor).await? {
                Attempt::Resolved(handle) => {
                    debug!(descriptor = %descriptor, strategy = %handle.strategy, frame = %handle.frame, "resolved");
                    return Ok(handle);
                }
                Attempt::Ambiguous { strategy, count } => ambiguous = Some((strategy, count)),
                Attempt::Missing => {}
            }
        }

        Err(match ambiguous {
            Some((strategy, count)) => ResolutionError::Ambiguous {
                descriptor: descriptor.to_string(),
                strategy,
                count,
            },
            None => ResolutionError::NotFound {
                descriptor: descriptor.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            },
        }
        .into())
    }

    /// Whether `descriptor` matches anything within `window`.
    ///
    /// Single wave, no retry. Ambiguous matches count as present.
    pub async fn is_present(
        &self,
        driver: &mut dyn BrowserDriver,
        descriptor: &TargetDescriptor,
        window: Duration,
    ) -> EnsayoResult<bool> {
        let probe = Self {
            timeout: window,
            poll_interval: self.poll_interval,
        };
        Ok(!matches!(
            probe.wave(driver, descriptor).await?,
            Attempt::Missing
        ))
    }

    async fn wave(
        &self,
        driver: &mut dyn BrowserDriver,
        descriptor: &TargetDescriptor,
    ) -> EnsayoResult<Attempt> {
        let deadline = Instant::now() + self.timeout;
        let mut last = Attempt::Missing;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = remaining.max(self.poll_interval);
            match tokio::time::timeout(budget, Self::attempt(driver, descriptor)).await {
                Ok(Ok(Attempt::Resolved(handle))) => return Ok(Attempt::Resolved(handle)),
                Ok(Ok(attempt @ Attempt::Ambiguous { .. })) => last = attempt,
                Ok(Ok(Attempt::Missing)) | Err(_) => {}
                Ok(Err(e)) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(last);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn attempt(
        driver: &mut dyn BrowserDriver,
        descriptor: &TargetDescriptor,
    ) -> EnsayoResult<Attempt> {
        let frames = driver.frames().await?;
        let mut ambiguous = None;

        for strategy in descriptor.strategies() {
            let mut visible = 0;
            let mut bound = None;
            for frame in &frames {
                let probe = driver.probe(frame, strategy).await?;
                visible += probe.visible;
                if probe.visible == 1 {
                    bound = probe.handle;
                }
            }
            match (visible, bound) {
                (1, Some(handle)) => return Ok(Attempt::Resolved(handle)),
                (0, _) => {}
                (count, _) => {
                    ambiguous.get_or_insert_with(|| Attempt::Ambiguous {
                        strategy: strategy.to_string(),
                        count,
                    });
                }
            }
        }

        Ok(ambiguous.unwrap_or(Attempt::Missing))
    }
}

//! Scenario model and loaders.
//!
//! A scenario is data: ordered steps, terminal assertions and teardown,
//! loaded from YAML and validated before anything runs.
//!
//! ```yaml
//! id: task-lifecycle
//! tags: [api, tasks]
//! vars: { title: Write docs }
//! steps:
//!   - action: http
//!     method: POST
//!     path: /tasks
//!     body: { title: "${title}", status: PENDING }
//!     save_as: created
//!     capture: { task_id: /id }
//!     expect_status: [200, 201]
//! assertions:
//!   - status: { response: created, one_of: [200, 201] }
//! ```

use crate::assertion::Assertion;
use crate::http::{HttpMethod, HttpRequest};
use crate::locator::TargetDescriptor;
use crate::result::{EnsayoError, EnsayoResult};
use crate::vars::Vars;
use crate::wait::PostCondition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Waypoints used by drag steps that do not set their own
pub const DEFAULT_WAYPOINTS: u32 = crate::action::DEFAULT_DRAG_WAYPOINTS;

const fn default_waypoints() -> u32 {
    DEFAULT_WAYPOINTS
}

/// How step failures propagate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Stop at the first failed step
    #[default]
    FailFast,
    /// Record failures and keep going
    BestEffort,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::BestEffort => write!(f, "best_effort"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = EnsayoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "best_effort" => Ok(Self::BestEffort),
            other => Err(EnsayoError::config(format!("unknown execution mode: {other}"))),
        }
    }
}

/// Per-scenario overrides of the runner configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioSetup {
    /// Application URL relative navigations resolve against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Backend API URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Run the browser without a window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    /// Step timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    /// DOM assertion polling window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion_timeout_ms: Option<u64>,
    /// HTTP request timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_timeout_ms: Option<u64>,
}

/// Predicate evaluated by a gate step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Target resolves to a visible element
    Present(TargetDescriptor),
    /// Target does not resolve
    Missing(TargetDescriptor),
    /// Main frame URL contains the value
    UrlContains(String),
    /// Variable holds the value
    VarEquals {
        /// Variable name
        var: String,
        /// Expected value
        value: Value,
    },
}

impl Condition {
    /// Whether evaluating needs a browser
    #[must_use]
    pub const fn needs_browser(&self) -> bool {
        !matches!(self, Self::VarEquals { .. })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present(t) => write!(f, "present({t})"),
            Self::Missing(t) => write!(f, "missing({t})"),
            Self::UrlContains(s) => write!(f, "url_contains({s})"),
            Self::VarEquals { var, value } => write!(f, "{var} == {value}"),
        }
    }
}

/// Steps a taken gate skips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipScope {
    /// Every remaining step
    #[default]
    Rest,
    /// The next `n` steps
    Next(usize),
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum StepKind {
    /// Load a URL in the main frame
    Navigate {
        /// Absolute URL or path relative to the base URL
        url: String,
    },
    /// Click an element
    Click {
        /// Element to click
        target: TargetDescriptor,
    },
    /// Replace an input's value
    Fill {
        /// Input element
        target: TargetDescriptor,
        /// New value
        value: String,
    },
    /// Move the pointer over an element
    Hover {
        /// Element to hover
        target: TargetDescriptor,
    },
    /// Choose a select option
    Select {
        /// Select element
        target: TargetDescriptor,
        /// Option value or label
        value: String,
    },
    /// Press on `source`, move through waypoints, release on `target`
    Drag {
        /// Element to pick up
        source: TargetDescriptor,
        /// Element to drop on
        target: TargetDescriptor,
        /// Intermediate pointer positions
        #[serde(default = "default_waypoints")]
        waypoints: u32,
    },
    /// Wait for a condition without acting
    Wait {
        /// Condition to wait for
        condition: PostCondition,
    },
    /// Call the backend API
    Http {
        /// Method
        method: HttpMethod,
        /// Path relative to the API URL
        path: String,
        /// Query parameters
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        query: BTreeMap<String, Value>,
        /// JSON body
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        /// Store the response under this name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_as: Option<String>,
        /// Variables to set from response fields (name -> JSON pointer)
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        capture: BTreeMap<String, String>,
        /// Accepted status codes (any 2xx when empty)
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        expect_status: Vec<u16>,
        /// Intermediate assertions against this response
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        expect: Vec<Assertion>,
    },
    /// Skip later steps when a condition holds
    Gate {
        /// Condition that takes the gate
        skip_if: Condition,
        /// Steps to skip
        #[serde(default)]
        scope: SkipScope,
    },
    /// Save a PNG of the viewport
    Screenshot {
        /// File stem
        name: String,
    },
}

/// One step of a scenario
///
/// Keys outside the common ones and the action's own fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct Step {
    /// Label shown in reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Post-condition that completes the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<PostCondition>,
    /// What the step does
    #[serde(flatten)]
    pub kind: StepKind,
}

impl TryFrom<Map<String, Value>> for Step {
    type Error = serde_json::Error;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        fn take<T: serde::de::DeserializeOwned>(
            fields: &mut Map<String, Value>,
            key: &str,
        ) -> Result<Option<T>, serde_json::Error> {
            fields.remove(key).map(serde_json::from_value).transpose()
        }

        let name = take(&mut fields, "name")?;
        let timeout_ms = take(&mut fields, "timeout_ms")?;
        let wait_for = take(&mut fields, "wait_for")?;
        let kind = StepKind::deserialize(Value::Object(fields))?;
        Ok(Self {
            name,
            timeout_ms,
            wait_for,
            kind,
        })
    }
}

impl Step {
    /// Step with no name, timeout or post-condition
    #[must_use]
    pub const fn new(kind: StepKind) -> Self {
        Self {
            name: None,
            timeout_ms: None,
            wait_for: None,
            kind,
        }
    }

    /// Set label
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set post-condition
    #[must_use]
    pub fn waiting_for(mut self, condition: PostCondition) -> Self {
        self.wait_for = Some(condition);
        self
    }

    /// HTTP step without query, body or expectations
    #[must_use]
    pub fn http(method: HttpMethod, path: impl Into<String>) -> Self {
        Self::new(StepKind::Http {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            save_as: None,
            capture: BTreeMap::new(),
            expect_status: Vec::new(),
            expect: Vec::new(),
        })
    }

    /// Action name (`click`, `http`, ...)
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match &self.kind {
            StepKind::Navigate { .. } => "navigate",
            StepKind::Click { .. } => "click",
            StepKind::Fill { .. } => "fill",
            StepKind::Hover { .. } => "hover",
            StepKind::Select { .. } => "select",
            StepKind::Drag { .. } => "drag",
            StepKind::Wait { .. } => "wait",
            StepKind::Http { .. } => "http",
            StepKind::Gate { .. } => "gate",
            StepKind::Screenshot { .. } => "screenshot",
        }
    }

    /// Label of the step at `index`
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| match &self.kind {
            StepKind::Navigate { url } => format!("navigate {url}"),
            StepKind::Http { method, path, .. } => format!("{method} {path}"),
            _ => format!("{} #{index}", self.action()),
        })
    }

    /// Descriptor of the element acted on (drop target for drags)
    #[must_use]
    pub const fn target(&self) -> Option<&TargetDescriptor> {
        match &self.kind {
            StepKind::Click { target }
            | StepKind::Fill { target, .. }
            | StepKind::Hover { target }
            | StepKind::Select { target, .. }
            | StepKind::Drag { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Every descriptor the step refers to
    #[must_use]
    pub fn descriptors(&self) -> Vec<&TargetDescriptor> {
        let mut out = Vec::new();
        if let StepKind::Drag { source, .. } = &self.kind {
            out.push(source);
        }
        out.extend(self.target());
        match &self.kind {
            StepKind::Gate {
                skip_if: Condition::Present(t) | Condition::Missing(t),
                ..
            } => out.push(t),
            StepKind::Http { expect, .. } => {
                out.extend(expect.iter().flat_map(|a| a.check.targets()));
            }
            _ => {}
        }
        if let Some(PostCondition::Visible(t) | PostCondition::Hidden(t)) = &self.wait_for {
            out.push(t);
        }
        if let StepKind::Wait {
            condition: PostCondition::Visible(t) | PostCondition::Hidden(t),
        } = &self.kind
        {
            out.push(t);
        }
        out
    }

    /// Whether the step drives the browser
    #[must_use]
    pub fn needs_browser(&self) -> bool {
        match &self.kind {
            StepKind::Http { expect, .. } => expect.iter().any(|a| a.check.is_dom()),
            StepKind::Gate { skip_if, .. } => skip_if.needs_browser(),
            _ => true,
        }
    }

    /// Request described by an HTTP step
    #[must_use]
    pub fn request(&self) -> Option<HttpRequest> {
        match &self.kind {
            StepKind::Http {
                method,
                path,
                query,
                body,
                ..
            } => Some(HttpRequest {
                method: *method,
                path: path.clone(),
                query: query.clone(),
                body: body.clone(),
            }),
            _ => None,
        }
    }
}

/// One end-to-end test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Unique identifier
    pub id: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Tags used for selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Step failure propagation
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Configuration overrides
    #[serde(default)]
    pub setup: ScenarioSetup,
    /// Initial variables
    #[serde(default)]
    pub vars: Vars,
    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Terminal assertions
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    /// Best-effort cleanup steps run after everything else
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<Step>,
}

impl Scenario {
    /// Empty scenario
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            tags: Vec::new(),
            mode: ExecutionMode::default(),
            setup: ScenarioSetup::default(),
            vars: Vars::new(),
            steps: Vec::new(),
            assertions: Vec::new(),
            teardown: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a terminal assertion
    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Append a teardown step
    #[must_use]
    pub fn with_teardown(mut self, step: Step) -> Self {
        self.teardown.push(step);
        self
    }

    /// Set execution mode
    #[must_use]
    pub const fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether the scenario needs a browser session
    #[must_use]
    pub fn requires_browser(&self) -> bool {
        self.steps.iter().chain(&self.teardown).any(Step::needs_browser)
            || self.assertions.iter().any(|a| a.check.is_dom())
    }

    /// Whether the scenario calls the backend API
    #[must_use]
    pub fn requires_http(&self) -> bool {
        self.steps
            .iter()
            .chain(&self.teardown)
            .any(|s| matches!(s.kind, StepKind::Http { .. }))
    }

    /// Check structural rules that serde cannot express
    pub fn validate(&self) -> EnsayoResult<()> {
        if self.id.trim().is_empty() {
            return Err(EnsayoError::scenario("scenario id must not be empty"));
        }
        if self.steps.is_empty() && self.assertions.is_empty() {
            return Err(EnsayoError::scenario(format!(
                "{}: scenario has no steps and no assertions",
                self.id
            )));
        }
        for (section, steps) in [("steps", &self.steps), ("teardown", &self.teardown)] {
            for (index, step) in steps.iter().enumerate() {
                self.validate_step(section, index, step)?;
            }
        }
        for (index, assertion) in self.assertions.iter().enumerate() {
            if assertion.check.targets().any(TargetDescriptor::is_empty) {
                return Err(EnsayoError::scenario(format!(
                    "{}: assertion {index} has an empty target",
                    self.id
                )));
            }
        }
        Ok(())
    }

    fn validate_step(&self, section: &str, index: usize, step: &Step) -> EnsayoResult<()> {
        let fail = |what: &str| {
            Err(EnsayoError::scenario(format!(
                "{}: {section}[{index}] ({}) {what}",
                self.id,
                step.action()
            )))
        };
        if step.descriptors().iter().any(|d| d.is_empty()) {
            return fail("has an empty target descriptor");
        }
        match &step.kind {
            StepKind::Gate {
                scope: SkipScope::Next(0),
                ..
            } => fail("skips zero steps"),
            StepKind::Http { path, .. } if path.trim().is_empty() => fail("has an empty path"),
            StepKind::Navigate { url } if url.trim().is_empty() => fail("has an empty url"),
            StepKind::Screenshot { name } if name.trim().is_empty() => fail("has an empty name"),
            _ => Ok(()),
        }
    }
}

/// Turns a definition into a scenario
pub trait ScenarioLoader {
    /// Parse and validate one definition
    fn parse(&self, definition: &str) -> EnsayoResult<Scenario>;
}

/// YAML scenario loader
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlLoader;

impl ScenarioLoader for YamlLoader {
    fn parse(&self, definition: &str) -> EnsayoResult<Scenario> {
        let scenario: Scenario = serde_yaml_ng::from_str(definition)?;
        scenario.validate()?;
        Ok(scenario)
    }
}

impl YamlLoader {
    /// Create a loader
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parse every `---`-separated document of a stream
    pub fn parse_all(&self, definitions: &str) -> EnsayoResult<Vec<Scenario>> {
        let mut out = Vec::new();
        for document in serde_yaml_ng::Deserializer::from_str(definitions) {
            let scenario = Scenario::deserialize(document)?;
            scenario.validate()?;
            out.push(scenario);
        }
        Ok(out)
    }

    /// Load every scenario in a file
    pub fn load_file(&self, path: &Path) -> EnsayoResult<Vec<Scenario>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EnsayoError::scenario(format!("{}: {e}", path.display())))?;
        let scenarios = self
            .parse_all(&text)
            .map_err(|e| EnsayoError::scenario(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), count = scenarios.len(), "loaded scenario file");
        Ok(scenarios)
    }

    /// Load `*.yaml` and `*.yml` files of a directory in name order.
    ///
    /// An entry that matches but cannot be read fails the whole load.
    pub fn load_dir(&self, dir: &Path) -> EnsayoResult<Vec<Scenario>> {
        if !dir.is_dir() {
            return Err(EnsayoError::scenario(format!(
                "{}: not a scenario directory",
                dir.display()
            )));
        }
        let base = glob::Pattern::escape(&dir.to_string_lossy());
        let mut files = Vec::new();
        for extension in YAML_EXTENSIONS {
            let pattern = format!("{base}/*.{extension}");
            let entries = glob::glob(&pattern)
                .map_err(|e| EnsayoError::scenario(format!("{pattern}: {e}")))?;
            for entry in entries {
                let path = entry.map_err(|e| {
                    EnsayoError::scenario(format!("{}: {}", e.path().display(), e.error()))
                })?;
                if !path.is_dir() {
                    files.push(path);
                }
            }
        }
        files.sort();
        let mut out = Vec::new();
        for file in files {
            out.extend(self.load_file(&file)?);
        }
        Ok(out)
    }

    /// Load files and directories, rejecting duplicate ids
    pub fn load_paths(&self, paths: &[PathBuf]) -> EnsayoResult<Vec<Scenario>> {
        let mut out = Vec::new();
        for path in paths {
            if path.is_dir() {
                out.extend(self.load_dir(path)?);
            } else {
                out.extend(self.load_file(path)?);
            }
        }
        ensure_unique_ids(&out)?;
        Ok(out)
    }
}

const YAML_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Reject suites where two scenarios share an id
pub fn ensure_unique_ids(scenarios: &[Scenario]) -> EnsayoResult<()> {
    let mut seen = HashSet::new();
    for scenario in scenarios {
        if !seen.insert(scenario.id.as_str()) {
            return Err(EnsayoError::scenario(format!(
                "duplicate scenario id: {}",
                scenario.id
            )));
        }
    }
    Ok(())
}

/// Selects scenarios by tag and id
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    tags: Vec<String>,
    id_contains: Option<String>,
}

impl ScenarioFilter {
    /// Filter that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept scenarios carrying any of the given tags
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Accept scenarios whose id contains `fragment`
    #[must_use]
    pub fn with_id(mut self, fragment: impl Into<String>) -> Self {
        self.id_contains = Some(fragment.into());
        self
    }

    /// Whether a scenario is selected
    #[must_use]
    pub fn matches(&self, scenario: &Scenario) -> bool {
        let tag_ok = self.tags.is_empty() || self.tags.iter().any(|t| scenario.tags.contains(t));
        let id_ok = self
            .id_contains
            .as_deref()
            .map_or(true, |f| scenario.id.contains(f));
        tag_ok && id_ok
    }

    /// Keep selected scenarios
    #[must_use]
    pub fn apply(&self, scenarios: Vec<Scenario>) -> Vec<Scenario> {
        scenarios.into_iter().filter(|s| self.matches(s)).collect()
    }
}

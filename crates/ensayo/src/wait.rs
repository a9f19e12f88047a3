//! Wait mechanisms.
//!
//! Post-conditions replace fixed sleeps: an action is complete only when the
//! state change it is supposed to cause has been observed. Every wait here
//! is bounded by a [`Deadline`].

use crate::driver::BrowserDriver;
use crate::locator::{LocatorResolver, TargetDescriptor};
use crate::result::EnsayoResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Network idle threshold (500ms without new resource loads)
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

/// Condition that must hold after an action before the next step starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostCondition {
    /// Main frame URL differs from the one observed before the action
    NavigationCommitted,
    /// Document complete and no new resource loads for the idle threshold
    NetworkIdle,
    /// At least one DOM mutation since the action started
    DomMutation,
    /// Main frame URL contains the value
    UrlContains(String),
    /// Target resolves to a visible element
    Visible(TargetDescriptor),
    /// Target no longer resolves to any visible element
    Hidden(TargetDescriptor),
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NavigationCommitted => f.write_str("navigation_committed"),
            Self::NetworkIdle => f.write_str("network_idle"),
            Self::DomMutation => f.write_str("dom_mutation"),
            Self::UrlContains(s) => write!(f, "url_contains({s})"),
            Self::Visible(t) => write!(f, "visible({t})"),
            Self::Hidden(t) => write!(f, "hidden({t})"),
        }
    }
}

/// Page state captured before an action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    /// URL before the action
    pub url: String,
    /// Mutation counter before the action
    pub mutations: u64,
}

impl Baseline {
    /// Capture the current URL and mutation counter
    pub async fn capture(driver: &mut dyn BrowserDriver) -> EnsayoResult<Self> {
        Ok(Self {
            url: driver.current_url().await?,
            mutations: driver.mutation_count().await?,
        })
    }
}

/// Wall-clock budget shared by the phases of one operation
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Sleep for one poll interval, clipped to the deadline.
    ///
    /// Returns `false` once the deadline has passed.
    pub async fn tick(&self, poll_interval: Duration) -> bool {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return false;
        }
        tokio::time::sleep(poll_interval.min(remaining)).await;
        true
    }
}

/// Poll until `condition` holds or `deadline` passes.
///
/// Returns `Ok(false)` on timeout; driver errors propagate.
pub async fn wait_for(
    driver: &mut dyn BrowserDriver,
    condition: &PostCondition,
    baseline: &Baseline,
    deadline: Deadline,
    poll_interval: Duration,
) -> EnsayoResult<bool> {
    let idle_threshold = Duration::from_millis(NETWORK_IDLE_THRESHOLD_MS);
    let mut last_resources: Option<(u64, Instant)> = None;
    let resolver = LocatorResolver::new().with_poll_interval(poll_interval);

    loop {
        let holds = match condition {
            PostCondition::NavigationCommitted => driver.current_url().await? != baseline.url,
            PostCondition::DomMutation => driver.mutation_count().await? > baseline.mutations,
            PostCondition::UrlContains(fragment) => {
                driver.current_url().await?.contains(fragment.as_str())
            }
            PostCondition::NetworkIdle => {
                let complete = driver.ready_state().await? == "complete";
                let count = driver.resource_count().await?;
                let now = Instant::now();
                let since = match last_resources {
                    Some((prev, since)) if prev == count => since,
                    _ => now,
                };
                last_resources = Some((count, since));
                complete && now.duration_since(since) >= idle_threshold
            }
            PostCondition::Visible(target) => {
                resolver.is_present(driver, target, Duration::ZERO).await?
            }
            PostCondition::Hidden(target) => {
                !resolver.is_present(driver, target, Duration::ZERO).await?
            }
        };

        if holds {
            return Ok(true);
        }
        if !deadline.tick(poll_interval).await {
            return Ok(false);
        }
    }
}

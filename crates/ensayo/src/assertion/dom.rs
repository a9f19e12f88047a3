//! Single observations of DOM state, polled by the assertion engine.

use super::Check;
use crate::driver::{BrowserDriver, ElementHandle};
use crate::locator::{LocatorResolver, TargetDescriptor};
use crate::result::{EnsayoError, EnsayoResult};
use std::time::Duration;

/// What one poll saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Observation {
    pub holds: bool,
    pub expected: String,
    pub actual: String,
}

impl Observation {
    fn new(holds: bool, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            holds,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Resolve without waiting; resolution failures become the observed state
async fn bind(
    driver: &mut dyn BrowserDriver,
    resolver: &LocatorResolver,
    target: &TargetDescriptor,
) -> EnsayoResult<Result<ElementHandle, String>> {
    match resolver.resolve(driver, target).await {
        Ok(handle) => Ok(Ok(handle)),
        Err(EnsayoError::Resolution(e)) => Ok(Err(e.to_string())),
        Err(e) => Err(e),
    }
}

/// Observe a DOM check once. Driver errors propagate.
pub(super) async fn observe(
    driver: &mut dyn BrowserDriver,
    poll_interval: Duration,
    check: &Check,
) -> EnsayoResult<Observation> {
    let resolver = LocatorResolver::new()
        .with_timeout(Duration::ZERO)
        .with_poll_interval(poll_interval);

    Ok(match check {
        Check::Visible(target) => {
            let present = presence(driver, &resolver, target).await?;
            Observation::new(
                present,
                format!("{target} visible"),
                if present { "visible" } else { "not visible" },
            )
        }
        Check::Hidden(target) => {
            let present = presence(driver, &resolver, target).await?;
            Observation::new(
                !present,
                format!("{target} hidden"),
                if present { "visible" } else { "hidden" },
            )
        }
        Check::TextEquals { target, value } | Check::TextContains { target, value } => {
            let exact = matches!(check, Check::TextEquals { .. });
            let expected = if exact {
                format!("text {value:?}")
            } else {
                format!("text containing {value:?}")
            };
            match bind(driver, &resolver, target).await? {
                Ok(handle) => {
                    let text = driver.text(&handle).await?;
                    let holds = if exact {
                        text.trim() == value.trim()
                    } else {
                        text.contains(value.as_str())
                    };
                    Observation::new(holds, expected, format!("text {:?}", text.trim()))
                }
                Err(reason) => Observation::new(false, expected, reason),
            }
        }
        Check::Attribute {
            target,
            name,
            value,
        } => {
            let expected = match value {
                Some(v) => format!("{name}={v:?}"),
                None => format!("{name} present"),
            };
            match bind(driver, &resolver, target).await? {
                Ok(handle) => {
                    let actual = driver.attribute(&handle, name).await?;
                    let holds = match (value, &actual) {
                        (Some(v), Some(a)) => v == a,
                        (None, Some(_)) => true,
                        (_, None) => false,
                    };
                    let shown = actual.map_or_else(
                        || format!("{name} absent"),
                        |a| format!("{name}={a:?}"),
                    );
                    Observation::new(holds, expected, shown)
                }
                Err(reason) => Observation::new(false, expected, reason),
            }
        }
        Check::UrlContains(fragment) => {
            let url = driver.current_url().await?;
            Observation::new(
                url.contains(fragment.as_str()),
                format!("url containing {fragment:?}"),
                url,
            )
        }
        Check::Field { .. } | Check::SumAtMost { .. } | Check::Status { .. } => {
            return Err(EnsayoError::scenario("payload check evaluated as DOM check"))
        }
    })
}

async fn presence(
    driver: &mut dyn BrowserDriver,
    resolver: &LocatorResolver,
    target: &TargetDescriptor,
) -> EnsayoResult<bool> {
    match resolver.is_present(driver, target, Duration::ZERO).await {
        Ok(present) => Ok(present),
        Err(e) if e.is_frame_detached() => Ok(false),
        Err(e) => Err(e),
    }
}

//! Sessions: the browser and HTTP client owned by one scenario run.
//!
//! A [`Session`] is created by a [`SessionFactory`], threaded explicitly
//! through every step, and handed back to the factory when the run ends.
//! Nothing about the current page or frame lives in ambient state.

use crate::browser;
use crate::config::RunnerConfig;
use crate::driver::{BrowserDriver, MockDriver};
use crate::http::ContractClient;
use crate::result::{EnsayoError, EnsayoResult};
use crate::scenario::Scenario;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// What a scenario needs from its session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionRequirements {
    /// A browser driver
    pub browser: bool,
    /// An HTTP client
    pub http: bool,
}

impl SessionRequirements {
    /// Requirements derived from a scenario's steps, assertions and teardown
    #[must_use]
    pub fn of(scenario: &Scenario) -> Self {
        Self {
            browser: scenario.requires_browser(),
            http: scenario.requires_http(),
        }
    }
}

/// Resources owned by one scenario run
pub struct Session {
    id: String,
    browser: Option<Box<dyn BrowserDriver>>,
    http: Option<ContractClient>,
    released: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("browser", &self.browser.is_some())
            .field("http", &self.http.as_ref().map(ContractClient::base_url))
            .field("released", &self.released)
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an empty session with a fresh id
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            browser: None,
            http: None,
            released: false,
        }
    }

    /// Attach a browser driver
    #[must_use]
    pub fn with_browser(mut self, driver: Box<dyn BrowserDriver>) -> Self {
        self.browser = Some(driver);
        self
    }

    /// Attach an HTTP client
    #[must_use]
    pub fn with_http(mut self, client: ContractClient) -> Self {
        self.http = Some(client);
        self
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Browser driver, if this session has one
    pub fn browser(&mut self) -> Option<&mut dyn BrowserDriver> {
        match self.browser {
            Some(ref mut driver) => Some(driver.as_mut()),
            None => None,
        }
    }

    /// HTTP client, if this session has one
    #[must_use]
    pub const fn http(&self) -> Option<&ContractClient> {
        self.http.as_ref()
    }

    /// Whether a browser is attached
    #[must_use]
    pub const fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    /// Whether the session has been released
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Close the browser and mark the session released. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the driver error if the browser failed to close; the session
    /// counts as released either way.
    pub async fn close(&mut self) -> EnsayoResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.http = None;
        match self.browser.take() {
            Some(mut driver) => driver.close().await,
            None => Ok(()),
        }
    }
}

/// Acquires and releases sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create a session meeting `requirements`
    async fn acquire(
        &self,
        requirements: SessionRequirements,
        config: &RunnerConfig,
    ) -> EnsayoResult<Session>;

    /// Release a session and everything it owns
    async fn release(&self, mut session: Session) -> EnsayoResult<()> {
        session.close().await
    }
}

fn contract_client(config: &RunnerConfig) -> EnsayoResult<ContractClient> {
    let client = ContractClient::new(
        config.api_base(),
        Duration::from_millis(config.http_timeout_ms),
    )?;
    Ok(match config.token() {
        Some(token) => client.with_token(token),
        None => {
            debug!(env = %config.token_env, "no bearer token configured");
            client
        }
    })
}

/// Launches a real browser (with the `browser` feature) and a reqwest client
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSessionFactory;

impl DefaultSessionFactory {
    /// Create the factory
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for DefaultSessionFactory {
    async fn acquire(
        &self,
        requirements: SessionRequirements,
        config: &RunnerConfig,
    ) -> EnsayoResult<Session> {
        let mut session = Session::new();
        if requirements.http {
            session = session.with_http(contract_client(config)?);
        }
        if requirements.browser {
            let driver = browser::launch(&config.browser).await?;
            session = session.with_browser(driver);
        }
        debug!(session = %session.id(), browser = requirements.browser, http = requirements.http, "session acquired");
        Ok(session)
    }

    async fn release(&self, mut session: Session) -> EnsayoResult<()> {
        let id = session.id().to_string();
        let result = session.close().await;
        if let Err(ref e) = result {
            warn!(session = %id, error = %e, "browser did not close cleanly");
        }
        debug!(session = %id, "session released");
        result
    }
}

type DriverSupplier = dyn Fn() -> MockDriver + Send + Sync;

/// Factory handing out scripted [`MockDriver`]s, counting every acquisition
/// and release
#[derive(Clone)]
pub struct MockSessionFactory {
    supplier: Arc<DriverSupplier>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    histories: Arc<Mutex<Vec<Arc<Mutex<Vec<String>>>>>>,
    acquire_error: Option<String>,
}

impl fmt::Debug for MockSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSessionFactory")
            .field("acquired", &self.acquisitions())
            .field("released", &self.releases())
            .field("acquire_error", &self.acquire_error)
            .finish_non_exhaustive()
    }
}

impl Default for MockSessionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSessionFactory {
    /// Factory producing empty mock documents
    #[must_use]
    pub fn new() -> Self {
        Self::with_driver(MockDriver::new)
    }

    /// Factory producing drivers from `supplier`
    #[must_use]
    pub fn with_driver(supplier: impl Fn() -> MockDriver + Send + Sync + 'static) -> Self {
        Self {
            supplier: Arc::new(supplier),
            acquired: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            histories: Arc::new(Mutex::new(Vec::new())),
            acquire_error: None,
        }
    }

    /// Make every acquisition fail
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.acquire_error = Some(message.into());
        self
    }

    /// Sessions acquired so far
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Sessions released so far
    #[must_use]
    pub fn releases(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Call history of every driver handed out, in acquisition order
    #[must_use]
    pub fn histories(&self) -> Vec<Vec<String>> {
        self.histories
            .lock()
            .map(|all| {
                all.iter()
                    .map(|h| h.lock().map(|h| h.clone()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn acquire(
        &self,
        requirements: SessionRequirements,
        config: &RunnerConfig,
    ) -> EnsayoResult<Session> {
        if let Some(ref message) = self.acquire_error {
            return Err(EnsayoError::driver(message.clone()));
        }
        let mut session = Session::new();
        if requirements.http {
            session = session.with_http(contract_client(config)?);
        }
        if requirements.browser {
            let driver = (self.supplier)();
            if let Ok(mut histories) = self.histories.lock() {
                histories.push(driver.history_handle());
            }
            session = session.with_browser(Box::new(driver));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    async fn release(&self, mut session: Session) -> EnsayoResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::{Strategy, TargetDescriptor};
    use crate::scenario::{Step, StepKind};
    use crate::http::HttpMethod;

    fn browser_scenario() -> Scenario {
        Scenario::new("ui").with_step(Step::new(StepKind::Click {
            target: TargetDescriptor::single(Strategy::text("Save")),
        }))
    }

    mod requirements_tests {
        use super::*;

        #[test]
        fn test_browser_only() {
            let reqs = SessionRequirements::of(&browser_scenario());
            assert!(reqs.browser);
            assert!(!reqs.http);
        }

        #[test]
        fn test_http_only() {
            let scenario = Scenario::new("api").with_step(Step::http(HttpMethod::Get, "/tasks"));
            let reqs = SessionRequirements::of(&scenario);
            assert!(!reqs.browser);
            assert!(reqs.http);
        }
    }

    mod session_tests {
        use super::*;

        #[tokio::test]
        async fn test_close_is_idempotent() {
            let driver = MockDriver::new();
            let history = driver.history_handle();
            let mut session = Session::new().with_browser(Box::new(driver));
            assert!(session.has_browser());
            session.close().await.unwrap();
            session.close().await.unwrap();
            assert!(session.is_released());
            assert!(!session.has_browser());
            let closes = history.lock().unwrap().iter().filter(|c| *c == "close").count();
            assert_eq!(closes, 1);
        }

        #[test]
        fn test_ids_are_unique() {
            assert_ne!(Session::new().id(), Session::new().id());
        }
    }

    mod mock_factory_tests {
        use super::*;

        #[tokio::test]
        async fn test_counts_acquire_and_release() {
            let factory = MockSessionFactory::new();
            let config = RunnerConfig::default();
            let reqs = SessionRequirements { browser: true, http: true };
            let session = factory.acquire(reqs, &config).await.unwrap();
            assert!(session.has_browser());
            assert!(session.http().is_some());
            assert_eq!(factory.acquisitions(), 1);
            factory.release(session).await.unwrap();
            assert_eq!(factory.releases(), 1);
            assert_eq!(factory.histories(), vec![vec!["close".to_string()]]);
        }

        #[tokio::test]
        async fn test_failing_factory() {
            let factory = MockSessionFactory::new().failing("no chromium");
            let err = factory
                .acquire(SessionRequirements::default(), &RunnerConfig::default())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("no chromium"));
            assert_eq!(factory.acquisitions(), 0);
        }

        #[tokio::test]
        async fn test_http_client_uses_api_base() {
            let factory = MockSessionFactory::new();
            let config = RunnerConfig::default().with_api_url("http://api.test/v1/");
            let reqs = SessionRequirements { browser: false, http: true };
            let session = factory.acquire(reqs, &config).await.unwrap();
            assert_eq!(session.http().unwrap().base_url(), "http://api.test/v1");
        }
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn test_default_factory_without_browser_feature() {
        let err = DefaultSessionFactory::new()
            .acquire(
                SessionRequirements { browser: true, http: false },
                &RunnerConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EnsayoError::BrowserUnavailable));
    }
}

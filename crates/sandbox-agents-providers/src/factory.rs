//! Provider selection and memoization.
//!
//! Exactly one backend adapter is active per process. Construction is lazy:
//! missing SDK credentials only fail the first code path that actually
//! touches a sandbox, never unrelated startup.

use std::{str::FromStr, sync::Arc};

use sandbox_agents_core::{ProviderError, SandboxProvider};
use tokio::sync::OnceCell;

use crate::{DaytonaProvider, E2bProvider};

/// Which backend this process uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    E2b,
    Daytona,
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "e2b" => Ok(Self::E2b),
            "daytona" => Ok(Self::Daytona),
            other => Err(ProviderError::Config(format!(
                "unknown sandbox provider {other:?} (expected \"e2b\" or \"daytona\")"
            ))),
        }
    }
}

/// Factory that constructs and caches the process-wide backend adapter.
///
/// Inject one of these where a sandbox is needed; multi-backend routing per
/// request is deliberately unsupported.
pub struct ProviderFactory {
    kind: ProviderKind,
    cell: OnceCell<Arc<dyn SandboxProvider>>,
}

impl ProviderFactory {
    /// Factory for a fixed backend kind.
    #[must_use]
    pub const fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            cell: OnceCell::const_new(),
        }
    }

    /// Factory selected by the `SANDBOX_PROVIDER` environment variable.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] for a missing or unknown value.
    pub fn from_env() -> Result<Self, ProviderError> {
        let value = std::env::var("SANDBOX_PROVIDER")
            .map_err(|_| ProviderError::Config("SANDBOX_PROVIDER is not set".into()))?;
        Ok(Self::new(value.parse()?))
    }

    /// Selected backend kind.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// The memoized adapter, constructing it on first use.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when the adapter's credentials are
    /// missing. The failure is not cached; a later call after fixing the
    /// environment succeeds.
    pub async fn get(&self) -> Result<Arc<dyn SandboxProvider>, ProviderError> {
        self.cell
            .get_or_try_init(|| async {
                let provider: Arc<dyn SandboxProvider> = match self.kind {
                    ProviderKind::E2b => Arc::new(E2bProvider::from_env()?),
                    ProviderKind::Daytona => Arc::new(DaytonaProvider::from_env()?),
                };
                tracing::info!(provider = provider.name(), "sandbox provider initialized");
                Ok(provider)
            })
            .await
            .cloned()
    }
}

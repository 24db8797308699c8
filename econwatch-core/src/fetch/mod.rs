//! Source-specific fetchers.
//!
//! Each fetcher exposes `try_*` methods that report why a live fetch failed,
//! and infallible methods that return a [`Fetched`] value: live data when the
//! source cooperated, the documented fallback from [`fallback`] otherwise.

pub mod cso;
pub mod ecb;
pub mod fallback;
pub mod http;
pub mod markets;
pub mod pmi;
pub mod sentiment;

pub use cso::CsoFetcher;
pub use ecb::EcbFetcher;
pub use http::{CannedTransport, HttpRequest, HttpResponse, HttpTransport, Transport};
pub use markets::MarketFetcher;
pub use pmi::PmiFetcher;
pub use sentiment::SentimentFetcher;

use crate::config::SourcesConfig;
use crate::error::{FetchError, SourceError};
use crate::extract::PeriodPolicy;
use crate::table::Provenance;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// What every fetcher needs: a transport, where the sources live, and what day it is.
#[derive(Clone)]
pub struct FetchContext {
    pub transport: Arc<dyn Transport>,
    pub sources: SourcesConfig,
    pub today: NaiveDate,
    pub period_policy: PeriodPolicy,
}

impl FetchContext {
    pub fn new(transport: Arc<dyn Transport>, sources: SourcesConfig, today: NaiveDate) -> Self {
        Self {
            transport,
            sources,
            today,
            period_policy: PeriodPolicy::default(),
        }
    }

    pub fn with_period_policy(mut self, policy: PeriodPolicy) -> Self {
        self.period_policy = policy;
        self
    }

    pub(crate) fn get_text(&self, request: &HttpRequest) -> Result<String, FetchError> {
        self.transport.get_text(request)
    }
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("transport", &self.transport.name())
            .field("today", &self.today)
            .finish()
    }
}

/// A value plus where it came from and, if it is fallback data, why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetched<T> {
    pub value: T,
    pub provenance: Provenance,
    pub error: Option<SourceError>,
}

impl<T> Fetched<T> {
    pub fn live(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Live,
            error: None,
        }
    }

    /// Static data that has no live source; not an error.
    pub fn fixed(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Fallback,
            error: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.provenance == Provenance::Live
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Derive a new value, keeping provenance and error.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            provenance: self.provenance,
            error: self.error,
        }
    }
}

/// Live value, or `fallback()` with the failure logged and recorded under `source`.
pub fn or_fallback<T>(
    source: &str,
    result: Result<T, FetchError>,
    fallback: impl FnOnce() -> T,
) -> Fetched<T> {
    match result {
        Ok(value) => Fetched::live(value),
        Err(e) => {
            warn!(source, error = %e, "live fetch failed, using fallback data");
            Fetched {
                value: fallback(),
                provenance: Provenance::Fallback,
                error: Some(SourceError::new(source, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_fallback_records_the_failure() {
        let ok = or_fallback("cpi", Ok(1), || 0);
        assert!(ok.is_live());
        assert_eq!(ok.value, 1);
        assert!(ok.error.is_none());

        let failed = or_fallback("cpi", Err(FetchError::Transport("down".into())), || 0);
        assert_eq!(failed.provenance, Provenance::Fallback);
        assert_eq!(failed.value, 0);
        assert_eq!(
            failed.error,
            Some(SourceError::new("cpi", "transport error: down"))
        );
    }

    #[test]
    fn map_keeps_provenance() {
        let f = Fetched::fixed(2).map(|v| v * 10);
        assert_eq!(f.value, 20);
        assert_eq!(f.provenance, Provenance::Fallback);
        assert!(f.error.is_none());
    }
}

//! Store → live → fallback retrieval policy for every dataset.
//!
//! For a stored dataset the orchestrator:
//!
//! 1. returns the persisted table if the store has a non-empty one,
//! 2. otherwise fetches it live and persists the result,
//! 3. and when the live fetch fails, returns the fetcher's fallback table.
//!
//! Point readings (latest rates, bond yields, ...) skip the store. Failures
//! never propagate: each one becomes a [`SourceError`] in the outcome.

use crate::config::{TtlClass, WindowsConfig};
use crate::error::{FetchError, SourceError};
use crate::fetch::cso::RateReading;
use crate::fetch::ecb::RatesSnapshot;
use crate::fetch::fallback::FALLBACK_VERSION;
use crate::fetch::markets::{BondSnapshot, CommoditySnapshot, ContainerCosts};
use crate::fetch::pmi::{PmiReadings, PmiSnapshot};
use crate::fetch::{
    CsoFetcher, EcbFetcher, FetchContext, Fetched, MarketFetcher, PmiFetcher, SentimentFetcher,
};
use crate::store::DataStore;
use crate::table::{LatestReading, Provenance, SeriesTable};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Tables persisted in the store, by stable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetId {
    LiveRegister,
    Cpi,
    ConstructionCosts,
    ExchangeRates,
    MonthlyExchangeRates,
    BrentCrude,
    NaturalGas,
    MonthlyBonds,
    PmiData,
    ConsumerSentiment,
    Insolvency,
}

impl DatasetId {
    pub const ALL: [DatasetId; 11] = [
        DatasetId::LiveRegister,
        DatasetId::Cpi,
        DatasetId::ConstructionCosts,
        DatasetId::ExchangeRates,
        DatasetId::MonthlyExchangeRates,
        DatasetId::BrentCrude,
        DatasetId::NaturalGas,
        DatasetId::MonthlyBonds,
        DatasetId::PmiData,
        DatasetId::ConsumerSentiment,
        DatasetId::Insolvency,
    ];

    /// Store name; also the source label of this dataset's errors.
    pub fn name(&self) -> &'static str {
        match self {
            DatasetId::LiveRegister => "live_register",
            DatasetId::Cpi => "cpi",
            DatasetId::ConstructionCosts => "construction_costs",
            DatasetId::ExchangeRates => "exchange_rates",
            DatasetId::MonthlyExchangeRates => "monthly_exchange_rates",
            DatasetId::BrentCrude => "brent_crude",
            DatasetId::NaturalGas => "natural_gas",
            DatasetId::MonthlyBonds => "monthly_bonds",
            DatasetId::PmiData => "pmi_data",
            DatasetId::ConsumerSentiment => "consumer_sentiment",
            DatasetId::Insolvency => "insolvency",
        }
    }

    pub fn ttl_class(&self) -> TtlClass {
        match self {
            DatasetId::ExchangeRates | DatasetId::MonthlyExchangeRates => TtlClass::Ecb,
            DatasetId::BrentCrude | DatasetId::NaturalGas => TtlClass::Markets,
            DatasetId::MonthlyBonds => TtlClass::Bonds,
            DatasetId::LiveRegister
            | DatasetId::Cpi
            | DatasetId::ConstructionCosts
            | DatasetId::PmiData
            | DatasetId::ConsumerSentiment
            | DatasetId::Insolvency => TtlClass::Cso,
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DatasetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DatasetId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| format!("unknown dataset '{s}'"))
    }
}

/// Point readings, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotId {
    Unemployment,
    LatestRates,
    Commodities,
    Bonds,
    PmiLatest,
    PmiReadings,
    SentimentLatest,
    Container,
}

impl SnapshotId {
    pub const ALL: [SnapshotId; 8] = [
        SnapshotId::Unemployment,
        SnapshotId::LatestRates,
        SnapshotId::Commodities,
        SnapshotId::Bonds,
        SnapshotId::PmiLatest,
        SnapshotId::PmiReadings,
        SnapshotId::SentimentLatest,
        SnapshotId::Container,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SnapshotId::Unemployment => "unemployment",
            SnapshotId::LatestRates => "latest_rates",
            SnapshotId::Commodities => "commodities",
            SnapshotId::Bonds => "bonds",
            SnapshotId::PmiLatest => "pmi_latest",
            SnapshotId::PmiReadings => "pmi_readings",
            SnapshotId::SentimentLatest => "sentiment_latest",
            SnapshotId::Container => "container",
        }
    }

    pub fn ttl_class(&self) -> TtlClass {
        match self {
            SnapshotId::LatestRates => TtlClass::Ecb,
            SnapshotId::Commodities | SnapshotId::Container => TtlClass::Markets,
            SnapshotId::Bonds => TtlClass::Bonds,
            SnapshotId::Unemployment
            | SnapshotId::PmiLatest
            | SnapshotId::PmiReadings
            | SnapshotId::SentimentLatest => TtlClass::Cso,
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SnapshotId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SnapshotId::ALL
            .into_iter()
            .find(|id| id.name() == s)
            .ok_or_else(|| format!("unknown reading '{s}'"))
    }
}

/// Value of a point reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Unemployment(RateReading),
    LatestRates(RatesSnapshot),
    Commodities(CommoditySnapshot),
    Bonds(BondSnapshot),
    PmiLatest(PmiSnapshot),
    PmiReadings(PmiReadings),
    SentimentLatest(LatestReading),
    Container(ContainerCosts),
}

/// One dataset: the table that won, where it came from, and what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetOutcome {
    pub table: SeriesTable,
    pub provenance: Provenance,
    pub errors: Vec<SourceError>,
}

/// Everything from one full cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub as_of: NaiveDate,
    pub fallback_version: String,
    pub tables: BTreeMap<String, DatasetOutcome>,
    pub readings: BTreeMap<String, Fetched<Reading>>,
    /// Every error from `tables` and `readings`, datasets first.
    pub errors: Vec<SourceError>,
}

impl Snapshot {
    pub fn table(&self, id: DatasetId) -> Option<&SeriesTable> {
        self.tables.get(id.name()).map(|o| &o.table)
    }

    pub fn reading(&self, id: SnapshotId) -> Option<&Reading> {
        self.readings.get(id.name()).map(|f| &f.value)
    }
}

pub struct Orchestrator {
    store: DataStore,
    today: NaiveDate,
    windows: WindowsConfig,
    parallel: bool,
    cso: CsoFetcher,
    ecb: EcbFetcher,
    markets: MarketFetcher,
    pmi: PmiFetcher,
    sentiment: SentimentFetcher,
}

impl Orchestrator {
    pub fn new(ctx: FetchContext, store: DataStore) -> Self {
        Self {
            store,
            today: ctx.today,
            windows: WindowsConfig::default(),
            parallel: true,
            cso: CsoFetcher::new(ctx.clone()),
            ecb: EcbFetcher::new(ctx.clone()),
            markets: MarketFetcher::new(ctx.clone()),
            pmi: PmiFetcher::new(ctx.clone()),
            sentiment: SentimentFetcher::new(ctx),
        }
    }

    pub fn with_windows(mut self, windows: WindowsConfig) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Stored table if present, otherwise live (persisted) or fallback.
    pub fn dataset(&self, id: DatasetId) -> DatasetOutcome {
        match self.store.load(id.name()) {
            Ok(Some(table)) if !table.is_empty() => {
                debug!(dataset = id.name(), rows = table.len(), "serving stored dataset");
                return DatasetOutcome {
                    table,
                    provenance: Provenance::Stored,
                    errors: Vec::new(),
                };
            }
            Ok(_) => {}
            Err(e) => warn!(dataset = id.name(), error = %e, "store read failed, treating as a miss"),
        }
        self.refresh(id)
    }

    /// Live fetch regardless of the store; a live result replaces the stored table.
    pub fn refresh(&self, id: DatasetId) -> DatasetOutcome {
        let fetched = self.fetch_live(id);
        let mut errors: Vec<SourceError> = fetched
            .error
            .into_iter()
            .map(|e| SourceError::new(id.name(), e.message))
            .collect();

        if fetched.provenance == Provenance::Live {
            match self.store.save(id.name(), &fetched.value) {
                Ok(format) => info!(dataset = id.name(), rows = fetched.value.len(), ?format, "dataset persisted"),
                Err(e) => {
                    warn!(dataset = id.name(), error = %e, "failed to persist live dataset");
                    errors.push(SourceError::new(
                        id.name(),
                        FetchError::Persistence(e.to_string()),
                    ));
                }
            }
        }

        DatasetOutcome {
            table: fetched.value,
            provenance: fetched.provenance,
            errors,
        }
    }

    fn fetch_live(&self, id: DatasetId) -> Fetched<SeriesTable> {
        let w = &self.windows;
        match id {
            DatasetId::LiveRegister => self.cso.live_register(w.cso_months),
            DatasetId::Cpi => self.cso.cpi(w.cso_months),
            DatasetId::ConstructionCosts => self.cso.construction_costs(w.cso_months),
            DatasetId::ExchangeRates => self.ecb.exchange_rates(w.exchange_rate_days),
            DatasetId::MonthlyExchangeRates => self.ecb.monthly_averages(w.monthly_months),
            DatasetId::BrentCrude => self.markets.brent_crude(w.market_days),
            DatasetId::NaturalGas => self.markets.natural_gas(w.market_days),
            DatasetId::MonthlyBonds => self.markets.monthly_bond_data(w.monthly_months),
            DatasetId::PmiData => self.pmi.historical_pmi(w.monthly_months),
            DatasetId::ConsumerSentiment => self.sentiment.consumer_sentiment(w.monthly_months),
            DatasetId::Insolvency => self.markets.insolvency_data(),
        }
    }

    /// A point reading, live or fallback. Errors are labelled with the reading's name.
    pub fn reading(&self, id: SnapshotId) -> Fetched<Reading> {
        let fetched = match id {
            SnapshotId::Unemployment => self.cso.unemployment_rate().map(Reading::Unemployment),
            SnapshotId::LatestRates => self.ecb.latest_rates().map(Reading::LatestRates),
            SnapshotId::Commodities => self.markets.latest_commodities().map(Reading::Commodities),
            SnapshotId::Bonds => self.markets.bond_yields().map(Reading::Bonds),
            SnapshotId::PmiLatest => self.pmi.latest_pmi().map(Reading::PmiLatest),
            SnapshotId::PmiReadings => self.pmi.latest_readings().map(Reading::PmiReadings),
            SnapshotId::SentimentLatest => {
                self.sentiment.latest_sentiment().map(Reading::SentimentLatest)
            }
            SnapshotId::Container => self.markets.container_costs().map(Reading::Container),
        };
        Fetched {
            error: fetched
                .error
                .map(|e| SourceError::new(id.name(), e.message)),
            ..fetched
        }
    }

    /// Every dataset and reading. Each is fetched independently; one failing
    /// never affects another.
    pub fn fetch_all(&self) -> Snapshot {
        self.collect(false)
    }

    /// Like [`fetch_all`](Self::fetch_all) but bypassing the store.
    pub fn refresh_all(&self) -> Snapshot {
        self.collect(true)
    }

    fn collect(&self, force: bool) -> Snapshot {
        let run = |id: DatasetId| {
            let outcome = if force { self.refresh(id) } else { self.dataset(id) };
            (id, outcome)
        };
        let tables: Vec<(DatasetId, DatasetOutcome)> = if self.parallel {
            DatasetId::ALL.par_iter().map(|id| run(*id)).collect()
        } else {
            DatasetId::ALL.iter().map(|id| run(*id)).collect()
        };
        let readings: Vec<(SnapshotId, Fetched<Reading>)> = if self.parallel {
            SnapshotId::ALL
                .par_iter()
                .map(|id| (*id, self.reading(*id)))
                .collect()
        } else {
            SnapshotId::ALL
                .iter()
                .map(|id| (*id, self.reading(*id)))
                .collect()
        };

        let mut errors: Vec<SourceError> = tables
            .iter()
            .flat_map(|(_, o)| o.errors.iter().cloned())
            .collect();
        errors.extend(readings.iter().filter_map(|(_, r)| r.error.clone()));

        let live = tables
            .iter()
            .filter(|(_, o)| o.provenance == Provenance::Live)
            .count();
        info!(
            datasets = tables.len(),
            live,
            errors = errors.len(),
            "fetch cycle complete"
        );

        Snapshot {
            as_of: self.today,
            fallback_version: FALLBACK_VERSION.to_string(),
            tables: tables
                .into_iter()
                .map(|(id, o)| (id.name().to_string(), o))
                .collect(),
            readings: readings
                .into_iter()
                .map(|(id, r)| (id.name().to_string(), r))
                .collect(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;
    use crate::fetch::{fallback, CannedTransport, HttpResponse};
    use std::sync::Arc;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 12).unwrap()
    }

    fn orchestrator(transport: CannedTransport, store: DataStore) -> Orchestrator {
        let ctx = FetchContext::new(Arc::new(transport), SourcesConfig::default(), today());
        Orchestrator::new(ctx, store).with_parallelism(false)
    }

    #[test]
    fn orchestrator_is_send_sync() {
        fn require<T: Send + Sync>() {}
        require::<Orchestrator>();
        require::<Snapshot>();
        require::<DatasetOutcome>();
    }

    #[test]
    fn dataset_names_parse_back() {
        for id in DatasetId::ALL {
            assert_eq!(id.name().parse::<DatasetId>(), Ok(id));
        }
        for id in SnapshotId::ALL {
            assert_eq!(id.to_string().parse::<SnapshotId>(), Ok(id));
        }
        assert!("gdp".parse::<DatasetId>().is_err());
    }

    #[test]
    fn stored_table_wins_over_live() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path());
        let stored = fallback::cpi(today());
        store.save("cpi", &stored).unwrap();

        let o = orchestrator(CannedTransport::new(), store);
        let outcome = o.dataset(DatasetId::Cpi);
        assert_eq!(outcome.provenance, Provenance::Stored);
        assert_eq!(outcome.table, stored);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn live_result_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let history = "<table><tr><th>Date</th><th>Value</th></tr>\
            <tr><td>Feb 2025</td><td>63.0</td></tr>\
            <tr><td>Jan 2025</td><td>61.2</td></tr></table>";
        let transport = CannedTransport::new().route(
            &SourcesConfig::default().sentiment_history,
            HttpResponse::ok(history),
        );
        let o = orchestrator(transport, DataStore::new(dir.path()));

        let outcome = o.dataset(DatasetId::ConsumerSentiment);
        assert_eq!(outcome.provenance, Provenance::Live);
        assert!(outcome.errors.is_empty());
        let stored = o.store().load("consumer_sentiment").unwrap().unwrap();
        assert_eq!(stored, outcome.table);

        // second call is served from the store
        assert_eq!(o.dataset(DatasetId::ConsumerSentiment).provenance, Provenance::Stored);
    }

    #[test]
    fn persist_failure_is_recorded_but_live_table_returned() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("store");
        std::fs::write(&blocker, "not a directory").unwrap();
        let history = "<table><tr><th>Date</th><th>Value</th></tr>\
            <tr><td>Feb 2025</td><td>63.0</td></tr>\
            <tr><td>Jan 2025</td><td>61.2</td></tr></table>";
        let transport = CannedTransport::new().route(
            &SourcesConfig::default().sentiment_history,
            HttpResponse::ok(history),
        );
        let o = orchestrator(transport, DataStore::new(&blocker));

        let outcome = o.dataset(DatasetId::ConsumerSentiment);
        assert_eq!(outcome.provenance, Provenance::Live);
        assert_eq!(outcome.table.value(0, "sentiment"), Some(63.0));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].source, "consumer_sentiment");
        assert!(outcome.errors[0].message.contains("persistence"));
    }

    #[test]
    fn static_datasets_are_neither_errors_nor_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(CannedTransport::new(), DataStore::new(dir.path()));
        let outcome = o.dataset(DatasetId::Insolvency);
        assert_eq!(outcome.provenance, Provenance::Fallback);
        assert!(outcome.errors.is_empty());
        assert_eq!(o.store().load("insolvency").unwrap(), None);
    }

    #[test]
    fn reading_errors_carry_the_reading_name() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(CannedTransport::new(), DataStore::new(dir.path()));
        let rates = o.reading(SnapshotId::LatestRates);
        assert_eq!(rates.provenance, Provenance::Fallback);
        assert_eq!(rates.error.unwrap().source, "latest_rates");
        assert!(matches!(rates.value, Reading::LatestRates(_)));
    }

    #[test]
    fn offline_cycle_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(CannedTransport::new(), DataStore::new(dir.path()));
        let snap = o.fetch_all();
        assert_eq!(snap.tables.len(), DatasetId::ALL.len());
        assert_eq!(snap.readings.len(), SnapshotId::ALL.len());
        assert!(snap.tables.values().all(|o| !o.table.is_empty()));
        assert!(snap.tables.values().all(|o| o.provenance == Provenance::Fallback));
        // monthly_bonds, insolvency and container have no live source to fail
        assert_eq!(snap.errors.len(), DatasetId::ALL.len() - 2 + SnapshotId::ALL.len() - 1);
        assert_eq!(snap.table(DatasetId::Cpi), Some(&fallback::cpi(today())));
    }
}

//! End-to-end tests of the store → live → fallback chain.
//!
//! No network: transports are either canned responses or a recording mock
//! that fails every request.

use chrono::NaiveDate;
use econwatch_core::config::SourcesConfig;
use econwatch_core::error::FetchError;
use econwatch_core::fetch::{
    fallback, CannedTransport, FetchContext, HttpRequest, HttpResponse, Transport,
};
use econwatch_core::orchestrator::{DatasetId, Orchestrator, Reading, SnapshotId};
use econwatch_core::store::DataStore;
use econwatch_core::table::{Provenance, SeriesTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 12).unwrap()
}

/// Fails every request and remembers what was asked for.
#[derive(Default)]
struct RecordingTransport {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn get(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(request.full_url());
        Err(FetchError::Transport("connection refused".into()))
    }
}

/// One-row marker table, distinguishable from any fallback data.
fn marker(value: f64) -> SeriesTable {
    SeriesTable::from_rows(["marker"], [(today(), vec![Some(value)])])
}

fn seed_all_except(store: &DataStore, missing: DatasetId) {
    for (i, id) in DatasetId::ALL.into_iter().enumerate() {
        if id != missing {
            store.save(id.name(), &marker(i as f64)).unwrap();
        }
    }
}

fn orchestrator(transport: Arc<dyn Transport>, store: DataStore) -> Orchestrator {
    let ctx = FetchContext::new(transport, SourcesConfig::default(), today());
    Orchestrator::new(ctx, store)
}

#[test]
fn single_store_miss_with_failed_live_fetch_falls_back_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::new(dir.path());
    seed_all_except(&store, DatasetId::Cpi);

    let snapshot = orchestrator(Arc::new(CannedTransport::new()), store).fetch_all();

    let cpi = &snapshot.tables["cpi"];
    assert_eq!(cpi.provenance, Provenance::Fallback);
    assert_eq!(cpi.table, fallback::cpi(today()));

    let table_errors: Vec<_> = snapshot
        .tables
        .values()
        .flat_map(|o| o.errors.iter())
        .collect();
    assert_eq!(table_errors.len(), 1);
    assert_eq!(table_errors[0].source, "cpi");
    assert_eq!(
        snapshot.errors.iter().filter(|e| e.source == "cpi").count(),
        1
    );

    for (i, id) in DatasetId::ALL.into_iter().enumerate() {
        if id == DatasetId::Cpi {
            continue;
        }
        let outcome = &snapshot.tables[id.name()];
        assert_eq!(outcome.provenance, Provenance::Stored, "{id}");
        assert_eq!(outcome.table, marker(i as f64), "{id}");
    }
}

#[test]
fn stored_datasets_never_touch_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::new(dir.path());
    seed_all_except(&store, DatasetId::ExchangeRates);
    let transport = Arc::new(RecordingTransport::default());

    let o = orchestrator(transport.clone(), store);
    for id in DatasetId::ALL {
        o.dataset(id);
    }

    let urls = transport.urls.lock().unwrap();
    assert!(!urls.is_empty());
    assert!(
        urls.iter().all(|u| u.contains("/EXR/")),
        "unexpected requests: {urls:?}"
    );
}

#[test]
fn refresh_bypasses_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = DataStore::new(dir.path());
    store.save("live_register", &marker(1.0)).unwrap();
    let transport = Arc::new(RecordingTransport::default());

    let o = orchestrator(transport.clone(), store);
    let outcome = o.refresh(DatasetId::LiveRegister);
    assert_eq!(outcome.provenance, Provenance::Fallback);
    assert_eq!(outcome.table, fallback::live_register(today()));
    assert!(transport.calls.load(Ordering::SeqCst) > 0);
    // a failed refresh leaves the stored table alone
    assert_eq!(
        o.store().load("live_register").unwrap(),
        Some(marker(1.0))
    );
}

#[test]
fn live_dataset_is_persisted_while_others_fall_back() {
    let dir = tempfile::tempdir().unwrap();
    let sources = SourcesConfig::default();
    let history = "<table><tr><th>Date</th><th>Value</th></tr>\
        <tr><td>Feb 2025</td><td>63.0</td></tr>\
        <tr><td>Jan 2025</td><td>61.2</td></tr>\
        <tr><td>Dec 2024</td><td>74.1</td></tr></table>";
    let transport =
        CannedTransport::new().route(&sources.sentiment_history, HttpResponse::ok(history));
    let ctx = FetchContext::new(Arc::new(transport), sources, today());
    let o = Orchestrator::new(ctx, DataStore::new(dir.path()));

    let snapshot = o.fetch_all();
    let sentiment = &snapshot.tables["consumer_sentiment"];
    assert_eq!(sentiment.provenance, Provenance::Live);
    assert!(sentiment.errors.is_empty());
    assert_eq!(sentiment.table.len(), 3);
    assert_eq!(
        o.store().list_datasets().unwrap(),
        vec!["consumer_sentiment".to_string()]
    );

    assert_eq!(snapshot.tables["pmi_data"].provenance, Provenance::Fallback);
    match snapshot.reading(SnapshotId::SentimentLatest) {
        Some(Reading::SentimentLatest(r)) => {
            assert_eq!(r.current, 63.0);
            assert_eq!(r.previous, 61.2);
        }
        other => panic!("unexpected sentiment reading: {other:?}"),
    }
}

#[test]
fn snapshot_serializes_with_every_name() {
    let dir = tempfile::tempdir().unwrap();
    let o = orchestrator(
        Arc::new(CannedTransport::new()),
        DataStore::new(dir.path()),
    );
    let snapshot = o.fetch_all();
    let json = serde_json::to_value(&snapshot).unwrap();

    for id in DatasetId::ALL {
        assert!(json["tables"].get(id.name()).is_some(), "{id}");
    }
    for id in SnapshotId::ALL {
        assert!(json["readings"].get(id.name()).is_some(), "{id}");
    }
    assert_eq!(json["fallback_version"], fallback::FALLBACK_VERSION);
}

//! EconWatch Core: acquisition, normalization, caching and storage of economic series.
//!
//! This crate contains everything below the CLI:
//! - Statistical cube decoding (JSON-stat 2.0) into flat records
//! - Period normalization and pivoting into date-indexed tables
//! - Text extraction of headline readings from scraped pages
//! - Source fetchers with documented fallback datasets
//! - TTL-bounded JSON cache and Parquet/CSV dataset store
//! - The orchestrator tying store, live fetch and fallback together

pub mod cache;
pub mod config;
pub mod cube;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod orchestrator;
pub mod records;
pub mod store;
pub mod table;

pub use cache::DataCache;
pub use config::EconConfig;
pub use error::{DecodeError, FetchError, SourceError};
pub use fetch::{FetchContext, Fetched};
pub use orchestrator::{DatasetId, DatasetOutcome, Orchestrator, Reading, Snapshot, SnapshotId};
pub use store::DataStore;
pub use table::{Provenance, SeriesTable};

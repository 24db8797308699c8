//! Static fallback data.
//!
//! Used whenever a live fetch fails, and as the only data for sources without a
//! free live feed (container freight, insolvencies, historical bond spreads).
//! Series are anchored on the supplied `today` so the same call always yields
//! the same table for a given day.

use super::cso::RateReading;
use super::ecb::RatesSnapshot;
use super::markets::{BondSnapshot, CommoditySnapshot, ContainerCosts, PriceChange, PriceRange};
use super::pmi::PmiSnapshot;
use crate::extract::{Period, ScrapeResult};
use crate::table::{round_to, LatestReading, SeriesTable};
use chrono::{Datelike, Days, Months, NaiveDate};

/// Bumped whenever the constants below are refreshed from newer publications.
pub const FALLBACK_VERSION: &str = "2026-01";

/// Source label attached to readings taken from these tables.
pub const FALLBACK_SOURCE: &str = "fallback";

const LIVE_REGISTER_UNADJUSTED: [f64; 15] = [
    172224.0, 163483.0, 163864.0, 168898.0, 185026.0, 182562.0, 168418.0, 163512.0, 164257.0,
    161470.0, 165478.0, 167119.0, 161022.0, 161094.0, 161008.0,
];
const LIVE_REGISTER_ADJUSTED: [f64; 15] = [
    172200.0, 163500.0, 164000.0, 169000.0, 185000.0, 182500.0, 168500.0, 163500.0, 164300.0,
    161500.0, 165500.0, 167100.0, 161000.0, 161100.0, 161000.0,
];
pub const LIVE_REGISTER_UNADJUSTED_COLUMN: &str = "Persons on the Live Register (Unadjusted)";
pub const LIVE_REGISTER_ADJUSTED_COLUMN: &str = "Persons on the Live Register (Seasonally Adjusted)";

const CPI: [f64; 15] = [2.8, 3.2, 2.9, 2.7, 2.0, 1.7, 1.8, 1.7, 2.2, 2.0, 1.8, 1.9, 1.4, 1.0, 0.7];
const CORE_CPI: [f64; 15] = [
    2.7, 3.1, 2.8, 2.8, 2.1, 1.8, 2.0, 1.9, 2.6, 2.2, 2.2, 2.5, 2.1, 2.0, 2.3,
];

const MONTHLY_EUR_GBP: [f64; 15] = [
    0.874, 0.879, 0.872, 0.870, 0.866, 0.867, 0.850, 0.844, 0.858, 0.835, 0.831, 0.840, 0.829,
    0.835, 0.836,
];
const MONTHLY_EUR_USD: [f64; 15] = [
    1.171, 1.157, 1.164, 1.174, 1.165, 1.169, 1.153, 1.126, 1.132, 1.077, 1.040, 1.034, 1.047,
    1.066, 1.089,
];

// Newest first from here on.
const IRELAND_10Y: [f64; 15] = [
    3.057, 2.907, 2.895, 2.944, 2.957, 2.931, 2.865, 2.905, 2.862, 3.060, 2.692, 2.797, 2.525,
    2.662, 2.612,
];
const BOND_SPREAD: [f64; 15] = [
    0.189, 0.223, 0.250, 0.241, 0.243, 0.272, 0.314, 0.323, 0.355, 0.271, 0.283, 0.284, 0.283,
    0.348, 0.340,
];
const MANUFACTURING_PMI: [f64; 15] = [
    52.2, 52.8, 50.9, 51.6, 51.6, 53.2, 53.7, 52.6, 53.0, 51.6, 51.9, 51.3, 49.1, 49.9, 51.5,
];
const SERVICES_PMI: [f64; 15] = [
    54.8, 58.5, 56.7, 53.5, 50.6, 50.9, 51.5, 54.7, 52.8, 55.3, 53.2, 53.4, 57.1, 58.3, 53.8,
];
const CONSTRUCTION_PMI: [f64; 15] = [
    48.4, 46.7, 48.1, 43.7, 45.9, 47.1, 48.6, 49.2, 52.4, 53.9, 48.7, 48.2, 51.6, 47.5, 49.4,
];
const SENTIMENT: [f64; 15] = [
    61.2, 61.0, 59.9, 61.7, 61.1, 59.1, 62.5, 60.8, 58.7, 67.5, 74.8, 74.9, 73.9, 74.1, 74.1,
];
const PERSONAL_BANKRUPTCIES: [Option<f64>; 5] = [None, Some(15.0), Some(19.0), Some(23.0), Some(28.0)];
const CORPORATE_INSOLVENCIES: [f64; 5] = [194.0, 211.0, 201.0, 206.0, 225.0];

/// First day of the current month, then one month back per step. Newest first.
pub fn month_starts(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let first = today.with_day(1).unwrap_or(today);
    (0..count)
        .filter_map(|i| first.checked_sub_months(Months::new(i as u32)))
        .collect()
}

/// `today` and the `count - 1` days before it. Newest first.
pub fn days_back(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (0..count)
        .filter_map(|i| today.checked_sub_days(Days::new(i as u64)))
        .collect()
}

/// Start of the current calendar quarter, then one quarter back per step. Newest first.
pub fn quarter_starts(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let month = (today.month() - 1) / 3 * 3 + 1;
    let first = NaiveDate::from_ymd_opt(today.year(), month, 1).unwrap_or(today);
    (0..count)
        .filter_map(|i| first.checked_sub_months(Months::new(3 * i as u32)))
        .collect()
}

/// `columns[c][k]` belongs to `dates[k]`; missing cells are null.
fn build(names: &[&str], dates: &[NaiveDate], columns: &[Vec<Option<f64>>]) -> SeriesTable {
    let rows = dates.iter().enumerate().map(|(k, date)| {
        let values = columns
            .iter()
            .map(|col| col.get(k).copied().flatten())
            .collect();
        (*date, values)
    });
    let mut table = SeriesTable::from_rows(names.iter().copied(), rows);
    table.sort_desc();
    table
}

fn newest_first(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().map(|v| Some(*v)).collect()
}

fn oldest_first(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().rev().map(|v| Some(*v)).collect()
}

pub fn live_register(today: NaiveDate) -> SeriesTable {
    build(
        &[LIVE_REGISTER_UNADJUSTED_COLUMN, LIVE_REGISTER_ADJUSTED_COLUMN],
        &month_starts(today, 15),
        &[
            oldest_first(&LIVE_REGISTER_UNADJUSTED),
            oldest_first(&LIVE_REGISTER_ADJUSTED),
        ],
    )
}

pub fn cpi(today: NaiveDate) -> SeriesTable {
    build(
        &["cpi", "core_cpi"],
        &month_starts(today, 15),
        &[oldest_first(&CPI), oldest_first(&CORE_CPI)],
    )
}

pub fn construction_costs(today: NaiveDate) -> SeriesTable {
    build(
        &["construction_cost_change"],
        &month_starts(today, 15),
        &[vec![Some(2.0); 15]],
    )
}

pub fn unemployment(today: NaiveDate) -> RateReading {
    RateReading {
        rate: 5.0,
        as_of: today,
    }
}

/// Thirty days of synthetic EUR/GBP and EUR/USD rates ending today.
pub fn exchange_rates(today: NaiveDate) -> SeriesTable {
    // i = 0 is the oldest day
    let step = |base: f64, inc: f64| -> Vec<Option<f64>> {
        (0..30)
            .rev()
            .map(|i| Some(round_to(base + (i % 10) as f64 * inc, 3)))
            .collect()
    };
    build(
        &["eur_gbp", "eur_usd"],
        &days_back(today, 30),
        &[step(0.868, 0.002), step(1.186, 0.005)],
    )
}

/// Used when the daily table is empty; never expected from a working fallback table.
pub fn latest_rates(today: NaiveDate) -> RatesSnapshot {
    RatesSnapshot {
        eur_gbp: 0.868,
        eur_usd: 1.186,
        as_of: today,
        eur_gbp_wow: 0.0,
        eur_usd_wow: 0.0,
    }
}

pub fn monthly_exchange_rates(today: NaiveDate) -> SeriesTable {
    build(
        &["eur_gbp", "eur_usd"],
        &month_starts(today, 15),
        &[oldest_first(&MONTHLY_EUR_GBP), oldest_first(&MONTHLY_EUR_USD)],
    )
}

pub fn brent_crude(today: NaiveDate) -> SeriesTable {
    let prices = (0..30)
        .rev()
        .map(|i| Some(round_to(66.91 + (i % 10) as f64 * 0.5, 2)))
        .collect();
    build(&["brent_price"], &days_back(today, 30), &[prices])
}

pub fn natural_gas(today: NaiveDate) -> SeriesTable {
    let prices = (0..30)
        .rev()
        .map(|i| Some(round_to(3.5 + (i % 10) as f64 * 0.1, 2)))
        .collect();
    let gbp = (0..30)
        .rev()
        .map(|i| Some(round_to(104.15 + (i % 10) as f64 * 2.0, 2)))
        .collect();
    build(
        &["gas_price", "gas_price_gbp_thm"],
        &days_back(today, 30),
        &[prices, gbp],
    )
}

pub fn commodities() -> CommoditySnapshot {
    CommoditySnapshot {
        brent: PriceChange {
            price: 66.91,
            wow: 2.31,
            yoy: -18.08,
        },
        gas: PriceRange {
            price: 104.15,
            high: 106.77,
            low: 87.50,
        },
    }
}

pub fn bond_yields(today: NaiveDate) -> BondSnapshot {
    BondSnapshot {
        ireland_10y: 3.057,
        germany_10y: 2.945,
        spread: 0.112,
        as_of: today,
    }
}

/// Up to fifteen months of Irish 10-year yields and spreads over Bunds.
pub fn monthly_bonds(today: NaiveDate, months: usize) -> SeriesTable {
    let months = months.min(IRELAND_10Y.len());
    build(
        &["ireland_10y", "spread"],
        &month_starts(today, months),
        &[newest_first(&IRELAND_10Y), newest_first(&BOND_SPREAD)],
    )
}

pub fn container_costs(today: NaiveDate) -> ContainerCosts {
    ContainerCosts {
        current: 2730.0,
        wow: -3.91,
        yoy: -33.54,
        mom: 7.14,
        as_of: today,
    }
}

pub fn pmi(today: NaiveDate) -> SeriesTable {
    build(
        &["manufacturing_pmi", "services_pmi", "construction_pmi"],
        &month_starts(today, 15),
        &[
            newest_first(&MANUFACTURING_PMI),
            newest_first(&SERVICES_PMI),
            newest_first(&CONSTRUCTION_PMI),
        ],
    )
}

/// Latest row of the PMI table as scrape results.
pub fn latest_pmi(today: NaiveDate) -> PmiSnapshot {
    let table = pmi(today);
    let reading = |column: &str| {
        let row = table.rows().first()?;
        Some(ScrapeResult {
            value: table.value(0, column)?,
            period: Period::of(row.date),
            source: FALLBACK_SOURCE.to_string(),
        })
    };
    PmiSnapshot {
        manufacturing: reading("manufacturing_pmi"),
        services: reading("services_pmi"),
        construction: reading("construction_pmi"),
    }
}

pub fn sentiment(today: NaiveDate) -> SeriesTable {
    build(
        &["sentiment"],
        &month_starts(today, 15),
        &[newest_first(&SENTIMENT)],
    )
}

pub fn latest_sentiment(today: NaiveDate) -> LatestReading {
    let as_of = today.with_day(1).unwrap_or(today);
    LatestReading {
        current: SENTIMENT[0],
        previous: SENTIMENT[1],
        change: round_to(SENTIMENT[0] - SENTIMENT[1], 2),
        as_of,
    }
}

/// Quarterly personal bankruptcies and corporate insolvencies. The newest
/// quarter's bankruptcy count is not yet published.
pub fn insolvency(today: NaiveDate) -> SeriesTable {
    build(
        &["personal_bankruptcies", "corporate_insolvencies"],
        &quarter_starts(today, 5),
        &[
            PERSONAL_BANKRUPTCIES.to_vec(),
            newest_first(&CORPORATE_INSOLVENCIES),
        ],
    )
}

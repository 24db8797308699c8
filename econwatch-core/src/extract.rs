//! Heuristic extraction of index readings and reporting periods from free text.
//!
//! Everything here is a pure function of its input text (and a supplied
//! "today"), so it is fully testable without network access. Extraction is
//! best-effort: callers always keep another source or a fallback behind it.
//!
//! Value patterns, highest priority first:
//!
//! 1. keyword (`PMI`, `index`, `reading`) followed by `NN.N`
//! 2. `NN.N` followed by `in` / `for` / `during`
//! 3. movement verb (`rose`, `fell`, ...) followed by `NN.N`
//! 4. `NN.N` followed by `point(s)` / `percent`
//! 5. any bare `NN.N` (checked against the tighter fallback range)
//!
//! Patterns 1-4 are judged on their first match only. `NN.N` widens to
//! `NNN.N` when the config allows three-digit readings.

use chrono::{Datelike, Months, NaiveDate};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

// `{num}` is replaced by the number shape the config allows.
const SPECIFIC_PATTERNS: &[&str] = &[
    r"(?i)(?:PMI|index|reading)[^\d]*({num})\b",
    r"(?i)\b({num})\s*(?:in|for|during)\b",
    r"(?i)(?:rose|fell|increased|decreased|unchanged)[^\d]*({num})\b",
    r"(?i)\b({num})\s*(?:points?|percent)",
];

const FALLBACK_PATTERN: &str = r"\b({num})\b";

// `{label}` is an escaped label such as "services".
const LABELLED_PATTERNS: &[&str] = &[
    r"(?i){label}\s+pmi[^\d]*({num})\b",
    r"(?i){label}[^\d]*(?:index|pmi|activity)[^\d]*({num})\b",
];

const MONTH_PATTERN: &str = r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\b";

const YEAR_PATTERN: &str = r"\b(20\d{2})\b";

/// A reporting month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// First day of the month.
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }
}

/// A plausible reading attributed to a reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub value: f64,
    pub period: Period,
    pub source: String,
}

/// Plausibility bounds for extracted values.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Range for values found next to a context keyword.
    pub specific: RangeInclusive<f64>,
    /// Tighter range for bare numbers with no context.
    pub fallback: RangeInclusive<f64>,
    /// Max bytes between a month mention and a following year.
    pub year_after: usize,
    /// Max bytes between a preceding year and a month mention.
    pub year_before: usize,
    /// Accept `NNN.N` as well as `NN.N`.
    pub three_digit_values: bool,
}

impl ExtractorConfig {
    /// Purchasing managers' indices hover around 50.
    pub fn pmi() -> Self {
        Self {
            specific: 30.0..=70.0,
            fallback: 40.0..=65.0,
            year_after: 40,
            year_before: 12,
            three_digit_values: false,
        }
    }

    /// Consumer sentiment indices run higher and wider than PMIs.
    pub fn sentiment() -> Self {
        Self {
            specific: 30.0..=130.0,
            fallback: 40.0..=120.0,
            three_digit_values: true,
            ..Self::pmi()
        }
    }
}

impl ExtractorConfig {
    fn number_pattern(&self) -> &'static str {
        if self.three_digit_values {
            r"\d{2,3}\.\d"
        } else {
            r"\d{2}\.\d"
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::pmi()
    }
}

/// When no month is found, which month does freshly published data describe?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPolicy {
    /// Before this day of the month, assume the data is two months old.
    pub threshold_day: u32,
}

impl Default for PeriodPolicy {
    fn default() -> Self {
        Self { threshold_day: 5 }
    }
}

impl PeriodPolicy {
    pub fn default_period(&self, today: NaiveDate) -> Period {
        let lag = if today.day() < self.threshold_day { 2 } else { 1 };
        let first = today.with_day(1).unwrap_or(today);
        Period::of(first - Months::new(lag))
    }
}

/// Regex-driven reading extractor.
#[derive(Debug, Clone)]
pub struct TextExtractor {
    config: ExtractorConfig,
    specific: Vec<Regex>,
    fallback: Regex,
    labelled: Vec<(String, Vec<Regex>)>,
    month: Regex,
    year: Regex,
}

impl TextExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let num = config.number_pattern();
        let value_re = |p: &str| {
            Regex::new(&p.replace("{num}", num)).expect("value pattern is valid")
        };
        Self {
            specific: SPECIFIC_PATTERNS.iter().map(|p| value_re(*p)).collect(),
            fallback: value_re(FALLBACK_PATTERN),
            labelled: Vec::new(),
            month: Regex::new(MONTH_PATTERN).expect("month pattern is valid"),
            year: Regex::new(YEAR_PATTERN).expect("year pattern is valid"),
            config,
        }
    }

    /// Compiles the label patterns used by [`extract_labelled`](Self::extract_labelled).
    pub fn with_labels<'a>(mut self, labels: impl IntoIterator<Item = &'a str>) -> Self {
        let num = self.config.number_pattern();
        for label in labels {
            let escaped = regex::escape(label);
            let regexes = LABELLED_PATTERNS
                .iter()
                .map(|p| {
                    let p = p.replace("{label}", &escaped).replace("{num}", num);
                    Regex::new(&p).expect("escaped label pattern is valid")
                })
                .collect();
            self.labelled.push((label.to_ascii_lowercase(), regexes));
        }
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Value of the highest-priority pattern whose first match is in range.
    ///
    /// An implausible first match moves on to the next pattern rather than to
    /// a later match of the same one. Only the bare-number fallback scans past
    /// its first match.
    pub fn extract_value(&self, text: &str) -> Option<f64> {
        self.specific
            .iter()
            .find_map(|re| first_match_in_range(re, text, &self.config.specific))
            .or_else(|| first_in_range(&self.fallback, text, &self.config.fallback))
    }

    /// Value following a label such as "manufacturing", for pages listing several indices.
    ///
    /// Only labels registered through [`with_labels`](Self::with_labels) match.
    pub fn extract_labelled(&self, text: &str, label: &str) -> Option<f64> {
        let (_, regexes) = self
            .labelled
            .iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(label))?;
        regexes
            .iter()
            .find_map(|re| first_match_in_range(re, text, &self.config.specific))
    }

    /// Month mentioned in the text, paired with a nearby year or an inferred one.
    ///
    /// Mentions with a nearby year win over bare ones. A bare month later in the
    /// calendar than `today`'s month is taken to be last year's.
    pub fn extract_period(&self, text: &str, today: NaiveDate) -> Option<Period> {
        let years: Vec<(usize, usize, i32)> = self
            .year
            .captures_iter(text)
            .filter_map(|c| {
                let m = c.get(1)?;
                Some((m.start(), m.end(), m.as_str().parse().ok()?))
            })
            .collect();

        let months: Vec<(usize, usize, u32)> = self
            .month
            .captures_iter(text)
            .filter_map(|c| {
                let m = c.get(1)?;
                Some((m.start(), m.end(), month_from_name(m.as_str())?))
            })
            .collect();

        // a year belongs to a month only if no other month sits between them
        let between = |from: usize, to: usize| months.iter().any(|(s, _, _)| *s >= from && *s < to);

        let mut first_bare = None;
        for &(m_start, m_end, month) in &months {
            let near = years.iter().find(|&&(y_start, y_end, _)| {
                (y_start >= m_end
                    && y_start - m_end <= self.config.year_after
                    && !between(m_end, y_start))
                    || (m_start >= y_end
                        && m_start - y_end <= self.config.year_before
                        && !between(y_end, m_start))
            });
            if let Some(&(_, _, year)) = near {
                return Some(Period::new(year, month));
            }
            first_bare.get_or_insert(month);
        }

        first_bare.map(|month| {
            let year = if month > today.month() {
                today.year() - 1
            } else {
                today.year()
            };
            Period::new(year, month)
        })
    }

    /// Value and period, or nothing. No month in the text means no result.
    pub fn extract(&self, text: &str, today: NaiveDate, source: &str) -> Option<ScrapeResult> {
        let value = self.extract_value(text)?;
        let period = self.extract_period(text, today)?;
        Some(ScrapeResult {
            value,
            period,
            source: source.to_string(),
        })
    }

    /// Like [`extract`](Self::extract) for an already-found value, defaulting
    /// the period through `policy` when the text names no month.
    pub fn attribute(
        &self,
        value: f64,
        text: &str,
        today: NaiveDate,
        policy: PeriodPolicy,
        source: &str,
    ) -> ScrapeResult {
        let period = self
            .extract_period(text, today)
            .unwrap_or_else(|| policy.default_period(today));
        ScrapeResult {
            value,
            period,
            source: source.to_string(),
        }
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

fn first_match_in_range(re: &Regex, text: &str, range: &RangeInclusive<f64>) -> Option<f64> {
    let value: f64 = re.captures(text)?.get(1)?.as_str().parse().ok()?;
    range.contains(&value).then_some(value)
}

fn first_in_range(re: &Regex, text: &str, range: &RangeInclusive<f64>) -> Option<f64> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .find(|v| range.contains(v))
}

/// Month number for a full or abbreviated English month name.
pub fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim().to_ascii_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    const FULL: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let full = FULL[month as usize - 1];
    (full.starts_with(&lower) || lower == "sept").then_some(month)
}

/// Visible text of an HTML document, whitespace-joined.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of every `<table>` in the document.
pub fn html_table_texts(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let table = Selector::parse("table").expect("valid selector");
    doc.select(&table)
        .map(|t| {
            t.text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Cell texts of every row of every `<table>`, one `Vec<Vec<String>>` per table.
pub fn html_table_rows(html: &str) -> Vec<Vec<Vec<String>>> {
    let doc = Html::parse_document(html);
    let table = Selector::parse("table").expect("valid selector");
    let row = Selector::parse("tr").expect("valid selector");
    let cell = Selector::parse("td, th").expect("valid selector");
    doc.select(&table)
        .map(|t| {
            t.select(&row)
                .map(|r| {
                    r.select(&cell)
                        .map(|c| c.text().collect::<String>().trim().to_string())
                        .collect()
                })
                .collect()
        })
        .collect()
}

/// Dated readings from the first table with more than two rows that yields any.
///
/// The first row is a header. Each data row needs a period in its first cell
/// and a value in `range` in its second; other rows are skipped. The result is
/// newest first with one reading per month.
pub fn history_rows(
    html: &str,
    extractor: &TextExtractor,
    range: &RangeInclusive<f64>,
    today: NaiveDate,
    source: &str,
) -> Vec<ScrapeResult> {
    for table in html_table_rows(html) {
        if table.len() <= 2 {
            continue;
        }
        let mut readings: Vec<ScrapeResult> = table
            .iter()
            .skip(1)
            .filter(|cells| cells.len() >= 2)
            .filter_map(|cells| {
                let period: Period = extractor.extract_period(&cells[0], today)?;
                let digits: String = cells[1]
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                let value: f64 = digits.parse().ok()?;
                range.contains(&value).then(|| ScrapeResult {
                    value,
                    period,
                    source: source.to_string(),
                })
            })
            .collect();
        if readings.is_empty() {
            continue;
        }
        readings.sort_by(|a, b| b.period.cmp(&a.period));
        readings.dedup_by_key(|r| r.period);
        return readings;
    }
    Vec::new()
}

//! Schedule rows, terms and aggregation output

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{Result, StoreError};

static TERM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{3}-[12]$").expect("static regex is valid"));

/// Maximum length of the `time_slot` column
pub const MAX_TIME_SLOT_LEN: usize = 15;

/// Maximum length of a day column
pub const MAX_LABEL_LEN: usize = 100;

/// Academic term, `NNN-S` (year code, dash, semester 1 or 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Term(String);

impl Term {
    pub fn new(year: u16, semester: u8) -> Result<Self> {
        format!("{year:03}-{semester}").parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Term {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        if TERM_PATTERN.is_match(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(StoreError::InvalidTerm {
                value: s.to_owned(),
            })
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// School days stored as fixed columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
}

impl Weekday {
    pub const ALL: [Weekday; 5] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];

    /// Column holding this day's label
    pub fn column(self) -> &'static str {
        match self {
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
        }
    }
}

/// Inbound shape from the parser: `(term, time_slot, mon, tue, wed, thu, fri)`.
pub type RowTuple = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// One weekly time slot for one term, validated for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub term: Term,
    pub time_slot: String,
    pub days: [Option<String>; 5],
}

impl ScheduleRow {
    /// Validate a parser tuple against the batch term.
    ///
    /// `index` is the tuple's position in its batch and is only used for
    /// error reporting.
    pub fn from_tuple(term: &Term, index: usize, tuple: &RowTuple) -> Result<Self> {
        let (row_term, time_slot, mon, tue, wed, thu, fri) = tuple;

        if row_term != term.as_str() {
            return Err(StoreError::invalid_row(
                index,
                format!("term '{row_term}' does not match batch term '{term}'"),
            ));
        }

        // part of the row identity: stored exactly as given
        if time_slot.trim().is_empty() {
            return Err(StoreError::invalid_row(index, "time slot is empty"));
        }
        if time_slot.chars().count() > MAX_TIME_SLOT_LEN {
            return Err(StoreError::invalid_row(
                index,
                format!("time slot '{time_slot}' exceeds {MAX_TIME_SLOT_LEN} characters"),
            ));
        }

        let days = [mon, tue, wed, thu, fri].map(Clone::clone);
        for (day, label) in Weekday::ALL.iter().zip(&days) {
            if let Some(label) = label {
                if label.chars().count() > MAX_LABEL_LEN {
                    return Err(StoreError::invalid_row(
                        index,
                        format!("{} exceeds {MAX_LABEL_LEN} characters", day.column()),
                    ));
                }
            }
        }

        Ok(Self {
            term: term.clone(),
            time_slot: time_slot.clone(),
            days,
        })
    }

    pub fn day(&self, day: Weekday) -> Option<&str> {
        self.days[day as usize].as_deref()
    }
}

/// Validate a whole batch; one bad row rejects the batch.
pub fn validate_batch(term: &Term, rows: &[RowTuple]) -> Result<Vec<ScheduleRow>> {
    rows.iter()
        .enumerate()
        .map(|(index, tuple)| ScheduleRow::from_tuple(term, index, tuple))
        .collect()
}

/// Row as persisted, timestamps included
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StoredRow {
    pub term: String,
    pub time_slot: String,
    pub monday: Option<String>,
    pub tuesday: Option<String>,
    pub wednesday: Option<String>,
    pub thursday: Option<String>,
    pub friday: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

/// One line of the course frequency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseCount {
    pub label: String,
    pub count: i64,
}

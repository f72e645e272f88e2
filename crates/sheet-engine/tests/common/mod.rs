#![allow(dead_code)]

use chrono::{DateTime, Local, TimeZone};
use sheet_engine::functions::{Clock, RandomSource};
use sheet_engine::{CellValue, Spreadsheet};

/// Deterministic clock for `NOW`/`TODAY`.
pub struct FixedClock(pub DateTime<Local>);

impl FixedClock {
    pub fn at_millis(ms: i64) -> Self {
        Self(Local.timestamp_millis_opt(ms).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Deterministic random source for `RAND`: yields the scripted values in
/// order, cycling at the end.
pub struct ScriptedRandom {
    values: Vec<f64>,
    index: usize,
}

impl ScriptedRandom {
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty());
        Self { values, index: 0 }
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        let value = self.values[self.index % self.values.len()];
        self.index += 1;
        value
    }
}

/// A spreadsheet with `Sheet1` already defined.
pub fn sheet() -> Spreadsheet {
    let mut sheet = Spreadsheet::new();
    sheet.add_worksheet("Sheet1").unwrap();
    sheet
}

/// Like [`sheet`] but with injected time and randomness.
pub fn sheet_with(clock: FixedClock, rng: ScriptedRandom) -> Spreadsheet {
    let mut sheet = Spreadsheet::with_sources(Box::new(clock), Box::new(rng));
    sheet.add_worksheet("Sheet1").unwrap();
    sheet
}

/// Unwrap a numeric cell value.
pub fn number(value: &CellValue) -> f64 {
    match value {
        CellValue::Number(n) => *n,
        other => panic!("expected a number, got {other:?}"),
    }
}

/// Fetch and unwrap a numeric cell.
pub fn get_number(sheet: &Spreadsheet, address: &str) -> f64 {
    number(&sheet.get(address).unwrap())
}

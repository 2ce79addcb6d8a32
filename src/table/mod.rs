use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One row of a `/fetch_data` result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRow")]
pub struct ResultRow {
    pub country: String,
    pub date: String,
    pub value: f64,
}

/// Wire shape of a row. The backend has shipped both `COUNTRY/DATE/VALUE`
/// and lowercase keys, and values sometimes arrive pre-formatted as strings.
#[derive(Deserialize)]
struct RawRow {
    #[serde(alias = "COUNTRY")]
    country: String,
    #[serde(alias = "DATE")]
    date: Scalar,
    #[serde(alias = "VALUE", default)]
    value: Option<Scalar>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        }
    }

    fn into_number(self) -> f64 {
        match self {
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
            Scalar::Text(s) => parse_numeric(&s),
        }
    }
}

impl From<RawRow> for ResultRow {
    fn from(raw: RawRow) -> Self {
        Self {
            country: raw.country,
            date: raw.date.into_text(),
            value: raw.value.map(Scalar::into_number).unwrap_or(f64::NAN),
        }
    }
}

impl ResultRow {
    /// Leading four-digit year of `date`, if it has one
    pub fn year(&self) -> Option<i32> {
        self.date.get(..4).and_then(|y| y.parse().ok())
    }
}

/// Parse a display string such as `"1,234.50"` into a number.
/// Everything except digits, `.` and `-` is dropped first; NaN on failure.
pub fn parse_numeric(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().unwrap_or(f64::NAN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortColumn {
    Country,
    Date,
    Value,
}

impl SortColumn {
    pub const ALL: [SortColumn; 3] = [SortColumn::Country, SortColumn::Date, SortColumn::Value];

    pub fn title(self) -> &'static str {
        match self {
            SortColumn::Country => "Country",
            SortColumn::Date => "Date",
            SortColumn::Value => "Value",
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    fn compare(self, a: &ResultRow, b: &ResultRow) -> Ordering {
        match self {
            SortColumn::Country => a.country.cmp(&b.country),
            SortColumn::Date => a.date.cmp(&b.date),
            SortColumn::Value => a.value.total_cmp(&b.value),
        }
    }
}

/// Sort rows by one column. Numeric for `Value`, lexicographic otherwise.
/// The sort is stable, so equal keys keep their incoming order.
pub fn sort_rows(mut rows: Vec<ResultRow>, column: SortColumn, ascending: bool) -> Vec<ResultRow> {
    rows.sort_by(|a, b| {
        let ord = column.compare(a, b);
        if ascending { ord } else { ord.reverse() }
    });
    rows
}

/// Header click state: first click on a column sorts ascending,
/// repeated clicks on the same column flip direction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SortState {
    active: Option<(SortColumn, bool)>,
}

impl SortState {
    pub fn click(&mut self, column: SortColumn) -> (SortColumn, bool) {
        let ascending = match self.active {
            Some((current, asc)) if current == column => !asc,
            _ => true,
        };
        self.active = Some((column, ascending));
        (column, ascending)
    }

    pub fn active(&self) -> Option<(SortColumn, bool)> {
        self.active
    }

    pub fn reset(&mut self) {
        self.active = None;
    }

    /// Arrow shown next to a header title
    pub fn arrow(&self, column: SortColumn) -> &'static str {
        match self.active {
            Some((current, true)) if current == column => " ↑",
            Some((current, false)) if current == column => " ↓",
            _ => "",
        }
    }
}

/// Rows currently on screen plus the header sort state
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
    sort: SortState,
}

impl ResultTable {
    /// Replace the whole table with a fresh result set in backend order
    pub fn replace(&mut self, rows: Vec<ResultRow>) {
        self.rows = rows;
        self.sort.reset();
    }

    pub fn click_header(&mut self, column: SortColumn) {
        let (column, ascending) = self.sort.click(column);
        let rows = std::mem::take(&mut self.rows);
        self.rows = sort_rows(rows, column, ascending);
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn sort_state(&self) -> &SortState {
        &self.sort
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Format a value en-US style with two decimals, e.g. `1,234,567.89`
pub fn format_value(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }

    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let chars: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    for (i, ch) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

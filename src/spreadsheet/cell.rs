use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt::Display;

/// Types of raw cell data found in spreadsheet files.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CellType {
    #[default]
    Empty,
    /// Boolean values (true/false)
    Boolean,
    /// Numeric values
    Number,
    /// Date/time values stored as numbers from 1900 epoch
    NumberDateTime1900,
    /// Date values stored as numbers from 1900 epoch
    NumberDate1900,
    /// Time values stored as numbers from 1900 epoch
    NumberTime1900,
    /// Date/time values stored as numbers from 1904 epoch
    NumberDateTime1904,
    /// Date values stored as numbers from 1904 epoch
    NumberDate1904,
    /// Time values stored as numbers from 1904 epoch
    NumberTime1904,
    /// ISO 8601 date/time strings
    IsoDateTime,
    /// Inline string values (also used for delimited text)
    InlineString,
    /// Error values such as `#N/A`
    Error,
}

impl CellType {
    /// Parses built-in Excel number format IDs to determine cell type.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "22" => Some(if is_1904 { Self::NumberDateTime1904 } else { Self::NumberDateTime1900 }),
            "14" | "15" | "16" | "17" => Some(if is_1904 { Self::NumberDate1904 } else { Self::NumberDate1900 }),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(if is_1904 { Self::NumberTime1904 } else { Self::NumberTime1900 }),
            _ => None,
        }
    }

    /// Parses custom number format strings to determine cell type.
    /// Analyzes format codes for date/time patterns.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_date = false;
        let mut is_time = false;
        let mut is_color = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_color => is_literal = true,

                ']' if is_color => is_color = false,
                '[' if !is_literal => is_color = true,
                _ if is_literal || is_color => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }

        match (is_date, is_time, is_1904) {
            (true, true, false) => Self::NumberDateTime1900,
            (true, true, true) => Self::NumberDateTime1904,
            (true, false, false) => Self::NumberDate1900,
            (true, false, true) => Self::NumberDate1904,
            (false, true, false) => Self::NumberTime1900,
            (false, true, true) => Self::NumberTime1904,
            (false, false, _) => Self::Number,
        }
    }

    const fn is_1904(&self) -> bool {
        matches!(self, Self::NumberDateTime1904 | Self::NumberDate1904 | Self::NumberTime1904)
    }
}

/// A raw cell as read from the source file, before interpretation.
#[derive(Clone, Debug)]
pub(crate) struct Cell {
    /// Row index (0-based)
    pub(crate) row: usize,
    /// Column index (0-based)
    pub(crate) col: usize,
    /// Cell data type
    pub(crate) kind: CellType,
    /// Cell value as string
    pub(crate) value: String,
}

impl Cell {
    /// Interprets the raw value according to its type.
    ///
    /// Values that cannot be converted to their declared type are kept as text
    /// rather than rejected.
    pub(crate) fn to_value(&self) -> CellValue {
        let fallback = || CellValue::Text(self.value.to_owned());
        match self.kind {
            CellType::Empty => CellValue::Empty,
            CellType::Boolean => CellValue::Bool(self.value == "1" || self.value.eq_ignore_ascii_case("true")),
            CellType::Number => parse_number(&self.value).unwrap_or_else(fallback),
            CellType::NumberDate1900 | CellType::NumberDate1904 => self
                .to_serial()
                .and_then(|serial| serial_to_datetime(serial, self.kind.is_1904()))
                .map(|datetime| CellValue::Date(datetime.date()))
                .unwrap_or_else(fallback),
            CellType::NumberDateTime1900 | CellType::NumberDateTime1904 => self
                .to_serial()
                .and_then(|serial| serial_to_datetime(serial, self.kind.is_1904()))
                .map(CellValue::DateTime)
                .unwrap_or_else(fallback),
            CellType::NumberTime1900 | CellType::NumberTime1904 => self
                .to_serial()
                .and_then(serial_to_time)
                .map(CellValue::Time)
                .unwrap_or_else(fallback),
            CellType::IsoDateTime => parse_iso_datetime(&self.value).unwrap_or_else(fallback),
            CellType::InlineString | CellType::Error => {
                if self.value.is_empty() {
                    CellValue::Empty
                } else {
                    fallback()
                }
            }
        }
    }

    fn to_serial(&self) -> Option<f64> {
        self.value.trim().parse::<f64>().ok().filter(|serial| serial.is_finite())
    }
}

/// An interpreted cell value as seen by detectors, transforms and the writer.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl CellValue {
    /// Returns true for missing cells and whitespace-only text.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// Returns true for numbers, booleans and temporal values.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Date(_) | Self::DateTime(_) | Self::Time(_)
        )
    }

    /// Returns the text of a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the numeric value of `Int`/`Float` values and of text that parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Text(text) => text.trim().parse::<f64>().ok().filter(|value| value.is_finite()),
            _ => None,
        }
    }

    /// Renders the value as display text (empty string for `Empty`).
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Empty => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Text(value) => write!(f, "{}", value),
            Self::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            Self::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
            Self::Time(value) => write!(f, "{}", value.format("%H:%M:%S")),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Parses a numeric literal, keeping integral values as `Int`.
pub(crate) fn parse_number(value: &str) -> Option<CellValue> {
    let value = value.trim();
    if let Ok(integer) = value.parse::<i64>() {
        return Some(CellValue::Int(integer));
    }
    let number = value.parse::<f64>().ok().filter(|number| number.is_finite())?;
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        Some(CellValue::Int(number as i64))
    } else {
        Some(CellValue::Float(number))
    }
}

/// Returns true when a text literal is safe to read as a number
/// (no leading zeros, signs or surrounding spaces that would be lost).
pub(crate) fn looks_numeric(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    !value.is_empty()
        && value.trim() == value
        && !value.starts_with('+')
        && !leading_zero
        && value.parse::<f64>().map(|number| number.is_finite()).unwrap_or(false)
}

/// Parses ISO 8601 dates and date-times stored with the `d` cell type.
fn parse_iso_datetime(value: &str) -> Option<CellValue> {
    if value.contains('T') {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(CellValue::DateTime)
    } else {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").ok().map(CellValue::Date)
    }
}

/// Start of the 1900 date system (Lotus 1-2-3 leap year bug included below)
fn excel_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).expect("NaiveDate Literal")
}

/// Converts an Excel serial number to a date-time.
pub(crate) fn serial_to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    let days = serial.trunc() as i64;
    let offset = if is_1904 {
        1462
    } else if days < 60 {
        1
    } else {
        0
    };
    let date = excel_epoch().checked_add_signed(Duration::days(days + offset))?;
    let time = serial_to_time(serial.fract())?;
    Some(date.and_time(time))
}

/// Converts the fractional part of a serial number to a time of day.
pub(crate) fn serial_to_time(serial: f64) -> Option<NaiveTime> {
    let milliseconds = (serial.fract().abs() * 86_400_000f64).round() as i64;
    let milliseconds = milliseconds.min(86_399_999);
    NaiveTime::from_hms_opt(0, 0, 0)?.overflowing_add_signed(Duration::milliseconds(milliseconds)).0.into()
}

/// Converts a date-time to an Excel serial number in the 1900 date system.
pub(crate) fn datetime_to_serial(datetime: &NaiveDateTime) -> f64 {
    date_to_serial(&datetime.date()) + time_to_serial(&datetime.time())
}

/// Converts a date to an Excel serial number in the 1900 date system.
pub(crate) fn date_to_serial(date: &NaiveDate) -> f64 {
    let days = date.signed_duration_since(excel_epoch()).num_days();
    (if days < 61 { days - 1 } else { days }) as f64
}

/// Converts a time of day to the fraction of a day.
pub(crate) fn time_to_serial(time: &NaiveTime) -> f64 {
    let since_midnight = time.signed_duration_since(NaiveTime::MIN);
    since_midnight.num_milliseconds() as f64 / 86_400_000f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(kind: CellType, value: &str) -> Cell {
        Cell { row: 0, col: 0, kind, value: value.to_owned() }
    }

    #[test]
    fn number_cells_keep_integers() {
        assert_eq!(cell(CellType::Number, "42").to_value(), CellValue::Int(42));
        assert_eq!(cell(CellType::Number, "42.0").to_value(), CellValue::Int(42));
        assert_eq!(cell(CellType::Number, "4.5").to_value(), CellValue::Float(4.5));
        assert_eq!(cell(CellType::Number, "n/a").to_value(), CellValue::Text("n/a".to_owned()));
    }

    #[test]
    fn date_cells_follow_excel_epochs() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(cell(CellType::NumberDate1900, "45366").to_value(), CellValue::Date(expected));
        assert_eq!(cell(CellType::NumberDate1904, "43904").to_value(), CellValue::Date(expected));
        assert_eq!(cell(CellType::NumberDate1900, "1").to_value(),
                   CellValue::Date(NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()));
    }

    #[test]
    fn datetime_serial_round_trip() {
        let datetime = NaiveDate::from_ymd_opt(2023, 11, 2).unwrap().and_hms_opt(13, 30, 0).unwrap();
        let serial = datetime_to_serial(&datetime);
        assert_eq!(serial_to_datetime(serial, false), Some(datetime));

        let early = NaiveDate::from_ymd_opt(1900, 2, 28).unwrap();
        assert_eq!(date_to_serial(&early), 59.0);
        assert_eq!(serial_to_datetime(59.0, false).map(|it| it.date()), Some(early));
    }

    #[test]
    fn custom_formats() {
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd", false), CellType::NumberDate1900);
        assert_eq!(CellType::parse_custom_number_format("hh:mm", true), CellType::NumberTime1904);
        assert_eq!(CellType::parse_custom_number_format("\"Day\" 0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("[Red]0.00", false), CellType::Number);
    }

    #[test]
    fn numeric_literals() {
        assert!(looks_numeric("42"));
        assert!(looks_numeric("-3.5"));
        assert!(looks_numeric("0.25"));
        assert!(!looks_numeric("007"));
        assert!(!looks_numeric("+1"));
        assert!(!looks_numeric(" 1"));
        assert!(!looks_numeric("abc"));
    }
}

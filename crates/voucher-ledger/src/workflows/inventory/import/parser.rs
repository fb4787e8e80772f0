use super::normalizer::{normalize_code, normalize_header};
use super::ImportError;
use crate::workflows::domain::ResourceStatus;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::io::Read;

pub(crate) const CODE_COLUMN: &str = "coupon code";
pub(crate) const EXPIRES_COLUMN: &str = "expiration date";
pub(crate) const SENT_COLUMN: &str = "date sent";
pub(crate) const STATUS_COLUMN: &str = "coupon status";

const REQUIRED_COLUMNS: [&str; 4] = [CODE_COLUMN, EXPIRES_COLUMN, SENT_COLUMN, STATUS_COLUMN];

/// Accepted date layouts, tried in order.
const DATE_FORMATS: [&str; 2] = ["%Y/%m/%d %H:%M:%S", "%Y/%m/%d %H:%M"];

#[derive(Debug)]
pub(crate) struct InventoryRow {
    pub(crate) code: String,
    pub(crate) status: ResourceStatus,
    pub(crate) sent_at: Option<DateTime<Utc>>,
    pub(crate) expires_at: Option<DateTime<Utc>>,
}

struct ColumnIndex {
    code: usize,
    expires: usize,
    sent: usize,
    status: usize,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ImportError> {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        if normalized.iter().all(|header| header.is_empty()) {
            return Err(ImportError::MissingHeader);
        }

        let position = |name: &str| normalized.iter().position(|header| header == name);
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|column| position(column).is_none())
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns(missing));
        }

        Ok(Self {
            code: position(CODE_COLUMN).unwrap_or_default(),
            expires: position(EXPIRES_COLUMN).unwrap_or_default(),
            sent: position(SENT_COLUMN).unwrap_or_default(),
            status: position(STATUS_COLUMN).unwrap_or_default(),
        })
    }
}

/// Reads every data row up front so a bad date aborts before anything is written.
pub(crate) fn parse_rows<R: Read>(reader: R) -> Result<Vec<InventoryRow>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let columns = ColumnIndex::from_headers(csv_reader.headers()?)?;
    let mut rows = Vec::new();

    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |position| position.line());
        let field = |index: usize| record.get(index).unwrap_or("");

        // Dates are checked even on rows that end up skipped.
        let sent_at = parse_datetime(field(columns.sent), SENT_COLUMN, line)?;
        let expires_at = parse_datetime(field(columns.expires), EXPIRES_COLUMN, line)?;
        let code = normalize_code(field(columns.code));
        if code.is_empty() {
            continue;
        }

        rows.push(InventoryRow {
            code,
            status: map_status(field(columns.status)),
            sent_at,
            expires_at,
        });
    }

    Ok(rows)
}

/// Maps the provider's status vocabulary; anything unrecognised is treated as available.
pub(crate) fn map_status(raw: &str) -> ResourceStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "reserved" | "allocated" => ResourceStatus::Reserved,
        "sent" | "issued" | "distributed" => ResourceStatus::Sent,
        "redeemed" | "used" => ResourceStatus::Redeemed,
        "expired" => ResourceStatus::Expired,
        "disabled" | "void" | "voided" | "cancelled" | "canceled" => ResourceStatus::Disabled,
        _ => ResourceStatus::Available,
    }
}

fn parse_datetime(
    value: &str,
    column: &'static str,
    line: u64,
) -> Result<Option<DateTime<Utc>>, ImportError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| Some(Utc.from_utc_datetime(&naive)))
        .ok_or_else(|| ImportError::InvalidDate {
            line,
            column,
            value: trimmed.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn date_formats_are_tried_in_order() {
        let full = parse_datetime("2025/09/24 10:15:30", EXPIRES_COLUMN, 2)
            .expect("seconds format")
            .expect("date present");
        assert_eq!(full, Utc.with_ymd_and_hms(2025, 9, 24, 10, 15, 30).unwrap());

        let short = parse_datetime("2025/09/24 10:15", EXPIRES_COLUMN, 2)
            .expect("minutes format")
            .expect("date present");
        assert_eq!(short, Utc.with_ymd_and_hms(2025, 9, 24, 10, 15, 0).unwrap());

        assert!(parse_datetime("  ", EXPIRES_COLUMN, 2).unwrap().is_none());
        assert!(matches!(
            parse_datetime("2025-09-24", EXPIRES_COLUMN, 7),
            Err(ImportError::InvalidDate { line: 7, .. })
        ));
    }

    #[test]
    fn status_vocabulary_is_case_insensitive() {
        assert_eq!(map_status("REDEEMED"), ResourceStatus::Redeemed);
        assert_eq!(map_status(" Sent "), ResourceStatus::Sent);
        assert_eq!(map_status(""), ResourceStatus::Available);
        assert_eq!(map_status("mystery"), ResourceStatus::Available);
    }

    #[test]
    fn headers_are_matched_after_normalization() {
        let csv = "\u{feff}Coupon Code,EXPIRATION DATE, Date Sent ,Coupon Status\nACC1,,,\n";
        let rows = parse_rows(Cursor::new(csv)).expect("headers accepted");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "ACC1");
        assert_eq!(rows[0].status, ResourceStatus::Available);
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(matches!(
            parse_rows(Cursor::new("")),
            Err(ImportError::MissingHeader)
        ));
    }

    #[test]
    fn missing_columns_are_reported_by_name() {
        match parse_rows(Cursor::new("Coupon Code,Coupon Status\nACC1,available\n")) {
            Err(ImportError::MissingColumns(columns)) => {
                assert_eq!(columns, vec![EXPIRES_COLUMN, SENT_COLUMN]);
            }
            other => panic!("expected missing columns, got {other:?}"),
        }
    }

    #[test]
    fn blank_codes_are_skipped() {
        let csv = "coupon code,expiration date,date sent,coupon status\n,,,\nACC2,,,sent\n";
        let rows = parse_rows(Cursor::new(csv)).expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ResourceStatus::Sent);
    }

    #[test]
    fn bad_date_on_a_blank_code_row_still_aborts() {
        let csv = "coupon code,expiration date,date sent,coupon status
ACC1,,,
 ,tomorrow,,
";
        assert!(matches!(
            parse_rows(Cursor::new(csv)),
            Err(ImportError::InvalidDate { line: 3, column: EXPIRES_COLUMN, .. })
        ));
    }
}

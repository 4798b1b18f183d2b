//! Fee source readers.
//!
//! Each origin is a CSV file with a header row. Records are first read as
//! loose strings, then converted into typed rows; a record that fails
//! conversion becomes a [`RowError`] and reading carries on.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{
    AdjustmentRow, BillingMonth, Category, MaterialRow, MembershipRow, RowError, UnitCode,
};
use crate::money::Yen;
use crate::settlement::FeeSources;

pub const MEMBERSHIP_FILE: &str = "membership.csv";
pub const MATERIAL_FILE: &str = "material.csv";
pub const ADJUSTMENT_FILE: &str = "adjustment.csv";

/// Rows read from one source plus the records that were rejected.
#[derive(Debug)]
pub struct SourceBatch<T> {
    pub rows: Vec<T>,
    pub errors: Vec<RejectedRow>,
}

/// A record that failed conversion, tagged with the unit and month it names
/// when those cells still parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub unit_code: Option<UnitCode>,
    pub billing_month: Option<BillingMonth>,
    pub error: RowError,
}

impl RejectedRow {
    /// Whether this rejection may concern `unit` in `month`. Records whose
    /// unit or month cannot be read are attributed to everyone.
    pub fn concerns(&self, unit: &UnitCode, month: BillingMonth) -> bool {
        self.unit_code.as_ref().map_or(true, |u| u == unit)
            && self.billing_month.map_or(true, |m| m == month)
    }
}

#[derive(Debug, Deserialize)]
struct RawMembership {
    unit_code: String,
    billing_month: String,
    #[serde(default)]
    description: Option<String>,
    quantity: String,
    unit_price: String,
    #[serde(default)]
    excluded: Option<String>,
    #[serde(default)]
    bank_transfer: Option<String>,
    #[serde(default)]
    aigran: Option<String>,
    #[serde(default)]
    taxable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMaterial {
    unit_code: String,
    billing_month: String,
    #[serde(default)]
    description: Option<String>,
    quantity: String,
    unit_price: String,
    #[serde(default)]
    destination_code: Option<String>,
    #[serde(default)]
    taxable: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAdjustment {
    unit_code: String,
    billing_month: String,
    description: String,
    amount: String,
    #[serde(default)]
    taxable: Option<String>,
}

/// Parse a whole-yen or count field; thousands separators are allowed.
pub(crate) fn parse_int(field: &str, value: &str) -> std::result::Result<i64, String> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Err(format!("{field} is empty"));
    }
    cleaned
        .parse::<Yen>()
        .map_err(|_| format!("{field} '{}' is not a whole number", value.trim()))
}

/// Parse a yes/no cell; an empty or missing cell yields `default`.
pub(crate) fn parse_flag(
    field: &str,
    value: Option<&str>,
    default: bool,
) -> std::result::Result<bool, String> {
    match value.map(str::trim).unwrap_or("") {
        "" => Ok(default),
        v if ["1", "true", "yes", "y"].iter().any(|t| v.eq_ignore_ascii_case(t)) => Ok(true),
        v if ["0", "false", "no", "n"].iter().any(|t| v.eq_ignore_ascii_case(t)) => Ok(false),
        v => Err(format!("{field} '{v}' is not a yes/no value")),
    }
}

pub(crate) fn parse_unit(value: &str) -> std::result::Result<UnitCode, String> {
    value.parse().map_err(|_| "unit_code is missing".to_string())
}

pub(crate) fn parse_month(value: &str) -> std::result::Result<BillingMonth, String> {
    value
        .parse()
        .map_err(|_| format!("billing_month '{}' is not YYYY-MM", value.trim()))
}

fn non_empty(field: &str, value: Option<String>) -> std::result::Result<String, String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("{field} is missing")),
    }
}

fn convert_membership(raw: RawMembership, line: usize) -> std::result::Result<MembershipRow, String> {
    Ok(MembershipRow {
        line,
        unit_code: parse_unit(&raw.unit_code)?,
        billing_month: parse_month(&raw.billing_month)?,
        description: raw
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "Membership fee".to_string()),
        quantity: parse_int("quantity", &raw.quantity)?,
        unit_price: parse_int("unit_price", &raw.unit_price)?,
        excluded: parse_flag("excluded", raw.excluded.as_deref(), false)?,
        bank_transfer: parse_flag("bank_transfer", raw.bank_transfer.as_deref(), false)?,
        aigran: parse_flag("aigran", raw.aigran.as_deref(), false)?,
        taxable: parse_flag("taxable", raw.taxable.as_deref(), true)?,
    })
}

fn convert_material(raw: RawMaterial, line: usize) -> std::result::Result<MaterialRow, String> {
    Ok(MaterialRow {
        line,
        unit_code: parse_unit(&raw.unit_code)?,
        billing_month: parse_month(&raw.billing_month)?,
        description: non_empty("description", raw.description)?,
        quantity: parse_int("quantity", &raw.quantity)?,
        unit_price: parse_int("unit_price", &raw.unit_price)?,
        destination_code: raw.destination_code.unwrap_or_default().trim().to_string(),
        taxable: parse_flag("taxable", raw.taxable.as_deref(), true)?,
    })
}

fn convert_adjustment(raw: RawAdjustment, line: usize) -> std::result::Result<AdjustmentRow, String> {
    Ok(AdjustmentRow {
        line,
        unit_code: parse_unit(&raw.unit_code)?,
        billing_month: parse_month(&raw.billing_month)?,
        description: non_empty("description", Some(raw.description))?,
        amount: parse_int("amount", &raw.amount)?,
        taxable: parse_flag("taxable", raw.taxable.as_deref(), false)?,
    })
}

/// Read every record of a CSV source, converting each with `convert`.
///
/// Only I/O failures abort; malformed records are collected as row errors.
pub(crate) fn read_csv<R, Raw, T, F>(reader: R, category: Category, convert: F) -> Result<SourceBatch<T>>
where
    R: Read,
    Raw: DeserializeOwned,
    F: Fn(Raw, usize) -> std::result::Result<T, String>,
{
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    let unit_col = headers.iter().position(|h| h == "unit_code");
    let month_col = headers.iter().position(|h| h == "billing_month");

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for result in rdr.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
                errors.push(RejectedRow {
                    unit_code: None,
                    billing_month: None,
                    error: RowError::new(category, line, e.to_string()),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let converted = record
            .deserialize::<Raw>(Some(&headers))
            .map_err(|e| e.to_string())
            .and_then(|raw| convert(raw, line));
        match converted {
            Ok(row) => rows.push(row),
            Err(message) => {
                let error = RowError::new(category, line, message);
                warn!(%error, "rejected source row");
                let cell = |col: Option<usize>| col.and_then(|i| record.get(i));
                errors.push(RejectedRow {
                    unit_code: cell(unit_col).and_then(|v| parse_unit(v).ok()),
                    billing_month: cell(month_col).and_then(|v| parse_month(v).ok()),
                    error,
                });
            }
        }
    }

    debug!(%category, rows = rows.len(), errors = errors.len(), "read source");
    Ok(SourceBatch { rows, errors })
}

pub fn read_membership<R: Read>(reader: R) -> Result<SourceBatch<MembershipRow>> {
    read_csv(reader, Category::Membership, convert_membership)
}

pub fn read_material<R: Read>(reader: R) -> Result<SourceBatch<MaterialRow>> {
    read_csv(reader, Category::Material, convert_material)
}

pub fn read_adjustment<R: Read>(reader: R) -> Result<SourceBatch<AdjustmentRow>> {
    read_csv(reader, Category::Adjustment, convert_adjustment)
}

/// All rows loaded from a sources directory, across every unit and month.
#[derive(Debug, Default)]
pub struct SourceSet {
    pub membership: Vec<MembershipRow>,
    pub material: Vec<MaterialRow>,
    pub adjustment: Vec<AdjustmentRow>,
    pub errors: Vec<RejectedRow>,
}

impl SourceSet {
    /// Load the CSV files in `dir`; a missing file counts as an empty source.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut set = SourceSet::default();

        if let Some(file) = open_optional(&dir.join(MEMBERSHIP_FILE))? {
            let batch = read_membership(file)?;
            set.membership = batch.rows;
            set.errors.extend(batch.errors);
        }
        if let Some(file) = open_optional(&dir.join(MATERIAL_FILE))? {
            let batch = read_material(file)?;
            set.material = batch.rows;
            set.errors.extend(batch.errors);
        }
        if let Some(file) = open_optional(&dir.join(ADJUSTMENT_FILE))? {
            let batch = read_adjustment(file)?;
            set.adjustment = batch.rows;
            set.errors.extend(batch.errors);
        }

        Ok(set)
    }

    /// Rejected records that may belong to `unit` in `month`.
    pub fn errors_for(&self, unit: &UnitCode, month: BillingMonth) -> Vec<RowError> {
        self.errors
            .iter()
            .filter(|r| r.concerns(unit, month))
            .map(|r| r.error.clone())
            .collect()
    }

    /// Rows for one unit and month, in source order. Expenses come from the ledger.
    pub fn for_unit(&self, unit: &UnitCode, month: BillingMonth) -> FeeSources {
        FeeSources {
            membership: self
                .membership
                .iter()
                .filter(|r| &r.unit_code == unit && r.billing_month == month)
                .cloned()
                .collect(),
            material: self
                .material
                .iter()
                .filter(|r| &r.unit_code == unit && r.billing_month == month)
                .cloned()
                .collect(),
            expense: Vec::new(),
            adjustment: self
                .adjustment
                .iter()
                .filter(|r| &r.unit_code == unit && r.billing_month == month)
                .cloned()
                .collect(),
        }
    }
}

fn open_optional(path: &Path) -> Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMBERSHIP: &str = "\
unit_code,billing_month,description,quantity,unit_price,excluded,bank_transfer,aigran,taxable
1110001,2025-11,Kids class,10,550,false,false,,
1110001,2025-11,Kids class,5,550,true,false,,
1110001,2025-11,Adult class,ten,550,,,,
1110002,2025-13,Adult class,1,550,,,,
1110001,2025-11,Adult class,\"1,200\",1,yes,no,1,0
";

    #[test]
    fn reads_membership_and_collects_row_errors() {
        let batch = read_membership(MEMBERSHIP.as_bytes()).unwrap();
        assert_eq!(batch.rows.len(), 3);
        assert_eq!(batch.rows[0].quantity, 10);
        assert!(batch.rows[1].excluded);
        assert!(batch.rows[0].taxable);

        let last = &batch.rows[2];
        assert_eq!(last.quantity, 1200);
        assert!(last.excluded && last.aigran && !last.taxable);
        assert_eq!(last.line, 6);

        assert_eq!(batch.errors.len(), 2);
        assert_eq!(batch.errors[0].error.line, 4);
        assert!(batch.errors[0].error.message.contains("quantity 'ten'"));
        assert_eq!(batch.errors[0].unit_code, Some("1110001".parse().unwrap()));
        assert!(batch.errors[1].error.message.contains("billing_month"));
        assert_eq!(batch.errors[1].billing_month, None);
    }

    #[test]
    fn material_requires_description() {
        let csv = "\
unit_code,billing_month,description,quantity,unit_price,destination_code
1110001,2025-11,Textbook A,3,1200,HQ
1110001,2025-11,,3,1200,
";
        let batch = read_material(csv.as_bytes()).unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].destination_code, "HQ");
        assert!(batch.errors[0].error.message.contains("description is missing"));
    }

    #[test]
    fn adjustment_amount_may_be_negative() {
        let csv = "unit_code,billing_month,description,amount,taxable\n1110001,2025-11,Refund,-3000,\n";
        let batch = read_adjustment(csv.as_bytes()).unwrap();
        assert_eq!(batch.rows[0].amount, -3000);
        assert!(!batch.rows[0].taxable);
    }

    #[test]
    fn flags_reject_unknown_words() {
        assert_eq!(parse_flag("excluded", Some(" YES "), false), Ok(true));
        assert_eq!(parse_flag("excluded", None, true), Ok(true));
        assert!(parse_flag("excluded", Some("maybe"), false).is_err());
    }

    #[test]
    fn filters_to_one_unit_and_month() {
        let set = SourceSet {
            membership: read_membership(MEMBERSHIP.as_bytes()).unwrap().rows,
            ..SourceSet::default()
        };
        let sources = set.for_unit(&"1110001".parse().unwrap(), "2025-11".parse().unwrap());
        assert_eq!(sources.membership.len(), 3);
        let other = set.for_unit(&"1110001".parse().unwrap(), "2025-10".parse().unwrap());
        assert!(other.membership.is_empty());
    }

    #[test]
    fn rejected_rows_are_attributed_to_their_unit() {
        let csv = "\
unit_code,billing_month,description,quantity,unit_price
1110001,2025-11,Kids class,ten,550
2220002,2025-11,Kids class,five,550
2220002,2025-10,Kids class,six,550
,2025-11,Kids class,1,550
";
        let set = SourceSet {
            errors: read_membership(csv.as_bytes()).unwrap().errors,
            ..SourceSet::default()
        };
        let month: BillingMonth = "2025-11".parse().unwrap();

        let mine = set.errors_for(&"1110001".parse().unwrap(), month);
        assert_eq!(mine.iter().map(|e| e.line).collect::<Vec<_>>(), [2, 5]);

        let theirs = set.errors_for(&"2220002".parse().unwrap(), month);
        assert_eq!(theirs.iter().map(|e| e.line).collect::<Vec<_>>(), [3, 5]);
    }

    #[test]
    fn missing_files_are_empty_sources() {
        let dir = tempfile::TempDir::new().unwrap();
        let set = SourceSet::load_dir(dir.path()).unwrap();
        assert!(set.membership.is_empty() && set.errors.is_empty());
    }
}

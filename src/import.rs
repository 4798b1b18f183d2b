//! Batch import of manual expense records.
//!
//! Every record is validated on its own; valid rows are then written in
//! chunks. A failed chunk is reported and the import continues with the
//! next one, so a run can partially succeed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{BillingMonth, Category, ExpenseRow};
use crate::source::{parse_int, parse_month, parse_unit, read_csv};

/// Destination for validated expense rows.
pub trait ExpenseSink {
    /// Insert a chunk; on error none of the chunk is stored.
    fn insert_expenses(&mut self, chunk: &[ExpenseRow]) -> Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// The first `max_errors` messages.
    pub errors: Vec<String>,
    /// Messages left out of `errors`.
    pub suppressed: usize,
}

impl ImportReport {
    fn push_error(&mut self, message: String, max_errors: usize) {
        if self.errors.len() < max_errors {
            self.errors.push(message);
        } else {
            self.suppressed += 1;
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawExpense {
    unit_code: String,
    #[serde(default)]
    billing_month: Option<String>,
    date: String,
    #[serde(default)]
    description: Option<String>,
    amount: String,
    #[serde(default)]
    expense_type: Option<String>,
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .map_err(|_| format!("date '{value}' is not YYYY-MM-DD"))
}

fn convert_expense(raw: RawExpense, line: usize) -> std::result::Result<ExpenseRow, String> {
    let unit_code = parse_unit(&raw.unit_code)?;
    let date = parse_date(&raw.date)?;
    // Without an explicit billing month the expense belongs to its own month.
    let billing_month = match raw.billing_month.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => parse_month(m)?,
        _ => BillingMonth::of(date),
    };
    let description = raw
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| "description is missing".to_string())?;

    Ok(ExpenseRow {
        line,
        unit_code,
        billing_month,
        date,
        description,
        amount: parse_int("amount", &raw.amount)?,
        expense_type: raw.expense_type.unwrap_or_default().trim().to_string(),
    })
}

/// Validate expense CSV records and insert them through `sink` in chunks.
pub fn import_expenses<R, S>(
    reader: R,
    sink: &mut S,
    chunk_size: usize,
    max_errors: usize,
) -> Result<ImportReport>
where
    R: Read,
    S: ExpenseSink + ?Sized,
{
    let batch = read_csv(reader, Category::Expense, convert_expense)?;

    let mut report = ImportReport {
        total: batch.rows.len() + batch.errors.len(),
        failed: batch.errors.len(),
        ..ImportReport::default()
    };
    for rejected in &batch.errors {
        report.push_error(rejected.error.to_string(), max_errors);
    }

    for chunk in batch.rows.chunks(chunk_size.max(1)) {
        match sink.insert_expenses(chunk) {
            Ok(()) => report.succeeded += chunk.len(),
            Err(e) => {
                let first = chunk.first().map(|r| r.line).unwrap_or(0);
                let last = chunk.last().map(|r| r.line).unwrap_or(0);
                warn!(first, last, error = %e, "expense chunk rejected");
                report.failed += chunk.len();
                report.push_error(format!("rows {first}-{last}: {e}"), max_errors);
            }
        }
    }

    info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        "expense import finished"
    );
    Ok(report)
}

use chrono::NaiveDate;
use tracing::{info, warn};

use super::aggregate::{aggregate, previous_balance};
use super::calculate::calculate;
use super::classify::classify_all;
use super::versioning::{issue, InvoiceDraft, InvoiceId, InvoiceRecord, InvoiceStore};
use crate::config::{BillingConfig, DeductionRule};
use crate::error::Result;
use crate::model::{
    AdjustmentRow, BillingMonth, ExpenseRow, FeeSourceRow, MaterialRow, MembershipRow, RowError,
    UnitCode,
};

/// Source rows for one unit and month, as handed over by the data layer.
#[derive(Debug, Clone, Default)]
pub struct FeeSources {
    pub membership: Vec<MembershipRow>,
    pub material: Vec<MaterialRow>,
    pub expense: Vec<ExpenseRow>,
    pub adjustment: Vec<AdjustmentRow>,
}

impl FeeSources {
    /// All rows, membership first, then material, expense and adjustment.
    pub fn rows(&self) -> Vec<FeeSourceRow> {
        self.membership
            .iter()
            .cloned()
            .map(FeeSourceRow::Membership)
            .chain(self.material.iter().cloned().map(FeeSourceRow::Material))
            .chain(self.expense.iter().cloned().map(FeeSourceRow::Expense))
            .chain(self.adjustment.iter().cloned().map(FeeSourceRow::Adjustment))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
            && self.material.is_empty()
            && self.expense.is_empty()
            && self.adjustment.is_empty()
    }
}

/// An issued invoice plus what the run had to skip.
#[derive(Debug, Clone)]
pub struct GeneratedInvoice {
    pub record: InvoiceRecord,
    pub superseded: Option<InvoiceId>,
    pub row_errors: Vec<RowError>,
    /// Rows filtered out by business rule.
    pub dropped: usize,
}

/// Classify, aggregate, calculate and issue one unit's invoice.
///
/// Rows that fail classification, or that belong to another unit or month,
/// are reported in `row_errors` and left out of the totals.
pub fn generate_invoice<S: InvoiceStore + ?Sized>(
    store: &mut S,
    config: &BillingConfig,
    rule: &DeductionRule,
    unit: &UnitCode,
    month: BillingMonth,
    sources: &FeeSources,
    issue_date: NaiveDate,
) -> Result<GeneratedInvoice> {
    let mut rows: Vec<FeeSourceRow> = Vec::new();
    let mut row_errors: Vec<RowError> = Vec::new();
    for row in sources.rows() {
        if row.unit_code() == unit && row.billing_month() == month {
            rows.push(row);
        } else {
            row_errors.push(RowError::new(
                row.category(),
                row.line(),
                format!(
                    "belongs to unit {} / {}, not {unit} / {month}",
                    row.unit_code(),
                    row.billing_month()
                ),
            ));
        }
    }

    let classified = classify_all(&rows, config);
    row_errors.extend(classified.errors);

    let carry_in = previous_balance(&*store, unit, month)?;
    let agg = aggregate(unit.clone(), month, classified.lines, carry_in)?;
    let payment_received = store.payments_received(unit, month)?;
    let totals = calculate(&agg, config.tax_rate, rule, payment_received)?;

    let issued = issue(
        store,
        &config.number_format,
        InvoiceDraft {
            unit_code: unit.clone(),
            billing_month: month,
            issue_date,
            totals,
            lines: agg.lines,
        },
    )?;

    if !row_errors.is_empty() {
        warn!(
            unit = %unit,
            month = %month,
            errors = row_errors.len(),
            "invoice generated with skipped rows"
        );
    }

    Ok(GeneratedInvoice {
        record: issued.record,
        superseded: issued.superseded,
        row_errors,
        dropped: classified.dropped,
    })
}

/// One unit's work in a batch run.
#[derive(Debug, Clone)]
pub struct UnitJob {
    pub unit: UnitCode,
    pub rule: DeductionRule,
    pub sources: FeeSources,
}

/// Per-unit result of a batch run.
#[derive(Debug)]
pub struct UnitOutcome {
    pub unit: UnitCode,
    pub result: Result<GeneratedInvoice>,
}

/// Generate invoices for many units. Units are independent: a failure is
/// recorded in that unit's outcome and the batch moves on.
pub fn generate_all<S: InvoiceStore + ?Sized>(
    store: &mut S,
    config: &BillingConfig,
    jobs: Vec<UnitJob>,
    month: BillingMonth,
    issue_date: NaiveDate,
) -> Vec<UnitOutcome> {
    let outcomes: Vec<UnitOutcome> = jobs
        .into_iter()
        .map(|job| {
            let result = generate_invoice(
                store,
                config,
                &job.rule,
                &job.unit,
                month,
                &job.sources,
                issue_date,
            );
            if let Err(e) = &result {
                warn!(unit = %job.unit, month = %month, error = %e, "unit generation failed");
            }
            UnitOutcome {
                unit: job.unit,
                result,
            }
        })
        .collect();

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!(
        month = %month,
        units = outcomes.len(),
        failed,
        "batch generation finished"
    );
    outcomes
}

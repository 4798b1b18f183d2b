//! Invoice versioning per (unit, billing month).
//!
//! A unit/month moves from having no invoice, to one current invoice, to a
//! chain where every regeneration flips the previous current row to
//! superseded and inserts a new current row pointing back at it. Rows are
//! never overwritten in place and every version gets a fresh number.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use super::calculate::InvoiceTotals;
use crate::error::{Result, SettleError};
use crate::model::{BillingMonth, DetailLine, UnitCode};
use crate::money::Yen;

pub type InvoiceId = u64;

/// Delivery state set outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    Sent,
    Paid,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceStatus::Draft => write!(f, "DRAFT"),
            InvoiceStatus::Sent => write!(f, "SENT"),
            InvoiceStatus::Paid => write!(f, "PAID"),
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "paid" => Ok(InvoiceStatus::Paid),
            _ => Err(SettleError::InvalidStatus(s.to_string())),
        }
    }
}

/// One stored version of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: InvoiceId,
    pub number: String,
    pub sequence: u32,
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    pub issue_date: NaiveDate,
    pub is_current: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<InvoiceId>,
    #[serde(default)]
    pub status: InvoiceStatus,
    pub totals: InvoiceTotals,
    #[serde(default)]
    pub lines: Vec<DetailLine>,
}

/// Storage collaborator for invoice rows.
///
/// Implementations must make the read-modify-write in [`issue`] atomic per
/// (unit, month), either by holding `&mut self` for its duration or by a
/// uniqueness constraint on current rows.
pub trait InvoiceStore {
    /// All rows flagged current for the unit/month. More than one is a conflict.
    fn current_invoices(&self, unit: &UnitCode, month: BillingMonth) -> Result<Vec<InvoiceRecord>>;

    /// The current invoice of the latest month before `month`, if any.
    fn latest_current_before(
        &self,
        unit: &UnitCode,
        month: BillingMonth,
    ) -> Result<Option<InvoiceRecord>>;

    /// Highest sequence issued in `month`, 0 when none.
    fn max_sequence(&self, month: BillingMonth) -> Result<u32>;

    fn allocate_id(&mut self) -> Result<InvoiceId>;

    /// Clear the current flag on an existing row.
    fn supersede(&mut self, id: InvoiceId) -> Result<()>;

    fn insert(&mut self, record: InvoiceRecord) -> Result<()>;

    /// Sum of payments recorded against the unit/month.
    fn payments_received(&self, unit: &UnitCode, month: BillingMonth) -> Result<Yen>;
}

/// Computed invoice waiting for a number.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    pub issue_date: NaiveDate,
    pub totals: InvoiceTotals,
    pub lines: Vec<DetailLine>,
}

#[derive(Debug, Clone)]
pub struct Issued {
    pub record: InvoiceRecord,
    /// Row that was current before this one.
    pub superseded: Option<InvoiceId>,
}

/// Format invoice number from template
pub fn format_invoice_number(format: &str, month: BillingMonth, seq: u32) -> String {
    format
        .replace("{month}", &month.compact())
        .replace("{year}", &month.year().to_string())
        .replace("{seq:03}", &format!("{:03}", seq))
        .replace("{seq:04}", &format!("{:04}", seq))
        .replace("{seq:05}", &format!("{:05}", seq))
}

/// Sequence the next invoice in `month` will get.
pub fn next_sequence<S: InvoiceStore + ?Sized>(store: &S, month: BillingMonth) -> Result<u32> {
    store
        .max_sequence(month)?
        .checked_add(1)
        .ok_or(SettleError::Overflow("invoice sequence"))
}

/// Store a draft as the new current invoice for its unit/month.
pub fn issue<S: InvoiceStore + ?Sized>(
    store: &mut S,
    number_format: &str,
    draft: InvoiceDraft,
) -> Result<Issued> {
    let current = store.current_invoices(&draft.unit_code, draft.billing_month)?;
    if current.len() > 1 {
        return Err(SettleError::VersionConflict {
            unit: draft.unit_code,
            month: draft.billing_month,
            count: current.len(),
        });
    }
    let previous = current.into_iter().next();

    let sequence = next_sequence(&*store, draft.billing_month)?;
    let id = store.allocate_id()?;
    let number = format_invoice_number(number_format, draft.billing_month, sequence);

    if let Some(old) = &previous {
        store.supersede(old.id)?;
        info!(
            unit = %draft.unit_code,
            month = %draft.billing_month,
            superseded = %old.number,
            "superseding current invoice"
        );
    }

    let record = InvoiceRecord {
        id,
        number,
        sequence,
        unit_code: draft.unit_code,
        billing_month: draft.billing_month,
        issue_date: draft.issue_date,
        is_current: true,
        supersedes: previous.as_ref().map(|old| old.id),
        status: InvoiceStatus::Draft,
        totals: draft.totals,
        lines: draft.lines,
    };
    store.insert(record.clone())?;
    info!(
        number = %record.number,
        unit = %record.unit_code,
        month = %record.billing_month,
        total = record.totals.total_amount,
        "issued invoice"
    );

    Ok(Issued {
        record,
        superseded: previous.map(|old| old.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Ledger;

    fn month() -> BillingMonth {
        "2025-11".parse().unwrap()
    }

    fn draft(unit: &str, total: Yen) -> InvoiceDraft {
        InvoiceDraft {
            unit_code: unit.parse().unwrap(),
            billing_month: month(),
            issue_date: NaiveDate::from_ymd_opt(2025, 11, 25).unwrap(),
            totals: InvoiceTotals {
                subtotal: total,
                total_amount: total,
                payable_amount: total,
                remaining_balance: total,
                ..InvoiceTotals::default()
            },
            lines: Vec::new(),
        }
    }

    #[test]
    fn formats_number_placeholders() {
        assert_eq!(format_invoice_number("{month}-{seq:04}", month(), 7), "202511-0007");
        assert_eq!(format_invoice_number("INV-{year}-{seq:03}", month(), 12), "INV-2025-012");
        assert_eq!(format_invoice_number("{seq:05}", month(), 1), "00001");
    }

    #[test]
    fn first_issue_is_current_without_back_reference() {
        let mut ledger = Ledger::default();
        let issued = issue(&mut ledger, "{month}-{seq:04}", draft("X", 100)).unwrap();
        assert_eq!(issued.record.sequence, 1);
        assert_eq!(issued.record.number, "202511-0001");
        assert!(issued.record.is_current);
        assert_eq!(issued.record.supersedes, None);
        assert_eq!(issued.superseded, None);
    }

    #[test]
    fn regeneration_supersedes_and_renumbers() {
        let mut ledger = Ledger::default();
        let first = issue(&mut ledger, "{month}-{seq:04}", draft("X", 100)).unwrap();
        let second = issue(&mut ledger, "{month}-{seq:04}", draft("X", 100)).unwrap();

        assert_eq!(second.record.supersedes, Some(first.record.id));
        assert_eq!(second.superseded, Some(first.record.id));
        assert!(second.record.sequence > first.record.sequence);
        assert_ne!(second.record.number, first.record.number);

        let old = ledger.find(first.record.id).unwrap();
        assert!(!old.is_current);
        assert_eq!(old.totals, second.record.totals);
        assert_eq!(ledger.current_invoices(&"X".parse().unwrap(), month()).unwrap().len(), 1);
    }

    #[test]
    fn sequence_is_shared_across_units_in_a_month() {
        let mut ledger = Ledger::default();
        issue(&mut ledger, "{month}-{seq:04}", draft("A", 1)).unwrap();
        let b = issue(&mut ledger, "{month}-{seq:04}", draft("B", 1)).unwrap();
        assert_eq!(b.record.sequence, 2);
        assert_eq!(b.record.supersedes, None);
    }

    #[test]
    fn refuses_when_two_rows_are_current() {
        let mut ledger = Ledger::default();
        let first = issue(&mut ledger, "{month}-{seq:04}", draft("X", 1)).unwrap();
        let mut duplicate = first.record.clone();
        duplicate.id = 99;
        duplicate.sequence = 2;
        ledger.insert(duplicate).unwrap();

        let err = issue(&mut ledger, "{month}-{seq:04}", draft("X", 1)).unwrap_err();
        assert!(matches!(err, SettleError::VersionConflict { count: 2, .. }));
        assert_eq!(ledger.invoices.len(), 2);
    }

    #[test]
    fn exhausted_sequence_is_an_error() {
        let mut ledger = Ledger::default();
        let mut record = issue(&mut ledger, "{month}-{seq:04}", draft("X", 1)).unwrap().record;
        record.id = 2;
        record.sequence = u32::MAX;
        record.is_current = false;
        ledger.insert(record).unwrap();

        let err = next_sequence(&ledger, month()).unwrap_err();
        assert!(matches!(err, SettleError::Overflow("invoice sequence")));
        assert!(issue(&mut ledger, "{month}-{seq:04}", draft("X", 1)).is_err());
        assert_eq!(next_sequence(&ledger, "2025-12".parse().unwrap()).unwrap(), 1);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("PAID".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Paid);
        assert!("void".parse::<InvoiceStatus>().is_err());
    }
}

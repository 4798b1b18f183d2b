use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SettleError};
use crate::import::ExpenseSink;
use crate::model::{BillingMonth, ExpenseRow, UnitCode};
use crate::money::Yen;
use crate::settlement::{InvoiceId, InvoiceRecord, InvoiceStatus, InvoiceStore};

/// Everything persisted in state.toml.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Ledger {
    #[serde(default)]
    pub next_id: InvoiceId,
    #[serde(default)]
    pub invoices: Vec<InvoiceRecord>,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub expenses: Vec<ExpenseRow>,
}

/// Money received from a unit for one billing month.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Payment {
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    pub amount: Yen,
    pub date: NaiveDate,
}

impl Ledger {
    pub fn find(&self, id: InvoiceId) -> Option<&InvoiceRecord> {
        self.invoices.iter().find(|r| r.id == id)
    }

    pub fn find_by_number(&self, number: &str) -> Result<&InvoiceRecord> {
        self.invoices
            .iter()
            .find(|r| r.number == number)
            .ok_or_else(|| SettleError::InvoiceNotFound(number.to_string()))
    }

    pub fn set_status(&mut self, number: &str, status: InvoiceStatus) -> Result<&InvoiceRecord> {
        let record = self
            .invoices
            .iter_mut()
            .find(|r| r.number == number)
            .ok_or_else(|| SettleError::InvoiceNotFound(number.to_string()))?;
        record.status = status;
        Ok(record)
    }

    pub fn record_payment(
        &mut self,
        unit_code: UnitCode,
        billing_month: BillingMonth,
        amount: Yen,
        date: NaiveDate,
    ) -> Result<()> {
        if amount <= 0 {
            return Err(SettleError::InvalidPaymentAmount);
        }
        self.payments.push(Payment {
            unit_code,
            billing_month,
            amount,
            date,
        });
        Ok(())
    }

    pub fn expenses_for(&self, unit: &UnitCode, month: BillingMonth) -> Vec<ExpenseRow> {
        self.expenses
            .iter()
            .filter(|e| &e.unit_code == unit && e.billing_month == month)
            .cloned()
            .collect()
    }

    /// A period is closed once its current invoice is paid.
    pub fn is_locked(&self, unit: &UnitCode, month: BillingMonth) -> bool {
        self.invoices.iter().any(|r| {
            r.is_current
                && r.status == InvoiceStatus::Paid
                && &r.unit_code == unit
                && r.billing_month == month
        })
    }
}

impl InvoiceStore for Ledger {
    fn current_invoices(&self, unit: &UnitCode, month: BillingMonth) -> Result<Vec<InvoiceRecord>> {
        Ok(self
            .invoices
            .iter()
            .filter(|r| r.is_current && &r.unit_code == unit && r.billing_month == month)
            .cloned()
            .collect())
    }

    fn latest_current_before(
        &self,
        unit: &UnitCode,
        month: BillingMonth,
    ) -> Result<Option<InvoiceRecord>> {
        Ok(self
            .invoices
            .iter()
            .filter(|r| r.is_current && &r.unit_code == unit && r.billing_month < month)
            .max_by_key(|r| (r.billing_month, r.id))
            .cloned())
    }

    fn max_sequence(&self, month: BillingMonth) -> Result<u32> {
        Ok(self
            .invoices
            .iter()
            .filter(|r| r.billing_month == month)
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0))
    }

    fn allocate_id(&mut self) -> Result<InvoiceId> {
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(SettleError::Overflow("invoice id"))?;
        Ok(self.next_id)
    }

    fn supersede(&mut self, id: InvoiceId) -> Result<()> {
        let record = self
            .invoices
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| SettleError::InvoiceNotFound(format!("#{id}")))?;
        record.is_current = false;
        Ok(())
    }

    fn insert(&mut self, record: InvoiceRecord) -> Result<()> {
        self.invoices.push(record);
        Ok(())
    }

    fn payments_received(&self, unit: &UnitCode, month: BillingMonth) -> Result<Yen> {
        self.payments
            .iter()
            .filter(|p| &p.unit_code == unit && p.billing_month == month)
            .try_fold(0i64, |acc, p| acc.checked_add(p.amount))
            .ok_or(SettleError::Overflow("payments received"))
    }
}

impl ExpenseSink for Ledger {
    fn insert_expenses(&mut self, chunk: &[ExpenseRow]) -> Result<()> {
        if let Some(row) = chunk
            .iter()
            .find(|row| self.is_locked(&row.unit_code, row.billing_month))
        {
            return Err(SettleError::LockedPeriod {
                unit: row.unit_code.clone(),
                month: row.billing_month,
            });
        }
        self.expenses.extend_from_slice(chunk);
        Ok(())
    }
}

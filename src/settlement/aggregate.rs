//! Per-unit, per-month accumulation of detail lines.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::versioning::InvoiceStore;
use crate::error::{Result, SettleError};
use crate::model::{BillingMonth, Category, DetailLine, UnitCode};
use crate::money::Yen;

/// Running sums for one category.
///
/// `taxable + non_taxable == gross - deductions` always holds; deductions
/// and rebates only ever reduce the category of their own line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub gross: Yen,
    pub deductions: Yen,
    pub taxable: Yen,
    pub non_taxable: Yen,
}

impl CategoryTotals {
    pub fn net(&self) -> Yen {
        self.gross - self.deductions
    }

    fn add(&mut self, line: &DetailLine) -> Option<()> {
        let reduction = line.deduction.checked_add(line.rebate)?;
        let net = line.amount.checked_sub(reduction)?;
        self.gross = self.gross.checked_add(line.amount)?;
        self.deductions = self.deductions.checked_add(reduction)?;
        if line.taxable {
            self.taxable = self.taxable.checked_add(net)?;
        } else {
            self.non_taxable = self.non_taxable.checked_add(net)?;
        }
        Some(())
    }

    fn plus(self, other: CategoryTotals) -> Option<CategoryTotals> {
        Some(CategoryTotals {
            gross: self.gross.checked_add(other.gross)?,
            deductions: self.deductions.checked_add(other.deductions)?,
            taxable: self.taxable.checked_add(other.taxable)?,
            non_taxable: self.non_taxable.checked_add(other.non_taxable)?,
        })
    }
}

/// Everything billed to one unit for one month, before tax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPeriodAggregate {
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    /// In source order.
    pub lines: Vec<DetailLine>,
    pub membership: CategoryTotals,
    pub material: CategoryTotals,
    pub expense: CategoryTotals,
    pub adjustment: CategoryTotals,
    /// Lines paid directly to headquarters by bank transfer.
    pub bank_transfer: CategoryTotals,
    pub previous_balance: Yen,
}

impl BillingPeriodAggregate {
    pub fn category(&self, category: Category) -> &CategoryTotals {
        match category {
            Category::Membership => &self.membership,
            Category::Material => &self.material,
            Category::Expense => &self.expense,
            Category::Adjustment => &self.adjustment,
        }
    }

    /// Sum over all categories.
    pub fn combined(&self) -> Result<CategoryTotals> {
        Category::ALL
            .iter()
            .try_fold(CategoryTotals::default(), |acc, c| acc.plus(*self.category(*c)))
            .ok_or(SettleError::Overflow("category subtotals"))
    }
}

/// Accumulate `lines` for one unit and month.
pub fn aggregate(
    unit_code: UnitCode,
    billing_month: BillingMonth,
    lines: Vec<DetailLine>,
    previous_balance: Yen,
) -> Result<BillingPeriodAggregate> {
    let mut agg = BillingPeriodAggregate {
        unit_code,
        billing_month,
        lines: Vec::new(),
        membership: CategoryTotals::default(),
        material: CategoryTotals::default(),
        expense: CategoryTotals::default(),
        adjustment: CategoryTotals::default(),
        bank_transfer: CategoryTotals::default(),
        previous_balance,
    };

    for line in &lines {
        let totals = match line.category {
            Category::Membership => &mut agg.membership,
            Category::Material => &mut agg.material,
            Category::Expense => &mut agg.expense,
            Category::Adjustment => &mut agg.adjustment,
        };
        totals.add(line).ok_or(SettleError::Overflow("category subtotal"))?;
        if line.bank_transfer {
            agg.bank_transfer
                .add(line)
                .ok_or(SettleError::Overflow("bank transfer subtotal"))?;
        }
    }
    agg.lines = lines;

    debug!(
        unit = %agg.unit_code,
        month = %agg.billing_month,
        membership = agg.membership.net(),
        material = agg.material.net(),
        expense = agg.expense.net(),
        adjustment = agg.adjustment.net(),
        "aggregated period"
    );
    Ok(agg)
}

/// Carry-in from the unit's most recent earlier current invoice, 0 if none.
pub fn previous_balance<S: InvoiceStore + ?Sized>(
    store: &S,
    unit: &UnitCode,
    month: BillingMonth,
) -> Result<Yen> {
    Ok(store
        .latest_current_before(unit, month)?
        .map(|r| r.totals.remaining_balance)
        .unwrap_or(0))
}

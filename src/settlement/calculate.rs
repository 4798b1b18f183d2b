//! Tax and net settlement amounts for one aggregated period.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregate::BillingPeriodAggregate;
use crate::config::DeductionRule;
use crate::error::{Result, SettleError};
use crate::money::{apply_rate, Yen};

/// Numeric fields of an invoice.
///
/// `subtotal + tax_amount == total_amount`. Payment-side deductions are
/// taken from the total afterwards and yield `payable_amount`, which is what
/// rolls into `remaining_balance`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub membership_total: Yen,
    pub material_total: Yen,
    pub expense_total: Yen,
    pub adjustment_total: Yen,
    /// Line-level deductions and rebates across all categories.
    pub deductions: Yen,
    pub subtotal: Yen,
    pub taxable_subtotal: Yen,
    pub non_taxable_subtotal: Yen,
    pub tax_amount: Yen,
    pub total_amount: Yen,
    pub headquarters_deduction: Yen,
    pub bank_transfer_deduction: Yen,
    pub payable_amount: Yen,
    pub previous_balance: Yen,
    pub payment_received: Yen,
    pub remaining_balance: Yen,
}

fn overflow(what: &'static str) -> SettleError {
    SettleError::Overflow(what)
}

pub fn calculate(
    agg: &BillingPeriodAggregate,
    tax_rate: Decimal,
    rule: &DeductionRule,
    payment_received: Yen,
) -> Result<InvoiceTotals> {
    let combined = agg.combined()?;

    let subtotal = combined
        .gross
        .checked_sub(combined.deductions)
        .ok_or_else(|| overflow("subtotal"))?;
    let tax_amount = apply_rate(combined.taxable, tax_rate);
    let total_amount = subtotal
        .checked_add(tax_amount)
        .ok_or_else(|| overflow("total amount"))?;

    // What bank-transfer members already paid headquarters, tax included.
    let bank_transfer_deduction = if rule.bank_transfer {
        agg.bank_transfer
            .net()
            .checked_add(apply_rate(agg.bank_transfer.taxable, tax_rate))
            .ok_or_else(|| overflow("bank transfer deduction"))?
    } else {
        0
    };

    let payable_amount = total_amount
        .checked_sub(rule.headquarters)
        .and_then(|v| v.checked_sub(bank_transfer_deduction))
        .ok_or_else(|| overflow("payable amount"))?;
    let remaining_balance = agg
        .previous_balance
        .checked_add(payable_amount)
        .and_then(|v| v.checked_sub(payment_received))
        .ok_or_else(|| overflow("remaining balance"))?;

    Ok(InvoiceTotals {
        membership_total: agg.membership.gross,
        material_total: agg.material.gross,
        expense_total: agg.expense.gross,
        adjustment_total: agg.adjustment.gross,
        deductions: combined.deductions,
        subtotal,
        taxable_subtotal: combined.taxable,
        non_taxable_subtotal: combined.non_taxable,
        tax_amount,
        total_amount,
        headquarters_deduction: rule.headquarters,
        bank_transfer_deduction,
        payable_amount,
        previous_balance: agg.previous_balance,
        payment_received,
        remaining_balance,
    })
}

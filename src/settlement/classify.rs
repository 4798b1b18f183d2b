//! Converts raw fee source rows into detail lines.

use rust_decimal::Decimal;
use tracing::warn;

use crate::config::BillingConfig;
use crate::model::{
    AdjustmentRow, Category, DetailLine, ExpenseRow, FeeSourceRow, MaterialRow, MembershipRow,
    RowError,
};
use crate::money::{line_amount, round_half_up, Yen};

/// Expense types billed with consumption tax.
const TAXABLE_EXPENSE_TYPES: [&str; 2] = ["課税分", "taxable"];

/// Outcome of classifying a batch of rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Classified {
    pub lines: Vec<DetailLine>,
    pub errors: Vec<RowError>,
    /// Rows filtered out by business rule (not errors).
    pub dropped: usize,
}

/// Classify one row. `Ok(None)` means the row is not billed here.
pub fn classify(
    row: &FeeSourceRow,
    config: &BillingConfig,
) -> std::result::Result<Option<DetailLine>, RowError> {
    let fail = |message: String| RowError::new(row.category(), row.line(), message);
    match row {
        FeeSourceRow::Membership(r) => classify_membership(r, config).map_err(fail),
        FeeSourceRow::Material(r) => classify_material(r, config).map(Some).map_err(fail),
        FeeSourceRow::Expense(r) => classify_expense(r).map(Some).map_err(fail),
        FeeSourceRow::Adjustment(r) => classify_adjustment(r).map(Some).map_err(fail),
    }
}

/// Classify rows in order, collecting row errors instead of failing.
pub fn classify_all<'a, I>(rows: I, config: &BillingConfig) -> Classified
where
    I: IntoIterator<Item = &'a FeeSourceRow>,
{
    let mut out = Classified::default();
    for row in rows {
        match classify(row, config) {
            Ok(Some(line)) => out.lines.push(line),
            Ok(None) => out.dropped += 1,
            Err(error) => {
                warn!(%error, "row failed classification");
                out.errors.push(error);
            }
        }
    }
    out
}

fn checked_amount(quantity: i64, unit_price: Yen) -> std::result::Result<Yen, String> {
    if quantity < 0 {
        return Err(format!("quantity {quantity} is negative"));
    }
    if unit_price < 0 {
        return Err(format!("unit_price {unit_price} is negative"));
    }
    line_amount(quantity, unit_price).ok_or_else(|| "line amount overflows".to_string())
}

fn classify_membership(
    row: &MembershipRow,
    config: &BillingConfig,
) -> std::result::Result<Option<DetailLine>, String> {
    // Excluded rows are billed by the branch, except bank-transfer members,
    // who are always billed centrally.
    if row.excluded && !row.bank_transfer {
        return Ok(None);
    }

    let amount = checked_amount(row.quantity, row.unit_price)?;
    let rebate = if row.aigran && row.quantity >= config.aigran_threshold {
        let rebate = Decimal::from(row.quantity)
            .checked_mul(config.rebate_rate)
            .ok_or_else(|| "rebate overflows".to_string())?;
        round_half_up(rebate).min(amount)
    } else {
        0
    };

    Ok(Some(DetailLine {
        category: Category::Membership,
        description: row.description.clone(),
        quantity: row.quantity,
        unit_price: row.unit_price,
        amount,
        deduction: 0,
        rebate,
        taxable: row.taxable,
        bank_transfer: row.bank_transfer,
    }))
}

fn classify_material(
    row: &MaterialRow,
    config: &BillingConfig,
) -> std::result::Result<DetailLine, String> {
    let amount = checked_amount(row.quantity, row.unit_price)?;
    // Deliveries inside the organization offset themselves.
    let deduction = if config.is_intra_org(&row.destination_code) {
        amount
    } else {
        0
    };

    Ok(DetailLine {
        category: Category::Material,
        description: row.description.clone(),
        quantity: row.quantity,
        unit_price: row.unit_price,
        amount,
        deduction,
        rebate: 0,
        taxable: row.taxable,
        bank_transfer: false,
    })
}

fn classify_expense(row: &ExpenseRow) -> std::result::Result<DetailLine, String> {
    if row.description.trim().is_empty() {
        return Err("description is missing".to_string());
    }
    let expense_type = row.expense_type.trim();
    let taxable = TAXABLE_EXPENSE_TYPES
        .iter()
        .any(|t| expense_type.eq_ignore_ascii_case(t));

    Ok(DetailLine {
        category: Category::Expense,
        description: row.description.clone(),
        quantity: 1,
        unit_price: row.amount,
        amount: row.amount,
        deduction: 0,
        rebate: 0,
        taxable,
        bank_transfer: false,
    })
}

fn classify_adjustment(row: &AdjustmentRow) -> std::result::Result<DetailLine, String> {
    if row.description.trim().is_empty() {
        return Err("description is missing".to_string());
    }
    Ok(DetailLine {
        category: Category::Adjustment,
        description: row.description.clone(),
        quantity: 1,
        unit_price: row.amount,
        amount: row.amount,
        deduction: 0,
        rebate: 0,
        taxable: row.taxable,
        bank_transfer: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn config() -> BillingConfig {
        let mut cfg = BillingConfig::with_tax_rate(dec!(0.10));
        cfg.rebate_rate = dec!(50);
        cfg.aigran_threshold = 10;
        cfg.intra_org_destinations = vec!["HQ".into()];
        cfg
    }

    fn member(quantity: i64, excluded: bool, bank_transfer: bool) -> FeeSourceRow {
        FeeSourceRow::Membership(MembershipRow {
            line: 2,
            unit_code: "1110001".parse().unwrap(),
            billing_month: "2025-11".parse().unwrap(),
            description: "Kids class".into(),
            quantity,
            unit_price: 550,
            excluded,
            bank_transfer,
            aigran: false,
            taxable: true,
        })
    }

    fn material(destination: &str) -> FeeSourceRow {
        FeeSourceRow::Material(MaterialRow {
            line: 3,
            unit_code: "1110001".parse().unwrap(),
            billing_month: "2025-11".parse().unwrap(),
            description: "Textbook".into(),
            quantity: 3,
            unit_price: 1200,
            destination_code: destination.into(),
            taxable: true,
        })
    }

    fn expense(expense_type: &str) -> FeeSourceRow {
        FeeSourceRow::Expense(ExpenseRow {
            line: 4,
            unit_code: "1110001".parse().unwrap(),
            billing_month: "2025-11".parse().unwrap(),
            date: NaiveDate::from_ymd_opt(2025, 11, 10).unwrap(),
            description: "Hall rental".into(),
            amount: 8000,
            expense_type: expense_type.into(),
        })
    }

    #[test]
    fn excluded_member_is_dropped() {
        let rows = [member(10, false, false), member(5, true, false)];
        let out = classify_all(&rows, &config());
        assert_eq!(out.lines.len(), 1);
        assert_eq!(out.lines[0].amount, 5500);
        assert_eq!(out.dropped, 1);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn bank_transfer_bypasses_exclusion() {
        let line = classify(&member(5, true, true), &config()).unwrap().unwrap();
        assert_eq!(line.amount, 2750);
        assert!(line.bank_transfer);
    }

    #[test]
    fn zero_quantity_still_produces_a_line() {
        let line = classify(&member(0, false, false), &config()).unwrap().unwrap();
        assert_eq!(line.amount, 0);
        assert_eq!(line.net(), 0);
    }

    #[test]
    fn aigran_rebate_needs_flag_and_threshold() {
        let mut row = member(12, false, false);
        if let FeeSourceRow::Membership(m) = &mut row {
            m.aigran = true;
        }
        let line = classify(&row, &config()).unwrap().unwrap();
        assert_eq!(line.rebate, 600);
        assert_eq!(line.net(), 6600 - 600);

        if let FeeSourceRow::Membership(m) = &mut row {
            m.quantity = 9;
        }
        assert_eq!(classify(&row, &config()).unwrap().unwrap().rebate, 0);

        let plain = classify(&member(12, false, false), &config()).unwrap().unwrap();
        assert_eq!(plain.rebate, 0);
    }

    #[test]
    fn rebate_never_exceeds_line_amount() {
        let mut cfg = config();
        cfg.rebate_rate = dec!(1000);
        let mut row = member(10, false, false);
        if let FeeSourceRow::Membership(m) = &mut row {
            m.aigran = true;
        }
        let line = classify(&row, &cfg).unwrap().unwrap();
        assert_eq!(line.rebate, line.amount);
    }

    #[test]
    fn oversized_rebate_is_a_row_error() {
        let mut cfg = config();
        cfg.rebate_rate = dec!(10000000000000000000);
        let mut row = member(100_000_000_000, false, false);
        if let FeeSourceRow::Membership(m) = &mut row {
            m.aigran = true;
        }
        let rows = [row, member(2, false, false)];
        let out = classify_all(&rows, &cfg);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.contains("rebate overflows"));
        assert_eq!(out.lines.len(), 1);
    }

    #[test]
    fn intra_org_material_is_offset() {
        let internal = classify(&material("HQ"), &config()).unwrap().unwrap();
        assert_eq!(internal.amount, 3600);
        assert_eq!(internal.deduction, 3600);
        assert_eq!(internal.net(), 0);

        let external = classify(&material("1110001"), &config()).unwrap().unwrap();
        assert_eq!(external.deduction, 0);
    }

    #[test]
    fn expense_taxability_follows_type() {
        assert!(classify(&expense("課税分"), &config()).unwrap().unwrap().taxable);
        assert!(classify(&expense("Taxable"), &config()).unwrap().unwrap().taxable);
        assert!(!classify(&expense("非課税分"), &config()).unwrap().unwrap().taxable);
    }

    #[test]
    fn negative_quantity_is_a_row_error() {
        let err = classify(&member(-1, false, false), &config()).unwrap_err();
        assert_eq!(err.category, Category::Membership);
        assert_eq!(err.line, 2);
        assert!(err.message.contains("negative"));
    }

    #[test]
    fn errors_do_not_stop_the_batch() {
        let rows = [member(-1, false, false), member(2, false, false)];
        let out = classify_all(&rows, &config());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.lines.len(), 1);
    }

    proptest! {
        #[test]
        fn bank_transfer_rows_are_never_dropped(qty in 0i64..10_000, excluded in any::<bool>()) {
            let line = classify(&member(qty, excluded, true), &config()).unwrap();
            prop_assert!(line.is_some());
        }

        #[test]
        fn excluded_non_transfer_rows_are_always_dropped(qty in 0i64..10_000) {
            let line = classify(&member(qty, true, false), &config()).unwrap();
            prop_assert!(line.is_none());
        }
    }
}

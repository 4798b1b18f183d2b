use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SettleError;
use crate::money::Yen;

/// A calendar month used as one invoice cycle, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BillingMonth {
    year: i32,
    month: u32,
}

impl BillingMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// Compact form used in invoice numbers, e.g. `202511`.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

impl fmt::Display for BillingMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for BillingMonth {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SettleError::InvalidMonth(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for BillingMonth {
    type Error = SettleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingMonth> for String {
    fn from(value: BillingMonth) -> Self {
        value.to_string()
    }
}

/// Code of the branch, classroom or department an invoice is issued to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitCode(String);

impl UnitCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitCode {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(SettleError::InvalidUnitCode(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for UnitCode {
    type Error = SettleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UnitCode> for String {
    fn from(value: UnitCode) -> Self {
        value.0
    }
}

/// Fee category of a detail line; also names the origin of a source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Membership,
    Material,
    Expense,
    Adjustment,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Membership,
        Category::Material,
        Category::Expense,
        Category::Adjustment,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Membership => "membership",
            Category::Material => "material",
            Category::Expense => "expense",
            Category::Adjustment => "adjustment",
        };
        f.write_str(s)
    }
}

/// A member billed for a class in the billing month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub line: usize,
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Yen,
    /// Billed by the branch rather than headquarters.
    pub excluded: bool,
    /// Member pays headquarters directly by bank transfer.
    pub bank_transfer: bool,
    /// Eligible for the bulk-volume rebate.
    pub aigran: bool,
    pub taxable: bool,
}

/// A teaching-material order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRow {
    pub line: usize,
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Yen,
    pub destination_code: String,
    pub taxable: bool,
}

/// A manually entered expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRow {
    pub line: usize,
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Yen,
    pub expense_type: String,
}

/// A signed manual correction to the invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRow {
    pub line: usize,
    pub unit_code: UnitCode,
    pub billing_month: BillingMonth,
    pub description: String,
    pub amount: Yen,
    pub taxable: bool,
}

/// A raw record as supplied by the data layer, one variant per origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeSourceRow {
    Membership(MembershipRow),
    Material(MaterialRow),
    Expense(ExpenseRow),
    Adjustment(AdjustmentRow),
}

impl FeeSourceRow {
    pub fn category(&self) -> Category {
        match self {
            FeeSourceRow::Membership(_) => Category::Membership,
            FeeSourceRow::Material(_) => Category::Material,
            FeeSourceRow::Expense(_) => Category::Expense,
            FeeSourceRow::Adjustment(_) => Category::Adjustment,
        }
    }

    pub fn unit_code(&self) -> &UnitCode {
        match self {
            FeeSourceRow::Membership(r) => &r.unit_code,
            FeeSourceRow::Material(r) => &r.unit_code,
            FeeSourceRow::Expense(r) => &r.unit_code,
            FeeSourceRow::Adjustment(r) => &r.unit_code,
        }
    }

    pub fn billing_month(&self) -> BillingMonth {
        match self {
            FeeSourceRow::Membership(r) => r.billing_month,
            FeeSourceRow::Material(r) => r.billing_month,
            FeeSourceRow::Expense(r) => r.billing_month,
            FeeSourceRow::Adjustment(r) => r.billing_month,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            FeeSourceRow::Membership(r) => r.line,
            FeeSourceRow::Material(r) => r.line,
            FeeSourceRow::Expense(r) => r.line,
            FeeSourceRow::Adjustment(r) => r.line,
        }
    }
}

/// Normalized output of classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailLine {
    pub category: Category,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Yen,
    pub amount: Yen,
    #[serde(default)]
    pub deduction: Yen,
    #[serde(default)]
    pub rebate: Yen,
    pub taxable: bool,
    #[serde(default)]
    pub bank_transfer: bool,
}

impl DetailLine {
    /// Amount left after this line's own deduction and rebate.
    pub fn net(&self) -> Yen {
        self.amount - self.deduction - self.rebate
    }
}

/// A row that could not be read or classified. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub category: Category,
    pub line: usize,
    pub message: String,
}

impl RowError {
    pub fn new(category: Category, line: usize, message: impl Into<String>) -> Self {
        Self {
            category,
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} row {}: {}", self.category, self.line, self.message)
    }
}

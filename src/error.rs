use std::path::PathBuf;
use thiserror::Error;

use crate::model::{BillingMonth, UnitCode};

#[derive(Error, Debug)]
pub enum SettleError {
    #[error("Config directory not found at {0}. Run 'settle init' to create it.")]
    ConfigNotFound(PathBuf),

    #[error("Config file not found: {0}")]
    ConfigFileNotFound(PathBuf),

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),

    #[error("Config directory already exists at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Unit '{0}' not found in units.toml")]
    UnitNotFound(String),

    #[error("Invalid billing month '{0}'. Expected YYYY-MM (e.g., '2025-11')")]
    InvalidMonth(String),

    #[error("Invalid unit code '{0}'")]
    InvalidUnitCode(String),

    #[error("Invalid date '{0}'. Expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Found {count} current invoices for unit {unit} in {month}; refusing to regenerate")]
    VersionConflict {
        unit: UnitCode,
        month: BillingMonth,
        count: usize,
    },

    #[error("Invoice '{0}' not found in ledger")]
    InvoiceNotFound(String),

    #[error("Billing period {month} for unit {unit} is closed (current invoice is paid)")]
    LockedPeriod { unit: UnitCode, month: BillingMonth },

    #[error("Amount overflow while computing {0}")]
    Overflow(&'static str),

    #[error("Payment amount must be greater than zero")]
    InvalidPaymentAmount,

    #[error("Invalid status '{0}'. Use 'draft', 'sent', or 'paid'.")]
    InvalidStatus(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write ledger: {0}")]
    LedgerWrite(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettleError>;

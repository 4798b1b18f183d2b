pub mod config;
pub mod error;
pub mod import;
pub mod model;
pub mod money;
pub mod settlement;
pub mod source;

pub use config::{BillingConfig, Config, DeductionRule, Ledger, Unit};
pub use error::{Result, SettleError};
pub use import::{import_expenses, ExpenseSink, ImportReport};
pub use model::{BillingMonth, Category, DetailLine, FeeSourceRow, RowError, UnitCode};
pub use settlement::{
    generate_all, generate_invoice, FeeSources, GeneratedInvoice, InvoiceRecord, InvoiceStatus,
    InvoiceStore, InvoiceTotals,
};

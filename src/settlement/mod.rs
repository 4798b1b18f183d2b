//! Invoice aggregation and calculation engine.
//!
//! Data flows one way: source rows are classified into detail lines,
//! aggregated per unit and month, taxed, and finally issued as a versioned
//! invoice record. Only the last step touches storage.

mod aggregate;
mod calculate;
mod classify;
mod generator;
mod versioning;

pub use aggregate::{aggregate, previous_balance, BillingPeriodAggregate, CategoryTotals};
pub use calculate::{calculate, InvoiceTotals};
pub use classify::{classify, classify_all, Classified};
pub use generator::{
    generate_all, generate_invoice, FeeSources, GeneratedInvoice, UnitJob, UnitOutcome,
};
pub use versioning::{
    format_invoice_number, issue, next_sequence, InvoiceDraft, InvoiceId, InvoiceRecord, InvoiceStatus,
    InvoiceStore, Issued,
};

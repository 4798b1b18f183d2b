use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use settle::config::{
    config_dir, load_config, load_ledger, load_units, save_ledger, sources_dir, CONFIG_TEMPLATE,
    SOURCE_HEADERS, UNITS_TEMPLATE,
};
use settle::money::format_yen;
use settle::settlement::{
    format_invoice_number, generate_all, generate_invoice, next_sequence, GeneratedInvoice,
    InvoiceRecord, InvoiceStatus, UnitJob,
};
use settle::source::SourceSet;
use settle::{import_expenses, BillingMonth, Result, RowError, SettleError, Unit, UnitCode};

#[derive(Parser)]
#[command(name = "settle")]
#[command(version, about = "Monthly invoice settlement for organizational units", long_about = None)]
struct Cli {
    /// Path to config directory (default: ~/.settle or XDG config)
    #[arg(short = 'C', long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory with template files
    Init,

    /// List configured units
    Units,

    /// Show billing configuration and ledger summary
    Status,

    /// Import manual expense records from a CSV file
    Import {
        /// CSV with unit_code,billing_month,date,description,amount,expense_type
        file: PathBuf,

        /// Rows per insert chunk (default: import_chunk_size from config.toml)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Generate (or regenerate) the invoice for one unit and month
    Generate {
        /// Unit code from units.toml
        #[arg(short, long)]
        unit: String,

        /// Billing month (YYYY-MM)
        #[arg(short, long)]
        month: String,

        /// Directory with the source CSV files (default: <config>/sources)
        #[arg(long)]
        sources: Option<PathBuf>,

        /// Issue date (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Generate invoices for every configured unit
    GenerateAll {
        /// Billing month (YYYY-MM)
        #[arg(short, long)]
        month: String,

        /// Directory with the source CSV files (default: <config>/sources)
        #[arg(long)]
        sources: Option<PathBuf>,

        /// Issue date (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// List invoices
    List {
        /// Only invoices for this billing month (YYYY-MM)
        #[arg(short, long)]
        month: Option<String>,

        /// Include superseded versions
        #[arg(short, long)]
        all: bool,
    },

    /// Show an invoice with its detail lines
    Show {
        /// Invoice number (e.g., 202511-0001)
        invoice: String,

        /// Print the stored record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a payment received from a unit
    AddPayment {
        /// Unit code from units.toml
        #[arg(short, long)]
        unit: String,

        /// Billing month the payment settles (YYYY-MM)
        #[arg(short, long)]
        month: String,

        /// Amount in yen
        amount: i64,

        /// Payment date (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Set the delivery status of an invoice
    Mark {
        /// Invoice number (e.g., 202511-0001)
        invoice: String,

        /// draft, sent or paid
        #[arg(short, long)]
        status: String,
    },
}

fn main() {
    init_tracing();
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SETTLE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("error"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let cfg_dir = match cli.config_dir {
        Some(p) => p,
        None => config_dir()?,
    };

    match cli.command {
        Commands::Init => cmd_init(&cfg_dir),
        Commands::Units => cmd_units(&cfg_dir),
        Commands::Status => cmd_status(&cfg_dir),
        Commands::Import { file, chunk_size } => cmd_import(&cfg_dir, &file, chunk_size),
        Commands::Generate {
            unit,
            month,
            sources,
            date,
        } => cmd_generate(&cfg_dir, &unit, &month, sources, date),
        Commands::GenerateAll {
            month,
            sources,
            date,
        } => cmd_generate_all(&cfg_dir, &month, sources, date),
        Commands::List { month, all } => cmd_list(&cfg_dir, month, all),
        Commands::Show { invoice, json } => cmd_show(&cfg_dir, &invoice, json),
        Commands::AddPayment {
            unit,
            month,
            amount,
            date,
        } => cmd_add_payment(&cfg_dir, &unit, &month, amount, date),
        Commands::Mark { invoice, status } => cmd_mark(&cfg_dir, &invoice, &status),
    }
}

fn ensure_initialized(cfg_dir: &Path) -> Result<()> {
    if !cfg_dir.exists() {
        return Err(SettleError::ConfigNotFound(cfg_dir.to_path_buf()));
    }
    Ok(())
}

fn parse_date_arg(date: Option<String>) -> Result<NaiveDate> {
    match date {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| SettleError::InvalidDate(s)),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

/// Initialize config directory with template files
fn cmd_init(cfg_dir: &Path) -> Result<()> {
    if cfg_dir.exists() {
        return Err(SettleError::AlreadyInitialized(cfg_dir.to_path_buf()));
    }

    let sources = sources_dir(cfg_dir);
    fs::create_dir_all(&sources)?;

    fs::write(cfg_dir.join("config.toml"), CONFIG_TEMPLATE)?;
    fs::write(cfg_dir.join("units.toml"), UNITS_TEMPLATE)?;
    for (name, header) in SOURCE_HEADERS {
        fs::write(sources.join(name), header)?;
    }

    println!("Initialized settle config at: {}", cfg_dir.display());
    println!();
    println!("Next steps:");
    println!(
        "  1. Set the tax rate and deductions:  $EDITOR {}/config.toml",
        cfg_dir.display()
    );
    println!(
        "  2. Add your units:                   $EDITOR {}/units.toml",
        cfg_dir.display()
    );
    println!(
        "  3. Fill the source files in:         {}",
        sources.display()
    );
    println!();
    println!("Then generate your first invoice:");
    println!("  settle generate --unit <unit-code> --month <YYYY-MM>");

    Ok(())
}

#[derive(Tabled)]
struct UnitRow {
    #[tabled(rename = "CODE")]
    code: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    unit_type: String,
    #[tabled(rename = "HQ DEDUCTION")]
    headquarters: String,
    #[tabled(rename = "BANK TRANSFER")]
    bank_transfer: String,
}

#[derive(Tabled)]
struct InvoiceRow {
    #[tabled(rename = "NUMBER")]
    number: String,
    #[tabled(rename = "UNIT")]
    unit: String,
    #[tabled(rename = "MONTH")]
    month: String,
    #[tabled(rename = "TOTAL")]
    total: String,
    #[tabled(rename = "REMAINING")]
    remaining: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "VERSION")]
    version: String,
}

#[derive(Tabled)]
struct LineRow {
    #[tabled(rename = "CATEGORY")]
    category: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
    #[tabled(rename = "QTY")]
    quantity: i64,
    #[tabled(rename = "PRICE")]
    unit_price: String,
    #[tabled(rename = "AMOUNT")]
    amount: String,
    #[tabled(rename = "DEDUCTED")]
    deducted: String,
    #[tabled(rename = "TAX")]
    taxable: String,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "UNIT")]
    unit: String,
    #[tabled(rename = "RESULT")]
    result: String,
    #[tabled(rename = "NUMBER")]
    number: String,
    #[tabled(rename = "TOTAL")]
    total: String,
    #[tabled(rename = "SKIPPED")]
    skipped: usize,
}

/// List configured units
fn cmd_units(cfg_dir: &Path) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let config = load_config(cfg_dir)?;
    let units = load_units(cfg_dir)?;

    if units.is_empty() {
        println!("No units configured.");
        println!("Add units to: {}/units.toml", cfg_dir.display());
        return Ok(());
    }

    let rows: Vec<UnitRow> = units
        .iter()
        .map(|(code, unit)| {
            let rule = config.deduction_rule(&unit.unit_type);
            UnitRow {
                code: code.to_string(),
                name: unit.name.clone(),
                unit_type: unit.unit_type.clone(),
                headquarters: format_yen(rule.headquarters),
                bank_transfer: if rule.bank_transfer { "deducted" } else { "-" }.to_string(),
            }
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    Ok(())
}

/// Show billing configuration and ledger summary
fn cmd_status(cfg_dir: &Path) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let config = load_config(cfg_dir)?;
    let billing = config.billing_config()?;
    let units = load_units(cfg_dir)?;
    let ledger = load_ledger(cfg_dir)?;

    let this_month = BillingMonth::of(chrono::Local::now().date_naive());
    let next_number = format_invoice_number(
        &billing.number_format,
        this_month,
        next_sequence(&ledger, this_month)?,
    );
    let current = ledger.invoices.iter().filter(|r| r.is_current).count();

    println!("Settlement Status");
    println!("{}", "-".repeat(50));
    println!("Config directory: {}", cfg_dir.display());
    println!("Company:          {}", config.company.name);
    println!("Tax rate:         {}", billing.tax_rate);
    println!("Units:            {}", units.len());
    println!(
        "Invoices:         {} ({} current)",
        ledger.invoices.len(),
        current
    );
    println!("Expenses:         {}", ledger.expenses.len());
    println!("Next invoice:     {}", next_number);

    Ok(())
}

/// Import manual expense records
fn cmd_import(cfg_dir: &Path, file: &Path, chunk_size: Option<usize>) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let config = load_config(cfg_dir)?;
    let billing = config.billing_config()?;
    let mut ledger = load_ledger(cfg_dir)?;

    let reader = File::open(file)?;
    let report = import_expenses(
        reader,
        &mut ledger,
        chunk_size.unwrap_or(billing.import_chunk_size),
        billing.max_reported_errors,
    )?;

    save_ledger(cfg_dir, &ledger)?;

    println!("Imported {}", file.display());
    println!("  Total:     {}", report.total);
    println!("  Succeeded: {}", report.succeeded);
    println!("  Failed:    {}", report.failed);
    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for message in &report.errors {
            println!("  {message}");
        }
        if report.suppressed > 0 {
            println!("  ... and {} more", report.suppressed);
        }
    }

    Ok(())
}

fn lookup_unit<'a>(units: &'a BTreeMap<UnitCode, Unit>, code: &UnitCode) -> Result<&'a Unit> {
    units
        .get(code)
        .ok_or_else(|| SettleError::UnitNotFound(code.to_string()))
}

fn print_row_errors(label: &str, errors: &[RowError], max: usize) {
    if errors.is_empty() {
        return;
    }
    println!("  {label}: {}", errors.len());
    for error in errors.iter().take(max) {
        println!("    {error}");
    }
    if errors.len() > max {
        println!("    ... and {} more", errors.len() - max);
    }
}

/// Generate the invoice for one unit and month
fn cmd_generate(
    cfg_dir: &Path,
    unit_code: &str,
    month: &str,
    sources: Option<PathBuf>,
    date: Option<String>,
) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    // Configuration errors abort before anything is written
    let config = load_config(cfg_dir)?;
    let billing = config.billing_config()?;
    let units = load_units(cfg_dir)?;
    let unit_code: UnitCode = unit_code.parse()?;
    let month: BillingMonth = month.parse()?;
    let issue_date = parse_date_arg(date)?;
    let unit = lookup_unit(&units, &unit_code)?;
    let rule = config.deduction_rule(&unit.unit_type);

    let source_set = SourceSet::load_dir(&sources.unwrap_or_else(|| sources_dir(cfg_dir)))?;
    let mut ledger = load_ledger(cfg_dir)?;
    let mut fee_sources = source_set.for_unit(&unit_code, month);
    fee_sources.expense = ledger.expenses_for(&unit_code, month);

    let generated = generate_invoice(
        &mut ledger,
        &billing,
        &rule,
        &unit_code,
        month,
        &fee_sources,
        issue_date,
    )?;
    save_ledger(cfg_dir, &ledger)?;

    let mut skipped = source_set.errors_for(&unit_code, month);
    skipped.extend(generated.row_errors.iter().cloned());

    print_generated(&ledger, unit, &generated);
    print_row_errors("Skipped rows", &skipped, billing.max_reported_errors);

    Ok(())
}

fn print_generated(ledger: &settle::Ledger, unit: &Unit, generated: &GeneratedInvoice) {
    let record = &generated.record;
    let totals = &record.totals;

    println!("Generated {}", record.number);
    if let Some(old) = generated.superseded.and_then(|id| ledger.find(id)) {
        println!("  Supersedes: {}", old.number);
    }
    println!("  Unit:       {} {}", record.unit_code, unit.name);
    println!("  Month:      {}", record.billing_month);
    println!("  Lines:      {}", record.lines.len());
    println!("  Subtotal:   {}", format_yen(totals.subtotal));
    println!("  Tax:        {}", format_yen(totals.tax_amount));
    println!("  Total:      {}", format_yen(totals.total_amount));
    if totals.payable_amount != totals.total_amount {
        println!("  Payable:    {}", format_yen(totals.payable_amount));
    }
    println!("  Remaining:  {}", format_yen(totals.remaining_balance));
}

/// Generate invoices for every configured unit
fn cmd_generate_all(
    cfg_dir: &Path,
    month: &str,
    sources: Option<PathBuf>,
    date: Option<String>,
) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let config = load_config(cfg_dir)?;
    let billing = config.billing_config()?;
    let units = load_units(cfg_dir)?;
    let month: BillingMonth = month.parse()?;
    let issue_date = parse_date_arg(date)?;

    let source_set = SourceSet::load_dir(&sources.unwrap_or_else(|| sources_dir(cfg_dir)))?;
    let mut ledger = load_ledger(cfg_dir)?;

    let jobs: Vec<UnitJob> = units
        .iter()
        .map(|(code, unit)| {
            let mut fee_sources = source_set.for_unit(code, month);
            fee_sources.expense = ledger.expenses_for(code, month);
            UnitJob {
                unit: code.clone(),
                rule: config.deduction_rule(&unit.unit_type),
                sources: fee_sources,
            }
        })
        .collect();

    let outcomes = generate_all(&mut ledger, &billing, jobs, month, issue_date);
    save_ledger(cfg_dir, &ledger)?;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    let rows: Vec<OutcomeRow> = outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(g) => OutcomeRow {
                unit: o.unit.to_string(),
                result: "ok".to_string(),
                number: g.record.number.clone(),
                total: format_yen(g.record.totals.total_amount),
                skipped: g.row_errors.len(),
            },
            Err(e) => OutcomeRow {
                unit: o.unit.to_string(),
                result: format!("error: {e}"),
                number: "-".to_string(),
                total: "-".to_string(),
                skipped: 0,
            },
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");
    println!();
    println!(
        "Generated {} of {} units for {}",
        outcomes.len() - failed,
        outcomes.len(),
        month
    );
    let rejected: Vec<RowError> = source_set.errors.iter().map(|r| r.error.clone()).collect();
    print_row_errors("Rejected source rows", &rejected, billing.max_reported_errors);

    Ok(())
}

/// List invoices, current versions only unless `all`
fn cmd_list(cfg_dir: &Path, month: Option<String>, all: bool) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let ledger = load_ledger(cfg_dir)?;
    let month: Option<BillingMonth> = month.map(|m| m.parse()).transpose()?;

    let shown: Vec<&InvoiceRecord> = ledger
        .invoices
        .iter()
        .filter(|r| all || r.is_current)
        .filter(|r| month.map_or(true, |m| r.billing_month == m))
        .collect();

    if shown.is_empty() {
        println!("No invoices generated yet.");
        return Ok(());
    }

    let rows: Vec<InvoiceRow> = shown
        .iter()
        .map(|r| InvoiceRow {
            number: r.number.clone(),
            unit: r.unit_code.to_string(),
            month: r.billing_month.to_string(),
            total: format_yen(r.totals.total_amount),
            remaining: format_yen(r.totals.remaining_balance),
            status: r.status.to_string(),
            version: if r.is_current { "current" } else { "superseded" }.to_string(),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");

    let billed = shown
        .iter()
        .filter(|r| r.is_current)
        .try_fold(0i64, |acc, r| acc.checked_add(r.totals.total_amount))
        .ok_or(SettleError::Overflow("billed total"))?;
    println!();
    println!("Total: {} invoices, {} billed (current)", shown.len(), format_yen(billed));

    Ok(())
}

/// Show an invoice with its detail lines
fn cmd_show(cfg_dir: &Path, number: &str, json: bool) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let ledger = load_ledger(cfg_dir)?;
    let record = ledger.find_by_number(number)?;

    if json {
        let text = serde_json::to_string_pretty(record)
            .map_err(|e| SettleError::Io(std::io::Error::other(e)))?;
        println!("{text}");
        return Ok(());
    }

    let totals = &record.totals;
    println!("Invoice {}", record.number);
    println!("{}", "-".repeat(50));
    println!("Unit:        {}", record.unit_code);
    println!("Month:       {}", record.billing_month);
    println!("Issued:      {}", record.issue_date);
    println!("Status:      {}", record.status);
    println!(
        "Version:     {}",
        if record.is_current { "current" } else { "superseded" }
    );
    if let Some(old) = record.supersedes.and_then(|id| ledger.find(id)) {
        println!("Supersedes:  {}", old.number);
    }

    if !record.lines.is_empty() {
        let rows: Vec<LineRow> = record
            .lines
            .iter()
            .map(|l| LineRow {
                category: l.category.to_string(),
                description: l.description.clone(),
                quantity: l.quantity,
                unit_price: format_yen(l.unit_price),
                amount: format_yen(l.amount),
                deducted: format_yen(l.deduction + l.rebate),
                taxable: if l.taxable { "yes" } else { "no" }.to_string(),
            })
            .collect();
        println!();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    println!();
    println!("Membership:        {}", format_yen(totals.membership_total));
    println!("Material:          {}", format_yen(totals.material_total));
    println!("Expense:           {}", format_yen(totals.expense_total));
    println!("Adjustment:        {}", format_yen(totals.adjustment_total));
    println!("(-) Deductions:    {}", format_yen(totals.deductions));
    println!("Subtotal:          {}", format_yen(totals.subtotal));
    println!("Tax:               {}", format_yen(totals.tax_amount));
    println!("Total:             {}", format_yen(totals.total_amount));
    println!("(-) HQ deduction:  {}", format_yen(totals.headquarters_deduction));
    println!("(-) Bank transfer: {}", format_yen(totals.bank_transfer_deduction));
    println!("Payable:           {}", format_yen(totals.payable_amount));
    println!("(+) Previous:      {}", format_yen(totals.previous_balance));
    println!("(-) Received:      {}", format_yen(totals.payment_received));
    println!("Remaining:         {}", format_yen(totals.remaining_balance));

    Ok(())
}

/// Record a payment received from a unit
fn cmd_add_payment(
    cfg_dir: &Path,
    unit_code: &str,
    month: &str,
    amount: i64,
    date: Option<String>,
) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let units = load_units(cfg_dir)?;
    let unit_code: UnitCode = unit_code.parse()?;
    lookup_unit(&units, &unit_code)?;
    let month: BillingMonth = month.parse()?;
    let date = parse_date_arg(date)?;

    let mut ledger = load_ledger(cfg_dir)?;
    ledger.record_payment(unit_code.clone(), month, amount, date)?;
    save_ledger(cfg_dir, &ledger)?;

    println!(
        "Recorded {} payment from {} for {} (regenerate to update the balance)",
        format_yen(amount),
        unit_code,
        month
    );

    Ok(())
}

/// Set the delivery status of an invoice
fn cmd_mark(cfg_dir: &Path, number: &str, status: &str) -> Result<()> {
    ensure_initialized(cfg_dir)?;

    let status: InvoiceStatus = status.parse()?;
    let mut ledger = load_ledger(cfg_dir)?;
    let record = ledger.set_status(number, status)?;
    println!("Marked {} as {}", record.number, record.status);
    save_ledger(cfg_dir, &ledger)?;

    Ok(())
}

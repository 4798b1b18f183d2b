mod ledger;
mod settings;
mod unit;

pub use ledger::{Ledger, Payment};
pub use settings::{BillingConfig, BillingSettings, Company, Config, DeductionRule, RateValue};
pub use unit::Unit;

use crate::error::{Result, SettleError};
use crate::model::UnitCode;
use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the config directory path (XDG config dir, falling back to ~/.settle/)
pub fn config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "settle") {
        return Ok(proj_dirs.config_dir().to_path_buf());
    }

    let home = std::env::var_os("HOME").map(PathBuf::from).ok_or_else(|| {
        SettleError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        ))
    })?;

    Ok(home.join(".settle"))
}

/// Directory holding the fee source CSV files
pub fn sources_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("sources")
}

/// Load the main config.toml
pub fn load_config(config_dir: &Path) -> Result<Config> {
    let path = config_dir.join("config.toml");
    if !path.exists() {
        return Err(SettleError::ConfigFileNotFound(path));
    }
    let content = fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| SettleError::ConfigParse { path, source: e })
}

/// Load units.toml, ordered by unit code
pub fn load_units(config_dir: &Path) -> Result<BTreeMap<UnitCode, Unit>> {
    let path = config_dir.join("units.toml");
    if !path.exists() {
        return Err(SettleError::ConfigFileNotFound(path));
    }
    let content = fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| SettleError::ConfigParse { path, source: e })
}

/// Load state.toml (empty ledger if missing)
pub fn load_ledger(config_dir: &Path) -> Result<Ledger> {
    let path = config_dir.join("state.toml");
    if !path.exists() {
        return Ok(Ledger::default());
    }
    let content = fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| SettleError::ConfigParse { path, source: e })
}

/// Save state.toml
pub fn save_ledger(config_dir: &Path, ledger: &Ledger) -> Result<()> {
    let path = config_dir.join("state.toml");
    let content = toml::to_string_pretty(ledger)?;
    fs::write(path, content)?;
    Ok(())
}

/// Template content for config.toml
pub const CONFIG_TEMPLATE: &str = r#"[company]
name = "Headquarters"
# address = "1-1 Marunouchi, Chiyoda-ku, Tokyo"   # optional
# email = "billing@example.jp"                    # optional
# registration_number = "T1234567890123"          # optional

[billing]
tax_rate = 0.10                   # required
rebate_rate = 0                   # yen per member on aigran lines
aigran_threshold = 1              # minimum quantity for the rebate
intra_org_destinations = ["HQ"]   # material deliveries offset in full
number_format = "{month}-{seq:04}"  # e.g., 202511-0001
max_reported_errors = 10
import_chunk_size = 100

# Payment-side deductions applied after tax, per unit type.
[deductions.branch]
headquarters = 0
bank_transfer = true

[deductions.classroom]
headquarters = 0
bank_transfer = false
"#;

/// Template content for units.toml
pub const UNITS_TEMPLATE: &str = r#"# Define your organizational units here. The table name is the unit code
# used by the generate command and in the source CSV files.
#
# Example:
#   settle generate --unit 1110001 --month 2025-11

[1110001]
name = "Example Branch"
unit_type = "branch"
# contact = "Hanako Sato"       # optional
# email = "branch@example.jp"   # optional
"#;

/// Header lines written for the source CSV files on init
pub const SOURCE_HEADERS: [(&str, &str); 3] = [
    (
        "membership.csv",
        "unit_code,billing_month,description,quantity,unit_price,excluded,bank_transfer,aigran,taxable\n",
    ),
    (
        "material.csv",
        "unit_code,billing_month,description,quantity,unit_price,destination_code,taxable\n",
    ),
    (
        "adjustment.csv",
        "unit_code,billing_month,description,amount,taxable\n",
    ),
];

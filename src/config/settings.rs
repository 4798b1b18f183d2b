use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Result, SettleError};
use crate::money::Yen;

/// Sequence placeholders understood by `format_invoice_number`.
const SEQ_PLACEHOLDERS: [&str; 3] = ["{seq:03}", "{seq:04}", "{seq:05}"];

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub company: Company,
    pub billing: BillingSettings,
    /// Deduction rules keyed by unit type (e.g. `[deductions.branch]`).
    #[serde(default)]
    pub deductions: HashMap<String, DeductionRule>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Company {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub registration_number: Option<String>,
}

/// A rate as written in TOML: `0.10`, `50` or `"0.10"`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum RateValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RateValue {
    fn to_decimal(&self, field: &str) -> Result<Decimal> {
        let text = match self {
            RateValue::Integer(v) => return Ok(Decimal::from(*v)),
            // Display gives the shortest round-trip form, so 0.1 stays 0.1
            RateValue::Float(v) => v.to_string(),
            RateValue::Text(s) => s.trim().to_string(),
        };
        Decimal::from_str(&text)
            .map_err(|_| SettleError::InvalidConfig(format!("{field} '{text}' is not a decimal")))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BillingSettings {
    #[serde(default)]
    pub tax_rate: Option<RateValue>,
    /// Yen rebated per member on aigran lines.
    #[serde(default)]
    pub rebate_rate: Option<RateValue>,
    #[serde(default = "default_aigran_threshold")]
    pub aigran_threshold: i64,
    /// Destination codes that mean delivery inside the organization.
    #[serde(default)]
    pub intra_org_destinations: Vec<String>,
    #[serde(default = "default_number_format")]
    pub number_format: String,
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
    #[serde(default = "default_import_chunk_size")]
    pub import_chunk_size: usize,
}

fn default_aigran_threshold() -> i64 {
    1
}

fn default_number_format() -> String {
    "{month}-{seq:04}".to_string()
}

fn default_max_reported_errors() -> usize {
    10
}

fn default_import_chunk_size() -> usize {
    100
}

/// Payment-side deductions applied after tax for one unit type.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct DeductionRule {
    /// Fixed headquarters offset in yen.
    #[serde(default)]
    pub headquarters: Yen,
    /// Deduct what bank-transfer members already paid headquarters.
    #[serde(default)]
    pub bank_transfer: bool,
}

/// Validated billing parameters handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingConfig {
    pub tax_rate: Decimal,
    pub rebate_rate: Decimal,
    pub aigran_threshold: i64,
    pub intra_org_destinations: Vec<String>,
    pub number_format: String,
    pub max_reported_errors: usize,
    pub import_chunk_size: usize,
}

impl BillingConfig {
    /// Defaults for everything but the tax rate.
    pub fn with_tax_rate(tax_rate: Decimal) -> Self {
        Self {
            tax_rate,
            rebate_rate: Decimal::ZERO,
            aigran_threshold: default_aigran_threshold(),
            intra_org_destinations: Vec::new(),
            number_format: default_number_format(),
            max_reported_errors: default_max_reported_errors(),
            import_chunk_size: default_import_chunk_size(),
        }
    }

    pub fn from_settings(settings: &BillingSettings) -> Result<Self> {
        let tax_rate = settings
            .tax_rate
            .as_ref()
            .ok_or_else(|| SettleError::InvalidConfig("tax_rate is missing".to_string()))?
            .to_decimal("tax_rate")?;
        if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE {
            return Err(SettleError::InvalidConfig(format!(
                "tax_rate {tax_rate} must be between 0 and 1"
            )));
        }

        let rebate_rate = match &settings.rebate_rate {
            Some(v) => v.to_decimal("rebate_rate")?,
            None => Decimal::ZERO,
        };
        if rebate_rate < Decimal::ZERO {
            return Err(SettleError::InvalidConfig(format!(
                "rebate_rate {rebate_rate} must not be negative"
            )));
        }

        if settings.aigran_threshold < 0 {
            return Err(SettleError::InvalidConfig(
                "aigran_threshold must not be negative".to_string(),
            ));
        }
        if !SEQ_PLACEHOLDERS
            .iter()
            .any(|p| settings.number_format.contains(p))
        {
            return Err(SettleError::InvalidConfig(format!(
                "number_format '{}' needs one of {{seq:03}}, {{seq:04}} or {{seq:05}}",
                settings.number_format
            )));
        }
        // Sequences restart every month.
        if !settings.number_format.contains("{month}") {
            return Err(SettleError::InvalidConfig(format!(
                "number_format '{}' has no {{month}} placeholder",
                settings.number_format
            )));
        }
        if settings.import_chunk_size == 0 {
            return Err(SettleError::InvalidConfig(
                "import_chunk_size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            tax_rate,
            rebate_rate,
            aigran_threshold: settings.aigran_threshold,
            intra_org_destinations: settings
                .intra_org_destinations
                .iter()
                .map(|d| d.trim().to_string())
                .collect(),
            number_format: settings.number_format.clone(),
            max_reported_errors: settings.max_reported_errors,
            import_chunk_size: settings.import_chunk_size,
        })
    }

    pub fn is_intra_org(&self, destination_code: &str) -> bool {
        let code = destination_code.trim();
        self.intra_org_destinations.iter().any(|d| d == code)
    }
}

impl Config {
    pub fn billing_config(&self) -> Result<BillingConfig> {
        BillingConfig::from_settings(&self.billing)
    }

    /// Rule for a unit type; types without a table get no deductions.
    pub fn deduction_rule(&self, unit_type: &str) -> DeductionRule {
        match self.deductions.get(unit_type) {
            Some(rule) => rule.clone(),
            None => {
                tracing::debug!(unit_type, "no deduction rule configured");
                DeductionRule::default()
            }
        }
    }
}

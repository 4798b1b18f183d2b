use serde::{Deserialize, Serialize};

/// An organizational unit that receives invoices.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Unit {
    pub name: String,
    /// Selects the `[deductions.<type>]` rule in config.toml.
    pub unit_type: String,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

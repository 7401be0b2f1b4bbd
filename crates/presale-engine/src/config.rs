use std::path::Path;

use presale_crypto::VerifyingKey;
use presale_ledger::ScanConfig;
use presale_types::BPS_DENOMINATOR;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Engine configuration, usually loaded from TOML.
///
/// ```toml
/// slippage_bps = 50
/// infer_legacy_team_format = false
/// trusted_operators = ["5f1c...e2"]
///
/// [scan]
/// chunk_size = 2000
/// max_lookback = 200000
/// chunk_retries = 2
/// require_full_scan = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scan: ScanConfig,
    /// Slippage tolerance applied to both sides of the liquidity pair.
    pub slippage_bps: u16,
    /// Classify team allocations with no declared format by magnitude.
    pub infer_legacy_team_format: bool,
    /// Hex Ed25519 keys whose grants are accepted.
    pub trusted_operators: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            slippage_bps: 50,
            infer_legacy_team_format: false,
            trusted_operators: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.slippage_bps > BPS_DENOMINATOR {
            return Err(EngineError::Config(format!(
                "slippage_bps {} above 10000",
                self.slippage_bps
            )));
        }
        self.scan.validate()?;
        self.trusted_keys()?;
        Ok(())
    }

    /// Parse `trusted_operators`.
    pub fn trusted_keys(&self) -> EngineResult<Vec<VerifyingKey>> {
        self.trusted_operators
            .iter()
            .map(|hex| {
                VerifyingKey::from_hex(hex)
                    .map_err(|e| EngineError::Config(format!("trusted operator {hex}: {e}")))
            })
            .collect()
    }

    /// Builder: trust `key`.
    pub fn trust(mut self, key: &VerifyingKey) -> Self {
        self.trusted_operators.push(key.to_hex());
        self
    }
}

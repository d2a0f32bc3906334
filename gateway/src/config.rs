//! # Gateway Configuration & Ledger Constants
//!
//! Two kinds of values live here. The constants at the top are facts about
//! the XRP Ledger protocol itself (result codes, account flags, the
//! precision of XRP) and are not up for negotiation. [`GatewaySettings`]
//! holds the operator-tunable knobs, loaded from a TOML file with a sane
//! default for every field so an empty file is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset::Asset;

// ---------------------------------------------------------------------------
// Ledger Protocol Constants
// ---------------------------------------------------------------------------

/// Asset identifier of the native currency.
pub const NATIVE_ASSET_ID: &str = "XRP";

/// Currency code the ledger uses for the native currency.
pub const NATIVE_CURRENCY: &str = "XRP";

/// Decimal places of XRP. One XRP is one million drops.
pub const NATIVE_ACCURACY: u32 = 6;

/// Engine result for a transaction the node accepted and relayed.
pub const RESULT_SUCCESS: &str = "tesSUCCESS";

/// The account sequence already moved past this transaction.
pub const RESULT_PAST_SEQ: &str = "tefPAST_SEQ";

/// `LastLedgerSequence` already passed.
pub const RESULT_MAX_LEDGER: &str = "tefMAX_LEDGER";

/// Prefix of malformed-transaction result codes.
pub const RESULT_MALFORMED_PREFIX: &str = "tem";

/// `tfFullyCanonicalSig`, required on every transaction we prepare.
pub const TF_FULLY_CANONICAL_SIG: u32 = 0x8000_0000;

/// Account root flags (`lsf*`).
pub const LSF_DEFAULT_RIPPLE: u32 = 0x0080_0000;
pub const LSF_REQUIRE_DEST_TAG: u32 = 0x0002_0000;
pub const LSF_REQUIRE_AUTH: u32 = 0x0004_0000;
pub const LSF_DISALLOW_XRP: u32 = 0x0008_0000;

/// Version byte of a classic account address.
pub const ACCOUNT_ID_VERSION: u8 = 0;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default `rippled` JSON-RPC endpoint (admin port on localhost).
pub const DEFAULT_LEDGER_URL: &str = "http://127.0.0.1:5005";

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 5000;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 5001;

/// How many ledgers a prepared transaction stays valid for.
pub const DEFAULT_MAX_LEDGER_VERSION_OFFSET: u32 = 20;

/// Separator between a base address and its destination tag.
pub const DEFAULT_ADDRESS_SEPARATOR: char = '$';

/// Synthetic block numbering for simulated transfers: `index * scale + offset`.
pub const DEFAULT_BLOCK_SCALE: u64 = 10;
pub const DEFAULT_BLOCK_OFFSET: u64 = 1;

/// Page size used when a list endpoint is called without `take`.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Upper bound for `take` on list endpoints.
pub const MAX_PAGE_SIZE: usize = 1_000;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Operator-facing settings for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Deployment name reported by `/isalive`.
    pub environment: String,
    /// `rippled` JSON-RPC endpoint. `memory://` selects the scripted ledger.
    pub ledger_url: String,
    /// Per-request timeout for ledger calls, in seconds.
    pub ledger_timeout_secs: u64,
    /// Ledgers a prepared payment stays valid for; becomes the Expiration.
    pub max_ledger_version_offset: u32,
    /// Minimum XRP an account must keep on the ledger.
    pub account_reserve: Decimal,
    /// Multiplier applied to the server's current fee.
    pub fee_cushion: Decimal,
    /// Ceiling for a quoted fee, in XRP.
    pub max_fee: Decimal,
    /// Separator between base address and destination tag.
    pub address_separator: char,
    /// Asset id of the native currency.
    pub native_asset_id: String,
    /// Synthetic block numbering for simulated transfers.
    pub block_scale: u64,
    pub block_offset: u64,
    /// Assets registered at startup. XRP is always registered.
    pub assets: Vec<Asset>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            ledger_url: DEFAULT_LEDGER_URL.to_string(),
            ledger_timeout_secs: 10,
            max_ledger_version_offset: DEFAULT_MAX_LEDGER_VERSION_OFFSET,
            account_reserve: Decimal::new(20, 0),
            fee_cushion: Decimal::new(12, 1),
            max_fee: Decimal::new(2, 0),
            address_separator: DEFAULT_ADDRESS_SEPARATOR,
            native_asset_id: NATIVE_ASSET_ID.to_string(),
            block_scale: DEFAULT_BLOCK_SCALE,
            block_offset: DEFAULT_BLOCK_OFFSET,
            assets: Vec::new(),
        }
    }
}

impl GatewaySettings {
    /// Load settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse settings from a TOML string and validate them.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let settings: GatewaySettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render the settings back to TOML (used by `init`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.block_scale == 0 {
            return Err(ConfigError::Invalid("block_scale must be positive".into()));
        }
        if self.max_ledger_version_offset == 0 {
            return Err(ConfigError::Invalid(
                "max_ledger_version_offset must be positive".into(),
            ));
        }
        if self.account_reserve.is_sign_negative() || self.max_fee.is_sign_negative() {
            return Err(ConfigError::Invalid(
                "account_reserve and max_fee must not be negative".into(),
            ));
        }
        if self.fee_cushion < Decimal::ONE {
            return Err(ConfigError::Invalid("fee_cushion must be at least 1".into()));
        }
        for asset in &self.assets {
            if asset.accuracy > 15 {
                return Err(ConfigError::Invalid(format!(
                    "asset {} has accuracy {} (max 15)",
                    asset.asset_id, asset.accuracy
                )));
            }
        }
        Ok(())
    }

    /// Ledger call timeout as a `Duration`.
    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    /// The native asset plus every configured issued asset.
    pub fn registered_assets(&self) -> Vec<Asset> {
        let mut assets = vec![Asset::native(&self.native_asset_id)];
        assets.extend(
            self.assets
                .iter()
                .filter(|a| a.asset_id != self.native_asset_id)
                .cloned(),
        );
        assets
    }

    /// Synthetic block number for a simulated transfer observed at `ledger_index`.
    pub fn simulated_block(&self, ledger_index: u32) -> u64 {
        u64::from(ledger_index) * self.block_scale + self.block_offset
    }
}

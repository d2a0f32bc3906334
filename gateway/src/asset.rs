//! Asset metadata and base-unit arithmetic.
//!
//! Amounts cross the wire and sit in storage as integers in the asset's
//! smallest unit (drops for XRP). Decimal amounts exist for the ledger's
//! benefit and for humans. The conversion is a pure scale shift, so
//! `to_base_unit(from_base_unit(n)) == n` for every `n` that fits.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{NATIVE_ACCURACY, NATIVE_CURRENCY};
use crate::error::{GatewayError, GatewayResult};

/// An asset the gateway can move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Platform asset identifier. Also the ledger currency code for issued assets.
    pub asset_id: String,
    /// Issuer address; empty for the native asset.
    #[serde(default)]
    pub address: String,
    /// Decimal places of the smallest unit.
    pub accuracy: u32,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl Asset {
    /// The native asset under the given id.
    pub fn native(asset_id: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            address: String::new(),
            accuracy: NATIVE_ACCURACY,
            name: NATIVE_CURRENCY.to_string(),
        }
    }

    pub fn is_native(&self) -> bool {
        self.address.is_empty()
    }

    /// Ledger currency code for this asset.
    pub fn currency(&self) -> &str {
        if self.is_native() {
            NATIVE_CURRENCY
        } else {
            &self.asset_id
        }
    }

    /// Issuer for issued assets, `None` for XRP.
    pub fn issuer(&self) -> Option<&str> {
        if self.is_native() {
            None
        } else {
            Some(&self.address)
        }
    }

    /// Base units → decimal amount.
    pub fn from_base_unit(&self, amount: u64) -> Decimal {
        let mut value = Decimal::from(amount);
        // `set_scale` divides by 10^accuracy without rounding.
        value
            .set_scale(value.scale() + self.accuracy)
            .unwrap_or_default();
        value.normalize()
    }

    /// Decimal amount → base units. Fails if the amount is negative, has more
    /// precision than the asset, or does not fit in a `u64`.
    pub fn to_base_unit(&self, amount: Decimal) -> GatewayResult<u64> {
        if amount.is_sign_negative() {
            return Err(GatewayError::InvalidAmount(format!(
                "{amount} is negative"
            )));
        }
        let scaled = amount * Decimal::from(10u64.pow(self.accuracy));
        if scaled.fract() != Decimal::ZERO {
            return Err(GatewayError::InvalidAmount(format!(
                "{amount} exceeds {} decimal places of {}",
                self.accuracy, self.asset_id
            )));
        }
        scaled.to_u64().ok_or_else(|| {
            GatewayError::InvalidAmount(format!("{amount} is out of range for {}", self.asset_id))
        })
    }

    /// Base-unit value of `amount`, rounding any excess precision up. Used
    /// for fees, where rounding down would under-pay.
    pub fn to_base_unit_ceil(&self, amount: Decimal) -> GatewayResult<u64> {
        let rounded = amount.round_dp_with_strategy(
            self.accuracy,
            rust_decimal::RoundingStrategy::AwayFromZero,
        );
        self.to_base_unit(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usd() -> Asset {
        Asset {
            asset_id: "USD".into(),
            address: "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh".into(),
            accuracy: 2,
            name: "US Dollar".into(),
        }
    }

    #[test]
    fn drops_to_xrp() {
        let xrp = Asset::native("XRP");
        assert_eq!(xrp.from_base_unit(1_000_000), dec!(1));
        assert_eq!(xrp.from_base_unit(12), dec!(0.000012));
        assert_eq!(xrp.from_base_unit(0), dec!(0));
    }

    #[test]
    fn xrp_to_drops() {
        let xrp = Asset::native("XRP");
        assert_eq!(xrp.to_base_unit(dec!(1.5)).unwrap(), 1_500_000);
        assert_eq!(xrp.to_base_unit(dec!(0.000001)).unwrap(), 1);
    }

    #[test]
    fn base_unit_round_trip_is_exact() {
        let xrp = Asset::native("XRP");
        let assets = [xrp, usd()];
        for asset in &assets {
            for n in [1u64, 7, 99, 100, 123_456_789, 100_000_000_000_000_000] {
                assert_eq!(asset.to_base_unit(asset.from_base_unit(n)).unwrap(), n);
            }
        }
    }

    #[test]
    fn rejects_excess_precision_and_negatives() {
        let asset = usd();
        assert!(matches!(
            asset.to_base_unit(dec!(1.005)),
            Err(GatewayError::InvalidAmount(_))
        ));
        assert!(matches!(
            asset.to_base_unit(dec!(-1)),
            Err(GatewayError::InvalidAmount(_))
        ));
    }

    #[test]
    fn fee_rounds_up() {
        let xrp = Asset::native("XRP");
        assert_eq!(xrp.to_base_unit_ceil(dec!(0.0000121)).unwrap(), 13);
        assert_eq!(xrp.to_base_unit_ceil(dec!(0.000012)).unwrap(), 12);
    }

    #[test]
    fn currency_and_issuer() {
        let xrp = Asset::native("XRP");
        assert_eq!(xrp.currency(), "XRP");
        assert_eq!(xrp.issuer(), None);

        let usd = usd();
        assert_eq!(usd.currency(), "USD");
        assert_eq!(usd.issuer(), Some("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh"));
    }
}

//! Payment builder.
//!
//! Turns a build request into an unsigned context and a `Built` operation.
//! Every check (state, asset, amount, fee, balances) runs before anything is
//! written, so a failed build leaves storage exactly as it found it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use super::context::{UnsignedContext, UnsignedPayment};
use super::split_address;
use crate::address::SplitAddress;
use crate::asset::Asset;
use crate::config::GatewaySettings;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::{Instructions, LedgerAmount, LedgerBalance, LedgerClient, PaymentEndpoint, PaymentSpec};
use crate::storage::{GatewayDB, Operation};

/// Input of [`PaymentBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub operation_id: String,
    pub from_address: String,
    pub to_address: String,
    pub asset_id: String,
    pub amount_in_base_unit: u64,
    /// Deduct the network fee from the amount (native asset only).
    pub include_fee: bool,
}

/// Currency key for balance requirements: `(currency, issuer)`.
type CurrencyKey = (String, Option<String>);

pub struct PaymentBuilder {
    db: GatewayDB,
    ledger: Arc<dyn LedgerClient>,
    settings: Arc<GatewaySettings>,
}

impl PaymentBuilder {
    pub fn new(db: GatewayDB, ledger: Arc<dyn LedgerClient>, settings: Arc<GatewaySettings>) -> Self {
        Self {
            db,
            ledger,
            settings,
        }
    }

    pub async fn build(&self, request: BuildRequest) -> GatewayResult<UnsignedContext> {
        if let Some(existing) = self.db.operations().get(&request.operation_id)? {
            if existing.is_running() {
                return Err(existing.conflict());
            }
        }

        let asset = self
            .db
            .assets()
            .get(&request.asset_id)?
            .ok_or_else(|| GatewayError::UnknownAsset(request.asset_id.clone()))?;

        if request.amount_in_base_unit == 0 {
            return Err(GatewayError::InvalidAmount("amount must be positive".into()));
        }

        let separator = self.settings.address_separator;
        let from = split_address(&request.from_address, separator)?;
        let to = split_address(&request.to_address, separator)?;

        let (operation, context) = if from.base == to.base {
            self.build_simulated(&request, &asset)?
        } else {
            self.build_payment(&request, &asset, &from, &to).await?
        };

        self.db.operations().save_built(&operation)?;
        Ok(context)
    }

    /// Same-owner transfer: checked against the gateway's own books, free,
    /// never expires.
    fn build_simulated(
        &self,
        request: &BuildRequest,
        asset: &Asset,
    ) -> GatewayResult<(Operation, UnsignedContext)> {
        let available = self
            .db
            .balances()
            .get(&request.from_address, &asset.asset_id)?
            .map(|b| b.amount_in_base_unit)
            .unwrap_or(0);

        if i128::from(available) < i128::from(request.amount_in_base_unit) {
            return Err(GatewayError::NotEnoughBalance {
                currency: asset.asset_id.clone(),
                required: asset.from_base_unit(request.amount_in_base_unit).to_string(),
                available: available.to_string(),
            });
        }

        let operation = Operation {
            operation_id: request.operation_id.clone(),
            asset_id: asset.asset_id.clone(),
            from_address: request.from_address.clone(),
            to_address: request.to_address.clone(),
            amount: asset.from_base_unit(request.amount_in_base_unit),
            amount_in_base_unit: request.amount_in_base_unit,
            fee: Decimal::ZERO,
            fee_in_base_unit: 0,
            include_fee: request.include_fee,
            build_time: Utc::now(),
            expiration: None,
            ..Operation::default()
        };
        Ok((operation, UnsignedContext::Simulated))
    }

    async fn build_payment(
        &self,
        request: &BuildRequest,
        asset: &Asset,
        from: &SplitAddress,
        to: &SplitAddress,
    ) -> GatewayResult<(Operation, UnsignedContext)> {
        let native = Asset::native(&self.settings.native_asset_id);
        let native_key: CurrencyKey = (native.currency().to_string(), None);
        let fee = self.ledger.get_fee().await?;

        let mut amount = asset.from_base_unit(request.amount_in_base_unit);
        let mut required: BTreeMap<CurrencyKey, Decimal> = BTreeMap::new();
        required.insert(native_key.clone(), self.settings.account_reserve);

        if asset.is_native() {
            if request.include_fee {
                if amount < fee {
                    return Err(GatewayError::AmountTooSmall {
                        amount: amount.to_string(),
                        fee: fee.to_string(),
                    });
                }
                amount -= fee;
            }
            *required.entry(native_key).or_default() += amount + fee;
        } else {
            *required.entry(native_key).or_default() += fee;
            *required
                .entry((asset.currency().to_string(), asset.issuer().map(str::to_string)))
                .or_default() += amount;
        }

        let balances = self.ledger.get_balances(&from.base).await?;
        for ((currency, issuer), needed) in &required {
            let available = available_balance(&balances, currency, issuer.as_deref());
            if available < *needed {
                tracing::debug!(
                    operation_id = %request.operation_id,
                    address = %from.base,
                    currency = %currency,
                    %needed,
                    %available,
                    "insufficient balance"
                );
                return Err(GatewayError::NotEnoughBalance {
                    currency: currency.clone(),
                    required: needed.to_string(),
                    available: available.to_string(),
                });
            }
        }

        let ledger_amount = LedgerAmount {
            currency: asset.currency().to_string(),
            counterparty: asset.issuer().map(str::to_string),
            value: amount,
        };
        let payment = PaymentSpec {
            source: PaymentEndpoint {
                address: from.base.clone(),
                tag: from.tag,
                amount: ledger_amount.clone(),
            },
            destination: PaymentEndpoint {
                address: to.base.clone(),
                tag: to.tag,
                amount: ledger_amount,
            },
        };
        let instructions = Instructions {
            fee,
            max_ledger_version_offset: self.settings.max_ledger_version_offset,
        };
        let prepared = self
            .ledger
            .prepare_payment(&from.base, &payment, &instructions)
            .await?;

        let operation = Operation {
            operation_id: request.operation_id.clone(),
            asset_id: asset.asset_id.clone(),
            from_address: request.from_address.clone(),
            to_address: request.to_address.clone(),
            amount,
            amount_in_base_unit: asset.to_base_unit(amount)?,
            fee,
            fee_in_base_unit: native.to_base_unit_ceil(fee)?,
            include_fee: request.include_fee,
            build_time: Utc::now(),
            expiration: Some(prepared.max_ledger_version),
            ..Operation::default()
        };
        Ok((operation, UnsignedContext::Payment(UnsignedPayment::from(prepared))))
    }
}

fn available_balance(balances: &[LedgerBalance], currency: &str, issuer: Option<&str>) -> Decimal {
    balances
        .iter()
        .filter(|b| b.currency == currency && b.counterparty.as_deref() == issuer)
        .map(|b| b.value)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ScriptedLedger;
    use crate::storage::OperationState;
    use rust_decimal_macros::dec;

    const ISSUER: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    struct Fixture {
        db: GatewayDB,
        ledger: Arc<ScriptedLedger>,
        builder: PaymentBuilder,
    }

    fn fixture() -> Fixture {
        let db = GatewayDB::open_temporary().unwrap();
        db.assets().upsert(&Asset::native("XRP")).unwrap();
        db.assets()
            .upsert(&Asset {
                asset_id: "USD".into(),
                address: ISSUER.into(),
                accuracy: 2,
                name: "US Dollar".into(),
            })
            .unwrap();

        let ledger = Arc::new(ScriptedLedger::new(dec!(0.00001), 1_000));
        let settings = Arc::new(GatewaySettings {
            account_reserve: dec!(0.00002),
            ..GatewaySettings::default()
        });
        let builder = PaymentBuilder::new(db.clone(), ledger.clone(), settings);
        Fixture { db, ledger, builder }
    }

    fn request(id: &str, from: &str, to: &str, asset: &str, amount: u64) -> BuildRequest {
        BuildRequest {
            operation_id: id.into(),
            from_address: from.into(),
            to_address: to.into(),
            asset_id: asset.into(),
            amount_in_base_unit: amount,
            include_fee: false,
        }
    }

    #[tokio::test]
    async fn cross_address_payment_expires_at_ledger_ceiling() {
        let f = fixture();
        f.ledger.set_balance("rA", "XRP", None, dec!(10));

        let context = f.builder.build(request("op", "rA", "rB$7", "XRP", 1_000_000)).await.unwrap();
        let UnsignedContext::Payment(payment) = context else {
            panic!("expected a real payment");
        };
        assert_eq!(payment.instructions.max_ledger_version, 1_020);

        let op = f.db.operations().get("op").unwrap().unwrap();
        assert_eq!(op.state(), OperationState::Built);
        assert_eq!(op.expiration, Some(1_020));
        assert_eq!(op.fee_in_base_unit, 10);
        assert_eq!(op.amount_in_base_unit, 1_000_000);
        assert_eq!(f.db.operations().expired_up_to(1_020).unwrap(), vec!["op"]);
    }

    #[tokio::test]
    async fn include_fee_deducts_from_native_amount() {
        let f = fixture();
        f.ledger.set_balance("rA", "XRP", None, dec!(10));

        let mut req = request("op", "rA", "rB", "XRP", 1_000_000);
        req.include_fee = true;
        f.builder.build(req).await.unwrap();

        let op = f.db.operations().get("op").unwrap().unwrap();
        assert_eq!(op.amount_in_base_unit, 999_990);
        assert_eq!(op.amount, dec!(0.99999));
    }

    #[tokio::test]
    async fn include_fee_below_fee_is_too_small() {
        let f = fixture();
        f.ledger.set_balance("rA", "XRP", None, dec!(10));

        let mut req = request("op", "rA", "rB", "XRP", 5);
        req.include_fee = true;
        let err = f.builder.build(req).await.unwrap_err();
        assert!(matches!(err, GatewayError::AmountTooSmall { .. }));
        assert!(f.db.operations().get("op").unwrap().is_none());
    }

    #[tokio::test]
    async fn issued_asset_needs_trust_line_balance_and_xrp_for_fee() {
        let f = fixture();
        f.ledger.set_balance("rA", "XRP", None, dec!(1));
        f.ledger.set_balance("rA", "USD", Some(ISSUER), dec!(5));

        let err = f
            .builder
            .build(request("op", "rA", "rB", "USD", 600))
            .await
            .unwrap_err();
        assert!(
            matches!(err, GatewayError::NotEnoughBalance { ref currency, .. } if currency == "USD")
        );

        f.builder.build(request("op", "rA", "rB", "USD", 500)).await.unwrap();
        let op = f.db.operations().get("op").unwrap().unwrap();
        assert_eq!(op.amount, dec!(5));
    }

    #[tokio::test]
    async fn unknown_asset_and_zero_amount_are_rejected() {
        let f = fixture();
        assert!(matches!(
            f.builder.build(request("op", "rA", "rB", "EUR", 1)).await,
            Err(GatewayError::UnknownAsset(_))
        ));
        assert!(matches!(
            f.builder.build(request("op", "rA", "rB", "XRP", 0)).await,
            Err(GatewayError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn same_owner_uses_gateway_books() {
        let f = fixture();
        f.db.balances().upsert("rA$1", "XRP", "deposit", dec!(2), 2_000_000, 1).unwrap();

        let context = f
            .builder
            .build(request("op", "rA$1", "rA$2", "XRP", 1_000_000))
            .await
            .unwrap();
        assert!(context.is_simulated());
        assert!(f.ledger.submitted().is_empty());

        let op = f.db.operations().get("op").unwrap().unwrap();
        assert_eq!(op.fee, Decimal::ZERO);
        assert_eq!(op.expiration, None);

        let err = f
            .builder
            .build(request("op-2", "rA$1", "rA$2", "XRP", 3_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotEnoughBalance { .. }));
    }

    #[tokio::test]
    async fn running_operation_cannot_be_rebuilt() {
        let f = fixture();
        f.ledger.set_balance("rA", "XRP", None, dec!(10));
        f.builder.build(request("op", "rA", "rB", "XRP", 1)).await.unwrap();
        f.db.operations().mark_sent("op", Utc::now(), None).unwrap();

        assert!(matches!(
            f.builder.build(request("op", "rA", "rB", "XRP", 1)).await,
            Err(GatewayError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn ledger_outage_propagates() {
        let f = fixture();
        f.ledger.set_offline(true);
        assert!(matches!(
            f.builder.build(request("op", "rA", "rB", "XRP", 1)).await,
            Err(GatewayError::Ledger(_))
        ));
    }
}

//! In-process ledger.
//!
//! Holds fee, ledger index, balances and account flags in memory and answers
//! `submit` from a queue of scripted result codes (`tesSUCCESS` once the
//! queue is empty). Every submitted blob is recorded so tests can assert how
//! many times a transaction actually reached "the ledger".

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

use super::{
    AccountInfo, AccountSettings, Instructions, LedgerBalance, LedgerClient, LedgerError,
    LedgerResult, PaymentSpec, PreparedPayment, SubmitResult,
};
use crate::config::{NATIVE_CURRENCY, RESULT_SUCCESS};

#[derive(Debug, Default)]
struct State {
    fee: Decimal,
    ledger_index: u32,
    balances: HashMap<String, Vec<LedgerBalance>>,
    flags: HashMap<String, u32>,
    sequences: HashMap<String, u32>,
    submit_results: VecDeque<String>,
    submitted: Vec<String>,
    offline: bool,
    ledger_step: u32,
    latency: Option<Duration>,
}

/// A scriptable [`LedgerClient`].
#[derive(Debug, Default)]
pub struct ScriptedLedger {
    state: Mutex<State>,
}

impl ScriptedLedger {
    pub fn new(fee: Decimal, ledger_index: u32) -> Self {
        Self {
            state: Mutex::new(State {
                fee,
                ledger_index,
                ..State::default()
            }),
        }
    }

    pub fn set_fee(&self, fee: Decimal) {
        self.state.lock().fee = fee;
    }

    pub fn set_ledger_index(&self, ledger_index: u32) {
        self.state.lock().ledger_index = ledger_index;
    }

    /// Close `step` ledgers after every ledger index query.
    pub fn set_ledger_step(&self, step: u32) {
        self.state.lock().ledger_step = step;
    }

    /// Delay ledger index answers, so concurrent callers interleave.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Set (or replace) the balance of `currency` issued by `counterparty`.
    pub fn set_balance(&self, address: &str, currency: &str, counterparty: Option<&str>, value: Decimal) {
        let mut state = self.state.lock();
        let lines = state.balances.entry(address.to_string()).or_default();
        lines.retain(|b| !(b.currency == currency && b.counterparty.as_deref() == counterparty));
        lines.push(LedgerBalance {
            currency: currency.to_string(),
            counterparty: counterparty.map(str::to_string),
            value,
        });
    }

    pub fn set_flags(&self, address: &str, flags: u32) {
        self.state.lock().flags.insert(address.to_string(), flags);
    }

    /// Queue the result code for the next `submit`.
    pub fn push_submit_result(&self, result_code: &str) {
        self.state
            .lock()
            .submit_results
            .push_back(result_code.to_string());
    }

    /// Make every call fail as if the node were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Blobs submitted so far, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().submitted.clone()
    }

    fn check_online(state: &State) -> LedgerResult<()> {
        if state.offline {
            return Err(LedgerError::Unavailable("scripted ledger is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn get_fee(&self) -> LedgerResult<Decimal> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.fee)
    }

    async fn get_account_info(&self, address: &str) -> LedgerResult<AccountInfo> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        let lines = state
            .balances
            .get(address)
            .ok_or_else(|| LedgerError::AccountNotFound(address.to_string()))?;
        let xrp = lines
            .iter()
            .find(|b| b.currency == NATIVE_CURRENCY && b.counterparty.is_none())
            .map(|b| b.value)
            .unwrap_or_default();
        let drops = (xrp * Decimal::from(1_000_000u64))
            .trunc()
            .to_u64()
            .unwrap_or_default();
        Ok(AccountInfo {
            address: address.to_string(),
            balance_drops: drops,
            sequence: state.sequences.get(address).copied().unwrap_or(1),
            owner_count: 0,
            flags: state.flags.get(address).copied().unwrap_or(0),
        })
    }

    async fn get_account_settings(&self, address: &str) -> LedgerResult<Option<AccountSettings>> {
        match self.get_account_info(address).await {
            Ok(info) => Ok(Some(AccountSettings {
                require_destination_tag: info.flags & crate::config::LSF_REQUIRE_DEST_TAG != 0,
                require_authorization: info.flags & crate::config::LSF_REQUIRE_AUTH != 0,
                disallow_incoming_xrp: info.flags & crate::config::LSF_DISALLOW_XRP != 0,
                default_ripple: info.flags & crate::config::LSF_DEFAULT_RIPPLE != 0,
            })),
            Err(LedgerError::AccountNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_balances(&self, address: &str) -> LedgerResult<Vec<LedgerBalance>> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.balances.get(address).cloned().unwrap_or_default())
    }

    async fn get_ledger_index(&self) -> LedgerResult<u32> {
        let (ledger_index, latency) = {
            let mut state = self.state.lock();
            Self::check_online(&state)?;
            let current = state.ledger_index;
            state.ledger_index = current.saturating_add(state.ledger_step);
            (current, state.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(ledger_index)
    }

    async fn prepare_payment(
        &self,
        address: &str,
        payment: &PaymentSpec,
        instructions: &Instructions,
    ) -> LedgerResult<PreparedPayment> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        let sequence = *state.sequences.entry(address.to_string()).or_insert(1);
        let max_ledger_version = state.ledger_index + instructions.max_ledger_version_offset;
        let tx = json!({
            "TransactionType": "Payment",
            "Account": address,
            "Destination": payment.destination.address,
            "Amount": payment.destination.amount.value.to_string(),
            "Currency": payment.destination.amount.currency,
            "Fee": instructions.fee.to_string(),
            "Sequence": sequence,
            "LastLedgerSequence": max_ledger_version,
            "SourceTag": payment.source.tag,
            "DestinationTag": payment.destination.tag,
        });
        Ok(PreparedPayment {
            tx_json: tx.to_string(),
            fee: instructions.fee,
            sequence,
            max_ledger_version,
        })
    }

    async fn submit(&self, signed_transaction: &str) -> LedgerResult<SubmitResult> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        state.submitted.push(signed_transaction.to_string());
        let result_code = state
            .submit_results
            .pop_front()
            .unwrap_or_else(|| RESULT_SUCCESS.to_string());
        Ok(SubmitResult {
            raw: json!({ "engine_result": result_code }),
            result_message: String::new(),
            result_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn replaces_balances_per_currency() {
        let ledger = ScriptedLedger::new(dec!(0.00001), 100);
        ledger.set_balance("rA", "XRP", None, dec!(5));
        ledger.set_balance("rA", "XRP", None, dec!(7));
        ledger.set_balance("rA", "USD", Some("rIssuer"), dec!(1));

        let balances = ledger.get_balances("rA").await.unwrap();
        assert_eq!(balances.len(), 2);
        let info = ledger.get_account_info("rA").await.unwrap();
        assert_eq!(info.balance_drops, 7_000_000);
    }

    #[tokio::test]
    async fn ledger_index_advances_by_step() {
        let ledger = ScriptedLedger::new(dec!(0.00001), 100);
        ledger.set_ledger_step(2);
        assert_eq!(ledger.get_ledger_index().await.unwrap(), 100);
        assert_eq!(ledger.get_ledger_index().await.unwrap(), 102);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let ledger = ScriptedLedger::new(dec!(0.00001), 100);
        assert!(matches!(
            ledger.get_account_info("rNobody").await,
            Err(LedgerError::AccountNotFound(_))
        ));
        assert_eq!(ledger.get_account_settings("rNobody").await.unwrap(), None);
        assert!(ledger.get_balances("rNobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_submit_results_are_consumed_in_order() {
        let ledger = ScriptedLedger::new(dec!(0.00001), 100);
        ledger.push_submit_result("tefPAST_SEQ");

        assert_eq!(ledger.submit("blob-1").await.unwrap().result_code, "tefPAST_SEQ");
        assert_eq!(ledger.submit("blob-2").await.unwrap().result_code, "tesSUCCESS");
        assert_eq!(ledger.submitted(), vec!["blob-1", "blob-2"]);
    }

    #[tokio::test]
    async fn offline_ledger_fails_every_call() {
        let ledger = ScriptedLedger::new(dec!(0.00001), 100);
        ledger.set_offline(true);
        assert!(matches!(
            ledger.get_ledger_index().await,
            Err(LedgerError::Unavailable(_))
        ));
    }
}

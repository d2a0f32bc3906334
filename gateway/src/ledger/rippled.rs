//! # rippled JSON-RPC Client
//!
//! Talks to a `rippled` node over its HTTP JSON-RPC port. Requests look like
//! `{"method": "...", "params": [{...}]}` and every answer comes back wrapped
//! in `{"result": {..., "status": "success" | "error"}}`.
//!
//! ## Connection lifecycle
//!
//! The connection handle is created on first use: build the HTTP client,
//! probe `server_info`, remember the node version. It is reused for every
//! later call and dropped when a call fails at the connect level, so the next
//! call goes through the probe again. Timeouts do not drop the handle; a slow
//! node is still a connected node.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};

use super::{
    AccountInfo, AccountSettings, Instructions, LedgerAmount, LedgerBalance, LedgerClient,
    LedgerError, LedgerResult, PaymentSpec, PreparedPayment, SubmitResult,
};
use crate::config::{
    LSF_DEFAULT_RIPPLE, LSF_DISALLOW_XRP, LSF_REQUIRE_AUTH, LSF_REQUIRE_DEST_TAG, NATIVE_ACCURACY,
    NATIVE_CURRENCY, TF_FULLY_CANONICAL_SIG,
};

/// rippled error code for a missing account.
const ERR_ACCOUNT_NOT_FOUND: &str = "actNotFound";

/// Connect timeout, separate from the per-request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Drops per XRP.
const DROPS_PER_XRP: u64 = 1_000_000;

/// A live, probed connection to a node.
#[derive(Debug)]
struct Connection {
    http: Client,
    server_version: String,
}

/// Fee quoting parameters.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    pub cushion: Decimal,
    pub max_fee: Decimal,
}

/// [`LedgerClient`] over rippled JSON-RPC.
#[derive(Debug)]
pub struct RippledClient {
    url: String,
    timeout: Duration,
    fee_policy: FeePolicy,
    connection: RwLock<Option<Arc<Connection>>>,
}

impl RippledClient {
    /// Create a client. No network traffic happens until the first call.
    pub fn new(url: impl Into<String>, timeout: Duration, fee_policy: FeePolicy) -> Self {
        Self {
            url: url.into(),
            timeout,
            fee_policy,
            connection: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `true` once a connection has been probed and not dropped since.
    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    /// Return the live connection, establishing it if needed.
    async fn connection(&self) -> LedgerResult<Arc<Connection>> {
        let cached = self.connection.read().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let http = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let info = rpc(&http, &self.url, "server_info", json!({})).await?;
        let server_version = info
            .pointer("/info/build_version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let conn = Arc::new(Connection {
            http,
            server_version,
        });
        *self.connection.write() = Some(Arc::clone(&conn));

        tracing::info!(
            url = %self.url,
            version = %conn.server_version,
            "connected to ledger node"
        );
        Ok(conn)
    }

    fn disconnect(&self) {
        if self.connection.write().take().is_some() {
            tracing::warn!(url = %self.url, "ledger connection lost, will reconnect on next call");
        }
    }

    async fn call(&self, method: &str, params: Value) -> LedgerResult<Value> {
        let conn = self.connection().await?;
        match rpc(&conn.http, &self.url, method, params).await {
            Err(LedgerError::Transport(e)) if e.is_connect() => {
                self.disconnect();
                Err(LedgerError::Transport(e))
            }
            other => other,
        }
    }

    async fn account_data(&self, address: &str) -> LedgerResult<Value> {
        let result = self
            .call(
                "account_info",
                json!({ "account": address, "ledger_index": "validated" }),
            )
            .await
            .map_err(|e| match e {
                LedgerError::Rpc { ref code, .. } if code == ERR_ACCOUNT_NOT_FOUND => {
                    LedgerError::AccountNotFound(address.to_string())
                }
                other => other,
            })?;
        result
            .get("account_data")
            .cloned()
            .ok_or_else(|| LedgerError::MalformedResponse("account_info without account_data".into()))
    }
}

#[async_trait]
impl LedgerClient for RippledClient {
    async fn get_fee(&self) -> LedgerResult<Decimal> {
        let result = self.call("server_info", json!({})).await?;
        quote_fee(&result, &self.fee_policy)
    }

    async fn get_account_info(&self, address: &str) -> LedgerResult<AccountInfo> {
        let data = self.account_data(address).await?;
        parse_account_info(&data)
    }

    async fn get_account_settings(&self, address: &str) -> LedgerResult<Option<AccountSettings>> {
        match self.account_data(address).await {
            Ok(data) => Ok(Some(settings_from_flags(parse_account_info(&data)?.flags))),
            Err(LedgerError::AccountNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_balances(&self, address: &str) -> LedgerResult<Vec<LedgerBalance>> {
        let info = match self.account_data(address).await {
            Ok(data) => parse_account_info(&data)?,
            Err(LedgerError::AccountNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut balances = vec![LedgerBalance {
            currency: NATIVE_CURRENCY.to_string(),
            counterparty: None,
            value: drops_to_xrp(info.balance_drops),
        }];

        let lines = self
            .call(
                "account_lines",
                json!({ "account": address, "ledger_index": "validated" }),
            )
            .await?;
        balances.extend(parse_account_lines(&lines)?);
        Ok(balances)
    }

    async fn get_ledger_index(&self) -> LedgerResult<u32> {
        let result = self
            .call("ledger", json!({ "ledger_index": "validated" }))
            .await?;
        parse_ledger_index(&result)
    }

    async fn prepare_payment(
        &self,
        address: &str,
        payment: &PaymentSpec,
        instructions: &Instructions,
    ) -> LedgerResult<PreparedPayment> {
        let info = self.get_account_info(address).await?;
        let ledger_index = self.get_ledger_index().await?;
        let max_ledger_version = ledger_index + instructions.max_ledger_version_offset;

        let tx = payment_tx_json(
            address,
            payment,
            instructions.fee,
            info.sequence,
            max_ledger_version,
        )?;

        Ok(PreparedPayment {
            tx_json: tx.to_string(),
            fee: instructions.fee,
            sequence: info.sequence,
            max_ledger_version,
        })
    }

    async fn submit(&self, signed_transaction: &str) -> LedgerResult<SubmitResult> {
        let result = self
            .call("submit", json!({ "tx_blob": signed_transaction }))
            .await?;
        parse_submit(result)
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

async fn rpc(http: &Client, url: &str, method: &str, params: Value) -> LedgerResult<Value> {
    let body = json!({ "method": method, "params": [params] });
    let response: Value = http
        .post(url)
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    unwrap_result(response)
}

/// Extract `result` from a rippled envelope, turning `status: error` into
/// [`LedgerError::Rpc`].
fn unwrap_result(response: Value) -> LedgerResult<Value> {
    let result = match response {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| LedgerError::MalformedResponse("missing result".into()))?,
        _ => return Err(LedgerError::MalformedResponse("response is not an object".into())),
    };

    if result.get("status").and_then(Value::as_str) == Some("error") {
        let code = result
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = result
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or(&code)
            .to_string();
        return Err(LedgerError::Rpc { code, message });
    }
    Ok(result)
}

/// Parse a JSON number or numeric string as a `Decimal`.
fn decimal_from_json(value: &Value) -> LedgerResult<Decimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(LedgerError::MalformedResponse(format!(
                "expected a number, got {other}"
            )))
        }
    };
    let parsed = if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text)
    } else {
        Decimal::from_str(&text)
    };
    parsed.map_err(|e| LedgerError::MalformedResponse(format!("bad number {text}: {e}")))
}

fn u32_field(value: &Value, field: &str) -> LedgerResult<u32> {
    let raw = value
        .get(field)
        .ok_or_else(|| LedgerError::MalformedResponse(format!("missing {field}")))?;
    let parsed = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| LedgerError::MalformedResponse(format!("{field} is not a u32")))
}

fn drops_to_xrp(drops: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(drops), NATIVE_ACCURACY)
}

fn xrp_to_drops(xrp: Decimal) -> LedgerResult<u64> {
    (xrp * Decimal::from(DROPS_PER_XRP))
        .round_dp_with_strategy(0, RoundingStrategy::AwayFromZero)
        .to_u64()
        .ok_or_else(|| LedgerError::MalformedResponse(format!("{xrp} XRP is out of range")))
}

/// `base_fee_xrp × load_factor × cushion`, capped, rounded up to a whole drop.
fn quote_fee(server_info: &Value, policy: &FeePolicy) -> LedgerResult<Decimal> {
    let info = server_info
        .get("info")
        .ok_or_else(|| LedgerError::MalformedResponse("server_info without info".into()))?;
    let base_fee = info
        .pointer("/validated_ledger/base_fee_xrp")
        .ok_or_else(|| LedgerError::MalformedResponse("missing base_fee_xrp".into()))
        .and_then(decimal_from_json)?;
    let load_factor = match info.get("load_factor") {
        Some(v) => decimal_from_json(v)?,
        None => Decimal::ONE,
    };

    let fee = (base_fee * load_factor * policy.cushion).min(policy.max_fee);
    Ok(fee.round_dp_with_strategy(NATIVE_ACCURACY, RoundingStrategy::AwayFromZero))
}

fn parse_account_info(data: &Value) -> LedgerResult<AccountInfo> {
    let address = data
        .get("Account")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::MalformedResponse("missing Account".into()))?
        .to_string();
    let balance_drops = data
        .get("Balance")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| LedgerError::MalformedResponse("missing or bad Balance".into()))?;

    Ok(AccountInfo {
        address,
        balance_drops,
        sequence: u32_field(data, "Sequence")?,
        owner_count: u32_field(data, "OwnerCount").unwrap_or(0),
        flags: u32_field(data, "Flags").unwrap_or(0),
    })
}

fn settings_from_flags(flags: u32) -> AccountSettings {
    AccountSettings {
        require_destination_tag: flags & LSF_REQUIRE_DEST_TAG != 0,
        require_authorization: flags & LSF_REQUIRE_AUTH != 0,
        disallow_incoming_xrp: flags & LSF_DISALLOW_XRP != 0,
        default_ripple: flags & LSF_DEFAULT_RIPPLE != 0,
    }
}

fn parse_account_lines(result: &Value) -> LedgerResult<Vec<LedgerBalance>> {
    let lines = match result.get("lines").and_then(Value::as_array) {
        Some(lines) => lines,
        None => return Ok(Vec::new()),
    };

    lines
        .iter()
        .map(|line| {
            let currency = line
                .get("currency")
                .and_then(Value::as_str)
                .ok_or_else(|| LedgerError::MalformedResponse("trust line without currency".into()))?;
            let counterparty = line.get("account").and_then(Value::as_str).map(str::to_string);
            let value = line
                .get("balance")
                .ok_or_else(|| LedgerError::MalformedResponse("trust line without balance".into()))
                .and_then(decimal_from_json)?;
            Ok(LedgerBalance {
                currency: decode_currency(currency),
                counterparty,
                value,
            })
        })
        .collect()
}

fn parse_ledger_index(result: &Value) -> LedgerResult<u32> {
    if result.get("ledger_index").is_some() {
        return u32_field(result, "ledger_index");
    }
    match result.get("ledger") {
        Some(ledger) => u32_field(ledger, "ledger_index"),
        None => Err(LedgerError::MalformedResponse("missing ledger_index".into())),
    }
}

fn parse_submit(result: Value) -> LedgerResult<SubmitResult> {
    let result_code = result
        .get("engine_result")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::MalformedResponse("submit without engine_result".into()))?
        .to_string();
    let result_message = result
        .get("engine_result_message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(SubmitResult {
        result_code,
        result_message,
        raw: result,
    })
}

/// Three-letter codes go on the wire as-is; anything else is hex-encoded
/// into the 160-bit currency field.
fn encode_currency(code: &str) -> String {
    if code.len() == 3 {
        return code.to_string();
    }
    let mut bytes = [0u8; 20];
    for (slot, b) in bytes.iter_mut().zip(code.bytes()) {
        *slot = b;
    }
    hex::encode_upper(bytes)
}

/// Inverse of [`encode_currency`] for trust lines reported by the node.
fn decode_currency(code: &str) -> String {
    if code.len() != 40 {
        return code.to_string();
    }
    match hex::decode(code) {
        Ok(bytes) => {
            let trimmed: Vec<u8> = bytes.into_iter().take_while(|b| *b != 0).collect();
            match String::from_utf8(trimmed) {
                Ok(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic()) => s,
                _ => code.to_string(),
            }
        }
        Err(_) => code.to_string(),
    }
}

fn amount_json(amount: &LedgerAmount) -> LedgerResult<Value> {
    if amount.currency == NATIVE_CURRENCY && amount.counterparty.is_none() {
        return Ok(Value::String(xrp_to_drops(amount.value)?.to_string()));
    }
    let issuer = amount.counterparty.as_deref().ok_or_else(|| {
        LedgerError::MalformedResponse(format!("{} amount without issuer", amount.currency))
    })?;
    Ok(json!({
        "currency": encode_currency(&amount.currency),
        "issuer": issuer,
        "value": amount.value.normalize().to_string(),
    }))
}

fn payment_tx_json(
    address: &str,
    payment: &PaymentSpec,
    fee: Decimal,
    sequence: u32,
    max_ledger_version: u32,
) -> LedgerResult<Value> {
    let mut tx = json!({
        "TransactionType": "Payment",
        "Account": address,
        "Destination": payment.destination.address,
        "Amount": amount_json(&payment.destination.amount)?,
        "Fee": xrp_to_drops(fee)?.to_string(),
        "Flags": TF_FULLY_CANONICAL_SIG,
        "Sequence": sequence,
        "LastLedgerSequence": max_ledger_version,
    });

    if payment.destination.amount.currency != NATIVE_CURRENCY {
        tx["SendMax"] = amount_json(&payment.source.amount)?;
    }
    if let Some(tag) = payment.source.tag {
        tx["SourceTag"] = json!(tag);
    }
    if let Some(tag) = payment.destination.tag {
        tx["DestinationTag"] = json!(tag);
    }
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PaymentEndpoint;
    use rust_decimal_macros::dec;

    fn policy() -> FeePolicy {
        FeePolicy {
            cushion: dec!(1.2),
            max_fee: dec!(2),
        }
    }

    #[test]
    fn unwraps_success_envelope() {
        let result = unwrap_result(json!({ "result": { "status": "success", "ledger_index": 7 } }))
            .unwrap();
        assert_eq!(parse_ledger_index(&result).unwrap(), 7);
    }

    #[test]
    fn surfaces_rpc_errors() {
        let err = unwrap_result(json!({
            "result": {
                "status": "error",
                "error": "actNotFound",
                "error_message": "Account not found."
            }
        }))
        .unwrap_err();
        assert!(matches!(err, LedgerError::Rpc { ref code, .. } if code == "actNotFound"));
    }

    #[test]
    fn quotes_fee_with_cushion_and_load() {
        let info = json!({
            "info": {
                "load_factor": 2,
                "validated_ledger": { "base_fee_xrp": 0.00001 }
            }
        });
        assert_eq!(quote_fee(&info, &policy()).unwrap(), dec!(0.000024));
    }

    #[test]
    fn caps_fee_at_max() {
        let info = json!({
            "info": {
                "load_factor": 1000000,
                "validated_ledger": { "base_fee_xrp": 0.00001 }
            }
        });
        assert_eq!(quote_fee(&info, &policy()).unwrap(), dec!(2));
    }

    #[test]
    fn parses_account_root() {
        let info = parse_account_info(&json!({
            "Account": "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
            "Balance": "25000000",
            "Flags": LSF_REQUIRE_DEST_TAG,
            "OwnerCount": 2,
            "Sequence": 41
        }))
        .unwrap();
        assert_eq!(info.balance_drops, 25_000_000);
        assert_eq!(info.sequence, 41);
        assert!(settings_from_flags(info.flags).require_destination_tag);
        assert!(!settings_from_flags(info.flags).disallow_incoming_xrp);
    }

    #[test]
    fn parses_trust_lines() {
        let lines = parse_account_lines(&json!({
            "lines": [
                { "account": "rIssuer", "balance": "12.5", "currency": "USD" },
                { "account": "rIssuer", "balance": "-3", "currency": "4555524F00000000000000000000000000000000" }
            ]
        }))
        .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].value, dec!(12.5));
        assert_eq!(lines[1].currency, "EURO");
        assert_eq!(lines[1].counterparty.as_deref(), Some("rIssuer"));
    }

    #[test]
    fn currency_codes_round_trip() {
        assert_eq!(encode_currency("USD"), "USD");
        let encoded = encode_currency("EURO");
        assert_eq!(encoded.len(), 40);
        assert_eq!(decode_currency(&encoded), "EURO");
    }

    #[test]
    fn builds_xrp_payment_json() {
        let amount = LedgerAmount {
            currency: "XRP".into(),
            counterparty: None,
            value: dec!(1.5),
        };
        let spec = PaymentSpec {
            source: PaymentEndpoint {
                address: "rSource".into(),
                tag: Some(5),
                amount: amount.clone(),
            },
            destination: PaymentEndpoint {
                address: "rDest".into(),
                tag: Some(9),
                amount,
            },
        };
        let tx = payment_tx_json("rSource", &spec, dec!(0.000012), 3, 120).unwrap();
        assert_eq!(tx["Amount"], "1500000");
        assert_eq!(tx["Fee"], "12");
        assert_eq!(tx["LastLedgerSequence"], 120);
        assert_eq!(tx["SourceTag"], 5);
        assert_eq!(tx["DestinationTag"], 9);
        assert!(tx.get("SendMax").is_none());
    }

    #[test]
    fn builds_issued_payment_json() {
        let amount = LedgerAmount {
            currency: "USD".into(),
            counterparty: Some("rIssuer".into()),
            value: dec!(10.50),
        };
        let spec = PaymentSpec {
            source: PaymentEndpoint {
                address: "rSource".into(),
                tag: None,
                amount: amount.clone(),
            },
            destination: PaymentEndpoint {
                address: "rDest".into(),
                tag: None,
                amount,
            },
        };
        let tx = payment_tx_json("rSource", &spec, dec!(0.00001), 1, 50).unwrap();
        assert_eq!(tx["Amount"]["value"], "10.5");
        assert_eq!(tx["Amount"]["issuer"], "rIssuer");
        assert_eq!(tx["SendMax"]["currency"], "USD");
        assert!(tx.get("DestinationTag").is_none());
    }

    #[test]
    fn parses_submit_result() {
        let result = parse_submit(json!({
            "engine_result": "tefPAST_SEQ",
            "engine_result_message": "This sequence number has already passed.",
            "status": "success"
        }))
        .unwrap();
        assert_eq!(result.result_code, "tefPAST_SEQ");
        assert!(result.result_message.contains("sequence"));
    }

    #[test]
    fn client_starts_disconnected() {
        let client = RippledClient::new("http://127.0.0.1:1", Duration::from_secs(1), policy());
        assert!(!client.is_connected());
        assert_eq!(client.url(), "http://127.0.0.1:1");
    }
}

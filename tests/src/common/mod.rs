use orchstr8_core::{Amount, CaseOptions, IntegrationCase};
use serde_json::{Value, json};

/// Starts a stack from the environment's configuration.
pub async fn start_case(options: CaseOptions) -> IntegrationCase {
    IntegrationCase::set_up(options)
        .await
        .expect("stack should start")
}

/// Stops the stack and fails the test when any component did not stop.
pub async fn finish(case: IntegrationCase) {
    let report = case.tear_down().await;
    assert!(report.is_clean(), "shutdown failures:\n{report}");
}

/// Sends `amount` from the chain to a fresh wallet address and waits until
/// the wallet sees the confirmed transaction. Returns the address and txid.
pub async fn fund_wallet(case: &IntegrationCase, amount: Amount) -> (String, String) {
    let wallet = case.wallet().unwrap();
    let address = wallet.least_used_address().await.unwrap();
    let txid = case.chain().send_to_address(&address, amount).await.unwrap();
    case.chain().generate(1).await.unwrap();
    wallet.wait_for_tx_in_wallet(&txid).await.unwrap();
    (address, txid)
}

/// Hex-encoded claim value; the chain stores it verbatim.
#[must_use]
pub fn claim_value(title: &str) -> String {
    hex::encode(json!({"title": title, "version": "_0_0_1"}).to_string())
}

/// Stratum claim queries answer "nothing" with null, `{}` or `[]`.
#[must_use]
pub fn is_empty_result(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

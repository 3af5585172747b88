use orchstr8_core::{Amount, CaseOptions};
use serde_json::{Value, json};
use serial_test::serial;
use tests::common::{finish, start_case};

const SEND: Amount = Amount::from_dewies(250_000_000);

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn tx_confirmation_related_commands() {
    let case = start_case(CaseOptions::default()).await;
    let client = case.client();
    let stratum = |method: &'static str, params: Vec<Value>| async move {
        client.stratum_command(method, &params).await.unwrap()
    };

    let address = case.wallet().unwrap().least_used_address().await.unwrap();
    let empty_history = stratum("blockchain.address.get_history", vec![json!(address)]).await;
    assert_eq!(empty_history, json!([]));

    let txid = case.chain().send_to_address(&address, SEND).await.unwrap();
    let pending = json!([{"tx_hash": txid, "height": 0}]);
    assert_eq!(
        stratum("blockchain.address.get_mempool", vec![json!(address)]).await,
        pending
    );
    assert_eq!(
        stratum("blockchain.address.get_history", vec![json!(address)]).await,
        pending
    );
    assert_eq!(
        stratum("blockchain.address.get_balance", vec![json!(address)]).await,
        json!({"confirmed": 0, "unconfirmed": SEND.dewies()})
    );

    case.chain().generate(1).await.unwrap();
    case.wallet()
        .unwrap()
        .wait_for_tx_in_wallet(&txid)
        .await
        .unwrap();

    assert_eq!(
        stratum("blockchain.address.get_history", vec![json!(address)]).await,
        json!([{"tx_hash": txid, "height": 111}])
    );
    assert_eq!(
        stratum("blockchain.address.get_mempool", vec![json!(address)]).await,
        json!([])
    );

    let mut outputs = Vec::new();
    for output in [0, 1] {
        outputs.push(stratum("blockchain.utxo.get_address", vec![json!(txid), json!(output)]).await);
    }
    let tx_pos = outputs
        .iter()
        .position(|output| *output == json!(address))
        .expect("one output pays the wallet");
    assert_eq!(
        stratum("blockchain.address.listunspent", vec![json!(address)]).await,
        json!([{"height": 111, "tx_hash": txid, "value": SEND.dewies(), "tx_pos": tx_pos}])
    );
    assert_eq!(
        stratum("blockchain.address.get_balance", vec![json!(address)]).await,
        json!({"confirmed": SEND.dewies(), "unconfirmed": 0})
    );

    finish(case).await;
}

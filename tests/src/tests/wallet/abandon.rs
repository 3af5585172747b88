use orchstr8_core::{Amount, CaseOptions};
use serial_test::serial;
use tests::common::{finish, fund_wallet, start_case};
use tracing::info;

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn abandon_claim() {
    let case = start_case(CaseOptions {
        verbose: true,
        ..CaseOptions::default()
    })
    .await;
    // Just enough for one channel claim plus fees.
    let funds = Amount::from_dewies(26_450);
    fund_wallet(&case, funds).await;
    let wallet = case.wallet().unwrap();
    wallet.wait_for_balance(funds).await.unwrap();

    let claim = wallet
        .claim_new_channel("@test", Amount::from_dewies(9_600))
        .await
        .unwrap();
    case.chain().generate(1).await.unwrap();
    let decoded = case.chain().decode_raw_transaction(&claim.tx).await.unwrap();
    assert_eq!(decoded["txid"], claim.txid.as_str());

    let abandon = wallet
        .abandon_claim(&claim.claim_id, &claim.txid, claim.nout)
        .await
        .unwrap();
    let decoded = case
        .chain()
        .decode_raw_transaction(&abandon.tx)
        .await
        .unwrap();
    assert_eq!(decoded["txid"], abandon.txid.as_str());
    case.chain().generate(1).await.unwrap();

    let raw = case
        .chain()
        .get_raw_transaction(&abandon.txid)
        .await
        .unwrap();
    assert!(raw["confirmations"].as_u64().unwrap_or_default() >= 1);

    wallet.wait_for_tx_in_wallet(&abandon.txid).await.unwrap();
    info!(balance = %wallet.balance().await.unwrap(), "balance after abandon");
    finish(case).await;
}

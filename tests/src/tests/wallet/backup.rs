use orchstr8_core::{Amount, CaseOptions, IntegrationCase};
use serial_test::serial;
use tests::common::{finish, fund_wallet, start_case};

const BACKUP: &str = "original_wallet";

async fn backup_wipe_and_restore(case: &mut IntegrationCase) {
    case.client().backup_wallet(BACKUP).unwrap();
    case.client().reset_wallet_data().unwrap();
    case.stack_mut().restore_wallet(BACKUP).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn simple_backup() {
    let mut case = start_case(CaseOptions::default()).await;
    let five = Amount::from_credits(5);
    fund_wallet(&case, five).await;
    case.wallet().unwrap().wait_for_balance(five).await.unwrap();

    backup_wipe_and_restore(&mut case).await;

    let balance = case.wallet().unwrap().wait_for_balance(five).await.unwrap();
    assert_eq!(balance, five);
    finish(case).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn new_address_used_after_backup() {
    let mut case = start_case(CaseOptions::default()).await;
    let five = Amount::from_credits(5);
    let ten = Amount::from_credits(10);
    fund_wallet(&case, five).await;
    case.wallet().unwrap().wait_for_balance(five).await.unwrap();
    case.client().backup_wallet(BACKUP).unwrap();

    // Addresses derived after the backup are recovered from the seed.
    let wallet = case.wallet().unwrap();
    let address = wallet.new_address().await.unwrap();
    let txid = case.chain().send_to_address(&address, five).await.unwrap();
    case.chain().generate(1).await.unwrap();
    wallet.wait_for_tx_in_wallet(&txid).await.unwrap();
    wallet.wait_for_balance(ten).await.unwrap();

    case.client().reset_wallet_data().unwrap();
    case.stack_mut().restore_wallet(BACKUP).await.unwrap();

    let balance = case.wallet().unwrap().wait_for_balance(ten).await.unwrap();
    assert_eq!(balance, ten);
    finish(case).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn big_wallet_after_backup() {
    let mut case = start_case(CaseOptions::default()).await;
    let five = Amount::from_credits(5);
    let ten = Amount::from_credits(10);
    fund_wallet(&case, five).await;
    case.wallet().unwrap().wait_for_balance(five).await.unwrap();
    case.client().backup_wallet(BACKUP).unwrap();

    let wallet = case.wallet().unwrap();
    let mut address = String::new();
    for _ in 0..20 {
        address = wallet.new_address().await.unwrap();
    }
    case.chain().send_to_address(&address, five).await.unwrap();
    case.chain().generate(1).await.unwrap();
    wallet.wait_for_balance(ten).await.unwrap();

    case.client().reset_wallet_data().unwrap();
    case.stack_mut().restore_wallet(BACKUP).await.unwrap();

    let balance = case.wallet().unwrap().wait_for_balance(ten).await.unwrap();
    assert_eq!(balance, ten);
    finish(case).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn claim_survives_backup() {
    let mut case = start_case(CaseOptions::default()).await;
    let (address, _) = fund_wallet(&case, Amount::from_credits(1)).await;
    let wallet = case.wallet().unwrap();
    wallet
        .wait_for_balance(Amount::from_credits(1))
        .await
        .unwrap();
    let channel = wallet
        .claim_new_channel("@beforeBackup", Amount::from_millis(500))
        .await
        .unwrap();
    case.chain().generate(1).await.unwrap();
    wallet.wait_for_tx_in_wallet(&channel.txid).await.unwrap();

    backup_wipe_and_restore(&mut case).await;

    let txid = case
        .chain()
        .send_to_address(&address, Amount::from_credits(1))
        .await
        .unwrap();
    case.chain().generate(1).await.unwrap();
    let wallet = case.wallet().unwrap();
    wallet.wait_for_tx_in_wallet(&txid).await.unwrap();

    let channels = wallet.channel_list().await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0]["name"], "@beforeBackup");
    finish(case).await;
}

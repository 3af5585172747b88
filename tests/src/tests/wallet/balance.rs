use orchstr8_core::{Amount, CaseOptions};
use serial_test::serial;
use tests::common::{finish, fund_wallet, start_case};

#[tokio::test]
#[serial]
#[ignore = "requires the daemons in bin/ and a fixture generated with `orchstr8 generate-fixture`"]
async fn balance_on_fixture_chain() {
    let case = start_case(CaseOptions {
        verbose: true,
        use_fixture: true,
    })
    .await;
    let one = Amount::from_credits(1);
    fund_wallet(&case, one).await;

    let balance = case.wallet().unwrap().wait_for_balance(one).await.unwrap();
    assert_eq!(balance, one);
    finish(case).await;
}

use orchstr8_core::{Amount, CaseOptions, IntegrationCase};
use serde_json::{Value, json};
use serial_test::serial;
use tests::common::{claim_value, finish, is_empty_result, start_case};

const BID: Amount = Amount::from_credits(1);

async fn stratum(case: &IntegrationCase, method: &str, params: &[Value]) -> Value {
    case.client().stratum_command(method, params).await.unwrap()
}

async fn claim(case: &IntegrationCase, name: &str) -> String {
    let output = case
        .chain()
        .claim_name(name, &claim_value(name), BID)
        .await
        .unwrap();
    assert!(output.is_success(), "claimname failed: {output}");
    output.txid().expect("claimname prints a txid").to_owned()
}

async fn nth_claim(case: &IntegrationCase, name: &str, n: u64) -> Value {
    stratum(
        case,
        "blockchain.claimtrie.getnthclaimforname",
        &[json!(name), json!(n)],
    )
    .await
}

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn claim_on_unconfirmed_tx_matches_the_chain() {
    let case = start_case(CaseOptions::default()).await;
    let name = "@unconfirmed";
    let txid = claim(&case, name).await;

    // The index server has no claims for a transaction still in the mempool
    // and answers with an empty object.
    let pending = stratum(&case, "blockchain.claimtrie.getclaimsintx", &[json!(txid)]).await;
    assert_eq!(pending, json!({}));

    case.chain().generate(10).await.unwrap();

    let on_chain = case.chain().get_claims_for_name(name).await.unwrap();
    let chain_claim = &on_chain["claims"][0];
    let indexed = stratum(&case, "blockchain.claimtrie.getclaimsintx", &[json!(txid)]).await;
    let indexed_claim = &indexed[0];

    // address and depth are recomputed by the index server.
    for (index_key, chain_key) in [
        ("claim_id", "claimId"),
        ("txid", "txid"),
        ("nout", "n"),
        ("amount", "amount"),
        ("height", "height"),
        ("value", "value"),
    ] {
        assert_eq!(
            indexed_claim[index_key], chain_claim[chain_key],
            "{index_key} differs from the chain's {chain_key}"
        );
    }
    assert!(indexed_claim.get("address").is_some());
    assert!(indexed_claim.get("depth").is_some());

    finish(case).await;
}

#[tokio::test]
#[serial]
#[ignore = "requires lbrycrdd, lbryum-server and lbrynet-daemon in bin/"]
async fn nth_claim_for_name_is_one_based() {
    let case = start_case(CaseOptions::default()).await;
    let name = "@sequence";
    let mut txids = Vec::new();
    for _ in 0..5 {
        txids.push(claim(&case, name).await);
        case.chain().generate(1).await.unwrap();
    }

    assert!(is_empty_result(&nth_claim(&case, name, 0).await));
    let mut claims = Vec::new();
    for n in 1..=5 {
        claims.push(nth_claim(&case, name, n).await);
    }
    let sequences: Vec<u64> = claims
        .iter()
        .map(|claim| claim["claim_sequence"].as_u64().unwrap())
        .collect();
    assert!(
        sequences.windows(2).all(|pair| pair[0] < pair[1]),
        "claim sequences not ascending: {sequences:?}"
    );

    let refund = case.chain().query(&["getnewaddress"]).await.unwrap();
    case.chain()
        .abandon_claim(&txids[3], &refund, Amount::from_millis(900))
        .await
        .unwrap();
    case.chain().generate(1).await.unwrap();

    assert!(is_empty_result(&nth_claim(&case, name, 5).await));
    let fourth = nth_claim(&case, name, 4).await;
    assert_eq!(fourth["claim_id"], claims[4]["claim_id"]);

    finish(case).await;
}

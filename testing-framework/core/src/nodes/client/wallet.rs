use std::{
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize, Serializer, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::{
    Amount,
    config::Timeouts,
    poll::{PollError, wait_for},
};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("{method}: {source}")]
    Http {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} failed: {error}")]
    Rpc { method: String, error: Value },
    #[error("{method}: unexpected result: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Poll(#[from] PollError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BlockchainStatus {
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub blocks_behind: u64,
    #[serde(default)]
    pub best_blockhash: String,
}

/// The daemon's answer to `status`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct DaemonStatus {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub is_first_run: bool,
    #[serde(default)]
    pub blockchain_status: Option<BlockchainStatus>,
}

/// The transaction a claim-producing call broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ClaimTx {
    pub txid: String,
    pub nout: u32,
    #[serde(default)]
    pub claim_id: String,
    /// Raw transaction hex.
    #[serde(default)]
    pub tx: String,
    #[serde(default)]
    pub fee: Option<Amount>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublishRequest<'a> {
    pub name: &'a str,
    #[serde(serialize_with = "as_credits")]
    pub bid: Amount,
    pub file_path: &'a Path,
    pub metadata: Value,
}

/// The daemon takes amounts as plain JSON numbers.
fn as_credits<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(amount.credits())
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Value,
}

/// JSON-RPC client for the wallet daemon's `/lbryapi` endpoint.
#[derive(Debug)]
pub struct Wallet {
    http: reqwest::Client,
    url: String,
    timeouts: Timeouts,
    calls: AtomicU64,
}

impl Wallet {
    #[must_use]
    pub fn new(host: &str, port: u16, timeouts: Timeouts) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("http://{host}:{port}/lbryapi"),
            timeouts,
            calls: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of RPC calls issued so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub async fn call<T>(&self, method: &str, params: Value) -> Result<T, WalletError>
    where
        T: DeserializeOwned,
    {
        self.calls.fetch_add(1, Ordering::Relaxed);
        debug!(method, "wallet rpc");
        let http_error = |source| WalletError::Http {
            method: method.to_owned(),
            source,
        };
        let reply: Reply = self
            .http
            .post(&self.url)
            .timeout(self.timeouts.rpc)
            .json(&json!({"method": method, "params": params}))
            .send()
            .await
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;

        if !reply.error.is_null() {
            return Err(WalletError::Rpc {
                method: method.to_owned(),
                error: reply.error,
            });
        }
        serde_json::from_value(reply.result).map_err(|source| WalletError::Decode {
            method: method.to_owned(),
            source,
        })
    }

    pub async fn status(&self) -> Result<DaemonStatus, WalletError> {
        self.call("status", json!({})).await
    }

    /// Asks the daemon to shut down its session and exit.
    pub async fn stop_daemon(&self) -> Result<Value, WalletError> {
        self.call("daemon_stop", json!({})).await
    }

    pub async fn least_used_address(&self) -> Result<String, WalletError> {
        self.call("wallet_unused_address", json!({})).await
    }

    pub async fn new_address(&self) -> Result<String, WalletError> {
        self.call("wallet_new_address", json!({})).await
    }

    pub async fn balance(&self) -> Result<Amount, WalletError> {
        self.call("wallet_balance", json!({})).await
    }

    pub async fn claim_new_channel(&self, name: &str, amount: Amount) -> Result<ClaimTx, WalletError> {
        self.call("channel_new", json!({"channel_name": name, "amount": amount.credits()}))
            .await
    }

    pub async fn abandon_claim(
        &self,
        claim_id: &str,
        txid: &str,
        nout: u32,
    ) -> Result<ClaimTx, WalletError> {
        self.call(
            "claim_abandon",
            json!({"claim_id": claim_id, "txid": txid, "nout": nout}),
        )
        .await
    }

    pub async fn channel_list(&self) -> Result<Vec<Value>, WalletError> {
        self.call("channel_list", json!({})).await
    }

    pub async fn publish(&self, request: &PublishRequest<'_>) -> Result<ClaimTx, WalletError> {
        let params = serde_json::to_value(request).map_err(|source| WalletError::Decode {
            method: "publish".to_owned(),
            source,
        })?;
        self.call("publish", params).await
    }

    pub async fn resolve(&self, uri: &str) -> Result<Value, WalletError> {
        self.call("resolve", json!({"uri": uri})).await
    }

    /// `None` while the wallet has not seen `txid`.
    pub async fn transaction(&self, txid: &str) -> Result<Option<Value>, WalletError> {
        let tx: Value = self.call("transaction_show", json!({"txid": txid})).await?;
        Ok((!tx.is_null()).then_some(tx))
    }

    pub async fn wait_for_tx_in_wallet(&self, txid: &str) -> Result<Value, WalletError> {
        Ok(wait_for(
            &format!("transaction {txid} in wallet"),
            self.timeouts.poll_interval,
            self.timeouts.session,
            || self.transaction(txid),
        )
        .await?)
    }

    /// Waits until the wallet has synced to at least `height` blocks.
    pub async fn wait_for_height(&self, height: u64) -> Result<u64, WalletError> {
        Ok(wait_for(
            &format!("wallet height {height}"),
            self.timeouts.poll_interval,
            self.timeouts.session,
            || async {
                let blocks = self
                    .status()
                    .await?
                    .blockchain_status
                    .map_or(0, |chain| chain.blocks);
                Ok::<_, WalletError>((blocks >= height).then_some(blocks))
            },
        )
        .await?)
    }

    pub async fn wait_for_balance(&self, at_least: Amount) -> Result<Amount, WalletError> {
        Ok(wait_for(
            &format!("wallet balance of {at_least}"),
            self.timeouts.poll_interval,
            self.timeouts.session,
            || async {
                let balance = self.balance().await?;
                Ok::<_, WalletError>((balance >= at_least).then_some(balance))
            },
        )
        .await?)
    }
}

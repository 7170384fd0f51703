use std::{
    fmt::{Debug, Formatter},
    time::Duration,
};

use async_trait::async_trait;
use borsh::BorshDeserialize;
use solana_client::{
    rpc_client::RpcClient,
    rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig},
};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, instruction::InstructionError,
    pubkey::Pubkey, signature::Signature, transaction::Transaction,
    transaction::TransactionError,
};
use tokio::{
    sync::Mutex,
    time::{sleep, Instant},
};
use tracing::warn;

use crate::rpc::{
    errors::RpcError, rate_limiter::RateLimiter, ConfirmationStatus, LedgerRpc, RemoteTreeState,
    SimulationFailure, SimulationResult,
};

#[derive(Clone, Debug, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 30,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// [`LedgerRpc`] over a Solana JSON-RPC endpoint. Transport failures are
/// retried internally; remote verdicts (simulation errors, transaction
/// errors) are passed through untouched for the orchestrator to classify.
pub struct SolanaLedgerRpc {
    client: RpcClient,
    commitment: CommitmentConfig,
    retry_config: RetryConfig,
    rate_limiter: Option<Mutex<RateLimiter>>,
}

impl Debug for SolanaLedgerRpc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SolanaLedgerRpc {{ url: {:?} }}", self.client.url())
    }
}

impl SolanaLedgerRpc {
    pub fn new(url: String, commitment: Option<CommitmentConfig>) -> Self {
        Self::new_with_retry(url, commitment, None)
    }

    pub fn new_with_retry(
        url: String,
        commitment: Option<CommitmentConfig>,
        retry_config: Option<RetryConfig>,
    ) -> Self {
        let commitment = commitment.unwrap_or_else(CommitmentConfig::confirmed);
        let client = RpcClient::new_with_commitment(url, commitment);
        Self {
            client,
            commitment,
            retry_config: retry_config.unwrap_or_default(),
            rate_limiter: None,
        }
    }

    /// Caps outgoing requests at `max_requests` per `window`. Requests past
    /// the budget wait for a slot instead of hitting the endpoint.
    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.rate_limiter = Some(Mutex::new(RateLimiter::new(max_requests, window)));
        self
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.lock().await.acquire().await;
        }
    }

    async fn retry<F, Fut, T>(&self, operation: F) -> Result<T, RpcError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RpcError>>,
    {
        let mut attempts = 0;
        let start_time = Instant::now();
        loop {
            self.throttle().await;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() {
                        return Err(e);
                    }
                    attempts += 1;
                    if attempts >= self.retry_config.max_retries
                        || start_time.elapsed() >= self.retry_config.timeout
                    {
                        return Err(e);
                    }
                    warn!(
                        "RPC call failed, retrying in {:?} (attempt {}/{}): {:?}",
                        self.retry_config.retry_delay, attempts, self.retry_config.max_retries, e
                    );
                    sleep(self.retry_config.retry_delay).await;
                }
            }
        }
    }
}

fn custom_error_code(err: &TransactionError) -> Option<u32> {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => Some(*code),
        _ => None,
    }
}

#[async_trait]
impl LedgerRpc for SolanaLedgerRpc {
    async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
        self.retry(|| async {
            self.client
                // Confirmed blockhashes land more reliably than finalized.
                .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
                .map(|(hash, _)| hash)
                .map_err(RpcError::from)
        })
        .await
    }

    async fn simulate(&self, transaction: &Transaction) -> Result<SimulationResult, RpcError> {
        self.retry(|| async {
            let response = self
                .client
                .simulate_transaction_with_config(
                    transaction,
                    RpcSimulateTransactionConfig {
                        commitment: Some(self.commitment),
                        ..Default::default()
                    },
                )
                .map_err(RpcError::from)?;
            let err = response.value.err.map(|err| SimulationFailure {
                code: custom_error_code(&err),
                message: err.to_string(),
            });
            Ok(SimulationResult {
                err,
                logs: response.value.logs.unwrap_or_default(),
            })
        })
        .await
    }

    async fn submit(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
        self.retry(|| async {
            self.client
                .send_transaction_with_config(
                    transaction,
                    RpcSendTransactionConfig {
                        // Simulation already ran as its own state; no need
                        // to pay for preflight again.
                        skip_preflight: true,
                        ..Default::default()
                    },
                )
                .map_err(RpcError::from)
        })
        .await
    }

    async fn confirmation(&self, signature: &Signature) -> Result<ConfirmationStatus, RpcError> {
        let statuses = self
            .retry(|| async {
                self.client
                    .get_signature_statuses(&[*signature])
                    .map(|response| response.value)
                    .map_err(RpcError::from)
            })
            .await?;

        let status = match statuses.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(ConfirmationStatus::Pending),
        };
        if let Some(err) = status.err {
            return Ok(ConfirmationStatus::Failed(err.to_string()));
        }
        if status.satisfies_commitment(self.commitment) {
            Ok(ConfirmationStatus::Confirmed)
        } else {
            Ok(ConfirmationStatus::Pending)
        }
    }

    /// Reads the tree head the ledger advertises. The record is served
    /// Borsh-encoded behind an 8-byte account discriminator, the same way
    /// the compression program lays out its accounts.
    async fn remote_tree_state(&self, tree_id: &Pubkey) -> Result<RemoteTreeState, RpcError> {
        let account = self
            .retry(|| async {
                self.client
                    .get_account_with_commitment(tree_id, self.commitment)
                    .map(|response| response.value)
                    .map_err(RpcError::from)
            })
            .await?
            .ok_or_else(|| {
                RpcError::CustomError(format!("Tree account {tree_id} does not exist"))
            })?;

        if account.data.len() <= 8 {
            return Err(RpcError::CustomError(format!(
                "Tree account {tree_id} holds no state"
            )));
        }
        RemoteTreeState::deserialize(&mut &account.data[8..])
            .map_err(|e| RpcError::CustomError(format!("Malformed tree account {tree_id}: {e}")))
    }
}

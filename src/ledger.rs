use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSimulateTransactionConfig,
};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{
    account::Account,
    address_lookup_table::AddressLookupTableAccount,
    clock::Slot,
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use solana_transaction_status::UiTransactionEncoding;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PriorityFee;
use crate::error::{BundlerError, Result};
use crate::metrics::BundlerMetrics;

/// Server-side filter for program account scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::Memcmp { offset, bytes } => data
                .get(*offset..offset + bytes.len())
                .map_or(false, |window| window == bytes.as_slice()),
        }
    }

    fn to_rpc(&self) -> RpcFilterType {
        match self {
            AccountFilter::Memcmp { offset, bytes } => {
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(*offset, bytes.clone()))
            }
        }
    }
}

/// Everything the bundler needs from a ledger node.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>>;
    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>>;
    async fn get_balance(&self, address: &Pubkey) -> Result<u64>;
    async fn get_slot(&self) -> Result<Slot>;
    async fn get_latest_blockhash(&self) -> Result<Hash>;
    /// Pre-flight. `Ok(Some(reason))` means the node rejected the transaction.
    async fn simulate(&self, tx: &VersionedTransaction) -> Result<Option<String>>;
    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature>;
    /// Waits until the signature reaches the ledger's commitment or errors.
    async fn confirm(&self, signature: &Signature) -> Result<()>;
    async fn scan_program_accounts(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Account)>>;
}

pub struct RpcLedger {
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RpcLedger {
    pub fn new(rpc: Arc<RpcClient>, commitment: CommitmentConfig, confirm_timeout: Duration) -> Self {
        Self {
            rpc,
            commitment,
            confirm_timeout,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn from_url(url: &str, commitment: CommitmentConfig, confirm_timeout: Duration) -> Self {
        let rpc = Arc::new(RpcClient::new_with_commitment(url.to_string(), commitment));
        Self::new(rpc, commitment, confirm_timeout)
    }
}

// get_multiple_accounts caps at 100 keys per request
const MULTIPLE_ACCOUNTS_LIMIT: usize = 100;

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        Ok(self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await?
            .value)
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let mut out = Vec::with_capacity(addresses.len());
        for page in addresses.chunks(MULTIPLE_ACCOUNTS_LIMIT) {
            let resp = self
                .rpc
                .get_multiple_accounts_with_commitment(page, self.commitment)
                .await?;
            out.extend(resp.value);
        }
        Ok(out)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        Ok(self
            .rpc
            .get_balance_with_commitment(address, self.commitment)
            .await?
            .value)
    }

    async fn get_slot(&self) -> Result<Slot> {
        Ok(self.rpc.get_slot_with_commitment(self.commitment).await?)
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        Ok(self.rpc.get_latest_blockhash().await?)
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<Option<String>> {
        let cfg = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(self.commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            ..Default::default()
        };
        let sim = self.rpc.simulate_transaction_with_config(tx, cfg).await?;
        Ok(sim.value.err.map(|err| {
            let logs = sim.value.logs.unwrap_or_default();
            debug!(?err, log_lines = logs.len(), "simulation rejected");
            format!("{err:?}")
        }))
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature> {
        Ok(self.rpc.send_transaction(tx).await?)
    }

    async fn confirm(&self, signature: &Signature) -> Result<()> {
        let start = Instant::now();
        loop {
            if start.elapsed() > self.confirm_timeout {
                return Err(BundlerError::Rpc(format!("confirmation timed out for {signature}")));
            }
            let response = self.rpc.get_signature_statuses(&[*signature]).await?;
            if let Some(Some(status)) = response.value.first() {
                if let Some(err) = &status.err {
                    return Err(BundlerError::Rpc(format!("transaction {signature} failed: {err:?}")));
                }
                if status.satisfies_commitment(self.commitment) {
                    return Ok(());
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn scan_program_accounts(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Account)>> {
        let cfg = RpcProgramAccountsConfig {
            filters: Some(filters.iter().map(AccountFilter::to_rpc).collect()),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(self.rpc.get_program_accounts_with_config(program, cfg).await?)
    }
}

/// Compiles a v0 message and signs it. `signers` must cover every required
/// signature; duplicates are dropped.
pub fn sign_v0(
    payer: &Pubkey,
    instructions: &[Instruction],
    lookup_tables: &[AddressLookupTableAccount],
    blockhash: Hash,
    signers: &[&Keypair],
) -> Result<VersionedTransaction> {
    let message = v0::Message::try_compile(payer, instructions, lookup_tables, blockhash)?;
    let mut unique: Vec<&Keypair> = Vec::with_capacity(signers.len());
    for kp in signers {
        if !unique.iter().any(|k| k.pubkey() == kp.pubkey()) {
            unique.push(*kp);
        }
    }
    Ok(VersionedTransaction::try_new(VersionedMessage::V0(message), &unique)?)
}

/// Simulate, then send and wait for confirmation.
pub async fn submit_checked(ledger: &dyn Ledger, tx: &VersionedTransaction) -> Result<Signature> {
    if let Some(reason) = ledger.simulate(tx).await? {
        return Err(BundlerError::SimulationRejected(reason));
    }
    let signature = ledger.send(tx).await?;
    ledger.confirm(&signature).await?;
    Ok(signature)
}

/// Result of a best-effort cleanup loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub signatures: Vec<Signature>,
    pub skipped_groups: usize,
}

/// One transaction of a sweep: instructions plus the wallets that must sign them.
pub struct SweepGroup<'a> {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<&'a Keypair>,
}

/// Submits groups one after another. A group rejected in simulation is logged
/// and skipped; any other failure stops the sweep.
pub async fn run_sweep(
    ledger: &dyn Ledger,
    payer: &Keypair,
    label: &str,
    groups: Vec<SweepGroup<'_>>,
    fee: PriorityFee,
    metrics: Option<&BundlerMetrics>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let total = groups.len();
    for (index, group) in groups.into_iter().enumerate() {
        let blockhash = ledger.get_latest_blockhash().await?;
        let mut signers = vec![payer];
        signers.extend(group.signers);
        let instructions = fee.with(&group.instructions);
        let tx = sign_v0(&payer.pubkey(), &instructions, &[], blockhash, &signers)?;
        match submit_checked(ledger, &tx).await {
            Ok(signature) => {
                info!(%label, group = index, total, %signature, "sweep group landed");
                if let Some(m) = metrics {
                    m.sweep_groups_submitted.inc();
                }
                report.signatures.push(signature);
            }
            Err(e) if e.is_sweep_skippable() => {
                warn!(%label, group = index, total, error = %e, "skipping sweep group");
                if let Some(m) = metrics {
                    m.sweep_groups_skipped.inc();
                }
                report.skipped_groups += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memcmp_filter_matches_window() {
        let data = [0u8, 1, 2, 3, 4, 5];
        let hit = AccountFilter::Memcmp { offset: 2, bytes: vec![2, 3] };
        let miss = AccountFilter::Memcmp { offset: 2, bytes: vec![3, 4] };
        let past_end = AccountFilter::Memcmp { offset: 5, bytes: vec![5, 6] };
        assert!(hit.matches(&data));
        assert!(!miss.matches(&data));
        assert!(!past_end.matches(&data));
    }

    #[test]
    fn filters_convert_to_rpc_form() {
        let f = AccountFilter::Memcmp { offset: 22, bytes: vec![7; 32] }.to_rpc();
        assert!(matches!(f, RpcFilterType::Memcmp(_)));
    }
}

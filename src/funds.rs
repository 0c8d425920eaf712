use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
};
use std::sync::Arc;
use tracing::info;

use crate::chunk::{chunk, group_count};
use crate::config::{BundlerConfig, PriorityFee};
use crate::error::{BundlerError, Result};
use crate::ledger::{run_sweep, sign_v0, submit_checked, Ledger, SweepGroup, SweepReport};
use crate::metrics::BundlerMetrics;

/// Lamports a bundle of `amounts` buys needs on the payer before anything is sent:
/// the main wallet fee, one table fee per group, and per wallet its fee plus
/// 110% of its buy.
pub fn required_bundle_budget(config: &BundlerConfig, amounts: &[u64]) -> u64 {
    let tables = group_count(amounts.len(), config.group_size) as u64;
    let per_wallet: u64 = amounts
        .iter()
        .map(|a| config.sub_wallet_fee_lamports.saturating_add(a.saturating_mul(11) / 10))
        .fold(0u64, u64::saturating_add);
    config
        .main_wallet_fee_lamports
        .saturating_add(config.lut_fee_lamports.saturating_mul(tables))
        .saturating_add(per_wallet)
}

pub fn ensure_bundle_budget(config: &BundlerConfig, available: u64, amounts: &[u64]) -> Result<()> {
    let required = required_bundle_budget(config, amounts);
    if available < required {
        return Err(BundlerError::InsufficientFunds { required, available });
    }
    Ok(())
}

pub struct FundManager {
    ledger: Arc<dyn Ledger>,
    gather_group_size: usize,
    priority: PriorityFee,
    metrics: Option<Arc<BundlerMetrics>>,
}

impl FundManager {
    pub fn new(ledger: Arc<dyn Ledger>, config: &BundlerConfig, metrics: Option<Arc<BundlerMetrics>>) -> Self {
        Self {
            ledger,
            gather_group_size: config.gather_group_size.max(1),
            priority: config.priority_fee(),
            metrics,
        }
    }

    async fn balances(&self, wallets: &[Pubkey]) -> Result<Vec<u64>> {
        let mut out = Vec::with_capacity(wallets.len());
        for w in wallets {
            out.push(self.ledger.get_balance(w).await?);
        }
        Ok(out)
    }

    /// Tops every target up to `min_balance` in a single transaction.
    /// Returns `None` when nobody is short.
    pub async fn distribute(&self, source: &Keypair, targets: &[Pubkey], min_balance: u64) -> Result<Option<Signature>> {
        let balances = self.balances(targets).await?;
        let shortfalls: Vec<(Pubkey, u64)> = targets
            .iter()
            .zip(balances)
            .filter(|(_, balance)| *balance < min_balance)
            .map(|(target, balance)| (*target, min_balance - balance))
            .collect();
        if shortfalls.is_empty() {
            info!(targets = targets.len(), "no wallet below minimum balance");
            return Ok(None);
        }

        let required = shortfalls.iter().fold(0u64, |acc, (_, s)| acc.saturating_add(*s));
        let available = self.ledger.get_balance(&source.pubkey()).await?;
        if available < required {
            return Err(BundlerError::InsufficientFunds { required, available });
        }

        let from = source.pubkey();
        let transfers: Vec<_> = shortfalls
            .iter()
            .map(|(to, lamports)| system_instruction::transfer(&from, to, *lamports))
            .collect();
        let ixs = self.priority.with(&transfers);
        let blockhash = self.ledger.get_latest_blockhash().await?;
        let tx = sign_v0(&from, &ixs, &[], blockhash, &[source])?;
        let signature = submit_checked(self.ledger.as_ref(), &tx).await?;
        info!(wallets = shortfalls.len(), lamports = required, %signature, "distributed");
        Ok(Some(signature))
    }

    /// Sweeps every wallet's full balance to `destination`, `payer` covering fees.
    /// Groups that fail simulation are skipped.
    pub async fn gather(&self, payer: &Keypair, wallets: &[Arc<Keypair>], destination: &Pubkey) -> Result<SweepReport> {
        let payer_key = payer.pubkey();
        let candidates: Vec<&Arc<Keypair>> = wallets
            .iter()
            .filter(|w| w.pubkey() != payer_key && w.pubkey() != *destination)
            .collect();
        let keys: Vec<Pubkey> = candidates.iter().map(|w| w.pubkey()).collect();
        let balances = self.balances(&keys).await?;

        let funded: Vec<(&Arc<Keypair>, u64)> = candidates
            .into_iter()
            .zip(balances)
            .filter(|(_, balance)| *balance > 0)
            .collect();

        let groups = chunk(&funded, self.gather_group_size)
            .into_iter()
            .map(|group| SweepGroup {
                instructions: group
                    .iter()
                    .map(|(w, lamports)| system_instruction::transfer(&w.pubkey(), destination, *lamports))
                    .collect(),
                signers: group.iter().map(|(w, _)| Arc::as_ref(*w)).collect(),
            })
            .collect();

        let report = run_sweep(
            self.ledger.as_ref(),
            payer,
            "gather",
            groups,
            self.priority,
            self.metrics.as_deref(),
        )
        .await?;
        info!(wallets = funded.len(), skipped = report.skipped_groups, "gather done");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLedger;

    fn wallets(n: usize) -> Vec<Arc<Keypair>> {
        (0..n).map(|_| Arc::new(Keypair::new())).collect()
    }

    #[test]
    fn budget_follows_fee_schedule() {
        let cfg = BundlerConfig::default();
        // 6 wallets => 2 groups of 5
        let amounts = [1_000_000u64; 6];
        let expected = 2_500_000 + 2 * 11_000_000 + 6 * (2_200_000 + 1_100_000);
        assert_eq!(required_bundle_budget(&cfg, &amounts), expected);
        assert!(ensure_bundle_budget(&cfg, expected, &amounts).is_ok());
        assert!(matches!(
            ensure_bundle_budget(&cfg, expected - 1, &amounts),
            Err(BundlerError::InsufficientFunds { available, .. }) if available == expected - 1
        ));
    }

    #[tokio::test]
    async fn distribute_tops_up_only_short_wallets() {
        let ledger = Arc::new(MockLedger::new());
        let source = Keypair::new();
        ledger.set_balance(source.pubkey(), 10_000_000);
        let targets: Vec<Pubkey> = (0..3).map(|_| Pubkey::new_unique()).collect();
        ledger.set_balance(targets[0], 5_000_000);
        ledger.set_balance(targets[1], 500_000);

        let mgr = FundManager::new(ledger.clone(), &BundlerConfig::default(), None);
        let sig = mgr.distribute(&source, &targets, 1_000_000).await.unwrap();
        assert!(sig.is_some());

        let sent = ledger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tx.message.instructions().len(), 2);
        assert_eq!(ledger.balance_of(&targets[1]), 1_000_000);
        assert_eq!(ledger.balance_of(&targets[2]), 1_000_000);
        assert_eq!(ledger.balance_of(&targets[0]), 5_000_000);

        // everyone is topped up now
        assert!(mgr.distribute(&source, &targets, 1_000_000).await.unwrap().is_none());
        assert_eq!(ledger.sent().len(), 1);
    }

    #[tokio::test]
    async fn distribute_checks_source_first() {
        let ledger = Arc::new(MockLedger::new());
        let source = Keypair::new();
        ledger.set_balance(source.pubkey(), 100);
        let targets = vec![Pubkey::new_unique()];

        let mgr = FundManager::new(ledger.clone(), &BundlerConfig::default(), None);
        let err = mgr.distribute(&source, &targets, 1_000).await.unwrap_err();
        assert!(matches!(err, BundlerError::InsufficientFunds { required: 1_000, available: 100 }));
        assert!(ledger.sent().is_empty());
    }

    #[tokio::test]
    async fn gather_groups_by_seven_and_is_idempotent() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let ws = wallets(10);
        for w in &ws[..9] {
            ledger.set_balance(w.pubkey(), 2_000_000);
        }

        let mgr = FundManager::new(ledger.clone(), &BundlerConfig::default(), None);
        let report = mgr.gather(&payer, &ws, &payer.pubkey()).await.unwrap();
        assert_eq!(report.signatures.len(), 2);
        assert_eq!(report.skipped_groups, 0);
        assert_eq!(ledger.balance_of(&payer.pubkey()), 18_000_000);

        let sent_before = ledger.sent().len();
        let calls_before = ledger.calls();
        let again = mgr.gather(&payer, &ws, &payer.pubkey()).await.unwrap();
        assert!(again.signatures.is_empty());
        assert_eq!(ledger.sent().len(), sent_before);
        // only balance reads, no blockhash or simulation
        assert_eq!(ledger.calls() - calls_before, ws.len());
    }

    #[tokio::test]
    async fn gather_skips_rejected_group() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let destination = Pubkey::new_unique();
        let ws = wallets(8);
        for w in &ws {
            ledger.set_balance(w.pubkey(), 1_000);
        }
        ledger.reject_simulation_call(0);

        let mgr = FundManager::new(ledger.clone(), &BundlerConfig::default(), None);
        let report = mgr.gather(&payer, &ws, &destination).await.unwrap();
        assert_eq!(report.skipped_groups, 1);
        assert_eq!(report.signatures.len(), 1);
        assert_eq!(ledger.balance_of(&destination), 1_000);
    }

    #[tokio::test]
    async fn gather_carries_priority_fee() {
        let ledger = Arc::new(MockLedger::new());
        let payer = Keypair::new();
        let ws = wallets(3);
        for w in &ws {
            ledger.set_balance(w.pubkey(), 5_000);
        }
        let mut cfg = BundlerConfig::default();
        cfg.compute_unit_limit = Some(100_000);
        cfg.compute_unit_price_micro_lamports = Some(25_000);

        let mgr = FundManager::new(ledger.clone(), &cfg, None);
        mgr.gather(&payer, &ws, &payer.pubkey()).await.unwrap();

        let sent = ledger.sent();
        assert_eq!(sent.len(), 1);
        let keys = sent[0].tx.message.static_account_keys();
        let programs: Vec<Pubkey> = sent[0]
            .tx
            .message
            .instructions()
            .iter()
            .map(|ix| keys[ix.program_id_index as usize])
            .collect();
        assert_eq!(programs.len(), 5);
        assert_eq!(&programs[..2], &[solana_sdk::compute_budget::id(); 2]);
        assert_eq!(ledger.balance_of(&payer.pubkey()), 15_000);
    }
}

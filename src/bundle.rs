use rand::seq::SliceRandom;
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::UnsignedTx;
use crate::config::{BundlerConfig, PriorityFee, JITO_TIP_ADDRESSES};
use crate::error::{BundlerError, Result};
use crate::ledger::{sign_v0, Ledger};
use crate::metrics::BundlerMetrics;
use crate::relay::BundleRelay;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutcome {
    pub bundle_id: String,
    pub tip_signature: Signature,
    /// Signatures of every transaction in submission order, tip last.
    pub signatures: Vec<Signature>,
}

pub struct BundleAssembler {
    ledger: Arc<dyn Ledger>,
    relay: Arc<dyn BundleRelay>,
    tip_lamports: u64,
    max_transactions: usize,
    preflight: bool,
    priority: PriorityFee,
    metrics: Option<Arc<BundlerMetrics>>,
}

fn pick_tip_account() -> Result<Pubkey> {
    let addr = JITO_TIP_ADDRESSES
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| BundlerError::Config("no tip accounts".into()))?;
    Pubkey::from_str(addr).map_err(|e| BundlerError::Config(format!("tip account {addr}: {e}")))
}

impl BundleAssembler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        relay: Arc<dyn BundleRelay>,
        config: &BundlerConfig,
        metrics: Option<Arc<BundlerMetrics>>,
    ) -> Self {
        Self {
            ledger,
            relay,
            tip_lamports: config.jito_tip_lamports,
            max_transactions: config.max_bundle_transactions,
            preflight: config.bundle_preflight,
            priority: config.priority_fee(),
            metrics,
        }
    }

    /// Signs every group against `table` and relays them as one bundle:
    /// the optional create transaction first (compiled without the table),
    /// then the trade groups in order, then the tip.
    pub async fn assemble_and_submit(
        &self,
        payer: &Keypair,
        create: Option<&UnsignedTx>,
        groups: &[UnsignedTx],
        table: &AddressLookupTableAccount,
    ) -> Result<BundleOutcome> {
        let len = usize::from(create.is_some()) + groups.len() + 1;
        if len > self.max_transactions {
            return Err(BundlerError::BundleTooLarge { len, max: self.max_transactions });
        }

        let payer_key = payer.pubkey();
        let mut transactions: Vec<VersionedTransaction> = Vec::with_capacity(len);

        if let Some(create) = create {
            let blockhash = self.ledger.get_latest_blockhash().await?;
            transactions.push(self.sign(payer, create, &[], blockhash)?);
        }

        let tables = std::slice::from_ref(table);
        for (index, group) in groups.iter().enumerate() {
            let blockhash = self.ledger.get_latest_blockhash().await?;
            let tx = self.sign(payer, group, tables, blockhash)?;
            // later groups of a fresh mint depend on the create landing first
            if self.preflight && create.is_none() {
                if let Some(reason) = self.ledger.simulate(&tx).await? {
                    warn!(group = index, %reason, "bundle group rejected in preflight");
                    return Err(BundlerError::SimulationRejected(reason));
                }
            }
            transactions.push(tx);
        }

        let tip_account = pick_tip_account()?;
        let blockhash = self.ledger.get_latest_blockhash().await?;
        let tip_ix = system_instruction::transfer(&payer_key, &tip_account, self.tip_lamports);
        let tip_tx = sign_v0(&payer_key, &[tip_ix], &[], blockhash, &[payer])?;
        let tip_signature = tip_tx.signatures[0];
        transactions.push(tip_tx);

        let signatures: Vec<Signature> = transactions.iter().map(|tx| tx.signatures[0]).collect();
        if let Some(m) = &self.metrics {
            m.bundles_submitted.inc();
            m.tip_hist.observe(self.tip_lamports as f64);
        }

        let receipt = self.relay.submit(&transactions).await;
        let receipt = match receipt {
            Ok(r) => r,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.bundles_failed.inc();
                }
                return Err(e);
            }
        };

        if !receipt.confirmed {
            if let Some(m) = &self.metrics {
                m.bundles_failed.inc();
            }
            let reason = receipt.error.unwrap_or_else(|| "relay did not confirm".to_string());
            warn!(bundle_id = %receipt.bundle_id, %reason, "bundle not confirmed");
            return Err(BundlerError::BundleNotConfirmed(format!("{}: {reason}", receipt.bundle_id)));
        }

        if let Some(m) = &self.metrics {
            m.bundles_confirmed.inc();
        }
        info!(bundle_id = %receipt.bundle_id, txs = transactions.len(), %tip_account, "bundle confirmed");
        Ok(BundleOutcome {
            bundle_id: receipt.bundle_id,
            tip_signature,
            signatures,
        })
    }

    fn sign(
        &self,
        payer: &Keypair,
        unsigned: &UnsignedTx,
        tables: &[AddressLookupTableAccount],
        blockhash: solana_sdk::hash::Hash,
    ) -> Result<VersionedTransaction> {
        let mut signers: Vec<&Keypair> = Vec::with_capacity(unsigned.signers.len() + 1);
        signers.push(payer);
        signers.extend(unsigned.signers.iter().map(|k| k.as_ref()));
        let instructions = self.priority.with(&unsigned.instructions);
        sign_v0(&payer.pubkey(), &instructions, tables, blockhash, &signers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::CurveProgram;
    use crate::testing::{MockLedger, MockRelay};
    use solana_sdk::message::VersionedMessage;

    struct Fixture {
        ledger: Arc<MockLedger>,
        relay: Arc<MockRelay>,
        payer: Keypair,
        wallets: Vec<Arc<Keypair>>,
        mint: Pubkey,
    }

    fn fixture(relay: MockRelay) -> Fixture {
        Fixture {
            ledger: Arc::new(MockLedger::new()),
            relay: Arc::new(relay),
            payer: Keypair::new(),
            wallets: (0..4).map(|_| Arc::new(Keypair::new())).collect(),
            mint: Pubkey::new_unique(),
        }
    }

    fn buy_group(f: &Fixture, wallets: &[Arc<Keypair>]) -> UnsignedTx {
        let program = CurveProgram::mainnet().unwrap();
        let fee = Pubkey::new_unique();
        UnsignedTx {
            instructions: wallets
                .iter()
                .map(|w| program.buy_instruction(&f.mint, &fee, &w.pubkey(), 1, 1).unwrap())
                .collect(),
            signers: wallets.to_vec(),
        }
    }

    fn table_for(groups: &[UnsignedTx]) -> AddressLookupTableAccount {
        let mut addresses = Vec::new();
        for ix in groups.iter().flat_map(|g| g.instructions.iter()) {
            addresses.extend(ix.accounts.iter().filter(|m| !m.is_signer).map(|m| m.pubkey));
        }
        AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: crate::lookup_table::dedup_addresses(&addresses),
        }
    }

    fn assembler(f: &Fixture, metrics: Option<Arc<BundlerMetrics>>) -> BundleAssembler {
        BundleAssembler::new(f.ledger.clone(), f.relay.clone(), &BundlerConfig::default(), metrics)
    }

    #[tokio::test]
    async fn bundle_orders_create_groups_then_tip() {
        let f = fixture(MockRelay::landing());
        let program = CurveProgram::mainnet().unwrap();
        let mint_kp = Arc::new(Keypair::new());
        let create = UnsignedTx {
            instructions: vec![program
                .create_instruction(&mint_kp.pubkey(), &f.payer.pubkey(), "A", "A", "u")
                .unwrap()],
            signers: vec![mint_kp.clone()],
        };
        let groups = vec![buy_group(&f, &f.wallets[..2]), buy_group(&f, &f.wallets[2..])];
        let table = table_for(&groups);

        let outcome = assembler(&f, None)
            .assemble_and_submit(&f.payer, Some(&create), &groups, &table)
            .await
            .unwrap();

        let bundles = f.relay.submitted();
        assert_eq!(bundles.len(), 1);
        let txs = &bundles[0];
        assert_eq!(txs.len(), 4);
        assert_eq!(outcome.signatures.len(), 4);
        assert_eq!(outcome.tip_signature, txs[3].signatures[0]);

        // create is compiled without the table
        match &txs[0].message {
            VersionedMessage::V0(m) => assert!(m.address_table_lookups.is_empty()),
            _ => panic!("expected v0"),
        }
        for tx in &txs[1..3] {
            let VersionedMessage::V0(m) = &tx.message else { panic!("expected v0") };
            assert_eq!(m.address_table_lookups.len(), 1);
            assert_eq!(m.address_table_lookups[0].account_key, table.key);
            // payer signs first
            assert_eq!(m.account_keys[0], f.payer.pubkey());
            assert_eq!(m.header.num_required_signatures, 3);
        }
        let tip_keys = txs[3].message.static_account_keys();
        assert!(JITO_TIP_ADDRESSES.contains(&tip_keys[1].to_string().as_str()));
        // preflight is skipped when the mint is created in the same bundle
        assert_eq!(f.ledger.simulated(), 0);
    }

    #[tokio::test]
    async fn too_many_transactions_rejected_before_submit() {
        let f = fixture(MockRelay::landing());
        let groups: Vec<UnsignedTx> = f
            .wallets
            .iter()
            .map(|w| buy_group(&f, std::slice::from_ref(w)))
            .collect();
        let create = buy_group(&f, &f.wallets[..1]);
        let table = table_for(&groups);

        let err = assembler(&f, None)
            .assemble_and_submit(&f.payer, Some(&create), &groups, &table)
            .await
            .unwrap_err();
        assert!(matches!(err, BundlerError::BundleTooLarge { len: 6, max: 5 }));
        assert!(f.relay.submitted().is_empty());
        assert_eq!(f.ledger.calls(), 0);
    }

    #[tokio::test]
    async fn unconfirmed_bundle_is_an_error() {
        let f = fixture(MockRelay::dropping());
        let groups = vec![buy_group(&f, &f.wallets)];
        let table = table_for(&groups);
        let reg = prometheus::Registry::new();
        let metrics = Arc::new(BundlerMetrics::new(&reg).unwrap());

        let err = assembler(&f, Some(metrics.clone()))
            .assemble_and_submit(&f.payer, None, &groups, &table)
            .await
            .unwrap_err();
        assert!(matches!(err, BundlerError::BundleNotConfirmed(_)));
        assert_eq!(metrics.bundles_submitted.get(), 1);
        assert_eq!(metrics.bundles_failed.get(), 1);
        assert_eq!(metrics.bundles_confirmed.get(), 0);
    }

    #[tokio::test]
    async fn preflight_rejection_aborts_whole_batch() {
        let f = fixture(MockRelay::landing());
        let groups = vec![buy_group(&f, &f.wallets[..2]), buy_group(&f, &f.wallets[2..])];
        let table = table_for(&groups);
        f.ledger.reject_simulation_call(1);

        let err = assembler(&f, None)
            .assemble_and_submit(&f.payer, None, &groups, &table)
            .await
            .unwrap_err();
        assert!(matches!(err, BundlerError::SimulationRejected(_)));
        assert!(f.relay.submitted().is_empty());
    }

    #[tokio::test]
    async fn trade_groups_lead_with_compute_budget() {
        let f = fixture(MockRelay::landing());
        let groups = vec![buy_group(&f, &f.wallets[..2])];
        let table = table_for(&groups);
        let mut cfg = BundlerConfig::default();
        cfg.compute_unit_limit = Some(400_000);
        cfg.compute_unit_price_micro_lamports = Some(100_000);

        BundleAssembler::new(f.ledger.clone(), f.relay.clone(), &cfg, None)
            .assemble_and_submit(&f.payer, None, &groups, &table)
            .await
            .unwrap();

        let txs = &f.relay.submitted()[0];
        let keys = txs[0].message.static_account_keys();
        let ixs = txs[0].message.instructions();
        assert_eq!(ixs.len(), 4);
        for ix in &ixs[..2] {
            assert_eq!(keys[ix.program_id_index as usize], solana_sdk::compute_budget::id());
        }
        // the tip stays a bare transfer
        assert_eq!(txs[1].message.instructions().len(), 1);
    }
}

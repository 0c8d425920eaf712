//! End-to-end flows: price, group, index, bundle.

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::sync::Arc;
use tracing::info;

use crate::batch::{BatchBuilder, BatchPlan, TradeOrder, UnsignedTx};
use crate::bundle::BundleAssembler;
use crate::chunk::chunk;
use crate::config::{BundlerConfig, PriorityFee};
use crate::curve::{fetch_global, get_reserve_state, ReserveState};
use crate::error::Result;
use crate::funds::{ensure_bundle_budget, FundManager};
use crate::ledger::{sign_v0, submit_checked, Ledger, SweepReport};
use crate::lookup_table::LookupTableManager;
use crate::metrics::BundlerMetrics;
use crate::program::CurveProgram;
use crate::relay::BundleRelay;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    /// Content URI produced by the metadata upload step.
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub mint: Pubkey,
    pub bundle_id: String,
    pub tip_signature: Signature,
    pub lookup_table: Pubkey,
    pub signatures: Vec<Signature>,
}

pub struct Bundler {
    config: BundlerConfig,
    ledger: Arc<dyn Ledger>,
    program: CurveProgram,
    tables: LookupTableManager,
    batches: BatchBuilder,
    assembler: BundleAssembler,
    funds: FundManager,
    priority: PriorityFee,
}

impl Bundler {
    pub fn new(
        config: BundlerConfig,
        ledger: Arc<dyn Ledger>,
        relay: Arc<dyn BundleRelay>,
        metrics: Option<Arc<BundlerMetrics>>,
    ) -> Result<Self> {
        config.validate()?;
        let program = CurveProgram::mainnet()?;
        Ok(Self {
            tables: LookupTableManager::new(ledger.clone(), &config, metrics.clone()),
            batches: BatchBuilder::new(ledger.clone(), program, &config),
            assembler: BundleAssembler::new(ledger.clone(), relay, &config, metrics.clone()),
            funds: FundManager::new(ledger.clone(), &config, metrics),
            priority: config.priority_fee(),
            program,
            ledger,
            config,
        })
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    pub fn tables(&self) -> &LookupTableManager {
        &self.tables
    }

    /// Creates the token and buys it from every wallet inside one bundle,
    /// priced against the launch curve.
    pub async fn create_and_batch_buy(
        &self,
        payer: &Keypair,
        mint: Arc<Keypair>,
        metadata: &TokenMetadata,
        buys: &[TradeOrder],
    ) -> Result<BatchOutcome> {
        self.check_budget(payer, buys).await?;

        let global = fetch_global(self.ledger.as_ref(), &self.program).await?;
        let reserves = ReserveState::initial(&global);
        let mint_key = mint.pubkey();

        let plan = self.plan_buys(payer, &mint_key, &reserves, buys).await?;
        let table = self.tables.create(payer, &plan.referenced_addresses()).await?;

        let create = UnsignedTx {
            instructions: vec![self.program.create_instruction(
                &mint_key,
                &payer.pubkey(),
                &metadata.name,
                &metadata.symbol,
                &metadata.uri,
            )?],
            signers: vec![mint],
        };
        self.submit(payer, mint_key, Some(&create), &plan, &table).await
    }

    /// Buys an existing token from every wallet at the live curve price.
    pub async fn batch_buy(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
        buys: &[TradeOrder],
        lookup_table: Option<Pubkey>,
    ) -> Result<BatchOutcome> {
        self.check_budget(payer, buys).await?;
        let reserves = get_reserve_state(self.ledger.as_ref(), &self.program, mint).await?;
        let plan = self.plan_buys(payer, mint, &reserves, buys).await?;
        let table = self.table_for(payer, &plan, lookup_table).await?;
        self.submit(payer, *mint, None, &plan, &table).await
    }

    pub async fn batch_sell(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
        sells: &[TradeOrder],
        lookup_table: Option<Pubkey>,
    ) -> Result<BatchOutcome> {
        let groups = chunk(sells, self.config.group_size);
        let plan = self.batches.build_sell_batch(&groups, mint).await?;
        let table = self.table_for(payer, &plan, lookup_table).await?;
        self.submit(payer, *mint, None, &plan, &table).await
    }

    /// Creates the token and buys it from `creator` in one transaction.
    /// `quote_in` of zero only creates.
    pub async fn create_and_buy(
        &self,
        creator: &Arc<Keypair>,
        mint: Arc<Keypair>,
        metadata: &TokenMetadata,
        quote_in: u64,
    ) -> Result<Signature> {
        let mint_key = mint.pubkey();
        let mut tx = UnsignedTx {
            instructions: vec![self.program.create_instruction(
                &mint_key,
                &creator.pubkey(),
                &metadata.name,
                &metadata.symbol,
                &metadata.uri,
            )?],
            signers: vec![mint],
        };
        if quote_in > 0 {
            let global = fetch_global(self.ledger.as_ref(), &self.program).await?;
            let reserves = ReserveState::initial(&global);
            let buy = self.batches.build_buy(creator, &mint_key, quote_in, &reserves).await?;
            tx.instructions.extend(buy.instructions);
        }
        let signature = self.send_one(creator, &tx, &[]).await?;
        info!(mint = %mint_key, %signature, quote_in, "token created");
        Ok(signature)
    }

    pub async fn buy(&self, buyer: &Arc<Keypair>, mint: &Pubkey, quote_in: u64) -> Result<Signature> {
        let reserves = get_reserve_state(self.ledger.as_ref(), &self.program, mint).await?;
        let tx = self.batches.build_buy(buyer, mint, quote_in, &reserves).await?;
        self.send_one(buyer, &tx, &[]).await
    }

    pub async fn sell(&self, seller: &Arc<Keypair>, mint: &Pubkey, base_in: u64) -> Result<Signature> {
        let tx = self.batches.build_sell(seller, mint, base_in).await?;
        self.send_one(seller, &tx, &[]).await
    }

    /// Pre-creates the token accounts `wallets` lack, compiled against an
    /// existing lookup table. Groups go out one after another.
    pub async fn create_batch_atas(
        &self,
        payer: &Keypair,
        wallets: &[Pubkey],
        mint: &Pubkey,
        lookup_table: &Pubkey,
    ) -> Result<Vec<Signature>> {
        let table = self.tables.fetch(lookup_table).await?;
        let groups = self
            .batches
            .build_ata_groups(&payer.pubkey(), wallets, mint)
            .await?;
        let tables = std::slice::from_ref(&table);
        let mut signatures = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            let signature = self.send_one(payer, group, tables).await?;
            info!(group = index, accounts = group.instructions.len(), %signature, "token accounts created");
            signatures.push(signature);
        }
        Ok(signatures)
    }

    pub async fn distribute(&self, source: &Keypair, targets: &[Pubkey], min_balance: u64) -> Result<Option<Signature>> {
        self.funds.distribute(source, targets, min_balance).await
    }

    pub async fn collect(&self, payer: &Keypair, wallets: &[Arc<Keypair>], destination: &Pubkey) -> Result<SweepReport> {
        self.funds.gather(payer, wallets, destination).await
    }

    /// Deactivates and, after the cooldown, closes every table `authority` owns.
    pub async fn burn_lookup_tables(&self, authority: &Keypair) -> Result<(SweepReport, SweepReport)> {
        self.tables.burn(authority, &authority.pubkey()).await
    }

    async fn send_one(
        &self,
        payer: &Keypair,
        tx: &UnsignedTx,
        tables: &[AddressLookupTableAccount],
    ) -> Result<Signature> {
        let mut signers: Vec<&Keypair> = vec![payer];
        signers.extend(tx.signers.iter().map(|k| k.as_ref()));
        let instructions = self.priority.with(&tx.instructions);
        let blockhash = self.ledger.get_latest_blockhash().await?;
        let signed = sign_v0(&payer.pubkey(), &instructions, tables, blockhash, &signers)?;
        submit_checked(self.ledger.as_ref(), &signed).await
    }

    async fn check_budget(&self, payer: &Keypair, buys: &[TradeOrder]) -> Result<()> {
        let available = self.ledger.get_balance(&payer.pubkey()).await?;
        let amounts: Vec<u64> = buys.iter().map(|o| o.amount).collect();
        ensure_bundle_budget(&self.config, available, &amounts)
    }

    async fn plan_buys(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
        reserves: &ReserveState,
        buys: &[TradeOrder],
    ) -> Result<BatchPlan> {
        let groups = chunk(buys, self.config.group_size);
        self.batches
            .build_buy_batch(&payer.pubkey(), &groups, mint, reserves)
            .await
    }

    async fn table_for(
        &self,
        payer: &Keypair,
        plan: &BatchPlan,
        existing: Option<Pubkey>,
    ) -> Result<AddressLookupTableAccount> {
        match existing {
            Some(table) => self.tables.fetch(&table).await,
            None => self.tables.create(payer, &plan.referenced_addresses()).await,
        }
    }

    async fn submit(
        &self,
        payer: &Keypair,
        mint: Pubkey,
        create: Option<&UnsignedTx>,
        plan: &BatchPlan,
        table: &AddressLookupTableAccount,
    ) -> Result<BatchOutcome> {
        let outcome = self
            .assembler
            .assemble_and_submit(payer, create, &plan.groups, table)
            .await?;
        info!(%mint, bundle_id = %outcome.bundle_id, lookup_table = %table.key, "batch landed");
        Ok(BatchOutcome {
            mint,
            bundle_id: outcome.bundle_id,
            tip_signature: outcome.tip_signature,
            lookup_table: table.key,
            signatures: outcome.signatures,
        })
    }
}

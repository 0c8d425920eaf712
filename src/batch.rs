use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signature::Keypair, signer::Signer};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::chunk::chunk;
use crate::config::BundlerConfig;
use crate::curve::{
    apply_margin, buy_max_cost, fetch_bonding_curve, fetch_global, sell_min_out, ReserveState,
    RunningTotals,
};
use crate::error::{BundlerError, Result};
use crate::ledger::Ledger;
use crate::lookup_table::dedup_addresses;
use crate::program::CurveProgram;

/// One wallet's leg of a batch. `amount` is lamports to spend on a buy and
/// base units to dispose of on a sell.
#[derive(Clone)]
pub struct TradeOrder {
    pub wallet: Arc<Keypair>,
    pub amount: u64,
}

impl TradeOrder {
    pub fn new(wallet: Arc<Keypair>, amount: u64) -> Self {
        Self { wallet, amount }
    }
}

/// Instructions of one transaction and the wallets that must sign it
/// besides the fee payer.
#[derive(Clone, Default)]
pub struct UnsignedTx {
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Arc<Keypair>>,
}

impl UnsignedTx {
    fn add_signer(&mut self, wallet: &Arc<Keypair>) {
        if !self.signers.iter().any(|s| s.pubkey() == wallet.pubkey()) {
            self.signers.push(wallet.clone());
        }
    }
}

pub struct BatchPlan {
    pub groups: Vec<UnsignedTx>,
    pub totals: RunningTotals,
}

impl BatchPlan {
    /// Deduplicated union of every program and account the batch touches.
    pub fn referenced_addresses(&self) -> Vec<Pubkey> {
        let all: Vec<Pubkey> = self
            .groups
            .iter()
            .flat_map(|g| g.instructions.iter())
            .flat_map(|ix| std::iter::once(ix.program_id).chain(ix.accounts.iter().map(|m| m.pubkey)))
            .collect();
        dedup_addresses(&all)
    }
}

pub struct BatchBuilder {
    ledger: Arc<dyn Ledger>,
    program: CurveProgram,
    ata_group_size: usize,
    buy_slippage_bps: u64,
    sell_slippage_bps: u64,
    buy_safety_margin_bps: u64,
    sell_min_out_guard: u64,
}

impl BatchBuilder {
    pub fn new(ledger: Arc<dyn Ledger>, program: CurveProgram, config: &BundlerConfig) -> Self {
        Self {
            ledger,
            program,
            ata_group_size: config.ata_group_size.max(1),
            buy_slippage_bps: config.buy_slippage_bps,
            sell_slippage_bps: config.sell_slippage_bps,
            buy_safety_margin_bps: config.buy_safety_margin_bps,
            sell_min_out_guard: config.sell_min_out_guard,
        }
    }

    /// Prices each wallet against `reserves` in encountered order, so wallet N
    /// sees the curve already moved by wallets 1..N-1. Receiving accounts that
    /// already exist are not recreated.
    pub async fn build_buy_batch(
        &self,
        payer: &Pubkey,
        groups: &[Vec<TradeOrder>],
        mint: &Pubkey,
        reserves: &ReserveState,
    ) -> Result<BatchPlan> {
        let atas: Vec<Pubkey> = groups
            .iter()
            .flatten()
            .map(|o| get_associated_token_address(&o.wallet.pubkey(), mint))
            .collect();
        let existing = self.ledger.get_multiple_accounts(&atas).await?;
        let mut ready: HashSet<Pubkey> = atas
            .iter()
            .zip(&existing)
            .filter(|(_, account)| account.is_some())
            .map(|(ata, _)| *ata)
            .collect();
        let mut atas = atas.into_iter();

        let mut totals = RunningTotals::default();
        let mut plans = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            let mut tx = UnsignedTx::default();
            for order in group {
                let user = order.wallet.pubkey();
                if let Some(ata) = atas.next() {
                    if ready.insert(ata) {
                        tx.instructions.push(create_associated_token_account_idempotent(
                            payer,
                            &user,
                            mint,
                            &spl_token::id(),
                        ));
                    }
                }

                let (base_out, next) = reserves.chained_buy(order.amount, totals);
                totals = next;
                let amount = apply_margin(base_out, self.buy_safety_margin_bps);
                let max_cost = buy_max_cost(order.amount, self.buy_slippage_bps);
                debug!(group = index, %user, quote_in = order.amount, base_out, amount, max_cost, "buy leg");

                tx.instructions.push(self.program.buy_instruction(
                    mint,
                    &reserves.fee_recipient,
                    &user,
                    amount,
                    max_cost,
                )?);
                tx.add_signer(&order.wallet);
            }
            plans.push(tx);
        }
        Ok(BatchPlan { groups: plans, totals })
    }

    /// One wallet buying alone at `reserves`, paying for its own token account.
    /// No safety margin; the slippage ceiling is the only bound.
    pub async fn build_buy(
        &self,
        buyer: &Arc<Keypair>,
        mint: &Pubkey,
        quote_in: u64,
        reserves: &ReserveState,
    ) -> Result<UnsignedTx> {
        let user = buyer.pubkey();
        let ata = get_associated_token_address(&user, mint);
        let mut tx = UnsignedTx::default();
        if self.ledger.get_account(&ata).await?.is_none() {
            tx.instructions.push(create_associated_token_account_idempotent(
                &user,
                &user,
                mint,
                &spl_token::id(),
            ));
        }
        let base_out = reserves.price_for_buy(quote_in);
        let max_cost = buy_max_cost(quote_in, self.buy_slippage_bps);
        debug!(%user, quote_in, base_out, max_cost, "single buy");
        tx.instructions.push(self.program.buy_instruction(
            mint,
            &reserves.fee_recipient,
            &user,
            base_out,
            max_cost,
        )?);
        tx.add_signer(buyer);
        Ok(tx)
    }

    /// One wallet selling alone against the live curve.
    pub async fn build_sell(&self, seller: &Arc<Keypair>, mint: &Pubkey, base_in: u64) -> Result<UnsignedTx> {
        let groups = [vec![TradeOrder::new(seller.clone(), base_in)]];
        let plan = self.build_sell_batch(&groups, mint).await?;
        Ok(plan.groups.into_iter().next().unwrap_or_default())
    }

    /// Token accounts for every wallet that lacks one, `ata_group_size` per
    /// transaction, funded by `payer`. Groups with nothing to create are dropped.
    pub async fn build_ata_groups(
        &self,
        payer: &Pubkey,
        wallets: &[Pubkey],
        mint: &Pubkey,
    ) -> Result<Vec<UnsignedTx>> {
        let atas: Vec<Pubkey> = wallets
            .iter()
            .map(|w| get_associated_token_address(w, mint))
            .collect();
        let existing = self.ledger.get_multiple_accounts(&atas).await?;
        let mut seen = HashSet::with_capacity(atas.len());
        let missing: Vec<Pubkey> = wallets
            .iter()
            .zip(atas.iter().zip(&existing))
            .filter(|(_, (ata, account))| account.is_none() && seen.insert(**ata))
            .map(|(wallet, _)| *wallet)
            .collect();

        Ok(chunk(&missing, self.ata_group_size)
            .into_iter()
            .map(|group| UnsignedTx {
                instructions: group
                    .iter()
                    .map(|w| create_associated_token_account_idempotent(payer, w, mint, &spl_token::id()))
                    .collect(),
                signers: Vec::new(),
            })
            .collect())
    }

    /// Reads the live curve, then prices sells the same chained way as buys.
    pub async fn build_sell_batch(&self, groups: &[Vec<TradeOrder>], mint: &Pubkey) -> Result<BatchPlan> {
        let curve = fetch_bonding_curve(self.ledger.as_ref(), &self.program, mint)
            .await?
            .ok_or(BundlerError::CurveAccountMissing(*mint))?;
        if curve.complete {
            return Err(BundlerError::CurveComplete(*mint));
        }
        let global = fetch_global(self.ledger.as_ref(), &self.program).await?;
        let reserves = ReserveState::from_curve(&curve, &global);

        let mut totals = RunningTotals::default();
        let mut plans = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            let mut tx = UnsignedTx::default();
            for order in group {
                let user = order.wallet.pubkey();
                let (quote_out, next) = reserves.chained_sell(order.amount, totals);
                totals = next;
                let min_out = sell_min_out(quote_out, self.sell_slippage_bps, self.sell_min_out_guard);
                debug!(group = index, %user, base_in = order.amount, quote_out, min_out, "sell leg");

                tx.instructions.push(self.program.sell_instruction(
                    mint,
                    &reserves.fee_recipient,
                    &user,
                    order.amount,
                    min_out,
                )?);
                tx.add_signer(&order.wallet);
            }
            plans.push(tx);
        }
        Ok(BatchPlan { groups: plans, totals })
    }
}

use borsh::BorshDeserialize;
use solana_sdk::pubkey::Pubkey;

use crate::config::BPS_DENOMINATOR;
use crate::error::{BundlerError, Result};
use crate::ledger::Ledger;
use crate::program::{CurveProgram, BONDING_CURVE_ACCOUNT_DISCRIMINATOR, GLOBAL_ACCOUNT_DISCRIMINATOR};

/// On-chain bonding curve account, after the 8-byte tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshDeserialize)]
pub struct BondingCurveState {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
}

#[derive(BorshDeserialize)]
struct RawGlobal {
    initialized: bool,
    authority: [u8; 32],
    fee_recipient: [u8; 32],
    initial_virtual_token_reserves: u64,
    initial_virtual_sol_reserves: u64,
    initial_real_token_reserves: u64,
    token_total_supply: u64,
    fee_basis_points: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalState {
    pub initialized: bool,
    pub authority: Pubkey,
    pub fee_recipient: Pubkey,
    pub initial_virtual_token_reserves: u64,
    pub initial_virtual_sol_reserves: u64,
    pub initial_real_token_reserves: u64,
    pub token_total_supply: u64,
    pub fee_basis_points: u64,
}

impl BondingCurveState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut body = strip_tag(data, &BONDING_CURVE_ACCOUNT_DISCRIMINATOR, "bonding curve")?;
        // newer curve accounts carry trailing fields, only the prefix is read
        Self::deserialize(&mut body)
            .map_err(|e| BundlerError::InvalidAccountData(format!("bonding curve: {e}")))
    }
}

impl GlobalState {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut body = strip_tag(data, &GLOBAL_ACCOUNT_DISCRIMINATOR, "global")?;
        let raw = RawGlobal::deserialize(&mut body)
            .map_err(|e| BundlerError::InvalidAccountData(format!("global: {e}")))?;
        Ok(Self {
            initialized: raw.initialized,
            authority: Pubkey::new_from_array(raw.authority),
            fee_recipient: Pubkey::new_from_array(raw.fee_recipient),
            initial_virtual_token_reserves: raw.initial_virtual_token_reserves,
            initial_virtual_sol_reserves: raw.initial_virtual_sol_reserves,
            initial_real_token_reserves: raw.initial_real_token_reserves,
            token_total_supply: raw.token_total_supply,
            fee_basis_points: raw.fee_basis_points,
        })
    }
}

fn strip_tag<'a>(data: &'a [u8], tag: &[u8; 8], what: &str) -> Result<&'a [u8]> {
    match data.split_first_chunk::<8>() {
        Some((head, body)) if head == tag => Ok(body),
        Some(_) => Err(BundlerError::InvalidAccountData(format!("{what}: discriminator mismatch"))),
        None => Err(BundlerError::InvalidAccountData(format!("{what}: account too short"))),
    }
}

/// Reserve snapshot the whole batch is priced against.
/// Base is the curve token, quote is lamports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveState {
    pub virtual_base: u64,
    pub virtual_quote: u64,
    pub real_base: u64,
    pub real_quote: u64,
    pub total_supply: u64,
    pub fee_bps: u64,
    pub fee_recipient: Pubkey,
}

/// Cumulative (quote, base) already allocated to earlier wallets of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningTotals {
    pub quote: u64,
    pub base: u64,
}

impl ReserveState {
    /// Curve of a token that has not been created yet.
    pub fn initial(global: &GlobalState) -> Self {
        Self {
            virtual_base: global.initial_virtual_token_reserves,
            virtual_quote: global.initial_virtual_sol_reserves,
            real_base: global.initial_real_token_reserves,
            real_quote: 0,
            total_supply: global.token_total_supply,
            fee_bps: global.fee_basis_points,
            fee_recipient: global.fee_recipient,
        }
    }

    pub fn from_curve(curve: &BondingCurveState, global: &GlobalState) -> Self {
        Self {
            virtual_base: curve.virtual_token_reserves,
            virtual_quote: curve.virtual_sol_reserves,
            real_base: curve.real_token_reserves,
            real_quote: curve.real_sol_reserves,
            total_supply: curve.token_total_supply,
            fee_bps: global.fee_basis_points,
            fee_recipient: global.fee_recipient,
        }
    }

    /// Base received for `quote_in`. The post-trade base reserve is taken as
    /// `product / new_quote + 1`, one unit above the plain constant-product value,
    /// matching the launcher's bundle pricing so the quote never overstates what
    /// the program pays out. A 1_000_000 lamport buy at launch reserves prices at
    /// 35_765_474_484 base, not 35_765_474_485.
    pub fn price_for_buy(&self, quote_in: u64) -> u64 {
        if quote_in == 0 || self.virtual_quote == 0 {
            return 0;
        }
        let vb = self.virtual_base as u128;
        let vq = self.virtual_quote as u128;
        let product = vb * vq;
        let new_quote = vq + quote_in as u128;
        let new_base = product / new_quote + 1;
        let out = vb.saturating_sub(new_base);
        out.min(self.real_base as u128) as u64
    }

    /// Quote received for `base_in`, net of the protocol fee (floored).
    pub fn price_for_sell(&self, base_in: u64) -> u64 {
        if base_in == 0 {
            return 0;
        }
        let vb = self.virtual_base as u128;
        let vq = self.virtual_quote as u128;
        let gross = base_in as u128 * vq / (vb + base_in as u128);
        let fee = gross * self.fee_bps as u128 / BPS_DENOMINATOR as u128;
        (gross - fee) as u64
    }

    /// Allocation for the next buyer: price of everything so far plus `quote_in`
    /// against the snapshot, minus what earlier buyers already got.
    pub fn chained_buy(&self, quote_in: u64, prior: RunningTotals) -> (u64, RunningTotals) {
        let cumulative_quote = prior.quote.saturating_add(quote_in);
        let base_out = self.price_for_buy(cumulative_quote).saturating_sub(prior.base);
        let next = RunningTotals {
            quote: cumulative_quote,
            base: prior.base.saturating_add(base_out),
        };
        (base_out, next)
    }

    pub fn chained_sell(&self, base_in: u64, prior: RunningTotals) -> (u64, RunningTotals) {
        let quote_out = self.price_for_sell_after(base_in, prior.base, prior.quote);
        let next = RunningTotals {
            quote: prior.quote.saturating_add(quote_out),
            base: prior.base.saturating_add(base_in),
        };
        (quote_out, next)
    }

    pub fn price_for_sell_after(&self, base_in: u64, prior_base_consumed: u64, prior_quote_returned: u64) -> u64 {
        self.price_for_sell(prior_base_consumed.saturating_add(base_in))
            .saturating_sub(prior_quote_returned)
    }
}

pub fn buy_max_cost(quote_in: u64, slippage_bps: u64) -> u64 {
    let q = quote_in as u128;
    let bound = q + q * slippage_bps as u128 / BPS_DENOMINATOR as u128;
    bound.min(u64::MAX as u128) as u64
}

/// `guard` keeps a fully-slipped bound above zero.
pub fn sell_min_out(quote_out: u64, slippage_bps: u64, guard: u64) -> u64 {
    let q = quote_out as u128;
    let cut = (q * slippage_bps as u128 / BPS_DENOMINATOR as u128).min(q);
    (q - cut).saturating_add(guard as u128).min(u64::MAX as u128) as u64
}

pub fn apply_margin(amount: u64, margin_bps: u64) -> u64 {
    let keep = BPS_DENOMINATOR.saturating_sub(margin_bps) as u128;
    (amount as u128 * keep / BPS_DENOMINATOR as u128) as u64
}

pub async fn fetch_global(ledger: &dyn Ledger, program: &CurveProgram) -> Result<GlobalState> {
    let address = program.global();
    let account = ledger
        .get_account(&address)
        .await?
        .ok_or(BundlerError::AccountNotFound(address))?;
    GlobalState::decode(&account.data)
}

pub async fn fetch_bonding_curve(
    ledger: &dyn Ledger,
    program: &CurveProgram,
    mint: &Pubkey,
) -> Result<Option<BondingCurveState>> {
    match ledger.get_account(&program.bonding_curve(mint)).await? {
        Some(account) => BondingCurveState::decode(&account.data).map(Some),
        None => Ok(None),
    }
}

/// Fresh snapshot of a live curve. Never cached; reserves move every trade.
pub async fn get_reserve_state(
    ledger: &dyn Ledger,
    program: &CurveProgram,
    mint: &Pubkey,
) -> Result<ReserveState> {
    let curve = fetch_bonding_curve(ledger, program, mint)
        .await?
        .ok_or(BundlerError::AccountNotFound(program.bonding_curve(mint)))?;
    if curve.complete {
        return Err(BundlerError::CurveComplete(*mint));
    }
    let global = fetch_global(ledger, program).await?;
    Ok(ReserveState::from_curve(&curve, &global))
}

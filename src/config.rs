use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use std::path::Path;

use crate::error::{BundlerError, Result};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn to_config(self) -> CommitmentConfig {
        match self {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Some(Commitment::Processed),
            "confirmed" => Some(Commitment::Confirmed),
            "finalized" => Some(Commitment::Finalized),
            _ => None,
        }
    }
}

/// Compute budget prepended to every transaction the bundler signs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityFee {
    pub unit_limit: Option<u32>,
    pub unit_price_micro_lamports: Option<u64>,
}

impl PriorityFee {
    pub fn instructions(&self) -> Vec<Instruction> {
        let mut ixs = Vec::with_capacity(2);
        if let Some(units) = self.unit_limit {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(units));
        }
        if let Some(price) = self.unit_price_micro_lamports {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_price(price));
        }
        ixs
    }

    /// `instructions` behind the compute budget ones.
    pub fn with(&self, instructions: &[Instruction]) -> Vec<Instruction> {
        let mut ixs = self.instructions();
        ixs.extend_from_slice(instructions);
        ixs
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BundlerConfig {
    pub rpc_url: String,
    pub block_engine_url: String,
    pub commitment: Commitment,

    pub group_size: usize,
    pub lut_page_size: usize,
    pub lut_sweep_group_size: usize,
    pub gather_group_size: usize,
    pub ata_group_size: usize,
    pub lut_cooldown_secs: u64,
    pub lut_recent_slot_lag: u64,

    pub buy_slippage_bps: u64,
    pub sell_slippage_bps: u64,
    pub buy_safety_margin_bps: u64,
    pub sell_min_out_guard: u64,

    pub jito_tip_lamports: u64,
    pub max_bundle_transactions: usize,
    pub bundle_preflight: bool,
    pub bundle_confirm_timeout_secs: u64,
    pub bundle_poll_interval_ms: u64,
    pub tx_confirm_timeout_secs: u64,

    pub compute_unit_limit: Option<u32>,
    pub compute_unit_price_micro_lamports: Option<u64>,

    pub main_wallet_fee_lamports: u64,
    pub lut_fee_lamports: u64,
    pub sub_wallet_fee_lamports: u64,

    pub payer_keypair_path: String,
    pub wallet_keypair_paths: Vec<String>,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            block_engine_url: "https://mainnet.block-engine.jito.wtf".to_string(),
            commitment: Commitment::Confirmed,
            group_size: 5,
            lut_page_size: MAX_EXTEND_ADDRESSES,
            lut_sweep_group_size: 25,
            gather_group_size: 7,
            ata_group_size: 12,
            lut_cooldown_secs: 300,
            lut_recent_slot_lag: 10,
            buy_slippage_bps: 500,
            sell_slippage_bps: 9999,
            buy_safety_margin_bps: 1000,
            sell_min_out_guard: 1,
            jito_tip_lamports: 1_000_000,
            max_bundle_transactions: MAX_BUNDLE_SIZE,
            bundle_preflight: true,
            bundle_confirm_timeout_secs: 60,
            bundle_poll_interval_ms: 1000,
            tx_confirm_timeout_secs: 60,
            compute_unit_limit: None,
            compute_unit_price_micro_lamports: None,
            // 0.0015 SOL on top of the relay tip
            main_wallet_fee_lamports: LAMPORTS_PER_SOL * 15 / 10_000 + 1_000_000,
            lut_fee_lamports: LAMPORTS_PER_SOL * 11 / 1_000,
            sub_wallet_fee_lamports: LAMPORTS_PER_SOL * 22 / 10_000,
            payer_keypair_path: "payer.json".to_string(),
            wallet_keypair_paths: Vec::new(),
        }
    }
}

impl BundlerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BundlerError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| BundlerError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn from_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("BUNDLER_RPC_URL") {
            self.rpc_url = url;
        }
        if let Ok(url) = std::env::var("BUNDLER_BLOCK_ENGINE_URL") {
            self.block_engine_url = url;
        }
        if let Ok(c) = std::env::var("BUNDLER_COMMITMENT") {
            self.commitment = Commitment::parse(&c)
                .ok_or_else(|| BundlerError::Config(format!("unknown commitment {c}")))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(BundlerError::Config("rpc_url is empty".into()));
        }
        if self.block_engine_url.is_empty() {
            return Err(BundlerError::Config("block_engine_url is empty".into()));
        }
        if self.group_size == 0
            || self.lut_sweep_group_size == 0
            || self.gather_group_size == 0
            || self.ata_group_size == 0
        {
            return Err(BundlerError::Config("group sizes must be positive".into()));
        }
        if self.lut_page_size == 0 || self.lut_page_size > MAX_EXTEND_ADDRESSES {
            return Err(BundlerError::Config(format!(
                "lut_page_size must be within 1..={MAX_EXTEND_ADDRESSES}"
            )));
        }
        if self.buy_slippage_bps > BPS_DENOMINATOR
            || self.sell_slippage_bps > BPS_DENOMINATOR
            || self.buy_safety_margin_bps > BPS_DENOMINATOR
        {
            return Err(BundlerError::Config("basis points above 10000".into()));
        }
        if self.max_bundle_transactions == 0 || self.max_bundle_transactions > MAX_BUNDLE_SIZE {
            return Err(BundlerError::Config(format!(
                "max_bundle_transactions must be within 1..={MAX_BUNDLE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn commitment_config(&self) -> CommitmentConfig {
        self.commitment.to_config()
    }

    pub fn priority_fee(&self) -> PriorityFee {
        PriorityFee {
            unit_limit: self.compute_unit_limit,
            unit_price_micro_lamports: self.compute_unit_price_micro_lamports,
        }
    }
}

pub const BPS_DENOMINATOR: u64 = 10_000;

// Ledger limits
pub const MAX_EXTEND_ADDRESSES: usize = 30;
pub const MAX_BUNDLE_SIZE: usize = 5;

// Curve program
pub const PUMP_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";
pub const PUMP_EVENT_AUTHORITY: &str = "Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1";
pub const MPL_TOKEN_METADATA_PROGRAM_ID: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";
pub const GLOBAL_SEED: &[u8] = b"global";
pub const BONDING_CURVE_SEED: &[u8] = b"bonding-curve";
pub const MINT_AUTHORITY_SEED: &[u8] = b"mint-authority";
pub const METADATA_SEED: &[u8] = b"metadata";

pub const JITO_TIP_ADDRESSES: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = BundlerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.group_size, 5);
        assert_eq!(cfg.lut_page_size, 30);
        assert_eq!(cfg.lut_sweep_group_size, 25);
        assert_eq!(cfg.gather_group_size, 7);
        assert_eq!(cfg.main_wallet_fee_lamports, 2_500_000);
        assert_eq!(cfg.lut_fee_lamports, 11_000_000);
        assert_eq!(cfg.sub_wallet_fee_lamports, 2_200_000);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg: BundlerConfig = toml::from_str(
            r#"
            rpc_url = "http://localhost:8899"
            commitment = "finalized"
            group_size = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rpc_url, "http://localhost:8899");
        assert_eq!(cfg.commitment, Commitment::Finalized);
        assert_eq!(cfg.group_size, 4);
        assert_eq!(cfg.gather_group_size, 7);
        assert_eq!(cfg.buy_slippage_bps, 500);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = BundlerConfig::default();
        cfg.group_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = BundlerConfig::default();
        cfg.lut_page_size = 31;
        assert!(cfg.validate().is_err());

        let mut cfg = BundlerConfig::default();
        cfg.sell_slippage_bps = 10_001;
        assert!(cfg.validate().is_err());

        let mut cfg = BundlerConfig::default();
        cfg.rpc_url.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = BundlerConfig::default();
        cfg.max_bundle_transactions = 6;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn priority_fee_is_off_by_default() {
        let cfg = BundlerConfig::default();
        assert!(cfg.priority_fee().instructions().is_empty());

        let cfg: BundlerConfig = toml::from_str(
            r#"
            compute_unit_limit = 200000
            compute_unit_price_micro_lamports = 50000
            "#,
        )
        .unwrap();
        let ixs = cfg.priority_fee().with(&[]);
        assert_eq!(ixs.len(), 2);
        assert!(ixs.iter().all(|ix| ix.program_id == solana_sdk::compute_budget::id()));
        assert_eq!(ixs[0], ComputeBudgetInstruction::set_compute_unit_limit(200_000));
        assert_eq!(ixs[1], ComputeBudgetInstruction::set_compute_unit_price(50_000));
    }

    #[test]
    fn tip_addresses_parse() {
        for addr in JITO_TIP_ADDRESSES {
            assert!(addr.parse::<solana_sdk::pubkey::Pubkey>().is_ok(), "{addr}");
        }
    }
}

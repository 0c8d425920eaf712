//! Addresses and instruction builders for the bonding-curve program.

use borsh::BorshSerialize;
use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;

use crate::config::{
    BONDING_CURVE_SEED, GLOBAL_SEED, METADATA_SEED, MINT_AUTHORITY_SEED,
    MPL_TOKEN_METADATA_PROGRAM_ID, PUMP_EVENT_AUTHORITY, PUMP_PROGRAM_ID,
};
use crate::error::{BundlerError, Result};

pub const CREATE_DISCRIMINATOR: [u8; 8] = [24, 30, 200, 40, 5, 28, 7, 119];
pub const BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
pub const SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

pub const BONDING_CURVE_ACCOUNT_DISCRIMINATOR: [u8; 8] = [23, 183, 248, 55, 96, 216, 172, 96];
pub const GLOBAL_ACCOUNT_DISCRIMINATOR: [u8; 8] = [167, 232, 232, 177, 200, 108, 114, 127];

/// Anchor-style 8-byte tag: first bytes of sha256 over `namespace:name`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Fixed addresses of the curve program and its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveProgram {
    pub program_id: Pubkey,
    pub event_authority: Pubkey,
    pub metadata_program: Pubkey,
}

impl CurveProgram {
    pub fn mainnet() -> Result<Self> {
        Ok(Self {
            program_id: parse_key(PUMP_PROGRAM_ID)?,
            event_authority: parse_key(PUMP_EVENT_AUTHORITY)?,
            metadata_program: parse_key(MPL_TOKEN_METADATA_PROGRAM_ID)?,
        })
    }

    pub fn global(&self) -> Pubkey {
        Pubkey::find_program_address(&[GLOBAL_SEED], &self.program_id).0
    }

    pub fn mint_authority(&self) -> Pubkey {
        Pubkey::find_program_address(&[MINT_AUTHORITY_SEED], &self.program_id).0
    }

    pub fn bonding_curve(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[BONDING_CURVE_SEED, mint.as_ref()], &self.program_id).0
    }

    pub fn associated_bonding_curve(&self, mint: &Pubkey) -> Pubkey {
        get_associated_token_address(&self.bonding_curve(mint), mint)
    }

    pub fn metadata(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(
            &[METADATA_SEED, self.metadata_program.as_ref(), mint.as_ref()],
            &self.metadata_program,
        )
        .0
    }

    pub fn create_instruction(
        &self,
        mint: &Pubkey,
        creator: &Pubkey,
        name: &str,
        symbol: &str,
        uri: &str,
    ) -> Result<Instruction> {
        let args = CreateArgs {
            name: name.to_string(),
            symbol: symbol.to_string(),
            uri: uri.to_string(),
            creator: creator.to_bytes(),
        };
        let accounts = vec![
            AccountMeta::new(*mint, true),
            AccountMeta::new_readonly(self.mint_authority(), false),
            AccountMeta::new(self.bonding_curve(mint), false),
            AccountMeta::new(self.associated_bonding_curve(mint), false),
            AccountMeta::new_readonly(self.global(), false),
            AccountMeta::new_readonly(self.metadata_program, false),
            AccountMeta::new(self.metadata(mint), false),
            AccountMeta::new(*creator, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
            AccountMeta::new_readonly(self.event_authority, false),
            AccountMeta::new_readonly(self.program_id, false),
        ];
        self.instruction(CREATE_DISCRIMINATOR, &args, accounts)
    }

    /// `amount` is the base amount to receive, `max_quote_cost` the spend ceiling.
    pub fn buy_instruction(
        &self,
        mint: &Pubkey,
        fee_recipient: &Pubkey,
        user: &Pubkey,
        amount: u64,
        max_quote_cost: u64,
    ) -> Result<Instruction> {
        let accounts = vec![
            AccountMeta::new_readonly(self.global(), false),
            AccountMeta::new(*fee_recipient, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(self.bonding_curve(mint), false),
            AccountMeta::new(self.associated_bonding_curve(mint), false),
            AccountMeta::new(get_associated_token_address(user, mint), false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
            AccountMeta::new_readonly(self.event_authority, false),
            AccountMeta::new_readonly(self.program_id, false),
        ];
        self.instruction(
            BUY_DISCRIMINATOR,
            &TradeArgs { amount, limit: max_quote_cost },
            accounts,
        )
    }

    pub fn sell_instruction(
        &self,
        mint: &Pubkey,
        fee_recipient: &Pubkey,
        user: &Pubkey,
        amount: u64,
        min_quote_out: u64,
    ) -> Result<Instruction> {
        let accounts = vec![
            AccountMeta::new_readonly(self.global(), false),
            AccountMeta::new(*fee_recipient, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(self.bonding_curve(mint), false),
            AccountMeta::new(self.associated_bonding_curve(mint), false),
            AccountMeta::new(get_associated_token_address(user, mint), false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(self.event_authority, false),
            AccountMeta::new_readonly(self.program_id, false),
        ];
        self.instruction(
            SELL_DISCRIMINATOR,
            &TradeArgs { amount, limit: min_quote_out },
            accounts,
        )
    }

    fn instruction<A: BorshSerialize>(
        &self,
        tag: [u8; 8],
        args: &A,
        accounts: Vec<AccountMeta>,
    ) -> Result<Instruction> {
        let mut data = tag.to_vec();
        args.serialize(&mut data)
            .map_err(|e| BundlerError::InvalidAccountData(format!("encode args: {e}")))?;
        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data,
        })
    }
}

#[derive(BorshSerialize)]
struct CreateArgs {
    name: String,
    symbol: String,
    uri: String,
    creator: [u8; 32],
}

/// Shared layout of `buy(amount, max_sol_cost)` and `sell(amount, min_sol_output)`.
#[derive(BorshSerialize)]
struct TradeArgs {
    amount: u64,
    limit: u64,
}

fn parse_key(s: &str) -> Result<Pubkey> {
    Pubkey::from_str(s).map_err(|e| BundlerError::Config(format!("bad address {s}: {e}")))
}

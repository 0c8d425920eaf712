//! Decoding of the curve program's emitted events.

use borsh::BorshDeserialize;
use solana_sdk::pubkey::Pubkey;

use crate::error::{BundlerError, Result};

pub const CREATE_EVENT_DISCRIMINATOR: [u8; 8] = [27, 114, 169, 77, 222, 235, 99, 118];
pub const TRADE_EVENT_DISCRIMINATOR: [u8; 8] = [189, 219, 127, 211, 78, 230, 97, 238];
pub const COMPLETE_EVENT_DISCRIMINATOR: [u8; 8] = [95, 114, 97, 156, 212, 46, 152, 8];
pub const SET_PARAMS_EVENT_DISCRIMINATOR: [u8; 8] = [223, 195, 159, 246, 62, 48, 143, 131];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Trade,
    Complete,
    SetParams,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Create,
        EventKind::Trade,
        EventKind::Complete,
        EventKind::SetParams,
    ];

    pub fn discriminator(self) -> [u8; 8] {
        match self {
            EventKind::Create => CREATE_EVENT_DISCRIMINATOR,
            EventKind::Trade => TRADE_EVENT_DISCRIMINATOR,
            EventKind::Complete => COMPLETE_EVENT_DISCRIMINATOR,
            EventKind::SetParams => SET_PARAMS_EVENT_DISCRIMINATOR,
        }
    }

    pub fn from_discriminator(tag: &[u8; 8]) -> Option<Self> {
        Self::ALL.into_iter().find(|k| &k.discriminator() == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateEvent {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub user: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeEvent {
    pub mint: Pubkey,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub is_buy: bool,
    pub user: Pubkey,
    pub timestamp: i64,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompleteEvent {
    pub user: Pubkey,
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetParamsEvent {
    pub fee_recipient: Pubkey,
    pub initial_virtual_token_reserves: u64,
    pub initial_virtual_sol_reserves: u64,
    pub initial_real_token_reserves: u64,
    pub token_total_supply: u64,
    pub fee_basis_points: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramEvent {
    Create(CreateEvent),
    Trade(TradeEvent),
    Complete(CompleteEvent),
    SetParams(SetParamsEvent),
}

impl ProgramEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProgramEvent::Create(_) => EventKind::Create,
            ProgramEvent::Trade(_) => EventKind::Trade,
            ProgramEvent::Complete(_) => EventKind::Complete,
            ProgramEvent::SetParams(_) => EventKind::SetParams,
        }
    }

    /// Decodes a raw event payload (tag followed by the borsh body).
    /// Trailing bytes added by newer program versions are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (tag, mut body) = data
            .split_first_chunk::<8>()
            .ok_or_else(|| BundlerError::InvalidAccountData("event shorter than tag".into()))?;
        let kind = EventKind::from_discriminator(tag)
            .ok_or_else(|| BundlerError::InvalidAccountData(format!("unknown event tag {tag:?}")))?;

        let event = match kind {
            EventKind::Create => {
                let raw = RawCreate::deserialize(&mut body).map_err(decode_err)?;
                ProgramEvent::Create(CreateEvent {
                    name: raw.name,
                    symbol: raw.symbol,
                    uri: raw.uri,
                    mint: Pubkey::new_from_array(raw.mint),
                    bonding_curve: Pubkey::new_from_array(raw.bonding_curve),
                    user: Pubkey::new_from_array(raw.user),
                })
            }
            EventKind::Trade => {
                let raw = RawTrade::deserialize(&mut body).map_err(decode_err)?;
                ProgramEvent::Trade(TradeEvent {
                    mint: Pubkey::new_from_array(raw.mint),
                    sol_amount: raw.sol_amount,
                    token_amount: raw.token_amount,
                    is_buy: raw.is_buy,
                    user: Pubkey::new_from_array(raw.user),
                    timestamp: raw.timestamp,
                    virtual_sol_reserves: raw.virtual_sol_reserves,
                    virtual_token_reserves: raw.virtual_token_reserves,
                })
            }
            EventKind::Complete => {
                let raw = RawComplete::deserialize(&mut body).map_err(decode_err)?;
                ProgramEvent::Complete(CompleteEvent {
                    user: Pubkey::new_from_array(raw.user),
                    mint: Pubkey::new_from_array(raw.mint),
                    bonding_curve: Pubkey::new_from_array(raw.bonding_curve),
                    timestamp: raw.timestamp,
                })
            }
            EventKind::SetParams => {
                let raw = RawSetParams::deserialize(&mut body).map_err(decode_err)?;
                ProgramEvent::SetParams(SetParamsEvent {
                    fee_recipient: Pubkey::new_from_array(raw.fee_recipient),
                    initial_virtual_token_reserves: raw.initial_virtual_token_reserves,
                    initial_virtual_sol_reserves: raw.initial_virtual_sol_reserves,
                    initial_real_token_reserves: raw.initial_real_token_reserves,
                    token_total_supply: raw.token_total_supply,
                    fee_basis_points: raw.fee_basis_points,
                })
            }
        };
        Ok(event)
    }
}

fn decode_err(e: std::io::Error) -> BundlerError {
    BundlerError::InvalidAccountData(format!("event body: {e}"))
}

#[derive(BorshDeserialize)]
struct RawCreate {
    name: String,
    symbol: String,
    uri: String,
    mint: [u8; 32],
    bonding_curve: [u8; 32],
    user: [u8; 32],
}

#[derive(BorshDeserialize)]
struct RawTrade {
    mint: [u8; 32],
    sol_amount: u64,
    token_amount: u64,
    is_buy: bool,
    user: [u8; 32],
    timestamp: i64,
    virtual_sol_reserves: u64,
    virtual_token_reserves: u64,
}

#[derive(BorshDeserialize)]
struct RawComplete {
    user: [u8; 32],
    mint: [u8; 32],
    bonding_curve: [u8; 32],
    timestamp: i64,
}

#[derive(BorshDeserialize)]
struct RawSetParams {
    fee_recipient: [u8; 32],
    initial_virtual_token_reserves: u64,
    initial_virtual_sol_reserves: u64,
    initial_real_token_reserves: u64,
    token_total_supply: u64,
    fee_basis_points: u64,
}

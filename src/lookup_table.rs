use solana_sdk::{
    address_lookup_table::{self, instruction as alt_ix, AddressLookupTableAccount},
    clock::Slot,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::chunk::chunk;
use crate::config::{BundlerConfig, PriorityFee};
use crate::error::{BundlerError, Result};
use crate::ledger::{run_sweep, sign_v0, submit_checked, AccountFilter, Ledger, SweepGroup, SweepReport};
use crate::metrics::BundlerMetrics;

// Table account layout: u32 state tag, deactivation slot, last extended slot,
// start index, Option<authority>, u16 padding, then 32-byte addresses.
const DEACTIVATION_SLOT_OFFSET: usize = 4;
const AUTHORITY_OFFSET: usize = 22;
const META_SIZE: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePhase {
    Active,
    Deactivated { slot: Slot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedTable {
    pub address: Pubkey,
    pub phase: TablePhase,
}

/// Proof that deactivation was submitted, and when. Closing consumes it.
#[derive(Debug, Clone, Copy)]
pub struct Deactivation {
    submitted_at: Instant,
    cooldown: Duration,
}

impl Deactivation {
    pub fn ready_at(&self) -> Instant {
        self.submitted_at + self.cooldown
    }
}

pub fn decode_phase(data: &[u8]) -> Result<TablePhase> {
    let raw = data
        .get(DEACTIVATION_SLOT_OFFSET..DEACTIVATION_SLOT_OFFSET + 8)
        .ok_or_else(|| BundlerError::InvalidAccountData("lookup table too short".into()))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(match u64::from_le_bytes(buf) {
        Slot::MAX => TablePhase::Active,
        slot => TablePhase::Deactivated { slot },
    })
}

pub fn decode_addresses(data: &[u8]) -> Result<Vec<Pubkey>> {
    let body = data
        .get(META_SIZE..)
        .ok_or_else(|| BundlerError::InvalidAccountData("lookup table too short".into()))?;
    if body.len() % 32 != 0 {
        return Err(BundlerError::InvalidAccountData("lookup table address region misaligned".into()));
    }
    Ok(body
        .chunks_exact(32)
        .map(|c| {
            let mut key = [0u8; 32];
            key.copy_from_slice(c);
            Pubkey::new_from_array(key)
        })
        .collect())
}

/// Order-preserving dedup.
pub fn dedup_addresses(addresses: &[Pubkey]) -> Vec<Pubkey> {
    let mut seen = HashSet::with_capacity(addresses.len());
    addresses.iter().copied().filter(|a| seen.insert(*a)).collect()
}

pub struct LookupTableManager {
    ledger: Arc<dyn Ledger>,
    page_size: usize,
    sweep_group_size: usize,
    recent_slot_lag: u64,
    cooldown: Duration,
    priority: PriorityFee,
    metrics: Option<Arc<BundlerMetrics>>,
}

impl LookupTableManager {
    pub fn new(ledger: Arc<dyn Ledger>, config: &BundlerConfig, metrics: Option<Arc<BundlerMetrics>>) -> Self {
        Self {
            ledger,
            page_size: config.lut_page_size.max(1),
            sweep_group_size: config.lut_sweep_group_size.max(1),
            recent_slot_lag: config.lut_recent_slot_lag,
            cooldown: Duration::from_secs(config.lut_cooldown_secs),
            priority: config.priority_fee(),
            metrics,
        }
    }

    /// Creates a table holding `addresses` (deduplicated), one page per transaction.
    /// The first transaction creates the table and writes page 0; every later
    /// page is sent only after the previous one confirmed.
    pub async fn create(&self, payer: &Keypair, addresses: &[Pubkey]) -> Result<AddressLookupTableAccount> {
        let addresses = dedup_addresses(addresses);
        if addresses.is_empty() {
            return Err(BundlerError::LutCreation("no addresses to register".into()));
        }

        let slot = self.ledger.get_slot().await?;
        let recent_slot = slot.saturating_sub(self.recent_slot_lag);
        let authority = payer.pubkey();
        let (create_ix, table) = alt_ix::create_lookup_table(authority, authority, recent_slot);

        let pages = chunk(&addresses, self.page_size);
        let total = pages.len();
        let mut create_ix = Some(create_ix);
        for (page, keys) in pages.into_iter().enumerate() {
            let mut ixs = self.priority.instructions();
            if let Some(ix) = create_ix.take() {
                ixs.push(ix);
            }
            ixs.push(alt_ix::extend_lookup_table(table, authority, Some(authority), keys));

            let blockhash = self.ledger.get_latest_blockhash().await?;
            let tx = sign_v0(&authority, &ixs, &[], blockhash, &[payer])?;
            let signature = submit_checked(self.ledger.as_ref(), &tx)
                .await
                .map_err(|e| page_error(page, e))?;
            if let Some(m) = &self.metrics {
                m.lut_pages_written.inc();
            }
            info!(%table, page, total, %signature, "lookup table page written");
        }

        Ok(AddressLookupTableAccount { key: table, addresses })
    }

    pub async fn fetch(&self, table: &Pubkey) -> Result<AddressLookupTableAccount> {
        let account = self
            .ledger
            .get_account(table)
            .await?
            .ok_or(BundlerError::AccountNotFound(*table))?;
        Ok(AddressLookupTableAccount {
            key: *table,
            addresses: decode_addresses(&account.data)?,
        })
    }

    /// Every table whose authority is `authority`, found by scanning the table program.
    pub async fn owned_tables(&self, authority: &Pubkey) -> Result<Vec<OwnedTable>> {
        let filter = AccountFilter::Memcmp {
            offset: AUTHORITY_OFFSET,
            bytes: authority.to_bytes().to_vec(),
        };
        let accounts = self
            .ledger
            .scan_program_accounts(&address_lookup_table::program::id(), &[filter])
            .await?;
        let mut tables = Vec::with_capacity(accounts.len());
        for (address, account) in accounts {
            match decode_phase(&account.data) {
                Ok(phase) => tables.push(OwnedTable { address, phase }),
                Err(e) => warn!(%address, error = %e, "ignoring undecodable table"),
            }
        }
        Ok(tables)
    }

    /// Deactivates every active table owned by `authority`.
    pub async fn deactivate_all(&self, authority: &Keypair) -> Result<(SweepReport, Deactivation)> {
        let owner = authority.pubkey();
        let active: Vec<Pubkey> = self
            .owned_tables(&owner)
            .await?
            .into_iter()
            .filter(|t| t.phase == TablePhase::Active)
            .map(|t| t.address)
            .collect();

        let groups = chunk(&active, self.sweep_group_size)
            .into_iter()
            .map(|tables| SweepGroup {
                instructions: tables
                    .iter()
                    .map(|t| alt_ix::deactivate_lookup_table(*t, owner))
                    .collect(),
                signers: Vec::new(),
            })
            .collect();
        let report = run_sweep(
            self.ledger.as_ref(),
            authority,
            "deactivate",
            groups,
            self.priority,
            self.metrics.as_deref(),
        )
        .await?;
        info!(tables = active.len(), skipped = report.skipped_groups, "deactivation sweep done");

        let deactivation = Deactivation {
            submitted_at: Instant::now(),
            cooldown: self.cooldown,
        };
        Ok((report, deactivation))
    }

    /// Waits out the cooldown, then closes every deactivated table and sends the
    /// rent to `recipient`.
    pub async fn close_all(
        &self,
        authority: &Keypair,
        recipient: &Pubkey,
        deactivation: Deactivation,
    ) -> Result<SweepReport> {
        let ready_at = deactivation.ready_at();
        if ready_at > Instant::now() {
            info!(wait_secs = (ready_at - Instant::now()).as_secs(), "waiting for table cooldown");
            tokio::time::sleep_until(ready_at).await;
        }

        let owner = authority.pubkey();
        let closable: Vec<Pubkey> = self
            .owned_tables(&owner)
            .await?
            .into_iter()
            .filter(|t| matches!(t.phase, TablePhase::Deactivated { .. }))
            .map(|t| t.address)
            .collect();

        let groups = chunk(&closable, self.sweep_group_size)
            .into_iter()
            .map(|tables| SweepGroup {
                instructions: tables
                    .iter()
                    .map(|t| alt_ix::close_lookup_table(*t, owner, *recipient))
                    .collect(),
                signers: Vec::new(),
            })
            .collect();
        let report = run_sweep(
            self.ledger.as_ref(),
            authority,
            "close",
            groups,
            self.priority,
            self.metrics.as_deref(),
        )
        .await?;
        info!(tables = closable.len(), skipped = report.skipped_groups, "close sweep done");
        Ok(report)
    }

    /// Deactivate, wait, close.
    pub async fn burn(&self, authority: &Keypair, recipient: &Pubkey) -> Result<(SweepReport, SweepReport)> {
        let (deactivated, token) = self.deactivate_all(authority).await?;
        let closed = self.close_all(authority, recipient, token).await?;
        Ok((deactivated, closed))
    }
}

fn page_error(page: usize, e: BundlerError) -> BundlerError {
    let reason = e.to_string();
    if page == 0 {
        BundlerError::LutCreation(reason)
    } else {
        BundlerError::LutExtend { page, reason }
    }
}

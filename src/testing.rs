//! In-memory ledger and relay doubles shared by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account, clock::Slot, hash::Hash, pubkey::Pubkey, signature::Signature,
    system_instruction::SystemInstruction, system_program, transaction::VersionedTransaction,
};
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

use crate::error::{BundlerError, Result};
use crate::ledger::{AccountFilter, Ledger};
use crate::relay::{BundleRelay, RelayReceipt};

#[derive(Clone)]
pub struct SentTx {
    pub tx: VersionedTransaction,
    pub at: Instant,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Account>,
    balances: HashMap<Pubkey, u64>,
    slot: Slot,
    reject_touching: HashSet<Pubkey>,
    reject_calls: HashSet<usize>,
    sent: Vec<SentTx>,
    simulated: usize,
    calls: usize,
}

#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.state.lock().slot = 1_000;
        ledger
    }

    pub fn set_account(&self, address: Pubkey, owner: Pubkey, data: Vec<u8>) {
        let account = Account {
            lamports: 1_000_000,
            data,
            owner,
            executable: false,
            rent_epoch: 0,
        };
        self.state.lock().accounts.insert(address, account);
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.state.lock().balances.insert(address, lamports);
    }

    pub fn balance_of(&self, address: &Pubkey) -> u64 {
        self.state.lock().balances.get(address).copied().unwrap_or(0)
    }

    /// Simulation rejects any transaction whose static keys include `key`.
    pub fn reject_touching(&self, key: Pubkey) {
        self.state.lock().reject_touching.insert(key);
    }

    /// Simulation rejects the `n`th simulate call (zero based).
    pub fn reject_simulation_call(&self, n: usize) {
        self.state.lock().reject_calls.insert(n);
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    pub fn simulated(&self) -> usize {
        self.state.lock().simulated
    }

    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    fn apply_transfers(state: &mut LedgerState, tx: &VersionedTransaction) {
        let keys = tx.message.static_account_keys();
        for ix in tx.message.instructions() {
            if keys.get(ix.program_id_index as usize) != Some(&system_program::id()) {
                continue;
            }
            let Ok(SystemInstruction::Transfer { lamports }) = bincode::deserialize(&ix.data) else {
                continue;
            };
            let (Some(from), Some(to)) = (
                ix.accounts.first().and_then(|i| keys.get(*i as usize)),
                ix.accounts.get(1).and_then(|i| keys.get(*i as usize)),
            ) else {
                continue;
            };
            let from_balance = state.balances.entry(*from).or_default();
            *from_balance = from_balance.saturating_sub(lamports);
            *state.balances.entry(*to).or_default() += lamports;
        }
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>> {
        let mut s = self.state.lock();
        s.calls += 1;
        Ok(s.accounts.get(address).cloned())
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        let mut s = self.state.lock();
        s.calls += 1;
        Ok(addresses.iter().map(|a| s.accounts.get(a).cloned()).collect())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64> {
        let mut s = self.state.lock();
        s.calls += 1;
        Ok(s.balances.get(address).copied().unwrap_or(0))
    }

    async fn get_slot(&self) -> Result<Slot> {
        let mut s = self.state.lock();
        s.calls += 1;
        Ok(s.slot)
    }

    async fn get_latest_blockhash(&self) -> Result<Hash> {
        let mut s = self.state.lock();
        s.calls += 1;
        Ok(Hash::new_unique())
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<Option<String>> {
        let mut s = self.state.lock();
        s.calls += 1;
        let call = s.simulated;
        s.simulated += 1;
        if s.reject_calls.contains(&call) {
            return Ok(Some(format!("simulation call {call} rejected")));
        }
        let rejected = tx
            .message
            .static_account_keys()
            .iter()
            .find(|k| s.reject_touching.contains(*k));
        Ok(rejected.map(|k| format!("account {k} rejected")))
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let mut s = self.state.lock();
        s.calls += 1;
        Self::apply_transfers(&mut s, tx);
        s.sent.push(SentTx { tx: tx.clone(), at: Instant::now() });
        tx.signatures
            .first()
            .copied()
            .ok_or_else(|| BundlerError::Rpc("unsigned transaction".into()))
    }

    async fn confirm(&self, _signature: &Signature) -> Result<()> {
        self.state.lock().calls += 1;
        Ok(())
    }

    async fn scan_program_accounts(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
    ) -> Result<Vec<(Pubkey, Account)>> {
        let mut s = self.state.lock();
        s.calls += 1;
        let mut hits: Vec<(Pubkey, Account)> = s
            .accounts
            .iter()
            .filter(|(_, a)| a.owner == *program && filters.iter().all(|f| f.matches(&a.data)))
            .map(|(k, a)| (*k, a.clone()))
            .collect();
        hits.sort_by_key(|(k, _)| *k);
        Ok(hits)
    }
}

pub struct MockRelay {
    confirmed: bool,
    submitted: Mutex<Vec<Vec<VersionedTransaction>>>,
}

impl MockRelay {
    pub fn landing() -> Self {
        Self { confirmed: true, submitted: Mutex::new(Vec::new()) }
    }

    pub fn dropping() -> Self {
        Self { confirmed: false, submitted: Mutex::new(Vec::new()) }
    }

    pub fn submitted(&self) -> Vec<Vec<VersionedTransaction>> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl BundleRelay for MockRelay {
    async fn submit(&self, transactions: &[VersionedTransaction]) -> Result<RelayReceipt> {
        let mut submitted = self.submitted.lock();
        submitted.push(transactions.to_vec());
        Ok(RelayReceipt {
            bundle_id: format!("bundle-{}", submitted.len()),
            confirmed: self.confirmed,
            error: (!self.confirmed).then(|| "bundle dropped".to_string()),
        })
    }
}

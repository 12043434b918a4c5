// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Wallet ledger.
//!
//! Every party owns at most one [`WalletAccount`], created on first credit.
//! Balances only move through [`LedgerStore::post`], which appends immutable
//! [`LedgerEntry`] records; nothing is ever edited or removed, so an account's
//! balance always equals the sum of its entries.
//!
//! # Example
//!
//! ```
//! use garage_flow::{EntryReason, LedgerStore, PartyId};
//! use rust_decimal_macros::dec;
//!
//! let ledger = LedgerStore::new();
//! ledger.top_up(PartyId(1), dec!(500)).unwrap();
//! assert_eq!(ledger.balance(PartyId(1)), dec!(500));
//! ```

use crate::WorkflowError;
use crate::base::{CURRENCY_PRECISION, EntryId, PartyId, PayableRef};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    TopUp,
    Withdrawal,
    JobPayment,
    OrderPayment,
    Commission,
    Refund,
}

/// One signed movement against one account. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account: PartyId,
    /// Positive for credits, negative for debits.
    pub amount: Decimal,
    pub reason: EntryReason,
    pub related: Option<PayableRef>,
    pub created_at: DateTime<Utc>,
}

/// A single leg of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leg {
    pub account: PartyId,
    pub amount: Decimal,
    pub reason: EntryReason,
}

impl Leg {
    pub fn credit(account: PartyId, amount: Decimal, reason: EntryReason) -> Self {
        Self {
            account,
            amount,
            reason,
        }
    }

    pub fn debit(account: PartyId, amount: Decimal, reason: EntryReason) -> Self {
        Self {
            account,
            amount: -amount,
            reason,
        }
    }
}

/// Deduplication key for postings that must happen at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostingKey {
    Settlement(PayableRef),
    Refund(PayableRef),
}

impl PostingKey {
    fn related(&self) -> PayableRef {
        match self {
            PostingKey::Settlement(payable) | PostingKey::Refund(payable) => *payable,
        }
    }
}

/// Result of a posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingReceipt {
    pub entries: Vec<LedgerEntry>,
    /// `true` when the key had already been posted and nothing new was written.
    pub replayed: bool,
}

#[derive(Debug)]
struct AccountData {
    owner: PartyId,
    balance: Decimal,
    entries: Vec<LedgerEntry>,
}

impl AccountData {
    fn new(owner: PartyId) -> Self {
        Self {
            owner,
            balance: Decimal::ZERO,
            entries: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Decimal::ZERO,
            "Invariant violated: wallet {} went negative: {}",
            self.owner,
            self.balance
        );
        debug_assert_eq!(
            self.balance,
            self.entries.iter().map(|e| e.amount).sum::<Decimal>(),
            "Invariant violated: wallet {} balance diverged from its entries",
            self.owner
        );
    }

    /// Callers check invariants once all legs of a posting are appended.
    fn append(&mut self, entry: LedgerEntry) {
        self.balance += entry.amount;
        self.entries.push(entry);
    }
}

/// A party's wallet.
#[derive(Debug)]
pub struct WalletAccount {
    inner: Mutex<AccountData>,
}

impl WalletAccount {
    pub fn new(owner: PartyId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(owner)),
        }
    }

    pub fn owner(&self) -> PartyId {
        self.inner.lock().owner
    }

    pub fn balance(&self) -> Decimal {
        self.inner.lock().balance
    }

    /// Snapshot of the account's entries in append order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().entries.clone()
    }

    /// Returns `true` when the balance equals the sum of the entries.
    pub fn is_balanced(&self) -> bool {
        let data = self.inner.lock();
        data.balance == data.entries.iter().map(|e| e.amount).sum::<Decimal>()
    }
}

impl Serialize for WalletAccount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("WalletAccount", 3)?;
        state.serialize_field("party", &data.owner)?;
        state.serialize_field("balance", &data.balance.round_dp(CURRENCY_PRECISION))?;
        state.serialize_field("entries", &data.entries.len())?;
        state.end()
    }
}

/// Validates a money amount: strictly positive and no finer than one minor unit.
pub(crate) fn validate_amount(amount: Decimal) -> Result<(), WorkflowError> {
    if amount <= Decimal::ZERO || amount.round_dp(CURRENCY_PRECISION) != amount {
        return Err(WorkflowError::InvalidAmount);
    }
    Ok(())
}

/// Durable record of wallet balances and entries for every party.
///
/// # Invariants
///
/// - No balance is ever negative.
/// - `balance == Σ entries` for every account, after every posting.
/// - A keyed posting is written at most once; replays return the original entries.
/// - All legs of a posting apply together or not at all.
pub struct LedgerStore {
    accounts: DashMap<PartyId, Arc<WalletAccount>>,
    /// Keyed postings already written, for replay detection.
    journal: DashMap<PostingKey, Vec<LedgerEntry>>,
    next_entry: AtomicU64,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            journal: DashMap::new(),
            next_entry: AtomicU64::new(1),
        }
    }

    /// Balance of a party's wallet; zero if the wallet was never credited.
    pub fn balance(&self, party: PartyId) -> Decimal {
        self.accounts
            .get(&party)
            .map(|account| account.balance())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn account(&self, party: PartyId) -> Option<Arc<WalletAccount>> {
        self.accounts.get(&party).map(|account| Arc::clone(&account))
    }

    /// Snapshot of all wallets, ordered by owner.
    pub fn accounts(&self) -> Vec<Arc<WalletAccount>> {
        let mut accounts: Vec<(PartyId, Arc<WalletAccount>)> = self
            .accounts
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        accounts.sort_by_key(|(party, _)| *party);
        accounts.into_iter().map(|(_, account)| account).collect()
    }

    /// Entries written under a posting key, if any.
    pub fn posted(&self, key: PostingKey) -> Option<Vec<LedgerEntry>> {
        self.journal.get(&key).map(|entries| entries.clone())
    }

    pub fn top_up(&self, party: PartyId, amount: Decimal) -> Result<LedgerEntry, WorkflowError> {
        validate_amount(amount)?;
        let mut entries = self.apply(
            &[Leg::credit(party, amount, EntryReason::TopUp)],
            None,
        )?;
        Ok(entries.remove(0))
    }

    pub fn withdraw(&self, party: PartyId, amount: Decimal) -> Result<LedgerEntry, WorkflowError> {
        validate_amount(amount)?;
        let mut entries = self.apply(
            &[Leg::debit(party, amount, EntryReason::Withdrawal)],
            None,
        )?;
        Ok(entries.remove(0))
    }

    /// Writes all legs atomically under `key`.
    ///
    /// Posting the same key twice is a no-op that returns the original entries
    /// with `replayed = true`.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::InvalidAmount`] - A leg is zero or over-precise.
    /// - [`WorkflowError::InsufficientFunds`] - A debit exceeds its wallet balance.
    pub fn post(&self, key: PostingKey, legs: &[Leg]) -> Result<PostingReceipt, WorkflowError> {
        // Holding the vacant entry serializes concurrent posts of the same key.
        match self.journal.entry(key) {
            Entry::Occupied(existing) => Ok(PostingReceipt {
                entries: existing.get().clone(),
                replayed: true,
            }),
            Entry::Vacant(slot) => {
                let entries = self.apply(legs, Some(key.related()))?;
                slot.insert(entries.clone());
                Ok(PostingReceipt {
                    entries,
                    replayed: false,
                })
            }
        }
    }

    fn apply(
        &self,
        legs: &[Leg],
        related: Option<PayableRef>,
    ) -> Result<Vec<LedgerEntry>, WorkflowError> {
        if legs.is_empty() {
            return Err(WorkflowError::InvalidAmount);
        }

        // Net movement per account. BTreeMap gives a global lock order.
        let mut net: BTreeMap<PartyId, Decimal> = BTreeMap::new();
        for leg in legs {
            validate_amount(leg.amount.abs())?;
            *net.entry(leg.account).or_insert(Decimal::ZERO) += leg.amount;
        }

        // Wallets that would only be credited are created after the checks
        // pass, then the pass repeats so every lock is still taken in order.
        loop {
            let mut handles = Vec::with_capacity(net.len());
            let mut missing = Vec::new();
            for (party, delta) in &net {
                match self.account(*party) {
                    Some(account) => handles.push((*party, account)),
                    // Never create a wallet just to debit it.
                    None if *delta < Decimal::ZERO => return Err(WorkflowError::InsufficientFunds),
                    None => missing.push(*party),
                }
            }

            let mut guards: BTreeMap<PartyId, MutexGuard<'_, AccountData>> = BTreeMap::new();
            for (party, account) in &handles {
                guards.insert(*party, account.inner.lock());
            }
            for (party, guard) in &guards {
                if guard.balance + net[party] < Decimal::ZERO {
                    return Err(WorkflowError::InsufficientFunds);
                }
            }
            if !missing.is_empty() {
                drop(guards);
                for party in missing {
                    self.accounts
                        .entry(party)
                        .or_insert_with(|| Arc::new(WalletAccount::new(party)));
                }
                continue;
            }

            let created_at = Utc::now();
            let mut written = Vec::with_capacity(legs.len());
            for leg in legs {
                let entry = LedgerEntry {
                    id: EntryId(self.next_entry.fetch_add(1, Ordering::Relaxed)),
                    account: leg.account,
                    amount: leg.amount,
                    reason: leg.reason,
                    related,
                    created_at,
                };
                if let Some(guard) = guards.get_mut(&leg.account) {
                    guard.append(entry.clone());
                }
                written.push(entry);
            }
            for guard in guards.values() {
                guard.assert_invariants();
            }

            tracing::debug!(legs = written.len(), related = ?related, "ledger posting applied");
            return Ok(written);
        }
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::JobId;
    use rust_decimal_macros::dec;

    const CUSTOMER: PartyId = PartyId(1);
    const TECHNICIAN: PartyId = PartyId(2);

    fn payment_legs(amount: Decimal) -> Vec<Leg> {
        vec![
            Leg::debit(CUSTOMER, amount, EntryReason::JobPayment),
            Leg::credit(TECHNICIAN, amount, EntryReason::JobPayment),
        ]
    }

    #[test]
    fn account_data_append_tracks_balance() {
        let mut data = AccountData::new(CUSTOMER);
        for (id, amount) in [(1, dec!(100)), (2, dec!(-30))] {
            data.append(LedgerEntry {
                id: EntryId(id),
                account: CUSTOMER,
                amount,
                reason: EntryReason::TopUp,
                related: None,
                created_at: Utc::now(),
            });
        }
        assert_eq!(data.balance, dec!(70));
        assert_eq!(data.entries.len(), 2);
    }

    #[test]
    fn top_up_creates_wallet_lazily() {
        let ledger = LedgerStore::new();
        assert!(ledger.account(CUSTOMER).is_none());
        ledger.top_up(CUSTOMER, dec!(250)).unwrap();
        assert_eq!(ledger.balance(CUSTOMER), dec!(250));
    }

    #[test]
    fn withdraw_without_wallet_is_insufficient() {
        let ledger = LedgerStore::new();
        assert_eq!(
            ledger.withdraw(CUSTOMER, dec!(1)),
            Err(WorkflowError::InsufficientFunds)
        );
        assert!(ledger.account(CUSTOMER).is_none());
    }

    #[test]
    fn rejects_invalid_amounts() {
        let ledger = LedgerStore::new();
        assert_eq!(ledger.top_up(CUSTOMER, dec!(0)), Err(WorkflowError::InvalidAmount));
        assert_eq!(
            ledger.top_up(CUSTOMER, dec!(1.001)),
            Err(WorkflowError::InvalidAmount)
        );
    }

    #[test]
    fn post_moves_funds_between_wallets() {
        let ledger = LedgerStore::new();
        ledger.top_up(CUSTOMER, dec!(1000)).unwrap();

        let key = PostingKey::Settlement(PayableRef::Job(JobId(1)));
        let receipt = ledger.post(key, &payment_legs(dec!(400))).unwrap();

        assert!(!receipt.replayed);
        assert_eq!(receipt.entries.len(), 2);
        assert_eq!(ledger.balance(CUSTOMER), dec!(600));
        assert_eq!(ledger.balance(TECHNICIAN), dec!(400));
    }

    #[test]
    fn post_same_key_twice_is_replay() {
        let ledger = LedgerStore::new();
        ledger.top_up(CUSTOMER, dec!(1000)).unwrap();
        let key = PostingKey::Settlement(PayableRef::Job(JobId(1)));

        let first = ledger.post(key, &payment_legs(dec!(400))).unwrap();
        let second = ledger.post(key, &payment_legs(dec!(400))).unwrap();

        assert!(second.replayed);
        assert_eq!(first.entries, second.entries);
        assert_eq!(ledger.balance(CUSTOMER), dec!(600));
    }

    #[test]
    fn failed_post_writes_nothing() {
        let ledger = LedgerStore::new();
        ledger.top_up(CUSTOMER, dec!(100)).unwrap();
        let key = PostingKey::Settlement(PayableRef::Job(JobId(1)));

        let result = ledger.post(key, &payment_legs(dec!(400)));

        assert_eq!(result, Err(WorkflowError::InsufficientFunds));
        assert_eq!(ledger.balance(CUSTOMER), dec!(100));
        assert!(ledger.account(TECHNICIAN).is_none());
        assert!(ledger.posted(key).is_none());
        // Key is free again after a failure.
        ledger.top_up(CUSTOMER, dec!(300)).unwrap();
        assert!(ledger.post(key, &payment_legs(dec!(400))).is_ok());
    }

    #[test]
    fn every_wallet_stays_balanced() {
        let ledger = LedgerStore::new();
        ledger.top_up(CUSTOMER, dec!(1000)).unwrap();
        ledger
            .post(
                PostingKey::Settlement(PayableRef::Job(JobId(9))),
                &payment_legs(dec!(999.99)),
            )
            .unwrap();
        ledger.withdraw(TECHNICIAN, dec!(500)).unwrap();

        for account in ledger.accounts() {
            assert!(account.is_balanced());
        }
    }

    #[test]
    fn serializer_rounds_to_currency_precision() {
        let account = WalletAccount::new(PartyId(42));
        {
            let mut data = account.inner.lock();
            data.balance = dec!(12.345);
        }
        let json = serde_json::to_string(&account).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["party"], 42);
        assert_eq!(parsed["balance"].as_str().unwrap(), "12.34");
        assert_eq!(parsed["entries"], 0);
    }
}

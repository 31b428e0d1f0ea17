//! The transactional store: single source of truth.
//!
//! Every mutation that must be atomic with another executes inside one
//! [`Store::transact`] call: the closure runs against a draft copy of the
//! state, and the draft replaces the live state only if the closure returns
//! `Ok`. An `Err` rolls the whole draft back. Unique indexes and optimistic
//! version checks are enforced by the `State` helpers at write time, exactly
//! where a SQL backend would enforce them with unique constraints and
//! `WHERE version = ?` updates.
//!
//! Optimistic concurrency: readers take a snapshot via [`Store::read`],
//! compute, then `transact` with the versions they read. A row bumped in
//! between surfaces as [`Conflict::StaleVersion`], which callers retry
//! within a small bound.
//!
//! Domain events recorded during a transaction (via [`State::emit`]) are
//! returned to the caller only on commit (outbox pattern); the caller
//! dispatches them after the fact.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::NaiveDate;
use common::enums::{
    BatchSchedule, Channel, NotifyEvent, PaymentRequestStatus, PolicyStatus,
};
use common::ids::{
    BatchId, JobId, NotificationId, PaymentRequestId, PolicyId, RefundId,
    RiderId, TransactionId, WalletId,
};
use common::money::Amount;

use crate::error::{Conflict, Error};
use crate::events::DomainEvent;
use crate::jobs::Job;
use crate::ledger;
use crate::models::batch::PolicyBatch;
use crate::models::ledger::{GlAccount, JournalEntry};
use crate::models::notification::{
    Notification, NotifyPreferences, Suppression,
};
use crate::models::payment::{PaymentRequest, Transaction};
use crate::models::policy::{Policy, RiderRefund};
use crate::models::rider::Rider;
use crate::models::wallet::Wallet;
use crate::notify::templates::{self, Template};

pub struct Store {
    state: Mutex<State>,
}

impl Store {
    /// A fresh store with the chart of accounts and the default template
    /// registry seeded.
    pub fn new() -> Self {
        let mut state = State::default();
        for account in ledger::chart_of_accounts() {
            state.accounts.insert(account.code, account);
        }
        for template in templates::default_templates() {
            state
                .templates
                .insert((template.channel, template.event), template);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Run `f` against a draft of the state; commit the draft iff `f`
    /// returns `Ok`. Returns the closure result together with the domain
    /// events recorded during the transaction.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&mut State) -> Result<R, Error>,
    ) -> Result<(R, Vec<DomainEvent>), Error> {
        let mut live = self.state.lock().unwrap();
        let mut draft = live.clone();
        let value = f(&mut draft)?;
        let events = std::mem::take(&mut draft.outbox);
        *live = draft;
        Ok((value, events))
    }

    /// [`transact`](Self::transact) for closures that cannot fail and emit
    /// no events.
    pub fn must_transact<R>(
        &self,
        f: impl FnOnce(&mut State) -> Result<R, Error>,
    ) -> R {
        let (value, events) =
            self.transact(f).expect("infallible store transaction");
        debug_assert!(events.is_empty());
        value
    }

    /// Read from a consistent snapshot of the state.
    pub fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let state = self.state.lock().unwrap();
        f(&state)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// The full table set. Fields are crate-public; mutations that need
/// invariants go through the helper methods below.
#[derive(Clone, Default)]
pub struct State {
    pub riders: HashMap<RiderId, Rider>,
    pub wallets: HashMap<WalletId, Wallet>,
    pub wallet_by_rider: HashMap<RiderId, WalletId>,

    pub payment_requests: HashMap<PaymentRequestId, PaymentRequest>,
    request_by_idem: HashMap<String, PaymentRequestId>,
    request_by_checkout: HashMap<String, PaymentRequestId>,

    pub transactions: HashMap<TransactionId, Transaction>,
    receipt_numbers: HashMap<String, TransactionId>,

    pub policies: HashMap<PolicyId, Policy>,
    pub batches: HashMap<BatchId, PolicyBatch>,
    batch_by_key: HashMap<(NaiveDate, BatchSchedule), BatchId>,

    pub accounts: BTreeMap<&'static str, GlAccount>,
    pub journal: Vec<JournalEntry>,
    journal_seq: u64,

    pub notifications: HashMap<NotificationId, Notification>,
    notification_by_external: HashMap<String, NotificationId>,
    pub preferences: HashMap<RiderId, NotifyPreferences>,
    pub suppressions: HashSet<Suppression>,
    pub templates: HashMap<(Channel, NotifyEvent), Template>,

    pub refunds: HashMap<RefundId, RiderRefund>,
    pub jobs: BTreeMap<JobId, Job>,

    outbox: Vec<DomainEvent>,
}

impl State {
    /// Record a domain event for post-commit dispatch.
    pub fn emit(&mut self, event: DomainEvent) {
        self.outbox.push(event);
    }

    // --- Riders and wallets --- //

    pub fn insert_rider(&mut self, rider: Rider) {
        self.riders.insert(rider.id, rider);
    }

    pub fn rider(&self, id: RiderId) -> Result<&Rider, Error> {
        self.riders
            .get(&id)
            .ok_or_else(|| Error::not_found("rider", id))
    }

    pub fn insert_wallet(&mut self, wallet: Wallet) {
        self.wallet_by_rider.insert(wallet.rider_id, wallet.id);
        self.wallets.insert(wallet.id, wallet);
    }

    pub fn wallet(&self, id: WalletId) -> Result<&Wallet, Error> {
        self.wallets
            .get(&id)
            .ok_or_else(|| Error::not_found("wallet", id))
    }

    pub fn wallet_of_rider(&self, rider_id: RiderId) -> Result<&Wallet, Error> {
        let wallet_id = self
            .wallet_by_rider
            .get(&rider_id)
            .ok_or_else(|| Error::not_found("wallet for rider", rider_id))?;
        self.wallet(*wallet_id)
    }

    /// Fetch the wallet for mutation iff its version matches what the
    /// caller read.
    pub fn wallet_cas(
        &mut self,
        id: WalletId,
        expected_version: u64,
    ) -> Result<&mut Wallet, Error> {
        let wallet = self
            .wallets
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("wallet", id))?;
        if wallet.version != expected_version {
            return Err(Conflict::StaleVersion {
                entity: "wallet",
                id: id.to_string(),
            }
            .into());
        }
        Ok(wallet)
    }

    // --- Payment requests --- //

    /// Insert a new payment request, enforcing idempotency-key uniqueness.
    /// A duplicate returns [`Conflict::DuplicateIdempotencyKey`] carrying
    /// the original request id.
    pub fn insert_payment_request(
        &mut self,
        request: PaymentRequest,
    ) -> Result<(), Error> {
        if let Some(existing) =
            self.request_by_idem.get(&request.idempotency_key)
        {
            return Err(Conflict::DuplicateIdempotencyKey(*existing).into());
        }
        self.request_by_idem
            .insert(request.idempotency_key.clone(), request.id);
        self.payment_requests.insert(request.id, request);
        Ok(())
    }

    pub fn payment_request(
        &self,
        id: PaymentRequestId,
    ) -> Result<&PaymentRequest, Error> {
        self.payment_requests
            .get(&id)
            .ok_or_else(|| Error::not_found("payment request", id))
    }

    pub fn request_by_idempotency_key(
        &self,
        key: &str,
    ) -> Option<&PaymentRequest> {
        self.request_by_idem
            .get(key)
            .and_then(|id| self.payment_requests.get(id))
    }

    pub fn request_by_checkout_id(
        &self,
        checkout_id: &str,
    ) -> Result<&PaymentRequest, Error> {
        self.request_by_checkout
            .get(checkout_id)
            .and_then(|id| self.payment_requests.get(id))
            .ok_or_else(|| {
                Error::not_found("payment request by checkout", checkout_id)
            })
    }

    /// Fetch a payment request for mutation iff its version matches.
    pub fn payment_request_cas(
        &mut self,
        id: PaymentRequestId,
        expected_version: u64,
    ) -> Result<&mut PaymentRequest, Error> {
        let request = self
            .payment_requests
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("payment request", id))?;
        if request.version != expected_version {
            return Err(Conflict::StaleVersion {
                entity: "payment request",
                id: id.to_string(),
            }
            .into());
        }
        Ok(request)
    }

    /// Record the provider checkout id assigned to a request and index it.
    pub fn index_request_checkout(
        &mut self,
        id: PaymentRequestId,
        checkout_id: String,
    ) -> Result<(), Error> {
        if self.request_by_checkout.contains_key(&checkout_id) {
            return Err(Conflict::UniqueViolation(
                "payment_request.provider_checkout_id",
            )
            .into());
        }
        self.request_by_checkout.insert(checkout_id, id);
        Ok(())
    }

    /// Whether the rider has a non-terminal request of any type in flight.
    pub fn rider_has_request_in_flight(&self, rider_id: RiderId) -> bool {
        self.payment_requests
            .values()
            .any(|r| r.rider_id == rider_id && !r.is_terminal())
    }

    /// Non-terminal requests, for the reconciler's sweep.
    pub fn non_terminal_requests(&self) -> Vec<PaymentRequest> {
        let mut requests: Vec<PaymentRequest> = self
            .payment_requests
            .values()
            .filter(|r| !r.is_terminal())
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        requests
    }

    // --- Transactions --- //

    /// Insert a settled transaction, enforcing receipt-number uniqueness.
    pub fn insert_transaction(
        &mut self,
        transaction: Transaction,
    ) -> Result<(), Error> {
        if let Some(receipt) = &transaction.receipt_number {
            if self.receipt_numbers.contains_key(receipt) {
                return Err(Conflict::UniqueViolation(
                    "transaction.receipt_number",
                )
                .into());
            }
            self.receipt_numbers.insert(receipt.clone(), transaction.id);
        }
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    pub fn transaction(
        &self,
        id: TransactionId,
    ) -> Result<&Transaction, Error> {
        self.transactions
            .get(&id)
            .ok_or_else(|| Error::not_found("transaction", id))
    }

    // --- Policies --- //

    pub fn insert_policy(&mut self, policy: Policy) {
        self.policies.insert(policy.id, policy);
    }

    pub fn policy(&self, id: PolicyId) -> Result<&Policy, Error> {
        self.policies
            .get(&id)
            .ok_or_else(|| Error::not_found("policy", id))
    }

    pub fn policy_mut(&mut self, id: PolicyId) -> Result<&mut Policy, Error> {
        self.policies
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("policy", id))
    }

    /// Idempotency probe for the issuance planner: has any policy already
    /// been created off this triggering transaction?
    pub fn policy_by_trigger(
        &self,
        rider_id: RiderId,
        transaction_id: TransactionId,
    ) -> Option<&Policy> {
        self.policies.values().find(|p| {
            p.rider_id == rider_id
                && p.triggering_transaction_id == transaction_id
        })
    }

    /// The rider's in-force (ACTIVE / EXPIRING) policy of the given type.
    pub fn in_force_policy(
        &self,
        rider_id: RiderId,
        policy_type: common::enums::PolicyType,
    ) -> Option<&Policy> {
        self.policies.values().find(|p| {
            p.rider_id == rider_id
                && p.policy_type == policy_type
                && p.status.is_in_force()
        })
    }

    /// All PENDING_ISSUANCE policies whose triggering transaction settled at
    /// or before `window_end`, ordered by settlement time (ties by
    /// transaction id).
    pub fn pending_policies_settled_by(
        &self,
        window_end: common::time::TimestampMs,
    ) -> Vec<(Policy, Transaction)> {
        let mut claimable: Vec<(Policy, Transaction)> = self
            .policies
            .values()
            .filter(|p| p.status == PolicyStatus::PendingIssuance)
            .filter_map(|p| {
                let tx = self.transactions.get(&p.triggering_transaction_id)?;
                (tx.settled_at <= window_end)
                    .then(|| (p.clone(), tx.clone()))
            })
            .collect();
        claimable.sort_by_key(|(_, tx)| (tx.settled_at, tx.id));
        claimable
    }

    // --- Batches --- //

    /// Open a batch row; the `(batch_date, schedule)` uniqueness constraint
    /// rejects a second run of the same scheduled batch.
    pub fn insert_batch(&mut self, batch: PolicyBatch) -> Result<(), Error> {
        let key = (batch.batch_date, batch.schedule);
        if self.batch_by_key.contains_key(&key) {
            return Err(Conflict::BatchAlreadyRun {
                date: batch.batch_date,
                schedule: batch.schedule,
            }
            .into());
        }
        self.batch_by_key.insert(key, batch.id);
        self.batches.insert(batch.id, batch);
        Ok(())
    }

    pub fn batch(&self, id: BatchId) -> Result<&PolicyBatch, Error> {
        self.batches
            .get(&id)
            .ok_or_else(|| Error::not_found("batch", id))
    }

    pub fn batch_mut(
        &mut self,
        id: BatchId,
    ) -> Result<&mut PolicyBatch, Error> {
        self.batches
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("batch", id))
    }

    // --- Ledger --- //

    /// The next sequential journal entry number: `JE-000001`, ...
    pub fn next_entry_number(&mut self) -> String {
        self.journal_seq += 1;
        format!("JE-{:06}", self.journal_seq)
    }

    /// Validate and post a journal entry: append it and apply every line to
    /// its account's running balance. Unbalanced entries are rejected
    /// whole.
    pub fn post_journal(&mut self, entry: JournalEntry) -> Result<(), Error> {
        entry.validate()?;
        for line in &entry.lines {
            let account = self
                .accounts
                .get_mut(line.account_code)
                .ok_or_else(|| {
                    Error::not_found("gl account", line.account_code)
                })?;
            account.apply(line);
        }
        self.journal.push(entry);
        Ok(())
    }

    /// `(total debit-side balances, total credit-side balances)` across the
    /// chart. The trial-balance invariant is that these are always equal.
    pub fn trial_balance(&self) -> (Amount, Amount) {
        let mut debits = Amount::ZERO;
        let mut credits = Amount::ZERO;
        for account in self.accounts.values() {
            match account.side {
                common::enums::BalanceSide::Debit =>
                    debits = debits + account.balance,
                common::enums::BalanceSide::Credit =>
                    credits = credits + account.balance,
            }
        }
        (debits, credits)
    }

    // --- Notifications --- //

    pub fn insert_notification(&mut self, notification: Notification) {
        self.notifications.insert(notification.id, notification);
    }

    pub fn notification(
        &self,
        id: NotificationId,
    ) -> Result<&Notification, Error> {
        self.notifications
            .get(&id)
            .ok_or_else(|| Error::not_found("notification", id))
    }

    pub fn notification_mut(
        &mut self,
        id: NotificationId,
    ) -> Result<&mut Notification, Error> {
        self.notifications
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("notification", id))
    }

    /// Index a notification by the provider's external message id, for
    /// delivery-report lookups.
    pub fn index_notification_external(
        &mut self,
        id: NotificationId,
        external_message_id: String,
    ) {
        self.notification_by_external.insert(external_message_id, id);
    }

    pub fn notification_by_external_id(
        &self,
        external_message_id: &str,
    ) -> Option<NotificationId> {
        self.notification_by_external
            .get(external_message_id)
            .copied()
    }

    pub fn preferences_of(&self, rider_id: RiderId) -> NotifyPreferences {
        self.preferences
            .get(&rider_id)
            .cloned()
            .unwrap_or_else(|| NotifyPreferences::defaults(rider_id))
    }

    pub fn is_suppressed(&self, channel: Channel, recipient: &str) -> bool {
        self.suppressions.contains(&Suppression {
            channel,
            recipient: recipient.to_owned(),
        })
    }

    pub fn template(
        &self,
        channel: Channel,
        event: NotifyEvent,
    ) -> Option<&Template> {
        self.templates.get(&(channel, event))
    }
}

//! Wallet store: serialized balance mutations and derived counters.
//!
//! The credit operations run against [`State`] so the payment engine can
//! compose them into the same store transaction as the payment-request
//! transition and the journal entry. Each credit CASes on the wallet
//! version the caller read; a stale version surfaces as a retryable
//! conflict that the caller retries within [`WALLET_CAS_RETRIES`].
//!
//! [`WALLET_CAS_RETRIES`]: common::constants::WALLET_CAS_RETRIES

use common::ids::{TransactionId, WalletId};
use common::money::Amount;
use common::time::TimestampMs;

use crate::error::Error;
use crate::events::DomainEvent;
use crate::models::wallet::Wallet;
use crate::store::{State, Store};

/// Credit the initial deposit onto the wallet and emit
/// [`DomainEvent::DepositCompleted`].
pub fn credit_deposit(
    state: &mut State,
    wallet_id: WalletId,
    expected_version: u64,
    amount: Amount,
    transaction_id: TransactionId,
    now: TimestampMs,
) -> Result<(), Error> {
    let wallet = state.wallet_cas(wallet_id, expected_version)?;
    wallet.credit_deposit(amount, now)?;
    let rider_id = wallet.rider_id;
    state.emit(DomainEvent::DepositCompleted {
        rider_id,
        wallet_id,
        transaction_id,
    });
    Ok(())
}

/// Credit a (multi-)daily payment onto the wallet; emits
/// [`DomainEvent::DailyCycleCompleted`] on the payment that raises the
/// counter to 30.
pub fn credit_daily_payment(
    state: &mut State,
    wallet_id: WalletId,
    expected_version: u64,
    amount: Amount,
    days_count: u16,
    transaction_id: TransactionId,
    now: TimestampMs,
) -> Result<(), Error> {
    let wallet = state.wallet_cas(wallet_id, expected_version)?;
    let cycle_completed = wallet.credit_daily_payment(amount, days_count, now)?;
    let rider_id = wallet.rider_id;
    if cycle_completed {
        state.emit(DomainEvent::DailyCycleCompleted {
            rider_id,
            wallet_id,
            transaction_id,
        });
    }
    Ok(())
}

/// A consistent snapshot of one wallet.
pub fn read(store: &Store, wallet_id: WalletId) -> Result<Wallet, Error> {
    store.read(|state| state.wallet(wallet_id).cloned())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use common::constants::DEPOSIT_AMOUNT;

    use super::*;
    use crate::error::Conflict;
    use crate::testing;

    #[test]
    fn stale_version_is_a_retryable_conflict() {
        let store = Arc::new(Store::new());
        let (_, wallet_id) = testing::seed_rider(&store, 1);

        // First write at version 0 succeeds and bumps to 1.
        store
            .transact(|state| {
                credit_deposit(
                    state,
                    wallet_id,
                    0,
                    DEPOSIT_AMOUNT,
                    TransactionId::from_u8(1),
                    TimestampMs::MIN,
                )
            })
            .unwrap();

        // A writer still holding version 0 must conflict.
        let err = store
            .transact(|state| {
                credit_deposit(
                    state,
                    wallet_id,
                    0,
                    DEPOSIT_AMOUNT,
                    TransactionId::from_u8(2),
                    TimestampMs::MIN,
                )
            })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(Conflict::StaleVersion { .. }),
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn deposit_emits_event_on_commit_only() {
        let store = Arc::new(Store::new());
        let (_, wallet_id) = testing::seed_rider(&store, 1);

        let (_, events) = store
            .transact(|state| {
                credit_deposit(
                    state,
                    wallet_id,
                    0,
                    DEPOSIT_AMOUNT,
                    TransactionId::from_u8(1),
                    TimestampMs::MIN,
                )
            })
            .unwrap();
        assert!(matches!(
            events.as_slice(),
            [DomainEvent::DepositCompleted { .. }],
        ));

        let wallet = read(&store, wallet_id).unwrap();
        assert!(wallet.deposit_completed);
        assert_eq!(wallet.balance, DEPOSIT_AMOUNT);
    }
}

//! `Wallet`.

use common::constants::{DAILY_AMOUNT, DAYS_REQUIRED, DEPOSIT_AMOUNT};
use common::enums::WalletStatus;
use common::ids::{RiderId, WalletId};
use common::money::Amount;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Precondition};

/// A rider's premium wallet. One row per rider, created on first activation
/// and never destroyed.
///
/// Invariants maintained by [`credit_deposit`] / [`credit_daily_payment`]:
///
/// - `balance = total_deposited - total_paid` after every committed write;
/// - `deposit_completed` iff `total_deposited >= DEPOSIT_AMOUNT`;
/// - `daily_payments_count` is monotonic non-decreasing, capped at 30.
///
/// Every write bumps `version`; writers must CAS on the version they read.
///
/// [`credit_deposit`]: Wallet::credit_deposit
/// [`credit_daily_payment`]: Wallet::credit_daily_payment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub rider_id: RiderId,
    pub balance: Amount,
    pub total_deposited: Amount,
    pub total_paid: Amount,
    pub deposit_completed: bool,
    pub deposit_completed_at: Option<TimestampMs>,
    pub daily_payments_count: u16,
    pub last_daily_payment_at: Option<TimestampMs>,
    pub daily_payments_completed: bool,
    pub status: WalletStatus,
    pub version: u64,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl Wallet {
    pub fn new(id: WalletId, rider_id: RiderId, now: TimestampMs) -> Self {
        Self {
            id,
            rider_id,
            balance: Amount::ZERO,
            total_deposited: Amount::ZERO,
            total_paid: Amount::ZERO,
            deposit_completed: false,
            deposit_completed_at: None,
            daily_payments_count: 0,
            last_daily_payment_at: None,
            daily_payments_completed: false,
            status: WalletStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn days_remaining(&self) -> u16 {
        DAYS_REQUIRED.saturating_sub(self.daily_payments_count)
    }

    /// Apply the initial deposit credit. The deposit funds the one-month
    /// policy and stays on the wallet as balance until earned at batch time.
    pub fn credit_deposit(
        &mut self,
        amount: Amount,
        now: TimestampMs,
    ) -> Result<(), Error> {
        if self.deposit_completed {
            return Err(Precondition::DepositAlreadyMade.into());
        }
        debug_assert_eq!(amount, DEPOSIT_AMOUNT);

        self.balance = self.balance + amount;
        self.total_deposited = self.total_deposited + amount;
        self.deposit_completed = self.total_deposited >= DEPOSIT_AMOUNT;
        self.deposit_completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Apply a daily-payment credit covering `days_count` days. The money
    /// arrives and is immediately consumed as premium, so `total_deposited`
    /// and `total_paid` both advance and the balance is unchanged.
    ///
    /// Returns `true` if this credit completed the 30-day cycle.
    pub fn credit_daily_payment(
        &mut self,
        amount: Amount,
        days_count: u16,
        now: TimestampMs,
    ) -> Result<bool, Error> {
        if !self.deposit_completed {
            return Err(Precondition::DepositNotCompleted.into());
        }
        let paid_days = self.daily_payments_count;
        if paid_days + days_count > DAYS_REQUIRED {
            return Err(Precondition::DailyLimitExceeded {
                days_count,
                paid_days,
            }
            .into());
        }
        debug_assert_eq!(
            amount,
            DAILY_AMOUNT
                .checked_mul(i64::from(days_count))
                .expect("days_count <= 30"),
        );

        self.total_deposited = self.total_deposited + amount;
        self.total_paid = self.total_paid + amount;
        self.daily_payments_count = paid_days + days_count;
        self.last_daily_payment_at = Some(now);

        let just_completed = !self.daily_payments_completed
            && self.daily_payments_count >= DAYS_REQUIRED;
        if just_completed {
            self.daily_payments_completed = true;
        }
        self.touch(now);
        Ok(just_completed)
    }

    fn touch(&mut self, now: TimestampMs) {
        self.version += 1;
        self.updated_at = now;
        debug_assert!(self.check_invariants().is_ok());
    }

    pub fn check_invariants(&self) -> Result<(), Error> {
        let derived = self.total_deposited.checked_sub(self.total_paid);
        if derived != Some(self.balance) {
            return Err(Error::Internal(anyhow::anyhow!(
                "wallet {}: balance {} != deposited {} - paid {}",
                self.id.short(),
                self.balance,
                self.total_deposited,
                self.total_paid,
            )));
        }
        if self.balance.is_negative() {
            return Err(Error::Internal(anyhow::anyhow!(
                "wallet {}: negative balance",
                self.id.short(),
            )));
        }
        if self.daily_payments_count > DAYS_REQUIRED {
            return Err(Error::Internal(anyhow::anyhow!(
                "wallet {}: daily payments count above cap",
                self.id.short(),
            )));
        }
        Ok(())
    }
}

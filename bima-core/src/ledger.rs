//! Ledger poster: chart of accounts and the per-event posting contracts.
//!
//! Every value-moving event produces one balanced journal entry, built here
//! and posted via [`State::post_journal`] inside the same store transaction
//! as the triggering operation.
//!
//! [`State::post_journal`]: crate::store::State::post_journal

use common::enums::{BalanceSide, JournalStatus};
use common::ids::{JournalEntryId, TransactionId};
use common::money::Amount;
use common::rng::Crng;
use common::time::TimestampMs;

use crate::models::ledger::{GlAccount, JournalEntry, JournalLine};
use crate::store::State;

/// GL account codes.
pub mod accounts {
    /// Premium collections held in escrow.
    pub const CASH_ESCROW: &str = "1100";
    /// The platform's operating account.
    pub const CASH_OPERATING: &str = "1200";
    /// Premium collected but not yet earned; owed to the underwriter.
    pub const PREMIUM_PAYABLE: &str = "2100";
    /// Free-look refunds owed to riders.
    pub const REFUNDS_PAYABLE: &str = "2200";
    /// Underwriter's share of earned premium.
    pub const PREMIUM_INCOME_UNDERWRITER: &str = "4100";
    /// Platform's commission share of earned premium.
    pub const COMMISSION_INCOME: &str = "4200";
    /// Reversal fees retained on free-look cancellations.
    pub const FEE_INCOME: &str = "4300";
}

/// The seed chart of accounts.
pub fn chart_of_accounts() -> Vec<GlAccount> {
    use accounts::*;
    let account = |code, name, side| GlAccount {
        code,
        name,
        side,
        balance: Amount::ZERO,
    };
    vec![
        account(CASH_ESCROW, "Cash at bank - escrow", BalanceSide::Debit),
        account(CASH_OPERATING, "Cash at bank - operating", BalanceSide::Debit),
        account(
            PREMIUM_PAYABLE,
            "Premium payable to underwriter",
            BalanceSide::Credit,
        ),
        account(
            REFUNDS_PAYABLE,
            "Refunds payable to riders",
            BalanceSide::Credit,
        ),
        account(
            PREMIUM_INCOME_UNDERWRITER,
            "Premium income - underwriter",
            BalanceSide::Credit,
        ),
        account(
            COMMISSION_INCOME,
            "Premium income - platform commission",
            BalanceSide::Credit,
        ),
        account(
            FEE_INCOME,
            "Reversal fee income",
            BalanceSide::Credit,
        ),
    ]
}

/// Build a journal entry with totals computed from its lines.
pub fn entry(
    id: JournalEntryId,
    entry_number: String,
    entry_date: TimestampMs,
    entry_type: &'static str,
    description: impl Into<String>,
    source_transaction_id: Option<TransactionId>,
    lines: Vec<JournalLine>,
) -> JournalEntry {
    let total_debit = lines.iter().map(|l| l.debit).sum();
    let total_credit = lines.iter().map(|l| l.credit).sum();
    JournalEntry {
        id,
        entry_number,
        entry_date,
        entry_type,
        status: JournalStatus::Posted,
        description: description.into(),
        total_debit,
        total_credit,
        source_transaction_id,
        lines,
    }
}

// --- Posting contracts --- //

/// Deposit or daily payment settled: cash arrives in escrow, owed onward to
/// the underwriter until earned.
pub fn post_premium_collected(
    state: &mut State,
    rng: &mut impl Crng,
    entry_type: &'static str,
    amount: Amount,
    transaction_id: TransactionId,
    now: TimestampMs,
) -> Result<(), crate::error::Error> {
    let entry_number = state.next_entry_number();
    state.post_journal(entry(
        JournalEntryId::from_rng(rng),
        entry_number,
        now,
        entry_type,
        format!("premium collected ({amount})"),
        Some(transaction_id),
        vec![
            JournalLine::debit(accounts::CASH_ESCROW, amount),
            JournalLine::credit(accounts::PREMIUM_PAYABLE, amount),
        ],
    ))
}

/// Policy activated: premium is earned and recognized as income, split
/// between underwriter and platform per the configured commission.
pub fn post_premium_earned(
    state: &mut State,
    rng: &mut impl Crng,
    premium: Amount,
    platform_commission_bps: u32,
    transaction_id: TransactionId,
    policy_number: &str,
    now: TimestampMs,
) -> Result<(), crate::error::Error> {
    let (platform_share, underwriter_share) =
        premium.split_bps(platform_commission_bps);
    let entry_number = state.next_entry_number();
    state.post_journal(entry(
        JournalEntryId::from_rng(rng),
        entry_number,
        now,
        "POLICY_ACTIVATED",
        format!("premium earned on {policy_number}"),
        Some(transaction_id),
        vec![
            JournalLine::debit(accounts::PREMIUM_PAYABLE, premium),
            JournalLine::credit(
                accounts::PREMIUM_INCOME_UNDERWRITER,
                underwriter_share,
            ),
            JournalLine::credit(accounts::COMMISSION_INCOME, platform_share),
        ],
    ))
}

/// Free-look cancellation: the premium comes back out of escrow, net of the
/// reversal fee retained as platform income.
pub fn post_free_look_cancellation(
    state: &mut State,
    rng: &mut impl Crng,
    premium: Amount,
    refund_amount: Amount,
    reversal_fee: Amount,
    transaction_id: TransactionId,
    policy_number: &str,
    now: TimestampMs,
) -> Result<(), crate::error::Error> {
    debug_assert_eq!(refund_amount + reversal_fee, premium);
    let entry_number = state.next_entry_number();
    state.post_journal(entry(
        JournalEntryId::from_rng(rng),
        entry_number,
        now,
        "POLICY_CANCELLED",
        format!("free-look cancellation of {policy_number}"),
        Some(transaction_id),
        vec![
            JournalLine::debit(accounts::REFUNDS_PAYABLE, premium),
            JournalLine::credit(accounts::CASH_ESCROW, refund_amount),
            JournalLine::credit(accounts::FEE_INCOME, reversal_fee),
        ],
    ))
}

/// Partner settlement payout: amounts owed to the underwriter leave the
/// operating account.
pub fn post_partner_settlement(
    state: &mut State,
    rng: &mut impl Crng,
    amount: Amount,
    description: impl Into<String>,
    now: TimestampMs,
) -> Result<(), crate::error::Error> {
    let entry_number = state.next_entry_number();
    state.post_journal(entry(
        JournalEntryId::from_rng(rng),
        entry_number,
        now,
        "PARTNER_SETTLEMENT",
        description,
        None,
        vec![
            JournalLine::debit(accounts::PREMIUM_PAYABLE, amount),
            JournalLine::credit(accounts::CASH_OPERATING, amount),
        ],
    ))
}

#[cfg(test)]
mod test {
    use common::constants::{
        DEFAULT_PLATFORM_COMMISSION_BPS, DEPOSIT_AMOUNT, REVERSAL_FEE_BPS,
    };
    use common::rng::SmallRng;

    use super::*;
    use crate::store::Store;

    #[test]
    fn every_contract_preserves_trial_balance() {
        let store = Store::new();
        let mut rng = SmallRng::from_u64(7);
        let now = TimestampMs::MIN;
        let tx_id = TransactionId::from_u8(1);

        store
            .transact(|state| {
                post_premium_collected(
                    state,
                    &mut rng,
                    "DEPOSIT_SETTLED",
                    DEPOSIT_AMOUNT,
                    tx_id,
                    now,
                )?;
                post_premium_earned(
                    state,
                    &mut rng,
                    DEPOSIT_AMOUNT,
                    DEFAULT_PLATFORM_COMMISSION_BPS,
                    tx_id,
                    "B202603051-0001",
                    now,
                )?;
                let (fee, refund) = DEPOSIT_AMOUNT.split_bps(REVERSAL_FEE_BPS);
                post_free_look_cancellation(
                    state,
                    &mut rng,
                    DEPOSIT_AMOUNT,
                    refund,
                    fee,
                    tx_id,
                    "B202603051-0001",
                    now,
                )?;
                post_partner_settlement(
                    state,
                    &mut rng,
                    Amount::from_kes(500),
                    "weekly underwriter settlement",
                    now,
                )?;
                Ok(())
            })
            .unwrap();

        store.read(|state| {
            let (debits, credits) = state.trial_balance();
            assert_eq!(debits, credits);
            assert_eq!(state.journal.len(), 4);
            // Entry numbers are sequential.
            assert_eq!(state.journal[0].entry_number, "JE-000001");
            assert_eq!(state.journal[3].entry_number, "JE-000004");
        });
    }

    #[test]
    fn commission_split_on_earned_premium() {
        let store = Store::new();
        let mut rng = SmallRng::from_u64(8);
        store
            .transact(|state| {
                post_premium_collected(
                    state,
                    &mut rng,
                    "DEPOSIT_SETTLED",
                    DEPOSIT_AMOUNT,
                    TransactionId::from_u8(1),
                    TimestampMs::MIN,
                )?;
                post_premium_earned(
                    state,
                    &mut rng,
                    DEPOSIT_AMOUNT,
                    2_000,
                    TransactionId::from_u8(1),
                    "B202603051-0001",
                    TimestampMs::MIN,
                )
            })
            .unwrap();

        store.read(|state| {
            let underwriter =
                &state.accounts[accounts::PREMIUM_INCOME_UNDERWRITER];
            let platform = &state.accounts[accounts::COMMISSION_INCOME];
            // 20% of 1048.00 = 209.60
            assert_eq!(platform.balance, Amount::from_minor(20_960));
            assert_eq!(underwriter.balance, Amount::from_minor(83_840));
            // Premium payable is fully cleared.
            let payable = &state.accounts[accounts::PREMIUM_PAYABLE];
            assert_eq!(payable.balance, Amount::ZERO);
        });
    }
}

//! `JournalEntry`, `JournalLine`, `GlAccount`.

use common::enums::{BalanceSide, JournalStatus};
use common::ids::{JournalEntryId, TransactionId};
use common::money::Amount;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A chart-of-accounts entry with a running balance, kept on its normal
/// side (a credit-normal account's balance grows with credits).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlAccount {
    pub code: &'static str,
    pub name: &'static str,
    pub side: BalanceSide,
    pub balance: Amount,
}

impl GlAccount {
    /// Apply one journal line to the running balance. The balance is kept
    /// on the account's normal side, so a debit grows a debit-normal
    /// account and shrinks a credit-normal one.
    pub fn apply(&mut self, line: &JournalLine) {
        let delta = match self.side {
            BalanceSide::Debit => line.debit - line.credit,
            BalanceSide::Credit => line.credit - line.debit,
        };
        self.balance = self.balance + delta;
    }
}

/// One line of a journal entry. Exactly one of `debit` / `credit` is
/// positive, never both.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_code: &'static str,
    pub debit: Amount,
    pub credit: Amount,
}

impl JournalLine {
    pub fn debit(account_code: &'static str, amount: Amount) -> Self {
        Self {
            account_code,
            debit: amount,
            credit: Amount::ZERO,
        }
    }

    pub fn credit(account_code: &'static str, amount: Amount) -> Self {
        Self {
            account_code,
            debit: Amount::ZERO,
            credit: amount,
        }
    }
}

/// A balanced double-entry journal entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalEntryId,
    /// Sequential, unique: `JE-000042`.
    pub entry_number: String,
    pub entry_date: TimestampMs,
    /// What business event produced this entry, e.g. "DEPOSIT_SETTLED".
    pub entry_type: &'static str,
    pub status: JournalStatus,
    pub description: String,
    pub total_debit: Amount,
    pub total_credit: Amount,
    pub source_transaction_id: Option<TransactionId>,
    pub lines: Vec<JournalLine>,
}

impl JournalEntry {
    /// Validate the double-entry invariants: at least two lines, each line
    /// strictly one-sided and positive, total debits equal total credits.
    pub fn validate(&self) -> Result<(), Error> {
        if self.lines.len() < 2 {
            return Err(Error::Validation(format!(
                "journal entry {}: fewer than two lines",
                self.entry_number,
            )));
        }
        for line in &self.lines {
            let one_sided = (line.debit.is_zero()
                ^ line.credit.is_zero())
                && !line.debit.is_negative()
                && !line.credit.is_negative();
            if !one_sided {
                return Err(Error::Validation(format!(
                    "journal entry {}: line on {} must have exactly one \
                     positive side",
                    self.entry_number, line.account_code,
                )));
            }
        }
        let debits: Amount = self.lines.iter().map(|l| l.debit).sum();
        let credits: Amount = self.lines.iter().map(|l| l.credit).sum();
        if debits != credits
            || debits != self.total_debit
            || credits != self.total_credit
        {
            return Err(Error::Validation(format!(
                "journal entry {}: debits {debits} != credits {credits}",
                self.entry_number,
            )));
        }
        Ok(())
    }
}

//! Domain events and the in-process events bus.
//!
//! Components that mutate the store record events inside the same store
//! transaction (outbox pattern); the caller receives them only after the
//! transaction committed and dispatches them exactly once per commit.
//! Consumers must still be idempotent on their message key, since a crash
//! between commit and dispatch re-delivers on reconciliation.

use common::enums::PaymentType;
use common::ids::{
    PaymentRequestId, PolicyId, RefundId, RiderId, TransactionId, WalletId,
};
use common::money::Amount;
use tokio::sync::broadcast;

/// Everything of business significance that falls out of a committed store
/// transaction.
#[derive(Clone, Debug)]
pub enum DomainEvent {
    /// A payment request reached COMPLETED and credited the wallet.
    PaymentSettled {
        request_id: PaymentRequestId,
        rider_id: RiderId,
        transaction_id: TransactionId,
        payment_type: PaymentType,
        amount: Amount,
        days_count: u16,
    },
    /// The wallet's deposit flag flipped; a one-month policy is due.
    DepositCompleted {
        rider_id: RiderId,
        wallet_id: WalletId,
        transaction_id: TransactionId,
    },
    /// The daily counter reached 30; an eleven-month policy is due.
    DailyCycleCompleted {
        rider_id: RiderId,
        wallet_id: WalletId,
        transaction_id: TransactionId,
    },
    /// A payment request reached a failure terminal state.
    PaymentFailed {
        request_id: PaymentRequestId,
        rider_id: RiderId,
        payment_type: PaymentType,
        reason: String,
    },
    /// The reconciler gave up on a payment request.
    PaymentTimedOut {
        request_id: PaymentRequestId,
        rider_id: RiderId,
    },
    /// A batch run activated this policy.
    PolicyActivated {
        policy_id: PolicyId,
        rider_id: RiderId,
    },
    /// A free-look cancellation went through.
    PolicyCancelled {
        policy_id: PolicyId,
        rider_id: RiderId,
        refund_id: RefundId,
    },
}

/// The [`EventsBus`] makes it easy to listen on committed [`DomainEvent`]s
/// from some producer (or possibly many producers).
///
/// - Simply clone the [`EventsBus`] to get another handle to it.
/// - Call [`notify`] to send an event onto the bus.
/// - Call [`subscribe`] to start listening. Events emitted prior to
///   [`subscribe`] will not be received.
///
/// We use a [`tokio::sync::broadcast`] channel here because (1) event
/// notification is a noop if there are no waiters, which is common, and (2)
/// we don't need to garbage collect waiters that time out.
///
/// [`notify`]: Self::notify
/// [`subscribe`]: Self::subscribe
#[derive(Clone)]
pub struct EventsBus {
    event_tx: broadcast::Sender<DomainEvent>,
}

impl EventsBus {
    pub fn new() -> Self {
        let (event_tx, _) =
            broadcast::channel(common::constants::DEFAULT_CHANNEL_SIZE);
        Self { event_tx }
    }

    /// Send an event onto the bus. A noop if nobody is listening.
    pub fn notify(&self, event: DomainEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Start listening to all events [`notify`](Self::notify)'d after this
    /// point.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for EventsBus {
    fn default() -> Self {
        Self::new()
    }
}

//! Opaque 128-bit entity ids.
//!
//! Every persisted entity is keyed by a [`BimaId`]: 16 random bytes generated
//! at create time from an injected [`Crng`], rendered as 32 lowercase hex
//! characters. Ids carry no embedded meaning; ordering, where it matters, is
//! by a separate timestamp column.
//!
//! Full ids should not appear in logs; use [`BimaId::short`] instead.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::hex;
use crate::rng::Crng;

/// The raw 128-bit id underlying every typed entity id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(SerializeDisplay, DeserializeFromStr)]
pub struct BimaId([u8; 16]);

impl BimaId {
    pub fn from_rng(rng: &mut impl Crng) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// A log-safe truncated rendering: the first 4 bytes (8 hex chars).
    pub fn short(&self) -> impl Display + '_ {
        hex::display(&self.0[..4])
    }
}

impl Display for BimaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::display(&self.0))
    }
}

/// `Debug` shows the truncated form so accidental logging stays masked.
impl fmt::Debug for BimaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BimaId({}..)", self.short())
    }
}

impl FromStr for BimaId {
    type Err = hex::DecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map(|()| Self(bytes))
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl proptest::arbitrary::Arbitrary for BimaId {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::arbitrary::any;
        use proptest::strategy::Strategy;
        any::<[u8; 16]>().prop_map(Self).boxed()
    }
}

/// Defines a typed id newtype over [`BimaId`] so that e.g. a `RiderId` can't
/// be passed where a `PolicyId` is expected.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[derive(SerializeDisplay, DeserializeFromStr)]
        pub struct $name(pub BimaId);

        impl $name {
            pub fn from_rng(rng: &mut impl Crng) -> Self {
                Self(BimaId::from_rng(rng))
            }

            /// A log-safe truncated rendering.
            pub fn short(&self) -> impl Display + '_ {
                self.0.short()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), self.0.short())
            }
        }

        impl FromStr for $name {
            type Err = hex::DecodeError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                BimaId::from_str(s).map(Self)
            }
        }

        #[cfg(any(test, feature = "test-utils"))]
        impl proptest::arbitrary::Arbitrary for $name {
            type Parameters = ();
            type Strategy = proptest::strategy::BoxedStrategy<Self>;
            fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                use proptest::arbitrary::any;
                use proptest::strategy::Strategy;
                any::<BimaId>().prop_map(Self).boxed()
            }
        }

        #[cfg(any(test, feature = "test-utils"))]
        impl $name {
            /// Quickly create a well-known id for use in tests.
            pub fn from_u8(i: u8) -> Self {
                Self(BimaId::from_bytes([i; 16]))
            }
        }
    };
}

entity_id!(RiderId);
entity_id!(WalletId);
entity_id!(PaymentRequestId);
entity_id!(TransactionId);
entity_id!(PolicyId);
entity_id!(BatchId);
entity_id!(JournalEntryId);
entity_id!(NotificationId);
entity_id!(RefundId);
entity_id!(JobId);

//! `Rider`.

use common::enums::{KycStatus, RiderStatus};
use common::ids::RiderId;
use common::phone::PhoneNumber;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

/// A rider. The KYC and onboarding surfaces that populate this row are
/// out of scope here; the core reads it as the gate on payment initiation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rider {
    pub id: RiderId,
    pub phone: PhoneNumber,
    pub email: Option<String>,
    pub kyc_status: KycStatus,
    /// The sacco / fleet the rider belongs to, when any.
    pub organization_id: Option<String>,
    /// BCP 47 tag, e.g. "en" or "sw".
    pub language: String,
    pub status: RiderStatus,
    pub terms_accepted: bool,
    pub created_at: TimestampMs,
    pub deleted_at: Option<TimestampMs>,
}

impl Rider {
    /// Whether this rider may initiate payments at all.
    pub fn is_active(&self) -> bool {
        self.status == RiderStatus::Active && self.deleted_at.is_none()
    }

    pub fn kyc_approved(&self) -> bool {
        self.kyc_status == KycStatus::Approved
    }
}

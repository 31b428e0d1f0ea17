//! Shared fixtures for tests.

use std::sync::Arc;

use common::enums::{KycStatus, RiderStatus};
use common::ids::{RiderId, WalletId};
use common::phone::PhoneNumber;
use common::time::TimestampMs;

use crate::models::notification::{NotifyPreferences, QuietHours};
use crate::models::rider::Rider;
use crate::models::wallet::Wallet;
use crate::store::Store;

/// An approved, active rider with a distinct phone number per index.
pub fn rider_fixture(i: u8) -> Rider {
    Rider {
        id: RiderId::from_u8(i),
        phone: PhoneNumber::normalize(&format!("+2547123450{i:02}"))
            .expect("fixture phone is valid"),
        email: Some(format!("rider{i}@example.co.ke")),
        kyc_status: KycStatus::Approved,
        organization_id: Some("sacco-nairobi-01".to_owned()),
        language: "en".to_owned(),
        status: RiderStatus::Active,
        terms_accepted: true,
        created_at: TimestampMs::MIN,
        deleted_at: None,
    }
}

/// Seed a rider with an empty active wallet. Quiet hours are disabled so
/// tests that run on a real wall clock send immediately; tests exercising
/// deferral set an explicit window.
pub fn seed_rider(store: &Arc<Store>, i: u8) -> (RiderId, WalletId) {
    let rider = rider_fixture(i);
    let rider_id = rider.id;
    let wallet = Wallet::new(WalletId::from_u8(i), rider_id, TimestampMs::MIN);
    let wallet_id = wallet.id;
    store.must_transact(|state| {
        state.insert_rider(rider.clone());
        state.insert_wallet(wallet.clone());
        let mut prefs = NotifyPreferences::defaults(rider_id);
        prefs.quiet_hours = QuietHours {
            start_minute: 0,
            end_minute: 0,
        };
        state.preferences.insert(rider_id, prefs);
        Ok(())
    });
    (rider_id, wallet_id)
}

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{
        membership::MembershipLedger, notifier::ChangeNotifier, packing::PackingList,
        trips::TripRegistry,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub cookie_key: Key,
    pub notifier: ChangeNotifier,
    pub trips: TripRegistry,
    pub members: MembershipLedger,
    pub packing: PackingList,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        let notifier = ChangeNotifier::new(config.events_capacity);
        let trips = TripRegistry::new(
            db.clone(),
            notifier.clone(),
            config.public_base_url.clone(),
        );
        let members = MembershipLedger::new(db.clone(), notifier.clone());
        let packing = PackingList::new(db.clone(), notifier.clone());
        Self {
            config,
            db,
            cookie_key,
            notifier,
            trips,
            members,
            packing,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

pub mod schema;
pub mod store;
mod store_internal;

pub use schema::ENGINE_SCHEMA;
pub use store::{NewCredentialRecord, ProviderKeyRow, Store, StoreError};

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

use serde::{Deserialize, Serialize};

/// Authenticated rider for the current session, threaded explicitly into
/// each adapter and the engine at construction. There is no ambient
/// "current rider" global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub rider_id: String,
}

impl SessionContext {
    pub fn new(rider_id: impl Into<String>) -> Self {
        Self {
            rider_id: rider_id.into(),
        }
    }
}

/// Rider profile from the detail call. `depot_address` is the admin depot
/// the rider drops pickup-type orders at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderProfile {
    pub rider_id: String,
    pub name: String,
    pub depot_address: String,
    pub phone: String,
}

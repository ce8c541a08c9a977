use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::order::RiderOrder;
use crate::models::session::RiderProfile;

/// Request/response client for the remote order/rider service. The relay
/// core never constructs HTTP itself; the embedding host supplies an
/// implementation of this trait.
///
/// The four `verify_*` calls return the clean HTTP status of the response:
/// 200 means the code was accepted, anything else means the code was
/// rejected. A transport or decoding failure is an `Err` and collapses to
/// the transient-failure outcome at the engine.
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn list_orders(&self) -> Result<Vec<RiderOrder>, ApiError>;

    async fn rider_detail(&self, rider_id: &str) -> Result<RiderProfile, ApiError>;

    async fn assign_pickup(&self, group_order_id: &str, claimant_id: &str)
    -> Result<(), ApiError>;

    async fn assign_delivery(&self, order_key: &str, claimant_id: &str) -> Result<(), ApiError>;

    async fn verify_pickup(&self, group_order_id: &str, code: &str) -> Result<u16, ApiError>;

    async fn verify_admin_drop(&self, group_order_id: &str, code: &str) -> Result<u16, ApiError>;

    async fn verify_admin_pickup(&self, order_key: &str, code: &str) -> Result<u16, ApiError>;

    async fn verify_shop_drop(&self, group_order_id: &str, code: &str) -> Result<u16, ApiError>;

    async fn complete_transit(&self, order_key: &str) -> Result<(), ApiError>;

    async fn register_token(&self, claimant_id: &str, token: &str) -> Result<(), ApiError>;

    async fn invalidate_token(&self, claimant_id: &str) -> Result<(), ApiError>;
}

/// Local device notification surface. Best effort; delivery is the host
/// OS's concern.
#[async_trait]
pub trait HostNotifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str);
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType {
    Pickup,
    Delivery,
}

/// Server-authoritative progress marker for one group order. Mutated only
/// by confirmed verification responses arriving through a refresh, never
/// written locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    #[serde(rename = "Internal Tracking")]
    InternalTracking,
    #[serde(rename = "Order Placed For Pickup")]
    OrderPlacedForPickup,
    #[serde(rename = "Order Completed")]
    OrderCompleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOrderRef {
    pub group_order_id: String,
    pub tracking_status: TrackingStatus,
}

/// Pickup-side contact card, present only on pickup-type orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopDetails {
    pub shop_name: String,
    pub dealer_name: String,
    pub address: String,
    pub phone: String,
}

/// One shop destination within a multi-drop delivery order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedOrderLeg {
    pub shop_name: String,
    pub dealer_name: String,
    pub address: String,
    pub phone: String,
    pub orders: BTreeSet<String>,
}

impl GroupedOrderLeg {
    /// A leg is complete when every order id it contains has reached
    /// `Order Completed` in the group refs.
    pub fn is_complete(&self, refs: &[GroupOrderRef]) -> bool {
        self.orders.iter().all(|id| {
            refs.iter().any(|group_ref| {
                group_ref.group_order_id == *id
                    && group_ref.tracking_status == TrackingStatus::OrderCompleted
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderOrder {
    pub order_key: String,
    pub delivery_type: DeliveryType,
    #[serde(default)]
    pub rider_id: Option<String>,
    #[serde(default)]
    pub is_pickup_verified: bool,
    #[serde(default)]
    pub is_drop_verified: bool,
    #[serde(default)]
    pub is_completed: bool,
    pub payment_amount: Decimal,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub shop_details: Option<ShopDetails>,
    #[serde(default)]
    pub group_order_ids: Vec<GroupOrderRef>,
    #[serde(default)]
    pub grouped_orders: Vec<GroupedOrderLeg>,
}

impl RiderOrder {
    /// Wire payloads are accepted only when the delivery-type invariant
    /// holds: exactly one of `shop_details` / `grouped_orders` populated.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.order_key.trim().is_empty() {
            return Err(RelayError::MissingField("order_key"));
        }

        match self.delivery_type {
            DeliveryType::Pickup => {
                if self.shop_details.is_none() {
                    return Err(RelayError::MissingField("shop_details"));
                }
                if !self.grouped_orders.is_empty() {
                    return Err(RelayError::Decode(
                        "pickup order carries grouped_orders".to_string(),
                    ));
                }
            }
            DeliveryType::Delivery => {
                if self.grouped_orders.is_empty() {
                    return Err(RelayError::MissingField("grouped_orders"));
                }
                if self.shop_details.is_some() {
                    return Err(RelayError::Decode(
                        "delivery order carries shop_details".to_string(),
                    ));
                }
            }
        }

        if self.is_drop_verified && !self.is_pickup_verified {
            return Err(RelayError::Decode(
                "drop verified before pickup".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_claimed(&self) -> bool {
        self.rider_id.is_some()
    }

    /// The group id shared by every order picked up together. Claim and
    /// group-level verification calls key on this.
    pub fn shared_group_id(&self) -> Option<&str> {
        self.group_order_ids
            .first()
            .map(|group_ref| group_ref.group_order_id.as_str())
    }

    pub fn all_legs_completed(&self) -> bool {
        !self.group_order_ids.is_empty()
            && self
                .group_order_ids
                .iter()
                .all(|group_ref| group_ref.tracking_status == TrackingStatus::OrderCompleted)
    }
}

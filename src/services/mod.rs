pub mod affiliates;
pub mod cart_validator;
pub mod coupons;
pub mod order_status;
pub mod orders;
pub mod payment_gateway;
pub mod reconciliation;
pub mod shipping;
pub mod stock;

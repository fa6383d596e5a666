pub mod affiliate;
pub mod affiliate_transaction;
pub mod affiliate_visit;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod payment_event;
pub mod product;
pub mod shipping_charge;
pub mod used_coupon;

pub mod affiliates;
pub mod cart;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod products;
pub mod shipping;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        affiliates::AffiliateAttributor,
        cart_validator::CartValidator,
        coupons::CouponEngine,
        orders::OrderLedger,
        payment_gateway::{HostedCheckoutClient, PaymentGateway, PaymentGatewayAdapter},
        reconciliation::ReconciliationCoordinator,
        shipping::ShippingCalculator,
        stock::StockService,
    },
};

/// Services shared by every handler
#[derive(Clone)]
pub struct AppServices {
    pub stock: Arc<StockService>,
    pub cart: Arc<CartValidator>,
    pub coupons: Arc<CouponEngine>,
    pub shipping: Arc<ShippingCalculator>,
    pub orders: Arc<OrderLedger>,
    pub affiliates: Arc<AffiliateAttributor>,
    pub checkout: Arc<ReconciliationCoordinator>,
}

impl AppServices {
    /// Wires the pipeline around the given payment gateway
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let commission_rate = config.commission_rate();
        let max_quantity = i32::try_from(config.max_quantity_per_item).unwrap_or(i32::MAX);

        let stock = StockService::new(db_pool.clone());
        let cart = CartValidator::new(
            stock.clone(),
            config.settlement_currency.clone(),
            max_quantity,
        );
        let coupons = CouponEngine::new(db_pool.clone());
        let shipping = ShippingCalculator::new(db_pool.clone());
        let orders = OrderLedger::new(db_pool.clone(), event_sender.clone(), commission_rate);
        let affiliates =
            AffiliateAttributor::new(db_pool.clone(), event_sender.clone(), commission_rate);
        let gateway = PaymentGatewayAdapter::new(gateway, config);

        let checkout = ReconciliationCoordinator::new(
            db_pool,
            event_sender,
            cart.clone(),
            coupons.clone(),
            shipping.clone(),
            orders.clone(),
            gateway,
            affiliates.clone(),
            config.settlement_currency.clone(),
        );

        Self {
            stock: Arc::new(stock),
            cart: Arc::new(cart),
            coupons: Arc::new(coupons),
            shipping: Arc::new(shipping),
            orders: Arc::new(orders),
            affiliates: Arc::new(affiliates),
            checkout: Arc::new(checkout),
        }
    }

    /// Wires the pipeline around the configured hosted checkout gateway
    pub fn with_hosted_gateway(
        db_pool: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let gateway = HostedCheckoutClient::new(&config.payment_gateway)?;
        Ok(Self::new(db_pool, event_sender, config, Arc::new(gateway)))
    }
}

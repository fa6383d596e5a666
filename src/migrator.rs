use sea_orm_migration::prelude::*;

pub struct Migrator;

/// Money column. SQLite caps decimal precision at 16 digits.
fn money<T: IntoIden>(manager: &SchemaManager, name: T) -> ColumnDef {
    let mut column = ColumnDef::new(name);
    match manager.get_database_backend() {
        sea_orm::DatabaseBackend::Sqlite => column.decimal_len(16, 4),
        _ => column.decimal_len(19, 4),
    };
    column
}

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_products_table::Migration),
            Box::new(m20240601_000002_create_coupon_tables::Migration),
            Box::new(m20240601_000003_create_shipping_charges_table::Migration),
            Box::new(m20240601_000004_create_order_tables::Migration),
            Box::new(m20240601_000005_create_affiliate_tables::Migration),
            Box::new(m20240601_000006_create_payment_events_table::Migration),
        ]
    }
}

mod m20240601_000001_create_products_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Title).string().not_null())
                        .col(ColumnDef::new(Products::ProductType).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Products::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Products::Prices).json().not_null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Title,
        ProductType,
        Quantity,
        Prices,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_coupon_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_coupon_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::Code).string_len(64).not_null())
                        .col(ColumnDef::new(Coupons::Scope).string_len(20).not_null())
                        .col(ColumnDef::new(Coupons::ProductId).uuid().null())
                        .col(
                            super::money(manager, Coupons::DiscountPercentage)
                                .not_null(),
                        )
                        .col(super::money(manager, Coupons::MinCartTotal).null())
                        .col(ColumnDef::new(Coupons::UseType).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Coupons::ExpiresAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupons_code")
                        .table(Coupons::Table)
                        .col(Coupons::Code)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UsedCoupons::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UsedCoupons::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UsedCoupons::CouponCode).string_len(64).not_null())
                        .col(ColumnDef::new(UsedCoupons::Email).string().not_null())
                        .col(ColumnDef::new(UsedCoupons::Phone).string_len(32).not_null())
                        .col(ColumnDef::new(UsedCoupons::UserId).uuid().null())
                        .col(ColumnDef::new(UsedCoupons::OrderId).string_len(64).null())
                        .col(
                            ColumnDef::new(UsedCoupons::UsedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One consumption per customer identity; the conditional insert relies on it
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_used_coupons_identity")
                        .table(UsedCoupons::Table)
                        .col(UsedCoupons::CouponCode)
                        .col(UsedCoupons::Email)
                        .col(UsedCoupons::Phone)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UsedCoupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        Scope,
        ProductId,
        DiscountPercentage,
        MinCartTotal,
        UseType,
        ExpiresAt,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum UsedCoupons {
        Table,
        Id,
        CouponCode,
        Email,
        Phone,
        UserId,
        OrderId,
        UsedAt,
    }
}

mod m20240601_000003_create_shipping_charges_table {
    use sea_orm_migration::prelude::*;

    /// Initial flat fees; operators edit them through the API
    const DEFAULT_CHARGES: [(&str, i32); 2] = [("Dhaka-Chattogram", 60), ("Others", 120)];

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_shipping_charges_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ShippingCharges::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShippingCharges::Zone)
                                .string_len(32)
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            super::money(manager, ShippingCharges::Amount)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShippingCharges::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            let now = chrono::Utc::now();
            let mut seed = Query::insert();
            seed.into_table(ShippingCharges::Table).columns([
                ShippingCharges::Zone,
                ShippingCharges::Amount,
                ShippingCharges::UpdatedAt,
            ]);
            for (zone, amount) in DEFAULT_CHARGES {
                seed.values([zone.into(), amount.into(), now.into()])
                    .map_err(|e| DbErr::Migration(e.to_string()))?;
            }

            manager.exec_stmt(seed).await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShippingCharges::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ShippingCharges {
        Table,
        Zone,
        Amount,
        UpdatedAt,
    }
}

mod m20240601_000004_create_order_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Orders::Id)
                                .string_len(64)
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::UserId).uuid().null())
                        .col(ColumnDef::new(Orders::CustomerName).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerPhone).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::Address).string().not_null())
                        .col(ColumnDef::new(Orders::City).string().not_null())
                        .col(ColumnDef::new(Orders::Postcode).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::Country).string().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::ShippingZone).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(super::money(manager, Orders::Subtotal).not_null())
                        .col(super::money(manager, Orders::Discount).not_null())
                        .col(
                            super::money(manager, Orders::ShippingCharge)
                                .not_null(),
                        )
                        .col(super::money(manager, Orders::Total).not_null())
                        .col(ColumnDef::new(Orders::CouponCode).string_len(64).null())
                        .col(ColumnDef::new(Orders::AffiliateCode).string_len(32).null())
                        .col(ColumnDef::new(Orders::PaymentDetails).json().null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).string_len(64).not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Title).string().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            super::money(manager, OrderItems::UnitPrice)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::LineNo).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        UserId,
        CustomerName,
        CustomerEmail,
        CustomerPhone,
        Address,
        City,
        Postcode,
        Country,
        PaymentMethod,
        Status,
        ShippingZone,
        Currency,
        Subtotal,
        Discount,
        ShippingCharge,
        Total,
        CouponCode,
        AffiliateCode,
        PaymentDetails,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Title,
        Quantity,
        UnitPrice,
        LineNo,
    }
}

mod m20240601_000005_create_affiliate_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_affiliate_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Affiliates::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Affiliates::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Affiliates::UserId).uuid().not_null())
                        .col(ColumnDef::new(Affiliates::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Affiliates::AffiliateCode).string_len(32).null())
                        .col(
                            ColumnDef::new(Affiliates::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Affiliates::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Affiliates::ApprovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_affiliates_user_id")
                        .table(Affiliates::Table)
                        .col(Affiliates::UserId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_affiliates_code")
                        .table(Affiliates::Table)
                        .col(Affiliates::AffiliateCode)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AffiliateVisits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AffiliateVisits::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AffiliateVisits::AffiliateCode)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(AffiliateVisits::VisitedPage).string().not_null())
                        .col(
                            ColumnDef::new(AffiliateVisits::VisitorIp)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AffiliateVisits::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_affiliate_visits_code")
                        .table(AffiliateVisits::Table)
                        .col(AffiliateVisits::AffiliateCode)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AffiliateTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AffiliateTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AffiliateTransactions::AffiliateId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AffiliateTransactions::UserId).uuid().null())
                        .col(
                            ColumnDef::new(AffiliateTransactions::OrderId)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(ColumnDef::new(AffiliateTransactions::ProductId).uuid().null())
                        .col(
                            super::money(manager, AffiliateTransactions::Amount)
                                .not_null(),
                        )
                        .col(
                            super::money(manager, AffiliateTransactions::Commission)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AffiliateTransactions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_affiliate_transactions_affiliate_id")
                                .from(
                                    AffiliateTransactions::Table,
                                    AffiliateTransactions::AffiliateId,
                                )
                                .to(Affiliates::Table, Affiliates::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // Commission is credited at most once per order
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_affiliate_transactions_order_id")
                        .table(AffiliateTransactions::Table)
                        .col(AffiliateTransactions::OrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_affiliate_transactions_affiliate_id")
                        .table(AffiliateTransactions::Table)
                        .col(AffiliateTransactions::AffiliateId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AffiliateTransactions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AffiliateVisits::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Affiliates::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Affiliates {
        Table,
        Id,
        UserId,
        Status,
        AffiliateCode,
        CreatedAt,
        UpdatedAt,
        ApprovedAt,
    }

    #[derive(DeriveIden)]
    enum AffiliateVisits {
        Table,
        Id,
        AffiliateCode,
        VisitedPage,
        VisitorIp,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum AffiliateTransactions {
        Table,
        Id,
        AffiliateId,
        UserId,
        OrderId,
        ProductId,
        Amount,
        Commission,
        CreatedAt,
    }
}

mod m20240601_000006_create_payment_events_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000006_create_payment_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PaymentEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentEvents::OrderId).string_len(64).not_null())
                        .col(ColumnDef::new(PaymentEvents::Source).string_len(16).not_null())
                        .col(
                            ColumnDef::new(PaymentEvents::GatewayStatus)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentEvents::ValidationId).string().null())
                        .col(ColumnDef::new(PaymentEvents::Outcome).string_len(32).not_null())
                        .col(ColumnDef::new(PaymentEvents::Payload).json().not_null())
                        .col(
                            ColumnDef::new(PaymentEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_events_order_id")
                        .table(PaymentEvents::Table)
                        .col(PaymentEvents::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentEvents {
        Table,
        Id,
        OrderId,
        Source,
        GatewayStatus,
        ValidationId,
        Outcome,
        Payload,
        CreatedAt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::shipping_charge;
    use rust_decimal_macros::dec;
    use sea_orm::{ConnectOptions, Database, EntityTrait, QueryOrder};

    #[tokio::test]
    async fn sqlite_migrates_up_and_down() {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options).await.unwrap();

        Migrator::up(&db, None).await.unwrap();

        let charges = shipping_charge::Entity::find()
            .order_by_asc(shipping_charge::Column::Zone)
            .all(&db)
            .await
            .unwrap();
        let amounts: Vec<_> = charges.iter().map(|c| (c.zone.as_str(), c.amount)).collect();
        assert_eq!(
            amounts,
            vec![("Dhaka-Chattogram", dec!(60)), ("Others", dec!(120))]
        );

        Migrator::down(&db, None).await.unwrap();
    }
}

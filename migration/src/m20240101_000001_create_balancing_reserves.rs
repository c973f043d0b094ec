use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BalancingReserves::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BalancingReserves::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(BalancingReserves::CountryCode)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalancingReserves::DatetimeUtc)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalancingReserves::ReserveType)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BalancingReserves::AmountMw)
                            .decimal_len(12, 3)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BalancingReserves::PriceEur)
                            .decimal_len(12, 3)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BalancingReserves::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Natural key: one amount per country, hour and reserve type
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_balancing_reserves_unique")
                    .table(BalancingReserves::Table)
                    .col(BalancingReserves::CountryCode)
                    .col(BalancingReserves::DatetimeUtc)
                    .col(BalancingReserves::ReserveType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_balancing_reserves_datetime")
                    .table(BalancingReserves::Table)
                    .col(BalancingReserves::DatetimeUtc)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_balancing_reserves_country")
                    .table(BalancingReserves::Table)
                    .col(BalancingReserves::CountryCode)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_balancing_reserves_reserve_type")
                    .table(BalancingReserves::Table)
                    .col(BalancingReserves::ReserveType)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BalancingReserves::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BalancingReserves {
    Table,
    Id,
    CountryCode,
    DatetimeUtc,
    ReserveType,
    AmountMw,
    PriceEur,
    CreatedAt,
}

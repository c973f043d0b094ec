use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DayAheadPrices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DayAheadPrices::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::CountryCode)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::DatetimeUtc)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::PriceEurPerMwh)
                            .decimal_len(12, 3)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DayAheadPrices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique constraint: one price per country per hour
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_day_ahead_prices_unique")
                    .table(DayAheadPrices::Table)
                    .col(DayAheadPrices::CountryCode)
                    .col(DayAheadPrices::DatetimeUtc)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_day_ahead_prices_datetime")
                    .table(DayAheadPrices::Table)
                    .col(DayAheadPrices::DatetimeUtc)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_day_ahead_prices_country")
                    .table(DayAheadPrices::Table)
                    .col(DayAheadPrices::CountryCode)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DayAheadPrices::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DayAheadPrices {
    Table,
    Id,
    CountryCode,
    DatetimeUtc,
    PriceEurPerMwh,
    CreatedAt,
}

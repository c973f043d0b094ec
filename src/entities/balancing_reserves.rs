//! `SeaORM` Entity for balancing_reserves table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "balancing_reserves")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub country_code: String,
    pub datetime_utc: DateTimeWithTimeZone,
    /// Reserve label, or the raw business type code when unmapped
    pub reserve_type: String,
    #[sea_orm(column_type = "Decimal(Some((12, 3)))", nullable)]
    pub amount_mw: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((12, 3)))", nullable)]
    pub price_eur: Option<Decimal>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

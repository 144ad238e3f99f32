use sea_orm::entity::prelude::*;

use crate::types::ShipmentStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub uuid: Uuid,
    pub address: String,
    pub material: String,
    pub size: String,
    pub quantity: i32,
    pub notes: String,
    pub status: ShipmentStatus,
    pub tags: String,
    pub image_url: Option<String>,
    pub cont_sign: Option<String>,
    pub gallery_item_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

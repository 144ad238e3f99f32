use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{entities::shipment, models::tags, types::ShipmentStatus};

#[derive(Debug, Error)]
pub enum ShipmentError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Shipment not found")]
    NotFound,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Cannot move shipment from {from} to {to}")]
    InvalidTransition {
        from: ShipmentStatus,
        to: ShipmentStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shipment {
    pub id: Uuid,
    pub address: String,
    pub material: String,
    pub size: String,
    pub quantity: i32,
    pub notes: String,
    pub status: ShipmentStatus,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub cont_sign: Option<String>,
    pub gallery_item_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateShipment {
    pub address: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub size: String,
    pub quantity: Option<i32>,
    #[serde(default)]
    pub notes: String,
    pub status: Option<ShipmentStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub cont_sign: Option<String>,
    pub gallery_item_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateShipment {
    pub address: Option<String>,
    pub material: Option<String>,
    pub size: Option<String>,
    pub quantity: Option<i32>,
    pub notes: Option<String>,
    /// Direct edits may set any status; workflow buttons go through [`Shipment::transition`].
    pub status: Option<ShipmentStatus>,
    pub tags: Option<Vec<String>>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShipmentFilter {
    pub status: Option<ShipmentStatus>,
    pub tag: Option<String>,
}

fn validate_address(address: &str) -> Result<String, ShipmentError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ShipmentError::Validation("address is required".to_string()));
    }
    Ok(address.to_string())
}

fn validate_quantity(quantity: i32) -> Result<i32, ShipmentError> {
    if quantity < 1 {
        return Err(ShipmentError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }
    Ok(quantity)
}

impl Shipment {
    fn from_model(model: shipment::Model) -> Self {
        Self {
            id: model.uuid,
            address: model.address,
            material: model.material,
            size: model.size,
            quantity: model.quantity,
            notes: model.notes,
            status: model.status,
            tags: tags::decode(&model.tags),
            image_url: model.image_url,
            cont_sign: model.cont_sign,
            gallery_item_id: model.gallery_item_id,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }

    async fn find_model<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<shipment::Model, ShipmentError> {
        shipment::Entity::find()
            .filter(shipment::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(ShipmentError::NotFound)
    }

    /// Newest first.
    pub async fn find_all<C: ConnectionTrait>(
        db: &C,
        filter: &ShipmentFilter,
    ) -> Result<Vec<Self>, DbErr> {
        let mut query = shipment::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(shipment::Column::Status.eq(status));
        }

        let records = query
            .order_by_desc(shipment::Column::CreatedAt)
            .order_by_desc(shipment::Column::Id)
            .all(db)
            .await?;

        let mut shipments: Vec<Self> = records.into_iter().map(Self::from_model).collect();
        if let Some(tag) = filter.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            shipments.retain(|s| s.tags.iter().any(|t| t == tag));
        }
        Ok(shipments)
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = shipment::Entity::find()
            .filter(shipment::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    /// Oldest first, so numbered exports follow creation order. Unknown ids are skipped.
    pub async fn find_many<C: ConnectionTrait>(db: &C, ids: &[Uuid]) -> Result<Vec<Self>, DbErr> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = shipment::Entity::find()
            .filter(shipment::Column::Uuid.is_in(ids.iter().copied()))
            .order_by_asc(shipment::Column::CreatedAt)
            .order_by_asc(shipment::Column::Id)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    pub async fn find_by_status<C: ConnectionTrait>(
        db: &C,
        status: ShipmentStatus,
    ) -> Result<Vec<Self>, DbErr> {
        let records = shipment::Entity::find()
            .filter(shipment::Column::Status.eq(status))
            .order_by_asc(shipment::Column::CreatedAt)
            .order_by_asc(shipment::Column::Id)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateShipment,
    ) -> Result<Self, ShipmentError> {
        let address = validate_address(&data.address)?;
        let quantity = validate_quantity(data.quantity.unwrap_or(1))?;

        let now = Utc::now();
        let active = shipment::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            address: Set(address),
            material: Set(data.material.trim().to_string()),
            size: Set(data.size.trim().to_string()),
            quantity: Set(quantity),
            notes: Set(data.notes.clone()),
            status: Set(data.status.unwrap_or_default()),
            tags: Set(tags::encode(&tags::normalize(&data.tags))),
            image_url: Set(data.image_url.clone()),
            cont_sign: Set(data.cont_sign.clone()),
            gallery_item_id: Set(data.gallery_item_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        data: &UpdateShipment,
    ) -> Result<Self, ShipmentError> {
        let record = Self::find_model(db, id).await?;

        let mut active: shipment::ActiveModel = record.into();
        if let Some(address) = &data.address {
            active.address = Set(validate_address(address)?);
        }
        if let Some(material) = &data.material {
            active.material = Set(material.trim().to_string());
        }
        if let Some(size) = &data.size {
            active.size = Set(size.trim().to_string());
        }
        if let Some(quantity) = data.quantity {
            active.quantity = Set(validate_quantity(quantity)?);
        }
        if let Some(notes) = &data.notes {
            active.notes = Set(notes.clone());
        }
        if let Some(status) = data.status {
            active.status = Set(status);
        }
        if let Some(new_tags) = &data.tags {
            active.tags = Set(tags::encode(&tags::normalize(new_tags)));
        }
        if let Some(image_url) = &data.image_url {
            let image_url = image_url.trim();
            active.image_url = Set((!image_url.is_empty()).then(|| image_url.to_string()));
        }
        active.updated_at = Set(Utc::now().into());

        let updated = active.update(db).await?;
        Ok(Self::from_model(updated))
    }

    /// Workflow-button status change. Moving to the current status is a no-op.
    pub async fn transition<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        next: ShipmentStatus,
    ) -> Result<Self, ShipmentError> {
        let record = Self::find_model(db, id).await?;
        let current = record.status;
        if current == next {
            return Ok(Self::from_model(record));
        }
        if !current.can_transition_to(next) {
            return Err(ShipmentError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        let mut active: shipment::ActiveModel = record.into();
        active.status = Set(next);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(db).await?;
        tracing::debug!(shipment_id = %id, from = %current, to = %next, "Shipment status changed");
        Ok(Self::from_model(updated))
    }

    pub async fn set_status_many<C: ConnectionTrait>(
        db: &C,
        ids: &[Uuid],
        status: ShipmentStatus,
    ) -> Result<u64, DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = shipment::Entity::update_many()
            .col_expr(shipment::Column::Status, Expr::value(status))
            .col_expr(shipment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(shipment::Column::Uuid.is_in(ids.iter().copied()))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn add_tag<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        tag: &str,
    ) -> Result<Self, ShipmentError> {
        Self::edit_tags(db, id, std::slice::from_ref(&tag.to_string()), &[]).await
    }

    pub async fn remove_tag<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        tag: &str,
    ) -> Result<Self, ShipmentError> {
        Self::edit_tags(db, id, &[], std::slice::from_ref(&tag.to_string())).await
    }

    async fn edit_tags<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        add: &[String],
        remove: &[String],
    ) -> Result<Self, ShipmentError> {
        let record = Self::find_model(db, id).await?;
        let mut next = tags::decode(&record.tags);
        for tag in add {
            next = tags::with_tag(next, tag);
        }
        for tag in remove {
            next = tags::without_tag(next, tag);
        }

        let mut active: shipment::ActiveModel = record.into();
        active.tags = Set(tags::encode(&next));
        active.updated_at = Set(Utc::now().into());
        Ok(Self::from_model(active.update(db).await?))
    }

    /// Apply the same tag additions and removals to every listed shipment.
    pub async fn edit_tags_many<C: ConnectionTrait>(
        db: &C,
        ids: &[Uuid],
        add: &[String],
        remove: &[String],
    ) -> Result<Vec<Self>, ShipmentError> {
        if add.iter().all(|t| t.trim().is_empty()) && remove.is_empty() {
            return Err(ShipmentError::Validation(
                "at least one tag to add or remove is required".to_string(),
            ));
        }
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            match Self::edit_tags(db, *id, add, remove).await {
                Ok(shipment) => updated.push(shipment),
                Err(ShipmentError::NotFound) => {
                    tracing::debug!(shipment_id = %id, "Skipping unknown shipment in bulk tag edit");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(updated)
    }

    /// Strip `tag` from every shipment that carries it. Returns how many changed.
    pub async fn remove_tag_everywhere<C: ConnectionTrait>(
        db: &C,
        tag: &str,
    ) -> Result<u64, DbErr> {
        let tag = tag.trim();
        let records = shipment::Entity::find().all(db).await?;
        let mut changed = 0;
        for record in records {
            let current = tags::decode(&record.tags);
            if !current.iter().any(|t| t == tag) {
                continue;
            }
            let next = tags::without_tag(current, tag);
            let mut active: shipment::ActiveModel = record.into();
            active.tags = Set(tags::encode(&next));
            active.updated_at = Set(Utc::now().into());
            active.update(db).await?;
            changed += 1;
        }
        Ok(changed)
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, DbErr> {
        let result = shipment::Entity::delete_many()
            .filter(shipment::Column::Uuid.eq(id))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete_many<C: ConnectionTrait>(db: &C, ids: &[Uuid]) -> Result<u64, DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = shipment::Entity::delete_many()
            .filter(shipment::Column::Uuid.is_in(ids.iter().copied()))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;

    async fn setup_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    fn order(address: &str) -> CreateShipment {
        CreateShipment {
            address: address.to_string(),
            material: "walnut".to_string(),
            size: "120x60".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_applies_defaults() {
        let db = setup_db().await;
        let shipment = Shipment::create(&db, &order("Room 301, Pudong"))
            .await
            .unwrap();

        assert_eq!(shipment.quantity, 1);
        assert_eq!(shipment.status, ShipmentStatus::Pending);
        assert!(shipment.tags.is_empty());
        assert!(shipment.image_url.is_none());
    }

    #[tokio::test]
    async fn create_requires_address_and_positive_quantity() {
        let db = setup_db().await;
        assert!(matches!(
            Shipment::create(&db, &order("   ")).await,
            Err(ShipmentError::Validation(_))
        ));

        let mut bad_quantity = order("somewhere");
        bad_quantity.quantity = Some(0);
        assert!(matches!(
            Shipment::create(&db, &bad_quantity).await,
            Err(ShipmentError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn transition_follows_workflow() {
        let db = setup_db().await;
        let shipment = Shipment::create(&db, &order("a")).await.unwrap();

        let err = Shipment::transition(&db, shipment.id, ShipmentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ShipmentError::InvalidTransition {
                from: ShipmentStatus::Pending,
                to: ShipmentStatus::Completed
            }
        ));

        let shipped = Shipment::transition(&db, shipment.id, ShipmentStatus::Shipped)
            .await
            .unwrap();
        assert_eq!(shipped.status, ShipmentStatus::Shipped);

        let same = Shipment::transition(&db, shipment.id, ShipmentStatus::Shipped)
            .await
            .unwrap();
        assert_eq!(same.status, ShipmentStatus::Shipped);

        let completed = Shipment::transition(&db, shipment.id, ShipmentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(completed.status, ShipmentStatus::Completed);

        let canceled = Shipment::transition(&db, shipment.id, ShipmentStatus::Canceled)
            .await
            .unwrap();
        assert_eq!(canceled.status, ShipmentStatus::Canceled);
    }

    #[tokio::test]
    async fn direct_edit_can_set_any_status() {
        let db = setup_db().await;
        let shipment = Shipment::create(&db, &order("a")).await.unwrap();

        let updated = Shipment::update(
            &db,
            shipment.id,
            &UpdateShipment {
                status: Some(ShipmentStatus::Completed),
                notes: Some("left at the door".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.status, ShipmentStatus::Completed);
        assert_eq!(updated.notes, "left at the door");
    }

    #[tokio::test]
    async fn filters_by_status_and_tag() {
        let db = setup_db().await;
        let a = Shipment::create(&db, &order("a")).await.unwrap();
        let b = Shipment::create(&db, &order("b")).await.unwrap();
        Shipment::transition(&db, b.id, ShipmentStatus::Shipped)
            .await
            .unwrap();
        Shipment::add_tag(&db, a.id, "urgent").await.unwrap();

        let shipped = Shipment::find_all(
            &db,
            &ShipmentFilter {
                status: Some(ShipmentStatus::Shipped),
                tag: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(shipped.len(), 1);
        assert_eq!(shipped[0].id, b.id);

        let urgent = Shipment::find_all(
            &db,
            &ShipmentFilter {
                status: None,
                tag: Some("urgent".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].id, a.id);
    }

    #[tokio::test]
    async fn bulk_status_tags_and_delete() {
        let db = setup_db().await;
        let a = Shipment::create(&db, &order("a")).await.unwrap();
        let b = Shipment::create(&db, &order("b")).await.unwrap();
        let c = Shipment::create(&db, &order("c")).await.unwrap();

        let changed = Shipment::set_status_many(&db, &[a.id, b.id], ShipmentStatus::Shipped)
            .await
            .unwrap();
        assert_eq!(changed, 2);
        let pending = Shipment::find_by_status(&db, ShipmentStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c.id);

        let tagged = Shipment::edit_tags_many(
            &db,
            &[a.id, c.id, Uuid::new_v4()],
            &["fragile".to_string(), "vip".to_string()],
            &[],
        )
        .await
        .unwrap();
        assert_eq!(tagged.len(), 2);
        assert!(tagged.iter().all(|s| s.tags == vec!["fragile", "vip"]));

        let untagged = Shipment::edit_tags_many(&db, &[a.id], &[], &["vip".to_string()])
            .await
            .unwrap();
        assert_eq!(untagged[0].tags, vec!["fragile"]);

        assert_eq!(
            Shipment::remove_tag_everywhere(&db, "fragile").await.unwrap(),
            2
        );
        let c_after = Shipment::find_by_id(&db, c.id).await.unwrap().unwrap();
        assert_eq!(c_after.tags, vec!["vip"]);

        assert_eq!(Shipment::delete_many(&db, &[a.id, b.id]).await.unwrap(), 2);
        let remaining = Shipment::find_all(&db, &ShipmentFilter::default())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn find_many_returns_creation_order() {
        let db = setup_db().await;
        let first = Shipment::create(&db, &order("first")).await.unwrap();
        let second = Shipment::create(&db, &order("second")).await.unwrap();

        let found = Shipment::find_many(&db, &[second.id, first.id])
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}

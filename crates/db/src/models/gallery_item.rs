use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, sea_query::Order,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{entities::gallery_item, models::tags};

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Gallery item not found")]
    NotFound,
    #[error("Gallery item already exists for cont_sign {0}")]
    Duplicate(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryItem {
    pub id: Uuid,
    pub cont_sign: String,
    pub image_url: String,
    pub bos_key: Option<String>,
    pub filename: String,
    pub filesize: i64,
    pub is_compressed: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGalleryItem {
    pub cont_sign: String,
    pub image_url: String,
    #[serde(default)]
    pub bos_key: Option<String>,
    pub filename: String,
    #[serde(default)]
    pub filesize: i64,
    #[serde(default)]
    pub is_compressed: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGalleryItem {
    pub filename: Option<String>,
    pub image_url: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GallerySort {
    #[default]
    #[serde(alias = "date_added", alias = "dateAdded", alias = "timestamp")]
    CreatedAt,
    Filename,
    Filesize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GalleryFilter {
    /// Inclusive, compared against the upload day in UTC.
    pub date_from: Option<NaiveDate>,
    /// Inclusive, compared against the upload day in UTC.
    pub date_to: Option<NaiveDate>,
    /// Case-insensitive filename substring.
    pub search: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub sort_by: GallerySort,
    #[serde(default)]
    pub ascending: bool,
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

impl GalleryItem {
    fn from_model(model: gallery_item::Model) -> Self {
        Self {
            id: model.uuid,
            cont_sign: model.cont_sign,
            image_url: model.image_url,
            bos_key: model.bos_key,
            filename: model.filename,
            filesize: model.filesize,
            is_compressed: model.is_compressed,
            tags: tags::decode(&model.tags),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }

    async fn find_model<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<gallery_item::Model, GalleryError> {
        gallery_item::Entity::find()
            .filter(gallery_item::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(GalleryError::NotFound)
    }

    pub async fn find_all<C: ConnectionTrait>(
        db: &C,
        filter: &GalleryFilter,
    ) -> Result<Vec<Self>, DbErr> {
        let mut query = gallery_item::Entity::find();

        if let Some(from) = filter.date_from {
            query = query.filter(gallery_item::Column::CreatedAt.gte(start_of_day(from)));
        }
        if let Some(to) = filter.date_to.and_then(|to| to.succ_opt()) {
            query = query.filter(gallery_item::Column::CreatedAt.lt(start_of_day(to)));
        }
        let order = if filter.ascending {
            Order::Asc
        } else {
            Order::Desc
        };
        let column = match filter.sort_by {
            GallerySort::CreatedAt => gallery_item::Column::CreatedAt,
            GallerySort::Filename => gallery_item::Column::Filename,
            GallerySort::Filesize => gallery_item::Column::Filesize,
        };

        let records = query
            .order_by(column, order.clone())
            .order_by(gallery_item::Column::Id, order)
            .all(db)
            .await?;

        let mut items: Vec<Self> = records.into_iter().map(Self::from_model).collect();
        if let Some(search) = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            // Literal match: `%` and `_` are ordinary filename characters here.
            let needle = search.to_lowercase();
            items.retain(|item| item.filename.to_lowercase().contains(&needle));
        }
        if let Some(tag) = filter.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            items.retain(|item| item.tags.iter().any(|t| t == tag));
        }
        Ok(items)
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = gallery_item::Entity::find()
            .filter(gallery_item::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_by_cont_sign<C: ConnectionTrait>(
        db: &C,
        cont_sign: &str,
    ) -> Result<Option<Self>, DbErr> {
        let record = gallery_item::Entity::find()
            .filter(gallery_item::Column::ContSign.eq(cont_sign))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateGalleryItem,
    ) -> Result<Self, GalleryError> {
        let cont_sign = data.cont_sign.trim();
        if cont_sign.is_empty() {
            return Err(GalleryError::Validation("cont_sign is required".to_string()));
        }
        if data.image_url.trim().is_empty() {
            return Err(GalleryError::Validation("image_url is required".to_string()));
        }
        if Self::find_by_cont_sign(db, cont_sign).await?.is_some() {
            return Err(GalleryError::Duplicate(cont_sign.to_string()));
        }

        let now = Utc::now();
        let active = gallery_item::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            cont_sign: Set(cont_sign.to_string()),
            image_url: Set(data.image_url.trim().to_string()),
            bos_key: Set(data.bos_key.clone()),
            filename: Set(data.filename.clone()),
            filesize: Set(data.filesize),
            is_compressed: Set(data.is_compressed),
            tags: Set(tags::encode(&tags::normalize(&data.tags))),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    /// Insert a new item, or refresh the storage fields of the item that already
    /// carries this signature. Tags and the original upload time are kept.
    /// Returns the item and whether it already existed.
    pub async fn upsert_by_cont_sign<C: ConnectionTrait>(
        db: &C,
        data: &CreateGalleryItem,
    ) -> Result<(Self, bool), GalleryError> {
        let existing = gallery_item::Entity::find()
            .filter(gallery_item::Column::ContSign.eq(data.cont_sign.trim()))
            .one(db)
            .await?;

        let Some(record) = existing else {
            return Ok((Self::create(db, data).await?, false));
        };

        let mut active: gallery_item::ActiveModel = record.into();
        active.image_url = Set(data.image_url.clone());
        active.bos_key = Set(data.bos_key.clone());
        active.filename = Set(data.filename.clone());
        active.filesize = Set(data.filesize);
        active.is_compressed = Set(data.is_compressed);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(db).await?;
        Ok((Self::from_model(updated), true))
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        data: &UpdateGalleryItem,
    ) -> Result<Self, GalleryError> {
        let record = Self::find_model(db, id).await?;

        let mut active: gallery_item::ActiveModel = record.into();
        if let Some(filename) = data.filename.clone() {
            active.filename = Set(filename);
        }
        if let Some(image_url) = data.image_url.as_deref().map(str::trim) {
            if image_url.is_empty() {
                return Err(GalleryError::Validation(
                    "image_url cannot be empty".to_string(),
                ));
            }
            active.image_url = Set(image_url.to_string());
        }
        if let Some(new_tags) = &data.tags {
            active.tags = Set(tags::encode(&tags::normalize(new_tags)));
        }
        active.updated_at = Set(Utc::now().into());

        let updated = active.update(db).await?;
        Ok(Self::from_model(updated))
    }

    pub async fn add_tag<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        tag: &str,
    ) -> Result<Self, GalleryError> {
        if tag.trim().is_empty() {
            return Err(GalleryError::Validation("tag cannot be empty".to_string()));
        }
        let record = Self::find_model(db, id).await?;
        let next = tags::with_tag(tags::decode(&record.tags), tag);

        let mut active: gallery_item::ActiveModel = record.into();
        active.tags = Set(tags::encode(&next));
        active.updated_at = Set(Utc::now().into());
        Ok(Self::from_model(active.update(db).await?))
    }

    pub async fn remove_tag<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        tag: &str,
    ) -> Result<Self, GalleryError> {
        let record = Self::find_model(db, id).await?;
        let next = tags::without_tag(tags::decode(&record.tags), tag);

        let mut active: gallery_item::ActiveModel = record.into();
        active.tags = Set(tags::encode(&next));
        active.updated_at = Set(Utc::now().into());
        Ok(Self::from_model(active.update(db).await?))
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, DbErr> {
        let result = gallery_item::Entity::delete_many()
            .filter(gallery_item::Column::Uuid.eq(id))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}

use sea_orm_migration::{prelude::*, sea_orm::DatabaseBackend};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(GalleryItems::Table)
                    .col(pk_id_col(manager, GalleryItems::Id))
                    .col(uuid_col(GalleryItems::Uuid))
                    .col(
                        ColumnDef::new(GalleryItems::ContSign)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(GalleryItems::ImageUrl).text().not_null())
                    .col(ColumnDef::new(GalleryItems::BosKey).text())
                    .col(ColumnDef::new(GalleryItems::Filename).text().not_null())
                    .col(
                        ColumnDef::new(GalleryItems::Filesize)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(GalleryItems::IsCompressed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(tags_col(GalleryItems::Tags))
                    .col(timestamp_col(GalleryItems::CreatedAt))
                    .col(timestamp_col(GalleryItems::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_gallery_items_uuid")
                    .table(GalleryItems::Table)
                    .col(GalleryItems::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_gallery_items_cont_sign")
                    .table(GalleryItems::Table)
                    .col(GalleryItems::ContSign)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_gallery_items_created_at")
                    .table(GalleryItems::Table)
                    .col(GalleryItems::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(Shipments::Table)
                    .col(pk_id_col(manager, Shipments::Id))
                    .col(uuid_col(Shipments::Uuid))
                    .col(ColumnDef::new(Shipments::Address).text().not_null())
                    .col(
                        ColumnDef::new(Shipments::Material)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Shipments::Size)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Shipments::Quantity)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Shipments::Notes)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Shipments::Status)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("pending")),
                    )
                    .col(tags_col(Shipments::Tags))
                    .col(ColumnDef::new(Shipments::ImageUrl).text())
                    .col(ColumnDef::new(Shipments::ContSign).string_len(128))
                    .col(uuid_nullable_col(Shipments::GalleryItemId))
                    .col(timestamp_col(Shipments::CreatedAt))
                    .col(timestamp_col(Shipments::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_shipments_uuid")
                    .table(Shipments::Table)
                    .col(Shipments::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_shipments_status")
                    .table(Shipments::Table)
                    .col(Shipments::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Shipments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(GalleryItems::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn pk_id_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().auto_increment().primary_key().to_owned()
}

fn uuid_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().not_null().to_owned()
}

fn uuid_nullable_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().to_owned()
}

// JSON array of strings.
fn tags_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .text()
        .not_null()
        .default("[]")
        .to_owned()
}

fn timestamp_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

#[derive(Iden)]
enum GalleryItems {
    Table,
    Id,
    Uuid,
    ContSign,
    ImageUrl,
    BosKey,
    Filename,
    Filesize,
    IsCompressed,
    Tags,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Shipments {
    Table,
    Id,
    Uuid,
    Address,
    Material,
    Size,
    Quantity,
    Notes,
    Status,
    Tags,
    ImageUrl,
    ContSign,
    GalleryItemId,
    CreatedAt,
    UpdatedAt,
}

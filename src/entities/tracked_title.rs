use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tracked_titles")]
pub struct Model {
    /// Partition key, `"{titleId}#{dub}"`.
    #[sea_orm(primary_key, auto_increment = false)]
    pub title_key: String,
    pub mal_id: i32,
    pub dub: String,
    /// JSON-encoded array of episode numbers.
    pub episodes: String,
    /// ISO-8601 timestamps, millisecond precision, UTC.
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

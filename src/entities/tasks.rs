use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    /// One of `open`, `in-progress`, `resolved`, `closed`
    #[sea_orm(indexed)]
    pub status: String,

    pub priority: Option<String>,

    /// JSON array of tag strings
    #[sea_orm(column_type = "Text")]
    pub tags: String,

    /// Message-ID of the originating email, empty otherwise
    #[sea_orm(indexed)]
    pub email_message_id: String,

    pub created_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub updated_at: DateTimeUtc,

    pub resolved_at: Option<DateTimeUtc>,

    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::subtasks::Entity")]
    Subtasks,
    #[sea_orm(has_many = "super::time_entries::Entity")]
    TimeEntries,
    #[sea_orm(has_many = "super::comments::Entity")]
    Comments,
    #[sea_orm(has_many = "super::attachments::Entity")]
    Attachments,
    #[sea_orm(has_many = "super::task_subscribers::Entity")]
    Subscribers,
}

impl Related<super::subtasks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subtasks.def()
    }
}

impl Related<super::time_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TimeEntries.def()
    }
}

impl Related<super::comments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

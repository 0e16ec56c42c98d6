use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{EntityTrait, Schema};

#[derive(DeriveMigrationName)]
pub struct Migration;

async fn create_with_indexes<E>(manager: &SchemaManager<'_>, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    manager
        .create_table(
            schema
                .create_table_from_entity(entity)
                .if_not_exists()
                .to_owned(),
        )
        .await?;

    for mut index in schema.create_index_from_entity(entity) {
        manager.create_index(index.if_not_exists().to_owned()).await?;
    }

    Ok(())
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        // Parents before children so foreign keys resolve on PostgreSQL.
        create_with_indexes(manager, &schema, Users).await?;
        create_with_indexes(manager, &schema, Sessions).await?;
        create_with_indexes(manager, &schema, ApiKeys).await?;
        create_with_indexes(manager, &schema, LoginAttempts).await?;
        create_with_indexes(manager, &schema, Tasks).await?;
        create_with_indexes(manager, &schema, Subtasks).await?;
        create_with_indexes(manager, &schema, TimeEntries).await?;
        create_with_indexes(manager, &schema, Comments).await?;
        create_with_indexes(manager, &schema, Attachments).await?;
        create_with_indexes(manager, &schema, SavedQueries).await?;
        create_with_indexes(manager, &schema, TaskSubscribers).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_subscribers_task_email")
                    .table(TaskSubscribers)
                    .col(crate::entities::task_subscribers::Column::TaskId)
                    .col(crate::entities::task_subscribers::Column::Email)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TaskSubscribers).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SavedQueries).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Attachments).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Comments).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TimeEntries).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subtasks).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tasks).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LoginAttempts).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApiKeys).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users).to_owned())
            .await?;

        Ok(())
    }
}

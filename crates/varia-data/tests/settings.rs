use std::future::Future;

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use varia_data::settings::{
    self, NewSettingRow, SettingFieldUpdate,
};
use varia_test_support::postgres::start_postgres;

async fn with_pool<F, Fut>(test: F) -> Result<()>
where
    F: FnOnce(PgPool) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let database = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping settings data tests: {err}");
            return Ok(());
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database.connection_string())
        .await
        .context("failed to connect to disposable postgres")?;
    settings::run_migrations(&pool)
        .await
        .context("failed to run settings migrations")?;

    let result = test(pool.clone()).await;

    pool.close().await;
    drop(database);

    result
}

fn new_row<'a>(key: &'a str, group: &'a str, position: i64) -> NewSettingRow<'a> {
    NewSettingRow {
        key,
        type_id: "input-text",
        group,
        position,
        name: "Test Setting",
        description: None,
        options: Some("[]"),
    }
}

#[tokio::test]
async fn insert_and_fetch_round_trip() -> Result<()> {
    with_pool(|pool| async move {
        let inserted = settings::insert_setting(&pool, &new_row("site_title", "General", 1)).await?;
        assert_eq!(inserted.key, "site_title");
        assert_eq!(inserted.type_id, "input-text");
        assert_eq!(inserted.group, "General");
        assert_eq!(inserted.position, 1);
        assert!(!inserted.is_array_value);
        assert!(inserted.value.is_none());

        let fetched = settings::fetch_setting(&pool, "site_title")
            .await?
            .context("inserted setting should be fetchable")?;
        assert_eq!(fetched.options.as_deref(), Some("[]"));
        assert_eq!(fetched.created_at, inserted.created_at);

        assert!(settings::fetch_setting(&pool, "missing").await?.is_none());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn positions_are_computed_per_group() -> Result<()> {
    with_pool(|pool| async move {
        let mut tx = pool.begin().await?;
        settings::lock_group(tx.as_mut(), "General").await?;
        assert_eq!(settings::next_position(tx.as_mut(), "General").await?, 1);
        settings::insert_setting(tx.as_mut(), &new_row("a", "General", 1)).await?;
        settings::insert_setting(tx.as_mut(), &new_row("b", "General", 2)).await?;
        assert_eq!(settings::next_position(tx.as_mut(), "General").await?, 3);
        assert_eq!(settings::next_position(tx.as_mut(), "Mail").await?, 1);
        tx.commit().await?;

        let mut tx = pool.begin().await?;
        let below = settings::fetch_next_in_group(tx.as_mut(), "General", 1)
            .await?
            .context("expected a neighbour below position 1")?;
        assert_eq!(below.key, "b");
        assert!(
            settings::fetch_prev_in_group(tx.as_mut(), "General", 1)
                .await?
                .is_none()
        );
        tx.commit().await?;
        Ok(())
    })
    .await
}

#[tokio::test]
async fn updates_rename_and_revision() -> Result<()> {
    with_pool(|pool| async move {
        settings::insert_setting(&pool, &new_row("greeting", "General", 1)).await?;

        let update = SettingFieldUpdate {
            name: "Greeting",
            group: "Mail",
            type_id: "textarea",
            description: Some("Shown in outgoing mail"),
            options: None,
        };
        let updated = settings::update_setting_fields(&pool, "greeting", &update)
            .await?
            .context("update should find the row")?;
        assert_eq!(updated.group, "Mail");
        assert_eq!(updated.type_id, "textarea");

        let valued = settings::update_setting_value(&pool, "greeting", false, Some("hello"))
            .await?
            .context("value update should find the row")?;
        assert_eq!(valued.value.as_deref(), Some("hello"));

        let renamed = settings::rename_setting(&pool, "greeting", "mail_greeting")
            .await?
            .context("rename should find the row")?;
        assert_eq!(renamed.key, "mail_greeting");
        assert!(
            settings::rename_setting(&pool, "greeting", "other")
                .await?
                .is_none()
        );

        assert_eq!(settings::fetch_revision(&pool).await?, 0);
        assert_eq!(settings::bump_revision(&pool).await?, 1);
        assert_eq!(settings::bump_revision(&pool).await?, 2);
        assert_eq!(settings::fetch_revision(&pool).await?, 2);

        assert_eq!(settings::delete_setting(&pool, "mail_greeting").await?, 1);
        assert_eq!(settings::delete_setting(&pool, "mail_greeting").await?, 0);
        Ok(())
    })
    .await
}

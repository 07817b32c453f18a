use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::timeout;
use varia_settings::{
    AttachmentRef, AttachmentResolution, AttachmentStore, ChangeOperation, Direction, NewSetting,
    SettingUpdate, SettingValue, SettingsError, SettingsRegistry, SettingsService,
};
use varia_test_support::postgres::start_postgres;

/// In-memory stand-in for the external blob store.
#[derive(Default)]
struct MemoryAttachments {
    refs: Mutex<HashMap<String, String>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryAttachments {
    fn insert(&self, id: &str, url: &str) {
        self.refs
            .lock()
            .expect("attachment map poisoned")
            .insert(id.to_string(), url.to_string());
    }

    fn deleted_ids(&self) -> Vec<String> {
        self.deleted
            .lock()
            .expect("attachment log poisoned")
            .clone()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachments {
    async fn resolve(&self, id: &str) -> anyhow::Result<Option<AttachmentRef>> {
        let refs = self.refs.lock().expect("attachment map poisoned");
        Ok(refs.get(id).map(|url| AttachmentRef {
            id: id.to_string(),
            url: url.clone(),
        }))
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.refs
            .lock()
            .expect("attachment map poisoned")
            .remove(id);
        self.deleted
            .lock()
            .expect("attachment log poisoned")
            .push(id.to_string());
        Ok(())
    }
}

fn new_setting(key: &str, type_id: &str, group: &str, name: &str) -> NewSetting {
    NewSetting {
        key: key.to_string(),
        type_id: type_id.to_string(),
        group: group.to_string(),
        name: name.to_string(),
        description: None,
        options: None,
    }
}

macro_rules! service_or_skip {
    ($test:literal) => {{
        let postgres = match start_postgres() {
            Ok(db) => db,
            Err(err) => {
                eprintln!(concat!("skipping ", $test, ": {}"), err);
                return Ok(());
            }
        };
        let attachments = Arc::new(MemoryAttachments::default());
        let service =
            SettingsService::connect(postgres.connection_string(), attachments.clone()).await?;
        (postgres, attachments, service)
    }};
}

#[tokio::test]
async fn create_assigns_positions_and_normalizes_keys() -> anyhow::Result<()> {
    let (_postgres, _attachments, service) =
        service_or_skip!("create_assigns_positions_and_normalizes_keys");

    let title = service
        .create(new_setting("site.title", "input-text", "General", "Site Title"))
        .await?;
    assert_eq!(title.key, "site_title");
    assert_eq!(title.position, 1);

    let tagline = service
        .create(new_setting("site.tagline", "input-text", "General", "Tagline"))
        .await?;
    assert_eq!(tagline.key, "site_tagline");
    assert_eq!(tagline.position, 2);

    // Positions are scoped per group, not global.
    let sender = service
        .create(new_setting("mail.sender", "input-text", "Mail", "Sender"))
        .await?;
    assert_eq!(sender.position, 1);

    let duplicate = service
        .create(new_setting("site_title", "input-text", "General", "Again"))
        .await;
    assert!(matches!(
        duplicate,
        Err(SettingsError::DuplicateKey { key }) if key == "site_title"
    ));

    let unnamed = service
        .create(new_setting("x", "input-text", "General", "  "))
        .await;
    assert!(matches!(
        unnamed,
        Err(SettingsError::MissingField { field: "name" })
    ));

    // Default options come from the registry with the title pre-activated.
    let field = title.resolve_field();
    assert_eq!(field.type_id, "input-text");
    assert!(field.params.contains_key("title"));
    Ok(())
}

#[tokio::test]
async fn move_swaps_adjacent_positions() -> anyhow::Result<()> {
    let (_postgres, _attachments, service) = service_or_skip!("move_swaps_adjacent_positions");

    service
        .create(new_setting("site.title", "input-text", "General", "Site Title"))
        .await?;
    service
        .create(new_setting("site.tagline", "input-text", "General", "Tagline"))
        .await?;

    // Edges are no-ops, not errors.
    service.move_setting("site_title", Direction::Up).await?;
    service.move_setting("site_tagline", Direction::Down).await?;
    let title = service.find("site_title").await?.expect("title exists");
    assert_eq!(title.position, 1);

    service.move_setting("site_title", Direction::Down).await?;
    let title = service.find("site_title").await?.expect("title exists");
    let tagline = service.find("site_tagline").await?.expect("tagline exists");
    assert_eq!(title.position, 2);
    assert_eq!(tagline.position, 1);

    let missing = service.move_setting("absent", Direction::Up).await;
    assert!(matches!(missing, Err(SettingsError::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn set_value_round_trips_through_the_accessor() -> anyhow::Result<()> {
    let (_postgres, _attachments, service) =
        service_or_skip!("set_value_round_trips_through_the_accessor");

    service
        .create(new_setting("site.title", "input-text", "General", "Site Title"))
        .await?;

    let saved = service
        .set_value("site_title", json!("Acme"), None)
        .await?
        .expect("first save writes");
    assert!(!saved.is_array_value);
    assert_eq!(saved.value.as_deref(), Some("Acme"));

    // Saving the same value against the stored one is a no-op.
    let unchanged = service
        .set_value("site_title", json!("Acme"), Some("Acme"))
        .await?;
    assert!(unchanged.is_none());

    assert_eq!(
        service.get("site_title", "").await?,
        SettingValue::Scalar("Acme".to_string())
    );
    assert_eq!(
        service.get("missing-key", "fallback").await?,
        SettingValue::Scalar("fallback".to_string())
    );

    // A compound value flips the discriminator and decodes on read.
    let compound = service
        .set_value("site_title", json!({"a": 1, "b": 2}), Some("Acme"))
        .await?
        .expect("shape change writes");
    assert!(compound.is_array_value);
    assert_eq!(compound.value.as_deref(), Some(r#"{"a":1,"b":2}"#));
    assert_eq!(
        service.get("site_title", "").await?,
        SettingValue::Json(json!({"a": 1, "b": 2}))
    );

    // Corrupt stored JSON degrades to the raw string instead of failing.
    varia_data::settings::update_setting_value(service.pool(), "site_title", true, Some("{broken"))
        .await?;
    assert_eq!(
        service.get("site_title", "").await?,
        SettingValue::Scalar("{broken".to_string())
    );

    let missing = service.set_value("absent", json!("x"), None).await;
    assert!(matches!(missing, Err(SettingsError::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn file_settings_resolve_and_release_attachments() -> anyhow::Result<()> {
    let (_postgres, attachments, service) =
        service_or_skip!("file_settings_resolve_and_release_attachments");

    attachments.insert("17", "https://cdn.example/17.png");
    attachments.insert("18", "https://cdn.example/18.png");

    service
        .create(new_setting("site.logo", "picture", "General", "Logo"))
        .await?;

    // No stored value yet: the caller's default wins.
    assert_eq!(
        service.get("site_logo", "fallback").await?,
        SettingValue::Scalar("fallback".to_string())
    );

    service.set_value("site_logo", json!("17"), None).await?;
    assert_eq!(
        service.get("site_logo", "").await?,
        SettingValue::Url("https://cdn.example/17.png".to_string())
    );
    assert_eq!(
        service
            .resolve_value(
                "site_logo",
                SettingValue::Scalar(String::new()),
                AttachmentResolution::Refs
            )
            .await?,
        SettingValue::Attachment(AttachmentRef {
            id: "17".to_string(),
            url: "https://cdn.example/17.png".to_string(),
        })
    );

    service
        .set_value("site_logo", json!(["17", "18"]), Some("17"))
        .await?;
    assert_eq!(
        service.get("site_logo", "").await?,
        SettingValue::Urls(vec![
            "https://cdn.example/17.png".to_string(),
            "https://cdn.example/18.png".to_string(),
        ])
    );

    // Unresolvable ids fall back to the default rather than an empty list.
    service
        .set_value("site_logo", json!(["99"]), None)
        .await?;
    assert_eq!(
        service.get("site_logo", "fallback").await?,
        SettingValue::Scalar("fallback".to_string())
    );

    service
        .set_value("site_logo", json!(["17", "18"]), None)
        .await?;
    let deleted = service.delete("site_logo").await?;
    assert_eq!(deleted.key, "site_logo");
    assert_eq!(attachments.deleted_ids(), vec!["17", "18"]);
    assert!(service.find("site_logo").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn backup_and_restore_round_trip() -> anyhow::Result<()> {
    let (_postgres, _attachments, service) = service_or_skip!("backup_and_restore_round_trip");

    service
        .create(new_setting("site.title", "input-text", "General", "Site Title"))
        .await?;
    service
        .create(new_setting("mail.sender", "input-text", "Mail", "Sender"))
        .await?;
    service.set_value("site_title", json!("Acme"), None).await?;

    let document = service.backup().await?;

    // Drift the store after the backup was taken.
    service
        .set_value("site_title", json!("Changed"), Some("Acme"))
        .await?;
    service.delete("mail_sender").await?;
    service
        .create(new_setting("untouched.key", "input-text", "Other", "Untouched"))
        .await?;

    let report = service.restore(document.as_bytes()).await?;
    assert_eq!(report.restored, 2);

    let title = service.find("site_title").await?.expect("title restored");
    assert_eq!(title.value.as_deref(), Some("Acme"));
    let sender = service.find("mail_sender").await?.expect("sender restored");
    assert_eq!(sender.group, "Mail");
    // Keys absent from the document are left alone.
    assert!(service.find("untouched_key").await?.is_some());

    // A full round-trip reproduces every stored field.
    let listed = service.list().await?;
    let second = service.restore(service.backup().await?.as_bytes()).await?;
    assert_eq!(second.restored, listed.len());
    let relisted = service.list().await?;
    for (before, after) in listed.iter().zip(relisted.iter()) {
        assert_eq!(before.key, after.key);
        assert_eq!(before.type_id, after.type_id);
        assert_eq!(before.group, after.group);
        assert_eq!(before.position, after.position);
        assert_eq!(before.name, after.name);
        assert_eq!(before.description, after.description);
        assert_eq!(before.is_array_value, after.is_array_value);
        assert_eq!(before.value, after.value);
        assert_eq!(before.options, after.options);
    }

    let garbage = service.restore(b"not json at all").await;
    assert!(matches!(garbage, Err(SettingsError::InvalidBackup { .. })));

    // One bad record rejects the whole document before anything is written.
    let partial = json!([
        {
            "key": "valid_key",
            "type": "input-text",
            "group": "General",
            "position": 1,
            "name": "Valid",
            "is_array_value": false,
            "created_at": "2021-06-30T11:16:33Z",
            "updated_at": "2021-06-30T11:16:33Z"
        },
        {"key": "broken_record"}
    ])
    .to_string();
    let rejected = service.restore(partial.as_bytes()).await;
    assert!(matches!(rejected, Err(SettingsError::InvalidBackup { .. })));
    assert!(service.find("valid_key").await?.is_none());
    let title = service.find("site_title").await?.expect("title untouched");
    assert_eq!(title.value.as_deref(), Some("Acme"));
    Ok(())
}

#[tokio::test]
async fn rename_and_update_properties() -> anyhow::Result<()> {
    let (_postgres, _attachments, service) = service_or_skip!("rename_and_update_properties");

    service
        .create(new_setting("site.title", "input-text", "General", "Site Title"))
        .await?;

    let updated = service
        .update(
            "site_title",
            SettingUpdate {
                name: "Headline".to_string(),
                group: "Branding".to_string(),
                type_id: "textarea".to_string(),
                description: Some("Shown on every page".to_string()),
                options: varia_settings::fields::default_options("textarea"),
            },
        )
        .await?;
    assert_eq!(updated.name, "Headline");
    assert_eq!(updated.group, "Branding");
    assert_eq!(updated.type_id, "textarea");

    let missing = service
        .update(
            "absent",
            SettingUpdate {
                name: "X".to_string(),
                group: "G".to_string(),
                type_id: "input-text".to_string(),
                description: None,
                options: Vec::new(),
            },
        )
        .await;
    assert!(matches!(missing, Err(SettingsError::NotFound { .. })));

    let renamed = service.rename("site_title", "brand.headline").await?;
    assert_eq!(renamed.key, "brand_headline");
    assert_eq!(renamed.name, "Headline");
    assert!(service.find("site_title").await?.is_none());

    let stale = service.rename("site_title", "other_key").await;
    assert!(matches!(
        stale,
        Err(SettingsError::InvalidField { field: "old_key", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn watcher_observes_committed_changes() -> anyhow::Result<()> {
    let (_postgres, _attachments, service) = service_or_skip!("watcher_observes_committed_changes");

    let mut stream = service.subscribe_changes().await?;
    service
        .create(new_setting("site.title", "input-text", "General", "Site Title"))
        .await?;

    let change = timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("notification should arrive")
        .expect("stream should stay open")?;
    assert_eq!(change.operation, ChangeOperation::Created);
    assert_eq!(change.key, "site_title");
    assert!(change.revision >= 1);

    let (revision, mut watcher) = service.watch_settings(Duration::from_millis(50)).await?;
    service.set_value("site_title", json!("Acme"), None).await?;
    let next = timeout(Duration::from_secs(10), watcher.next())
        .await
        .expect("watcher should observe the save")?;
    assert!(next > revision);

    // A no-op save produces no revision bump for the watcher to chase.
    assert!(
        service
            .set_value("site_title", json!("Acme"), Some("Acme"))
            .await?
            .is_none()
    );
    assert_eq!(service.revision().await?, next);
    Ok(())
}

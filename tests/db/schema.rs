//! Store-level constraints: the invariants hold even for raw SQL

#[path = "../common/mod.rs"]
mod common;

use common::*;
use rusqlite::params;

fn setup() -> (rusqlite::Connection, LicenseKey) {
    let conn = setup_test_db();
    let project = insert_project(&conn, "app");
    let user = insert_user(&conn, &project, TEST_EMAIL);
    let key = insert_key(&conn, &user, "PFX-000000-000000-000000-000001", 2);
    (conn, key)
}

fn raw_insert_activation(conn: &rusqlite::Connection, key_id: &str, device_id: &str, is_active: bool) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO activations (id, license_key_id, device_id, device_info, activated_at, is_active, updated_at)
         VALUES (?1, ?2, ?3, '{}', 0, ?4, 0)",
        params![uuid::Uuid::new_v4().to_string(), key_id, device_id, is_active],
    )
}

#[test]
fn test_init_db_is_idempotent() {
    let conn = setup_test_db();
    init_db(&conn).expect("second init should be a no-op");
}

#[test]
fn test_one_active_activation_per_device() {
    let (conn, key) = setup();

    raw_insert_activation(&conn, &key.id, "device-1", true).unwrap();
    let dup = raw_insert_activation(&conn, &key.id, "device-1", true);
    assert!(dup.is_err(), "second active row for the same device must be rejected");

    // Inactive history rows are fine.
    raw_insert_activation(&conn, &key.id, "device-1", false).unwrap();
    raw_insert_activation(&conn, &key.id, "device-1", false).unwrap();
}

#[test]
fn test_license_key_must_be_unique() {
    let conn = setup_test_db();
    let project = insert_project(&conn, "app");
    let user = insert_user(&conn, &project, TEST_EMAIL);
    insert_key(&conn, &user, "PFX-AAAAAA-AAAAAA-AAAAAA-AAAAAA", 1);

    let dup = queries::create_license_key(
        &conn,
        &NewLicenseKey {
            user_id: user.id.clone(),
            key: "PFX-AAAAAA-AAAAAA-AAAAAA-AAAAAA".to_string(),
            key_version: "v1".to_string(),
            key_format: String::new(),
            key_metadata: serde_json::json!({}),
            start_date: None,
            expiry_date: None,
            max_devices: 1,
            features: vec![],
        },
    );
    assert!(dup.is_err());
}

#[test]
fn test_max_devices_check_constraint() {
    let (conn, key) = setup();
    let result = conn.execute(
        "UPDATE license_keys SET max_devices = 0 WHERE id = ?1",
        params![key.id],
    );
    assert!(result.is_err(), "max_devices below 1 must be rejected");
}

#[test]
fn test_project_slug_unique() {
    let conn = setup_test_db();
    insert_project(&conn, "app");
    let dup = queries::create_project(
        &conn,
        &CreateProject {
            name: "Again".to_string(),
            slug: "app".to_string(),
            key_generator: None,
            key_derivation: KeyDerivation::Legacy,
            default_max_devices: None,
            default_features: None,
        },
        TEST_SECRET,
        &licensor::config::ProjectDefaults::default(),
    );
    assert!(dup.is_err());
}

#[test]
fn test_project_defaults_applied() {
    let conn = setup_test_db();
    let project = insert_project(&conn, "app");
    assert_eq!(project.default_max_devices, 1);
    assert!(project.default_features.is_empty());

    let fetched = queries::get_project_by_slug(&conn, "app").unwrap().unwrap();
    assert_eq!(fetched.id, project.id);
    assert_eq!(fetched.secret_key, TEST_SECRET);
    assert_eq!(fetched.key_generator, BUILTIN_V1);
    assert_eq!(fetched.key_derivation, KeyDerivation::Legacy);
}

#[test]
fn test_secrets_never_serialized() {
    let conn = setup_test_db();
    let project = insert_project(&conn, "app");
    let json = serde_json::to_value(&project).unwrap();
    assert!(json.get("secret_key").is_none());
    assert!(json.get("encryption_key").is_none());
    assert_eq!(json["slug"], "app");
}

#[test]
fn test_deleting_key_cascades() {
    let (conn, key) = setup();
    raw_insert_activation(&conn, &key.id, "device-1", true).unwrap();
    queries::insert_usage_event(&conn, &key.id, &usage_event("app_opened")).unwrap();

    conn.execute("DELETE FROM license_keys WHERE id = ?1", params![key.id])
        .unwrap();

    assert_eq!(queries::count_active_activations(&conn, &key.id).unwrap(), 0);
    assert_eq!(queries::count_usage_events(&conn, &key.id, None).unwrap(), 0);
}

#[test]
fn test_corrupt_json_column_is_an_error() {
    let (conn, key) = setup();
    conn.execute(
        "UPDATE license_keys SET features = 'not json' WHERE id = ?1",
        params![key.id],
    )
    .unwrap();

    let err = queries::get_license_key_by_id(&conn, &key.id).unwrap_err();
    assert!(
        matches!(
            err,
            AppError::Database(rusqlite::Error::FromSqlConversionFailure(9, _, _))
        ),
        "unexpected error: {:?}",
        err
    );
}

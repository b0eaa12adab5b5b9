//! Atomic activation, deactivation and validation counters

#[path = "../common/mod.rs"]
mod common;

use common::*;
use queries::ActivationResult;
use rusqlite::Connection;

fn setup(max_devices: i32) -> (Connection, LicenseKey) {
    let conn = setup_test_db();
    let project = insert_project(&conn, "app");
    let user = insert_user(&conn, &project, TEST_EMAIL);
    let key = insert_key(&conn, &user, "PFX-000000-000000-000000-000001", max_devices);
    (conn, key)
}

fn acquire(conn: &mut Connection, key: &LicenseKey, device_id: &str) -> Result<(ActivationResult, i64), AppError> {
    queries::acquire_activation_atomic(
        conn,
        &key.id,
        device_id,
        &device_info(device_id),
        &activate_record(),
    )
}

#[test]
fn test_acquire_creates_then_reuses() {
    let (mut conn, key) = setup(2);

    let (first, count) = acquire(&mut conn, &key, "device-1").unwrap();
    assert!(matches!(first, ActivationResult::Created(_)));
    assert_eq!(count, 1);

    let (again, count) = acquire(&mut conn, &key, "device-1").unwrap();
    assert!(matches!(again, ActivationResult::Existing(_)));
    assert_eq!(again.activation().id, first.activation().id);
    assert_eq!(count, 1, "re-activation does not use a slot");

    // Both calls are logged against the same binding.
    let records = queries::list_validation_records(&conn, &first.activation().id).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.validation_type == ValidationType::Activate));
}

#[test]
fn test_acquire_enforces_max_devices() {
    let (mut conn, key) = setup(2);

    acquire(&mut conn, &key, "device-1").unwrap();
    acquire(&mut conn, &key, "device-2").unwrap();

    let err = acquire(&mut conn, &key, "device-3").unwrap_err();
    assert_eq!(err.as_license(), Some(&LicenseError::MaxDevicesReached(2)));
    assert_eq!(queries::count_active_activations(&conn, &key.id).unwrap(), 2);

    // Already-bound devices still get through at the limit.
    let (result, _) = acquire(&mut conn, &key, "device-2").unwrap();
    assert!(matches!(result, ActivationResult::Existing(_)));
}

#[test]
fn test_deactivate_frees_slot_and_keeps_history() {
    let (mut conn, key) = setup(1);

    let (first, _) = acquire(&mut conn, &key, "device-1").unwrap();
    assert!(queries::deactivate_activation(&conn, &key.id, "device-1").unwrap());
    assert_eq!(queries::count_active_activations(&conn, &key.id).unwrap(), 0);

    let (second, _) = acquire(&mut conn, &key, "device-2").unwrap();
    assert!(matches!(second, ActivationResult::Created(_)));

    let history = queries::list_activations(&conn, &key.id).unwrap();
    assert_eq!(history.len(), 2);
    let old = history.iter().find(|a| a.id == first.activation().id).unwrap();
    assert!(!old.is_active);
    assert_eq!(old.device_id, "device-1");
}

#[test]
fn test_deactivate_unknown_device_reports_false() {
    let (mut conn, key) = setup(1);
    assert!(!queries::deactivate_activation(&conn, &key.id, "never-seen").unwrap());

    acquire(&mut conn, &key, "device-1").unwrap();
    assert!(queries::deactivate_activation(&conn, &key.id, "device-1").unwrap());
    // Already inactive, but the device is known.
    assert!(queries::deactivate_activation(&conn, &key.id, "device-1").unwrap());
}

#[test]
fn test_reactivating_after_deactivation_inserts_new_row() {
    let (mut conn, key) = setup(1);

    let (first, _) = acquire(&mut conn, &key, "device-1").unwrap();
    queries::deactivate_activation(&conn, &key.id, "device-1").unwrap();
    let (second, _) = acquire(&mut conn, &key, "device-1").unwrap();

    assert!(matches!(second, ActivationResult::Created(_)));
    assert_ne!(first.activation().id, second.activation().id);
}

#[test]
fn test_revoke_deactivates_everything() {
    let (mut conn, key) = setup(3);
    acquire(&mut conn, &key, "device-1").unwrap();
    acquire(&mut conn, &key, "device-2").unwrap();

    let deactivated = queries::revoke_license_key(&mut conn, &key.id).unwrap();
    assert_eq!(deactivated, 2);

    let fetched = queries::get_license_key_by_id(&conn, &key.id).unwrap().unwrap();
    assert!(!fetched.is_active);
    assert_eq!(queries::count_active_activations(&conn, &key.id).unwrap(), 0);
}

#[test]
fn test_acquire_rechecks_standing_inside_transaction() {
    // The caller's copy of the key is stale: the key was revoked after it
    // was read.
    let (mut conn, key) = setup(2);
    queries::revoke_license_key(&mut conn, &key.id).unwrap();

    let err = acquire(&mut conn, &key, "device-1").unwrap_err();
    assert_eq!(err.as_license(), Some(&LicenseError::KeyInactive));
    assert_eq!(queries::count_active_activations(&conn, &key.id).unwrap(), 0);

    queries::update_license_key(
        &conn,
        &key.id,
        &UpdateLicenseKey {
            is_active: Some(true),
            expiry_date: Some(Some(past_timestamp(ONE_DAY))),
            ..Default::default()
        },
    )
    .unwrap();
    let err = acquire(&mut conn, &key, "device-1").unwrap_err();
    assert_eq!(err.as_license(), Some(&LicenseError::LicenseExpired));
}

#[test]
fn test_acquire_uses_current_device_limit() {
    let (mut conn, key) = setup(3);
    acquire(&mut conn, &key, "device-1").unwrap();

    queries::update_license_key(
        &conn,
        &key.id,
        &UpdateLicenseKey {
            max_devices: Some(1),
            ..Default::default()
        },
    )
    .unwrap();

    let err = acquire(&mut conn, &key, "device-2").unwrap_err();
    assert_eq!(err.as_license(), Some(&LicenseError::MaxDevicesReached(1)));
}

#[test]
fn test_acquire_refuses_key_of_inactive_project() {
    let mut conn = setup_test_db();
    let project = insert_project(&conn, "app");
    let user = insert_user(&conn, &project, TEST_EMAIL);
    let key = insert_key(&conn, &user, "PFX-000000-000000-000000-000001", 1);
    queries::set_project_active(&conn, &project.id, false).unwrap();

    let err = acquire(&mut conn, &key, "device-1").unwrap_err();
    assert_eq!(err.as_license(), Some(&LicenseError::KeyInactive));
}

#[test]
fn test_record_validation_refuses_revoked_key() {
    let (mut conn, key) = setup(1);
    let (activation, _) = acquire(&mut conn, &key, "device-1").unwrap();
    let activation_id = activation.activation().id.clone();

    queries::revoke_license_key(&mut conn, &key.id).unwrap();

    let err = queries::record_validation(&mut conn, &key.id, &activation_id, &validate_record())
        .unwrap_err();
    assert_eq!(err.as_license(), Some(&LicenseError::KeyInactive));

    let fetched = queries::get_license_key_by_id(&conn, &key.id).unwrap().unwrap();
    assert_eq!(fetched.validation_count, 0);
    let records = queries::list_validation_records(&conn, &activation_id).unwrap();
    assert_eq!(records.len(), 1, "only the activate record");
}

#[test]
fn test_record_validation_refuses_deactivated_binding() {
    let (mut conn, key) = setup(1);
    let (activation, _) = acquire(&mut conn, &key, "device-1").unwrap();
    let activation_id = activation.activation().id.clone();

    queries::deactivate_activation(&conn, &key.id, "device-1").unwrap();

    let err = queries::record_validation(&mut conn, &key.id, &activation_id, &validate_record())
        .unwrap_err();
    assert_eq!(err.as_license(), Some(&LicenseError::DeviceNotActivated));
}

#[test]
fn test_deactivate_all_activations() {
    let (mut conn, key) = setup(3);
    acquire(&mut conn, &key, "device-1").unwrap();
    acquire(&mut conn, &key, "device-2").unwrap();

    assert_eq!(queries::deactivate_all_activations(&conn, &key.id).unwrap(), 2);
    assert_eq!(queries::deactivate_all_activations(&conn, &key.id).unwrap(), 0);

    // Only the bindings go; the key itself stays active.
    let fetched = queries::get_license_key_by_id(&conn, &key.id).unwrap().unwrap();
    assert!(fetched.is_active);
    assert_eq!(queries::count_active_activations(&conn, &key.id).unwrap(), 0);
}

#[test]
fn test_record_validation_increments_counter() {
    let (mut conn, key) = setup(1);
    let (activation, _) = acquire(&mut conn, &key, "device-1").unwrap();
    let activation_id = activation.activation().id.clone();

    assert_eq!(
        queries::record_validation(&mut conn, &key.id, &activation_id, &validate_record()).unwrap(),
        1
    );
    assert_eq!(
        queries::record_validation(&mut conn, &key.id, &activation_id, &validate_record()).unwrap(),
        2
    );

    let fetched = queries::get_license_key_by_id(&conn, &key.id).unwrap().unwrap();
    assert_eq!(fetched.validation_count, 2);
    assert!(fetched.last_validated_at.is_some());

    let records = queries::list_validation_records(&conn, &activation_id).unwrap();
    assert_eq!(records.len(), 3, "one activate plus two validate records");
}

#[test]
fn test_update_license_key_partial() {
    let (conn, key) = setup(1);

    let changed = queries::update_license_key(
        &conn,
        &key.id,
        &UpdateLicenseKey {
            max_devices: Some(5),
            expiry_date: Some(Some(1_900_000_000)),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(changed);

    let fetched = queries::get_license_key_by_id(&conn, &key.id).unwrap().unwrap();
    assert_eq!(fetched.max_devices, 5);
    assert_eq!(fetched.expiry_date, Some(1_900_000_000));
    assert_eq!(fetched.features, key.features, "untouched fields are kept");

    queries::update_license_key(
        &conn,
        &key.id,
        &UpdateLicenseKey {
            expiry_date: Some(None),
            ..Default::default()
        },
    )
    .unwrap();
    let fetched = queries::get_license_key_by_id(&conn, &key.id).unwrap().unwrap();
    assert_eq!(fetched.expiry_date, None);
}

#[test]
fn test_concurrent_activation_respects_limit() {
    // Many threads race to bind distinct devices to a one-device key.
    // Exactly one may win.
    use std::sync::{Arc, Barrier};

    let num_threads = 8;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("race.db");

    let key = {
        let conn = Connection::open(&db_path).expect("Failed to create test db");
        init_db(&conn).expect("Failed to init schema");
        let project = insert_project(&conn, "app");
        let user = insert_user(&conn, &project, TEST_EMAIL);
        insert_key(&conn, &user, "PFX-000000-000000-000000-000001", 1)
    };

    let barrier = Arc::new(Barrier::new(num_threads));
    let key = Arc::new(key);

    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let key = Arc::clone(&key);
            let db_path = db_path.clone();

            std::thread::spawn(move || {
                let mut conn = Connection::open(&db_path).expect("thread failed to open db");
                conn.busy_timeout(std::time::Duration::from_secs(5))
                    .expect("failed to set busy timeout");

                barrier.wait();

                match acquire(&mut conn, &key, &format!("device-{}", i)) {
                    Ok(_) => true,
                    Err(e) => {
                        assert_eq!(e.as_license(), Some(&LicenseError::MaxDevicesReached(1)));
                        false
                    }
                }
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1, "exactly one of {} concurrent activations should win", num_threads);

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(queries::count_active_activations(&conn, &key.id).unwrap(), 1);
}

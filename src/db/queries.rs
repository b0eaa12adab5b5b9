use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};
use uuid::Uuid;

use crate::config::ProjectDefaults;
use crate::error::{LicenseError, Result};
use crate::models::*;

use super::from_row::{
    ACTIVATION_COLS, LICENSE_KEY_COLS, PROJECT_COLS, USAGE_EVENT_COLS, USER_COLS,
    VALIDATION_RECORD_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Some(v) = set to v, None = set to NULL.
    fn set_nullable<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.fields.push((column, v.into())),
            None => self.fields.push((column, Value::Null)),
        }
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Projects ============

/// Create a project. Unset fields come from `defaults`.
pub fn create_project(
    conn: &Connection,
    input: &CreateProject,
    secret_key: &str,
    defaults: &ProjectDefaults,
) -> Result<Project> {
    let id = gen_id();
    let now = now();
    let key_generator = input
        .key_generator
        .clone()
        .unwrap_or_else(|| defaults.key_generator.clone());
    let default_max_devices = input.default_max_devices.unwrap_or(defaults.max_devices);
    let default_features = input
        .default_features
        .clone()
        .unwrap_or_else(|| defaults.features.clone());

    conn.execute(
        "INSERT INTO projects (id, name, slug, secret_key, key_generator, key_derivation, default_max_devices, default_features, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10)",
        params![
            &id,
            &input.name,
            &input.slug,
            secret_key,
            &key_generator,
            input.key_derivation.as_str(),
            default_max_devices,
            serde_json::to_string(&default_features)?,
            now,
            now
        ],
    )?;

    Ok(Project {
        id,
        name: input.name.clone(),
        slug: input.slug.clone(),
        secret_key: secret_key.to_string(),
        encryption_key: None,
        key_generator,
        key_derivation: input.key_derivation,
        default_max_devices,
        default_features,
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_project_by_id(conn: &Connection, id: &str) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLS),
        &[&id],
    )
}

pub fn get_project_by_slug(conn: &Connection, slug: &str) -> Result<Option<Project>> {
    query_one(
        conn,
        &format!("SELECT {} FROM projects WHERE slug = ?1", PROJECT_COLS),
        &[&slug],
    )
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>> {
    query_all(
        conn,
        &format!("SELECT {} FROM projects ORDER BY created_at, slug", PROJECT_COLS),
        &[],
    )
}

pub fn set_project_active(conn: &Connection, id: &str, is_active: bool) -> Result<bool> {
    UpdateBuilder::new("projects", id)
        .with_updated_at()
        .set("is_active", is_active as i32)
        .execute(conn)
}

// ============ Users ============

pub fn create_user(conn: &Connection, project_id: &str, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();
    let email = input.email.trim().to_string();

    conn.execute(
        "INSERT INTO users (id, project_id, email, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, project_id, &email, &input.name, now, now],
    )?;

    Ok(User {
        id,
        project_id: project_id.to_string(),
        email,
        name: input.name.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

// ============ License Keys ============

pub fn create_license_key(conn: &Connection, input: &NewLicenseKey) -> Result<LicenseKey> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO license_keys (id, user_id, key, key_version, key_format, key_metadata, start_date, expiry_date, max_devices, features, is_active, validation_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, 0, ?11, ?12)",
        params![
            &id,
            &input.user_id,
            &input.key,
            &input.key_version,
            &input.key_format,
            serde_json::to_string(&input.key_metadata)?,
            input.start_date,
            input.expiry_date,
            input.max_devices,
            serde_json::to_string(&input.features)?,
            now,
            now
        ],
    )?;

    Ok(LicenseKey {
        id,
        user_id: input.user_id.clone(),
        key: input.key.clone(),
        key_version: input.key_version.clone(),
        key_format: input.key_format.clone(),
        key_metadata: input.key_metadata.clone(),
        start_date: input.start_date,
        expiry_date: input.expiry_date,
        max_devices: input.max_devices,
        features: input.features.clone(),
        is_active: true,
        validation_count: 0,
        last_validated_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_license_key_by_key(conn: &Connection, key: &str) -> Result<Option<LicenseKey>> {
    query_one(
        conn,
        &format!("SELECT {} FROM license_keys WHERE key = ?1", LICENSE_KEY_COLS),
        &[&key],
    )
}

pub fn get_license_key_by_id(conn: &Connection, id: &str) -> Result<Option<LicenseKey>> {
    query_one(
        conn,
        &format!("SELECT {} FROM license_keys WHERE id = ?1", LICENSE_KEY_COLS),
        &[&id],
    )
}

/// Apply a partial admin edit. Returns false if the key does not exist or
/// nothing was set.
pub fn update_license_key(conn: &Connection, id: &str, input: &UpdateLicenseKey) -> Result<bool> {
    let mut builder = UpdateBuilder::new("license_keys", id)
        .with_updated_at()
        .set_opt("is_active", input.is_active.map(|v| v as i32))
        .set_opt("max_devices", input.max_devices);

    if let Some(expiry_date) = input.expiry_date {
        builder = builder.set_nullable("expiry_date", expiry_date);
    }
    if let Some(ref features) = input.features {
        builder = builder.set("features", serde_json::to_string(features)?);
    }

    builder.execute(conn)
}

/// Deactivate a key and every device bound to it, in one transaction.
/// Returns the number of activations that were still active.
pub fn revoke_license_key(conn: &mut Connection, id: &str) -> Result<usize> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    tx.execute(
        "UPDATE license_keys SET is_active = 0, updated_at = ?1 WHERE id = ?2",
        params![now(), id],
    )?;
    let deactivated = deactivate_all_activations(&tx, id)?;

    tx.commit()?;
    Ok(deactivated)
}

/// Re-read a key's standing on `conn` and refuse it if the key or its
/// project is inactive, or the key has expired. Returns the current device
/// limit.
///
/// Called inside write transactions so a revoke or edit committed after the
/// caller's own checks is still seen.
fn ensure_key_standing(conn: &Connection, license_key_id: &str) -> Result<i32> {
    let standing = conn
        .query_row(
            "SELECT k.is_active, p.is_active, k.expiry_date, k.max_devices
             FROM license_keys k
             JOIN users u ON u.id = k.user_id
             JOIN projects p ON p.id = u.project_id
             WHERE k.id = ?1",
            params![license_key_id],
            |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, i32>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((key_active, project_active, expiry_date, max_devices)) = standing else {
        return Err(LicenseError::key_not_found().into());
    };
    if !key_active || !project_active {
        return Err(LicenseError::KeyInactive.into());
    }
    if expiry_date.is_some_and(|exp| exp <= now()) {
        return Err(LicenseError::LicenseExpired.into());
    }
    Ok(max_devices)
}

// ============ Activations ============

/// Outcome of [`acquire_activation_atomic`].
#[derive(Debug, Clone)]
pub enum ActivationResult {
    /// The device already had an active binding; no slot was used.
    Existing(Activation),
    /// A new binding was created.
    Created(Activation),
}

impl ActivationResult {
    pub fn activation(&self) -> &Activation {
        match self {
            ActivationResult::Existing(a) | ActivationResult::Created(a) => a,
        }
    }
}

/// Atomically bind a device to a license key, enforcing `max_devices`, and
/// append the `activate` validation record.
///
/// Runs under `BEGIN IMMEDIATE` so the standing check, count and insert
/// cannot interleave with another writer; the key's active flag, expiry and
/// device limit are read inside the transaction. The partial unique index on
/// `(license_key_id, device_id) WHERE is_active = 1` backs this up in the
/// store itself.
///
/// Returns the outcome and the number of active devices after it.
pub fn acquire_activation_atomic(
    conn: &mut Connection,
    license_key_id: &str,
    device_id: &str,
    device_info: &serde_json::Value,
    record: &NewValidationRecord,
) -> Result<(ActivationResult, i64)> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let max_devices = ensure_key_standing(&tx, license_key_id)?;

    let existing = get_active_activation(&tx, license_key_id, device_id)?;

    let result = match existing {
        Some(activation) => ActivationResult::Existing(activation),
        None => {
            let active = count_active_activations(&tx, license_key_id)?;
            if active >= i64::from(max_devices) {
                return Err(LicenseError::MaxDevicesReached(max_devices).into());
            }

            let id = gen_id();
            let now = now();
            tx.execute(
                "INSERT INTO activations (id, license_key_id, device_id, device_info, activated_at, is_active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                params![
                    &id,
                    license_key_id,
                    device_id,
                    serde_json::to_string(device_info)?,
                    now,
                    now
                ],
            )?;

            ActivationResult::Created(Activation {
                id,
                license_key_id: license_key_id.to_string(),
                device_id: device_id.to_string(),
                device_info: device_info.clone(),
                activated_at: now,
                is_active: true,
                updated_at: now,
            })
        }
    };

    insert_validation_record(&tx, &result.activation().id, record)?;
    let active_devices = count_active_activations(&tx, license_key_id)?;

    tx.commit()?;
    Ok((result, active_devices))
}

pub fn get_active_activation(
    conn: &Connection,
    license_key_id: &str,
    device_id: &str,
) -> Result<Option<Activation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_key_id = ?1 AND device_id = ?2 AND is_active = 1",
            ACTIVATION_COLS
        ),
        &[&license_key_id, &device_id],
    )
}

pub fn count_active_activations(conn: &Connection, license_key_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM activations WHERE license_key_id = ?1 AND is_active = 1",
        params![license_key_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// All bindings for a key, active or not, newest first.
pub fn list_activations(conn: &Connection, license_key_id: &str) -> Result<Vec<Activation>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activations WHERE license_key_id = ?1 ORDER BY activated_at DESC, rowid DESC",
            ACTIVATION_COLS
        ),
        &[&license_key_id],
    )
}

/// Deactivate the binding of one device. Returns whether the key has any
/// activation row for that device at all.
pub fn deactivate_activation(conn: &Connection, license_key_id: &str, device_id: &str) -> Result<bool> {
    conn.execute(
        "UPDATE activations SET is_active = 0, updated_at = ?1
         WHERE license_key_id = ?2 AND device_id = ?3 AND is_active = 1",
        params![now(), license_key_id, device_id],
    )?;

    let exists = conn
        .query_row(
            "SELECT 1 FROM activations WHERE license_key_id = ?1 AND device_id = ?2 LIMIT 1",
            params![license_key_id, device_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

pub fn deactivate_all_activations(conn: &Connection, license_key_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE activations SET is_active = 0, updated_at = ?1
         WHERE license_key_id = ?2 AND is_active = 1",
        params![now(), license_key_id],
    )?;
    Ok(affected)
}

// ============ Validation Records ============

pub fn insert_validation_record(
    conn: &Connection,
    activation_id: &str,
    input: &NewValidationRecord,
) -> Result<ValidationRecord> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO validation_records (id, activation_id, validation_type, device_info, ip_address, user_agent, request_data, response_status, error_code, validated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &id,
            activation_id,
            input.validation_type.as_str(),
            serde_json::to_string(&input.device_info)?,
            &input.ip_address,
            &input.user_agent,
            serde_json::to_string(&input.request_data)?,
            input.response_status.as_str(),
            &input.error_code,
            now
        ],
    )?;

    Ok(ValidationRecord {
        id,
        activation_id: activation_id.to_string(),
        validation_type: input.validation_type,
        device_info: input.device_info.clone(),
        ip_address: input.ip_address.clone(),
        user_agent: input.user_agent.clone(),
        request_data: input.request_data.clone(),
        response_status: input.response_status,
        error_code: input.error_code.clone(),
        validated_at: now,
    })
}

/// Append a successful validation record and bump the key's counter in one
/// transaction. Returns the new `validation_count`.
///
/// The key's standing and the binding are re-checked under the write lock,
/// so a revoke or deactivation that lands mid-request is not counted.
pub fn record_validation(
    conn: &mut Connection,
    license_key_id: &str,
    activation_id: &str,
    record: &NewValidationRecord,
) -> Result<i64> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    ensure_key_standing(&tx, license_key_id)?;

    let bound = tx
        .query_row(
            "SELECT is_active FROM activations WHERE id = ?1 AND license_key_id = ?2",
            params![activation_id, license_key_id],
            |row| row.get::<_, bool>(0),
        )
        .optional()?
        .unwrap_or(false);
    if !bound {
        return Err(LicenseError::DeviceNotActivated.into());
    }

    insert_validation_record(&tx, activation_id, record)?;
    let now = now();
    let count: i64 = tx.query_row(
        "UPDATE license_keys
         SET validation_count = validation_count + 1, last_validated_at = ?1, updated_at = ?1
         WHERE id = ?2
         RETURNING validation_count",
        params![now, license_key_id],
        |row| row.get(0),
    )?;

    tx.commit()?;
    Ok(count)
}

pub fn list_validation_records(conn: &Connection, activation_id: &str) -> Result<Vec<ValidationRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM validation_records WHERE activation_id = ?1 ORDER BY validated_at, rowid",
            VALIDATION_RECORD_COLS
        ),
        &[&activation_id],
    )
}

// ============ Usage Events ============

fn insert_usage_event_row(
    conn: &Connection,
    license_key_id: &str,
    input: &NewUsageEvent,
    created_at: i64,
) -> Result<UsageEvent> {
    let id = gen_id();

    conn.execute(
        "INSERT INTO usage_events (id, license_key_id, event_type, event_name, event_data, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            license_key_id,
            &input.event_type,
            &input.event_name,
            serde_json::to_string(&input.event_data)?,
            serde_json::to_string(&input.metadata)?,
            created_at
        ],
    )?;

    Ok(UsageEvent {
        id,
        license_key_id: license_key_id.to_string(),
        event_type: input.event_type.clone(),
        event_name: input.event_name.clone(),
        event_data: input.event_data.clone(),
        metadata: input.metadata.clone(),
        created_at,
    })
}

pub fn insert_usage_event(conn: &Connection, license_key_id: &str, input: &NewUsageEvent) -> Result<UsageEvent> {
    insert_usage_event_row(conn, license_key_id, input, now())
}

/// Insert a batch of events atomically. Returns how many were written.
pub fn insert_usage_events(
    conn: &mut Connection,
    license_key_id: &str,
    events: &[NewUsageEvent],
) -> Result<usize> {
    let tx = conn.transaction()?;
    let now = now();
    for event in events {
        insert_usage_event_row(&tx, license_key_id, event, now)?;
    }
    tx.commit()?;
    Ok(events.len())
}

/// Test/backfill helper: insert an event with an explicit timestamp.
pub fn insert_usage_event_at(
    conn: &Connection,
    license_key_id: &str,
    input: &NewUsageEvent,
    created_at: i64,
) -> Result<UsageEvent> {
    insert_usage_event_row(conn, license_key_id, input, created_at)
}

pub fn count_usage_events(conn: &Connection, license_key_id: &str, since: Option<i64>) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM usage_events
         WHERE license_key_id = ?1 AND (?2 IS NULL OR created_at >= ?2)",
        params![license_key_id, since],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_usage_events_by_type(
    conn: &Connection,
    license_key_id: &str,
    since: Option<i64>,
) -> Result<BTreeMap<String, i64>> {
    let mut stmt = conn.prepare(
        "SELECT event_type, COUNT(*) FROM usage_events
         WHERE license_key_id = ?1 AND (?2 IS NULL OR created_at >= ?2)
         GROUP BY event_type",
    )?;
    let rows = stmt
        .query_map(params![license_key_id, since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn list_usage_events(conn: &Connection, license_key_id: &str, limit: i64) -> Result<Vec<UsageEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM usage_events WHERE license_key_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            USAGE_EVENT_COLS
        ),
        &[&license_key_id, &limit],
    )
}

//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use serde::de::DeserializeOwned;

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// JSON text column, deserialized into whatever the field expects.
fn json_col<T: DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let text: String = row.get(col)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PROJECT_COLS: &str = "id, name, slug, secret_key, encryption_key, key_generator, key_derivation, default_max_devices, default_features, is_active, created_at, updated_at";

pub const USER_COLS: &str = "id, project_id, email, name, created_at, updated_at";

pub const LICENSE_KEY_COLS: &str = "id, user_id, key, key_version, key_format, key_metadata, start_date, expiry_date, max_devices, features, is_active, validation_count, last_validated_at, created_at, updated_at";

pub const ACTIVATION_COLS: &str =
    "id, license_key_id, device_id, device_info, activated_at, is_active, updated_at";

pub const VALIDATION_RECORD_COLS: &str = "id, activation_id, validation_type, device_info, ip_address, user_agent, request_data, response_status, error_code, validated_at";

pub const USAGE_EVENT_COLS: &str =
    "id, license_key_id, event_type, event_name, event_data, metadata, created_at";

// ============ FromRow Implementations ============

impl FromRow for Project {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            secret_key: row.get(3)?,
            encryption_key: row.get(4)?,
            key_generator: row.get(5)?,
            key_derivation: parse_enum(row, 6, "key_derivation")?,
            default_max_devices: row.get(7)?,
            default_features: json_col(row, 8)?,
            is_active: row.get::<_, i32>(9)? != 0,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            project_id: row.get(1)?,
            email: row.get(2)?,
            name: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl FromRow for LicenseKey {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseKey {
            id: row.get(0)?,
            user_id: row.get(1)?,
            key: row.get(2)?,
            key_version: row.get(3)?,
            key_format: row.get(4)?,
            key_metadata: json_col(row, 5)?,
            start_date: row.get(6)?,
            expiry_date: row.get(7)?,
            max_devices: row.get(8)?,
            features: json_col(row, 9)?,
            is_active: row.get::<_, i32>(10)? != 0,
            validation_count: row.get(11)?,
            last_validated_at: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for Activation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Activation {
            id: row.get(0)?,
            license_key_id: row.get(1)?,
            device_id: row.get(2)?,
            device_info: json_col(row, 3)?,
            activated_at: row.get(4)?,
            is_active: row.get::<_, i32>(5)? != 0,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for ValidationRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ValidationRecord {
            id: row.get(0)?,
            activation_id: row.get(1)?,
            validation_type: parse_enum(row, 2, "validation_type")?,
            device_info: json_col(row, 3)?,
            ip_address: row.get(4)?,
            user_agent: row.get(5)?,
            request_data: json_col(row, 6)?,
            response_status: parse_enum(row, 7, "response_status")?,
            error_code: row.get(8)?,
            validated_at: row.get(9)?,
        })
    }
}

impl FromRow for UsageEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UsageEvent {
            id: row.get(0)?,
            license_key_id: row.get(1)?,
            event_type: row.get(2)?,
            event_name: row.get(3)?,
            event_data: json_col(row, 4)?,
            metadata: json_col(row, 5)?,
            created_at: row.get(6)?,
        })
    }
}

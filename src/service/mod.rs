//! Issuance, activation and validation of license keys.
//!
//! Activation and validation share the same admission checks, applied in a
//! fixed order so clients always see the most specific failure first:
//!
//! 1. key exists (`InvalidKey`)
//! 2. device info decrypts under the project secret (`DeviceMismatch`)
//! 3. decrypted `deviceId` and owner email match the request (`DeviceMismatch`)
//! 4. key and project are active (`KeyInactive`)
//! 5. key has not expired (`LicenseExpired`)
//! 6. the project's generator accepts the key (`InvalidKey`)
//!
//! Activation then binds the device under the device limit; validation
//! requires an existing binding.

mod usage;

pub use usage::{MSG_BATCH_TRACKED, MSG_TRACKED};

use std::sync::Arc;

use chrono::Utc;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::{Value, json};

use crate::config::ProjectDefaults;
use crate::crypto;
use crate::db::DbPool;
use crate::db::queries::{self, ActivationResult};
use crate::error::{AppError, LicenseError, Result};
use crate::keygen::{DecodedKey, GeneratorRegistry, KeyGenerator};
use crate::models::*;

pub const MSG_ACTIVATED: &str = "License activated successfully";
pub const MSG_ALREADY_ACTIVATED: &str = "Device already activated";
pub const MSG_VALID: &str = "License valid";

/// Everything steps 1–3 establish about a request.
struct Admitted {
    key: LicenseKey,
    project: Project,
    generator: KeyGenerator,
    device_info: DeviceInfo,
}

/// Stateless facade over the store and the generator registry. Cheap to
/// clone; safe to share across tasks and threads.
#[derive(Clone)]
pub struct LicenseService {
    pool: DbPool,
    registry: Arc<GeneratorRegistry>,
    defaults: ProjectDefaults,
}

impl LicenseService {
    pub fn new(pool: DbPool, registry: Arc<GeneratorRegistry>) -> Self {
        Self {
            pool,
            registry,
            defaults: ProjectDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ProjectDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // ============ Projects & Users ============

    pub fn create_project(&self, input: &CreateProject) -> Result<Project> {
        self.create_project_with_secret(input, &crypto::generate_secret())
    }

    /// Create a project with a caller-chosen secret (e.g. one already baked
    /// into shipped clients).
    pub fn create_project_with_secret(&self, input: &CreateProject, secret: &str) -> Result<Project> {
        input.validate()?;
        if secret.is_empty() {
            return Err(AppError::BadRequest("Project secret cannot be empty".into()));
        }

        let generator = input
            .key_generator
            .as_deref()
            .unwrap_or(&self.defaults.key_generator);
        if !self.registry.has(generator) {
            return Err(AppError::BadRequest(format!(
                "Unknown key generator '{}'",
                generator
            )));
        }

        let conn = self.conn()?;
        if queries::get_project_by_slug(&conn, &input.slug)?.is_some() {
            return Err(AppError::BadRequest(format!(
                "Project slug '{}' is already taken",
                input.slug
            )));
        }

        let project = queries::create_project(&conn, input, secret, &self.defaults)?;
        tracing::info!(
            project_id = %project.id,
            slug = %project.slug,
            generator = %project.key_generator,
            "Project created"
        );
        Ok(project)
    }

    pub fn set_project_active(&self, project_id: &str, is_active: bool) -> Result<()> {
        let conn = self.conn()?;
        if !queries::set_project_active(&conn, project_id, is_active)? {
            return Err(AppError::NotFound("Project not found".into()));
        }
        tracing::info!(project_id, is_active, "Project status changed");
        Ok(())
    }

    pub fn create_user(&self, project: &Project, input: &CreateUser) -> Result<User> {
        input.validate()?;
        let conn = self.conn()?;
        Ok(queries::create_user(&conn, &project.id, input)?)
    }

    // ============ Keys ============

    /// Issue a new key for `user` with the project's generator.
    pub fn generate_key(
        &self,
        project: &Project,
        user: &User,
        options: GenerateOptions,
    ) -> Result<LicenseKey> {
        options.validate()?;
        if user.project_id != project.id {
            return Err(AppError::BadRequest(
                "User does not belong to this project".into(),
            ));
        }

        let generator = self.registry.make(&project.key_generator, project)?;
        let generated = generator.generate(user)?;

        let conn = self.conn()?;
        let key = queries::create_license_key(
            &conn,
            &NewLicenseKey {
                user_id: user.id.clone(),
                key: generated.key,
                key_version: generated.version,
                key_format: generated.format,
                key_metadata: generated.metadata,
                start_date: options.start_date,
                expiry_date: options.expiry_date,
                max_devices: options.max_devices.unwrap_or(project.default_max_devices),
                features: options
                    .features
                    .unwrap_or_else(|| project.default_features.clone()),
            },
        )?;

        tracing::info!(
            license_key_id = %key.id,
            project_id = %project.id,
            user_id = %user.id,
            version = %key.key_version,
            "License key generated"
        );
        Ok(key)
    }

    pub fn get_license_key(&self, key: &str) -> Result<LicenseKey> {
        let conn = self.conn()?;
        find_key(&conn, key)
    }

    /// Deactivate the key and every device bound to it. Idempotent.
    pub fn revoke_key(&self, key: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let license = find_key(&conn, key)?;
        let deactivated = queries::revoke_license_key(&mut conn, &license.id)?;
        tracing::info!(license_key_id = %license.id, deactivated, "License key revoked");
        Ok(())
    }

    /// Re-enable a revoked key. Previously bound devices must activate again.
    pub fn reactivate_key(&self, key: &str) -> Result<()> {
        self.update_key(
            key,
            &UpdateLicenseKey {
                is_active: Some(true),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// Set (or with `None`, clear) the expiry date.
    pub fn extend_expiry(&self, key: &str, expiry_date: Option<i64>) -> Result<LicenseKey> {
        self.update_key(
            key,
            &UpdateLicenseKey {
                expiry_date: Some(expiry_date),
                ..Default::default()
            },
        )
    }

    pub fn update_key(&self, key: &str, input: &UpdateLicenseKey) -> Result<LicenseKey> {
        input.validate()?;
        let conn = self.conn()?;
        let license = find_key(&conn, key)?;
        queries::update_license_key(&conn, &license.id, input)?;
        tracing::info!(license_key_id = %license.id, "License key updated");
        queries::get_license_key_by_id(&conn, &license.id)?.ok_or_else(|| LicenseError::key_not_found().into())
    }

    /// Unbind one device. Returns whether the key ever had that device; no
    /// error when it did not.
    pub fn deactivate_device(&self, key: &str, device_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let license = find_key(&conn, key)?;
        let found = queries::deactivate_activation(&conn, &license.id, device_id)?;
        if found {
            tracing::info!(license_key_id = %license.id, device_id, "Device deactivated");
        }
        Ok(found)
    }

    /// Every binding of the key, newest first.
    pub fn list_activations(&self, key: &str) -> Result<Vec<Activation>> {
        let conn = self.conn()?;
        let license = find_key(&conn, key)?;
        queries::list_activations(&conn, &license.id)
    }

    /// Advisory decode of a stored key through its project's generator. No
    /// signature check.
    pub fn decode_key(&self, key: &str) -> Result<Option<DecodedKey>> {
        let conn = self.conn()?;
        let license = find_key(&conn, key)?;
        let project = owning_project(&conn, &license)?.1;
        let generator = self.registry.make(&project.key_generator, &project)?;
        Ok(generator.decode(&license.key))
    }

    // ============ Activation / Validation ============

    /// Bind the calling device to the key.
    ///
    /// Re-activating a device that is already bound succeeds without using a
    /// slot, and is logged like a fresh activation.
    pub fn activate(&self, check: &LicenseCheck, meta: &RequestMeta) -> Result<ActivateResponse> {
        let mut conn = self.conn()?;
        let admitted = self.admit(&conn, check)?;
        if let Err(e) = check_standing(&admitted, &check.license_key) {
            log_rejection(&conn, &admitted, check, meta, ValidationType::Activate, &e);
            return Err(e.into());
        }

        let device_info = Value::Object(admitted.device_info.clone());
        let record = success_record(ValidationType::Activate, &device_info, check, meta);
        let (result, active_devices) = queries::acquire_activation_atomic(
            &mut conn,
            &admitted.key.id,
            &check.device_id,
            &device_info,
            &record,
        )
        .inspect_err(|e| {
            if let Some(LicenseError::MaxDevicesReached(max)) = e.as_license() {
                tracing::info!(
                    license_key_id = %admitted.key.id,
                    device_id = %check.device_id,
                    max_devices = max,
                    "Activation refused: device limit reached"
                );
            }
        })?;

        let message = match result {
            ActivationResult::Created(ref activation) => {
                tracing::info!(
                    license_key_id = %admitted.key.id,
                    activation_id = %activation.id,
                    device_id = %check.device_id,
                    active_devices,
                    "Device activated"
                );
                MSG_ACTIVATED
            }
            ActivationResult::Existing(ref activation) => {
                tracing::debug!(
                    license_key_id = %admitted.key.id,
                    activation_id = %activation.id,
                    device_id = %check.device_id,
                    "Device already activated"
                );
                MSG_ALREADY_ACTIVATED
            }
        };

        Ok(ActivateResponse {
            success: true,
            is_valid: true,
            expiry_date: admitted.key.expiry_rfc3339(),
            features: admitted.key.features,
            max_devices: admitted.key.max_devices,
            activated_devices: active_devices,
            message: message.to_string(),
        })
    }

    /// Confirm the calling device holds an active binding and count the check.
    pub fn validate(&self, check: &LicenseCheck, meta: &RequestMeta) -> Result<ValidateResponse> {
        let mut conn = self.conn()?;
        let admitted = self.admit(&conn, check)?;
        if let Err(e) = check_standing(&admitted, &check.license_key) {
            log_rejection(&conn, &admitted, check, meta, ValidationType::Validate, &e);
            return Err(e.into());
        }

        let activation = queries::get_active_activation(&conn, &admitted.key.id, &check.device_id)?
            .ok_or(LicenseError::DeviceNotActivated)?;

        let device_info = Value::Object(admitted.device_info.clone());
        let record = success_record(ValidationType::Validate, &device_info, check, meta);
        let validation_count =
            queries::record_validation(&mut conn, &admitted.key.id, &activation.id, &record)?;

        tracing::debug!(
            license_key_id = %admitted.key.id,
            device_id = %check.device_id,
            validation_count,
            "License validated"
        );

        Ok(ValidateResponse {
            success: true,
            is_valid: true,
            expiry_date: admitted.key.expiry_rfc3339(),
            features: admitted.key.features,
            max_devices: admitted.key.max_devices,
            validation_count,
            message: MSG_VALID.to_string(),
        })
    }

    /// Steps 1–3: find the key, decrypt the fingerprint, match the claims.
    fn admit(&self, conn: &Connection, check: &LicenseCheck) -> Result<Admitted> {
        let key = find_key(conn, &check.license_key)?;
        let (owner, project) = owning_project(conn, &key)?;
        let generator = self.registry.make(&project.key_generator, &project)?;

        let device_info: DeviceInfo = project
            .cipher()
            .decrypt(&check.encrypted_device_info)
            .map_err(|e| {
                tracing::debug!(license_key_id = %key.id, error = %e, "Device info decryption failed");
                LicenseError::DeviceMismatch("Failed to decrypt device information".into())
            })?;

        let claimed = device_info.get(DEVICE_ID_FIELD).and_then(Value::as_str);
        if claimed != Some(check.device_id.as_str()) {
            return Err(LicenseError::DeviceMismatch("Device ID mismatch".into()).into());
        }

        if owner.email != check.email {
            return Err(LicenseError::DeviceMismatch("Email does not match license".into()).into());
        }

        Ok(Admitted {
            key,
            project,
            generator,
            device_info,
        })
    }
}

/// Steps 4–6: active, unexpired, and accepted by the generator.
fn check_standing(admitted: &Admitted, key: &str) -> std::result::Result<(), LicenseError> {
    if !admitted.key.is_active || !admitted.project.is_active {
        return Err(LicenseError::KeyInactive);
    }

    if admitted.key.is_expired_at(Utc::now().timestamp()) {
        return Err(LicenseError::LicenseExpired);
    }

    if !admitted.generator.validate(key, &admitted.device_info) {
        return Err(LicenseError::InvalidKey("Invalid key format".into()));
    }

    Ok(())
}

/// Record a standing failure against the device's active binding, if it has
/// one. Best effort.
fn log_rejection(
    conn: &Connection,
    admitted: &Admitted,
    check: &LicenseCheck,
    meta: &RequestMeta,
    validation_type: ValidationType,
    error: &LicenseError,
) {
    tracing::info!(
        license_key_id = %admitted.key.id,
        device_id = %check.device_id,
        code = error.code(),
        "License check rejected"
    );

    let activation = match queries::get_active_activation(conn, &admitted.key.id, &check.device_id) {
        Ok(Some(a)) => a,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Failed to look up activation for rejection log: {}", e);
            return;
        }
    };

    let record = NewValidationRecord {
        validation_type,
        device_info: Value::Object(admitted.device_info.clone()),
        ip_address: meta.ip_address.clone(),
        user_agent: meta.user_agent.clone(),
        request_data: json!({ "email": check.email }),
        response_status: ResponseStatus::Error,
        error_code: Some(error.code().to_string()),
    };
    if let Err(e) = queries::insert_validation_record(conn, &activation.id, &record) {
        tracing::warn!("Failed to record rejected license check: {}", e);
    }
}

fn success_record(
    validation_type: ValidationType,
    device_info: &Value,
    check: &LicenseCheck,
    meta: &RequestMeta,
) -> NewValidationRecord {
    NewValidationRecord {
        validation_type,
        device_info: device_info.clone(),
        ip_address: meta.ip_address.clone(),
        user_agent: meta.user_agent.clone(),
        request_data: json!({ "email": check.email }),
        response_status: ResponseStatus::Success,
        error_code: None,
    }
}

fn find_key(conn: &Connection, key: &str) -> Result<LicenseKey> {
    queries::get_license_key_by_key(conn, key)?.ok_or_else(|| LicenseError::key_not_found().into())
}

/// The key's owner and the owner's project.
fn owning_project(conn: &Connection, key: &LicenseKey) -> Result<(User, Project)> {
    let owner = queries::get_user_by_id(conn, &key.user_id)?
        .ok_or_else(|| AppError::Internal(format!("owner of license key {} missing", key.id)))?;
    let project = queries::get_project_by_id(conn, &owner.project_id)?
        .ok_or_else(|| AppError::Internal(format!("project of user {} missing", owner.id)))?;
    Ok((owner, project))
}

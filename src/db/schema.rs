use rusqlite::Connection;

/// Initialize the database schema. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Projects (one secret per project, shared with its clients)
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            secret_key TEXT NOT NULL,
            encryption_key TEXT,  -- reserved, never read
            key_generator TEXT NOT NULL,
            key_derivation TEXT NOT NULL DEFAULT 'legacy' CHECK (key_derivation IN ('legacy', 'hkdf')),
            default_max_devices INTEGER NOT NULL DEFAULT 1 CHECK (default_max_devices >= 1),
            default_features TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Licensees, scoped to a project
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            email TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_project_email ON users(project_id, email);

        -- License keys
        CREATE TABLE IF NOT EXISTS license_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            key TEXT NOT NULL UNIQUE,
            key_version TEXT NOT NULL,
            key_format TEXT NOT NULL,
            key_metadata TEXT NOT NULL DEFAULT '{}',
            start_date INTEGER,
            expiry_date INTEGER,  -- NULL = never expires
            max_devices INTEGER NOT NULL CHECK (max_devices >= 1),
            features TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            validation_count INTEGER NOT NULL DEFAULT 0,
            last_validated_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_license_keys_user ON license_keys(user_id);

        -- Device bindings. Deactivated rows are kept for history.
        CREATE TABLE IF NOT EXISTS activations (
            id TEXT PRIMARY KEY,
            license_key_id TEXT NOT NULL REFERENCES license_keys(id) ON DELETE CASCADE,
            device_id TEXT NOT NULL,
            device_info TEXT NOT NULL DEFAULT '{}',
            activated_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activations_key ON activations(license_key_id, is_active);
        -- At most one active binding per (key, device)
        CREATE UNIQUE INDEX IF NOT EXISTS idx_activations_active_device
            ON activations(license_key_id, device_id) WHERE is_active = 1;

        -- Append-only log of activate/validate calls
        CREATE TABLE IF NOT EXISTS validation_records (
            id TEXT PRIMARY KEY,
            activation_id TEXT NOT NULL REFERENCES activations(id) ON DELETE CASCADE,
            validation_type TEXT NOT NULL CHECK (validation_type IN ('activate', 'validate')),
            device_info TEXT NOT NULL DEFAULT '{}',
            ip_address TEXT,
            user_agent TEXT,
            request_data TEXT NOT NULL DEFAULT '{}',
            response_status TEXT NOT NULL CHECK (response_status IN ('success', 'error')),
            error_code TEXT,
            validated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_validation_records_activation ON validation_records(activation_id);

        -- Append-only usage analytics
        CREATE TABLE IF NOT EXISTS usage_events (
            id TEXT PRIMARY KEY,
            license_key_id TEXT NOT NULL REFERENCES license_keys(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            event_name TEXT NOT NULL,
            event_data TEXT NOT NULL DEFAULT '{}',
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_events_type ON usage_events(license_key_id, event_type);
        CREATE INDEX IF NOT EXISTS idx_usage_events_created ON usage_events(license_key_id, created_at);
        "#,
    )?;

    Ok(())
}

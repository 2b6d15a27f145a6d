//! DDL statements and migrations for the SQLite schema.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are stored as INTEGER (0/1). Unknown manifest
//! fields round-trip through the `extra` JSON blob.

/// Current schema version. Bumped whenever DDL or migrations change.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Canonical database file name inside `.beads/`.
pub const DB_FILE_NAME: &str = "beads.db";

/// Core DDL statements executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Issues table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT NOT NULL DEFAULT '',
        title               TEXT NOT NULL,
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        status              TEXT NOT NULL DEFAULT 'open',
        priority            INTEGER NOT NULL DEFAULT 2,
        issue_type          TEXT NOT NULL DEFAULT 'task',
        assignee            TEXT NOT NULL DEFAULT '',
        owner               TEXT NOT NULL DEFAULT '',
        created_by          TEXT NOT NULL DEFAULT '',
        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL,
        closed_at           TEXT,
        close_reason        TEXT NOT NULL DEFAULT '',
        -- Tombstone fields
        deleted_at          TEXT,
        deleted_by          TEXT NOT NULL DEFAULT '',
        delete_reason       TEXT NOT NULL DEFAULT '',
        original_type       TEXT,
        -- Lifecycle flags
        ephemeral           INTEGER NOT NULL DEFAULT 0,
        pinned              INTEGER NOT NULL DEFAULT 0,
        -- External integration
        external_ref        TEXT,
        source_repo         TEXT NOT NULL DEFAULT '',
        -- Gate fields
        await_type          TEXT NOT NULL DEFAULT '',
        await_id            TEXT NOT NULL DEFAULT '',
        -- Merge-request fields
        source_ref          TEXT NOT NULL DEFAULT '',
        target_ref          TEXT NOT NULL DEFAULT '',
        -- Alias
        semantic_slug       TEXT NOT NULL DEFAULT '',
        -- Unknown manifest fields (JSON object)
        extra               TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    // -- Indexes on issues ---------------------------------------------------
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_external_ref ON issues(external_ref)",
    // -- Dependencies table --------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type          TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL,
        created_by    TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, type)",
    // -- Labels table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label    TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Comments table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL,
        author     TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    // -- Events table (append-only audit trail) ------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id    TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        actor       TEXT NOT NULL,
        old_value   TEXT,
        new_value   TEXT,
        payload     TEXT,
        created_at  TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Config table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata table (engine-internal) ------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Blocked-issue cache -------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS blocked_cache (
        issue_id      TEXT PRIMARY KEY,
        blocker_count INTEGER NOT NULL
    )
    "#,
];

/// Default configuration values inserted on first init.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("sync.debounce_seconds", "5"),
    ("sync.auto_commit", "true"),
    ("sync.auto_push", "false"),
    ("sync.auto_pull", "false"),
    ("tombstone.retention_days", "90"),
    ("types.custom", ""),
    ("status.custom", ""),
    ("status.ready", ""),
];

/// Schema migrations applied after initial DDL.
///
/// Each migration is a `(name, sql)` pair, tracked in the `metadata` table
/// under `migration:<name>` so it runs at most once. Migrations are
/// forward-only: a database written by a newer build refuses to open.
pub const MIGRATIONS: &[(&str, &str)] = &[
    // Future migrations go here, e.g.:
    // ("002_add_foo_column", "ALTER TABLE issues ADD COLUMN foo TEXT DEFAULT ''"),
];

/// Well-known metadata keys.
pub mod meta_keys {
    /// Schema version of the database.
    pub const SCHEMA_VERSION: &str = "schema_version";
    /// Random fingerprint guarding against cross-clone database reuse.
    pub const FINGERPRINT: &str = "workspace_fingerprint";
    /// Content hash of the last successful export.
    pub const LAST_EXPORT_HASH: &str = "last_export_hash";
    /// Timestamp of the last successful export.
    pub const LAST_EXPORT_AT: &str = "last_export_at";
    /// Timestamp of the last successful import.
    pub const LAST_IMPORT_AT: &str = "last_import_at";
    /// Whether the blocked cache is valid ("0" / "1").
    pub const BLOCKED_CACHE_VALID: &str = "blocked_cache_valid";
    /// Whether the store has writes not yet exported ("0" / "1").
    pub const DIRTY: &str = "dirty";
}

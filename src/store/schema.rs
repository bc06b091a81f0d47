//! SQLite schema.
//!
//! Idempotent: every statement tolerates an existing object.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flow (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    name                        TEXT NOT NULL,
    cron                        TEXT,
    last_run_status             TEXT,
    scheduling_status           TEXT NOT NULL,
    pause_continuous_failure    INTEGER NOT NULL DEFAULT 0,
    email_continuous_failure    TEXT,
    callback_email              TEXT,
    create_user                 TEXT,
    created_at                  TEXT NOT NULL,
    updated_at                  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS flow_job (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    flow_id     INTEGER NOT NULL REFERENCES flow(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    component   TEXT NOT NULL,
    previous    TEXT NOT NULL DEFAULT '[]',
    properties  TEXT NOT NULL DEFAULT '{}',
    UNIQUE (flow_id, name)
);
CREATE INDEX IF NOT EXISTS idx_flow_job_flow ON flow_job(flow_id);

CREATE TABLE IF NOT EXISTS flow_execution (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    flow_id         INTEGER NOT NULL,
    status          TEXT NOT NULL,
    trigger_type    TEXT NOT NULL,
    retry_number    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    heartbeat_at    TEXT
);
CREATE INDEX IF NOT EXISTS idx_flow_execution_flow ON flow_execution(flow_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_flow_execution_created ON flow_execution(created_at);

CREATE TABLE IF NOT EXISTS flow_execution_log (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id    INTEGER NOT NULL,
    level           TEXT NOT NULL,
    message         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flow_execution_log_execution ON flow_execution_log(execution_id);

CREATE TABLE IF NOT EXISTS component_definition (
    name        TEXT PRIMARY KEY,
    definition  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;

/// Execution statuses that may no longer be overwritten.
pub const TERMINAL_STATUSES_SQL: &str =
    "('SUCCESS', 'ERROR', 'KILLED', 'REJECTED_DUPLICATE')";

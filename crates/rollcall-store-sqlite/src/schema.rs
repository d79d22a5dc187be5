//! SQL schema for the rollcall SQLite journal.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per (path, field): the winning write seen so far.
CREATE TABLE IF NOT EXISTS cells (
    path        TEXT    NOT NULL,
    field       TEXT    NOT NULL,
    value_json  TEXT    NOT NULL,   -- canonical JSON scalar, 'null' for cleared
    at          INTEGER NOT NULL,   -- stamp: Unix milliseconds
    writer      TEXT    NOT NULL,   -- stamp: writer id
    signature   TEXT,               -- base64url Ed25519, namespace writes only
    PRIMARY KEY (path, field)
);

-- Peer-local settings that must survive restarts.
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

PRAGMA user_version = 1;
";

/// Insert a write unless the stored cell for the same field outranks it.
/// Mirrors the in-memory merge order: later `at`, then smaller writer, then
/// greater canonical value.
pub const UPSERT_CELL: &str = "
INSERT INTO cells (path, field, value_json, at, writer, signature)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (path, field) DO UPDATE SET
    value_json = excluded.value_json,
    at         = excluded.at,
    writer     = excluded.writer,
    signature  = excluded.signature
WHERE excluded.at > cells.at
   OR (excluded.at = cells.at AND excluded.writer < cells.writer)
   OR (excluded.at = cells.at AND excluded.writer = cells.writer
       AND excluded.value_json > cells.value_json)
";

//! Table layouts and meta keys. Column names and the status encoding are a
//! compatibility contract with existing databases.

/// Version of the table layout. Bumped together with a new migration.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Version of the analysis algorithm. Assets analyzed by an older version are
/// re-queued lazily at the start of the next scan.
pub const ALGO_VERSION: i64 = 3;

pub mod meta_keys {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const GLOBAL_ALGO_VERSION: &str = "global_algo_version";
    pub const SCAN_CURSOR_TAKEN_AT: &str = "scan_cursor_taken_at";
    pub const SCAN_CURSOR_ASSET_ID: &str = "scan_cursor_asset_id";
}

pub const CREATE_META: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT
);
"#;

pub const CREATE_ASSETS: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    asset_id TEXT PRIMARY KEY,
    taken_at INTEGER,           -- capture time, unix milliseconds
    width INTEGER,
    height INTEGER,
    file_signature TEXT,        -- "<mtime>_<size>"
    algo_version INTEGER,
    blur_score REAL,            -- Laplacian variance
    mean_luma REAL,
    phash TEXT,                 -- 16 hex chars
    labels_json TEXT,
    status INTEGER DEFAULT 0,   -- 0 pending, 1 done, 2 error, 3 deleted
    error_message TEXT,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_assets_status ON assets(status);
CREATE INDEX IF NOT EXISTS idx_assets_taken_at ON assets(taken_at);
CREATE INDEX IF NOT EXISTS idx_assets_algo_version ON assets(algo_version);
CREATE INDEX IF NOT EXISTS idx_assets_status_taken_at ON assets(status, taken_at, asset_id);
"#;

pub const CREATE_DUP_GROUPS: &str = r#"
CREATE TABLE IF NOT EXISTS dup_groups (
    group_id TEXT PRIMARY KEY,
    representative_asset_id TEXT,
    best_asset_id TEXT,
    created_at INTEGER
);

CREATE TABLE IF NOT EXISTS dup_members (
    group_id TEXT,
    asset_id TEXT,
    distance INTEGER,           -- to the match partner that admitted the asset
    PRIMARY KEY (group_id, asset_id)
);

CREATE INDEX IF NOT EXISTS idx_dup_members_asset ON dup_members(asset_id);
"#;

pub const ADD_FACE_COUNT: &str = "ALTER TABLE assets ADD COLUMN face_count INTEGER DEFAULT 0";

pub const CREATE_FACES: &str = r#"
CREATE TABLE IF NOT EXISTS face_groups (
    face_id TEXT PRIMARY KEY,
    cluster_id INTEGER,
    first_seen_asset_id TEXT,
    representative_uri TEXT,
    photo_count INTEGER DEFAULT 1,
    created_at INTEGER
);

CREATE TABLE IF NOT EXISTS face_instances (
    instance_id TEXT PRIMARY KEY,
    face_id TEXT,               -- NULL until clustered
    asset_id TEXT,
    bounding_box TEXT,          -- JSON {x, y, width, height}
    confidence REAL,
    FOREIGN KEY (face_id) REFERENCES face_groups(face_id)
);

CREATE INDEX IF NOT EXISTS idx_face_instances_asset ON face_instances(asset_id);
CREATE INDEX IF NOT EXISTS idx_face_instances_face ON face_instances(face_id);
"#;

pub const SCHEMA: &str = r#"
-- Accounts; login_name is always the lowercased user_name
CREATE TABLE IF NOT EXISTS accounts (
    uid INTEGER PRIMARY KEY,
    login_name TEXT NOT NULL UNIQUE,
    user_name TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    password_hash TEXT,               -- argon2id PHC string, NULL for directory accounts
    auth_method TEXT NOT NULL,        -- JSON-encoded AuthMethod
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    quota INTEGER NOT NULL DEFAULT 0,
    locked INTEGER NOT NULL DEFAULT 1,
    expires TEXT,                     -- NULL = never
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_login TEXT
);

-- Every uid ever assigned and the login name that held it. Rows outlive the
-- account so a uid is never handed to a different identity.
CREATE TABLE IF NOT EXISTS uid_history (
    uid INTEGER PRIMARY KEY,
    login_name TEXT NOT NULL,
    assigned_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    gid INTEGER PRIMARY KEY,
    group_name TEXT NOT NULL UNIQUE,  -- case-sensitive
    info TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gid_history (
    gid INTEGER PRIMARY KEY,
    group_name TEXT NOT NULL,
    assigned_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    gid INTEGER NOT NULL REFERENCES groups(gid) ON DELETE CASCADE,
    login_name TEXT NOT NULL,
    PRIMARY KEY (gid, login_name)
);

-- Grant index: one row per share target of a file
CREATE TABLE IF NOT EXISTS file_shares (
    file_tag TEXT NOT NULL,
    owner_uid INTEGER NOT NULL,
    target_kind TEXT NOT NULL,        -- 'uid' | 'gid' | 'local' | 'world'
    target_id INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (file_tag, target_kind, target_id)
);

-- Grants projected into a viewer's listing
CREATE TABLE IF NOT EXISTS reflected (
    viewer_uid INTEGER NOT NULL,
    file_tag TEXT NOT NULL,
    owner_uid INTEGER NOT NULL,
    via TEXT NOT NULL,                -- 'uid' | 'gid' | 'local'
    via_gid INTEGER,
    created_at TEXT NOT NULL,
    PRIMARY KEY (viewer_uid, file_tag)
);

-- Group and local grants a viewer dismissed
CREATE TABLE IF NOT EXISTS hidden_shares (
    viewer_uid INTEGER NOT NULL,
    file_tag TEXT NOT NULL,
    PRIMARY KEY (viewer_uid, file_tag)
);

CREATE INDEX IF NOT EXISTS idx_group_members_login ON group_members(login_name);
CREATE INDEX IF NOT EXISTS idx_file_shares_target ON file_shares(target_kind, target_id);
CREATE INDEX IF NOT EXISTS idx_file_shares_owner ON file_shares(owner_uid);
CREATE INDEX IF NOT EXISTS idx_reflected_file ON reflected(file_tag);
CREATE INDEX IF NOT EXISTS idx_reflected_owner ON reflected(owner_uid);
"#;

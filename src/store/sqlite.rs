use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Params, Row, Transaction, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

const ACCOUNT_COLUMNS: &str = "uid, login_name, user_name, email, password_hash, auth_method,
     first_name, last_name, quota, locked, expires, created_at, updated_at, last_login";

const REFLECTION_COLUMNS: &str = "viewer_uid, file_tag, owner_uid, via, via_gid, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory store, for tests and tooling.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn conversion_error(column: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let auth_method: String = row.get(5)?;
    Ok(Account {
        uid: row.get(0)?,
        login_name: row.get(1)?,
        user_name: row.get(2)?,
        email: row.get(3)?,
        password_hash: row.get(4)?,
        auth_method: serde_json::from_str(&auth_method).map_err(|e| conversion_error(5, e))?,
        first_name: row.get(6)?,
        last_name: row.get(7)?,
        quota: row.get(8)?,
        locked: row.get(9)?,
        expires: parse_optional_datetime(row.get(10)?),
        created_at: parse_datetime(&row.get::<_, String>(11)?),
        updated_at: parse_datetime(&row.get::<_, String>(12)?),
        last_login: parse_optional_datetime(row.get(13)?),
    })
}

fn row_to_reflection(row: &Row<'_>) -> rusqlite::Result<Reflection> {
    let file_tag: String = row.get(1)?;
    let via: String = row.get(3)?;
    let via_gid: Option<Gid> = row.get(4)?;
    Ok(Reflection {
        viewer_uid: row.get(0)?,
        file_tag: FileTag::parse(&file_tag).map_err(|e| conversion_error(1, e))?,
        owner_uid: row.get(2)?,
        via: GrantVia::from_parts(&via, via_gid)
            .ok_or_else(|| conversion_error(3, Error::InvalidField(format!("grant via '{via}'"))))?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn load_members(conn: &Connection, gid: Gid) -> Result<BTreeSet<String>> {
    let mut stmt =
        conn.prepare("SELECT login_name FROM group_members WHERE gid = ?1 ORDER BY login_name")?;
    let rows = stmt.query_map(params![gid], |row| row.get(0))?;
    rows.collect::<std::result::Result<BTreeSet<_>, _>>()
        .map_err(Error::from)
}

fn load_groups<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Group>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(Group {
            gid: row.get(0)?,
            group_name: row.get(1)?,
            info: row.get(2)?,
            members: BTreeSet::new(),
            created_at: parse_datetime(&row.get::<_, String>(3)?),
            updated_at: parse_datetime(&row.get::<_, String>(4)?),
        })
    })?;
    let mut groups = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    for group in &mut groups {
        group.members = load_members(conn, group.gid)?;
    }
    Ok(groups)
}

fn insert_members(tx: &Transaction<'_>, group: &Group) -> Result<()> {
    let mut stmt = tx.prepare("INSERT INTO group_members (gid, login_name) VALUES (?1, ?2)")?;
    for member in &group.members {
        stmt.execute(params![group.gid, member])?;
    }
    Ok(())
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Account operations

    fn create_account(&self, account: &Account) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let taken: Option<Uid> = tx
            .query_row(
                "SELECT uid FROM accounts WHERE login_name = ?1",
                params![account.login_name],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(Error::AlreadyExists(account.login_name.clone()));
        }
        let uid_active: Option<String> = tx
            .query_row(
                "SELECT login_name FROM accounts WHERE uid = ?1",
                params![account.uid],
                |row| row.get(0),
            )
            .optional()?;
        if uid_active.is_some() {
            return Err(Error::UidInUse(account.uid));
        }

        let auth_method = serde_json::to_string(&account.auth_method)?;
        tx.execute(
            &format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                account.uid,
                account.login_name,
                account.user_name,
                account.email,
                account.password_hash,
                auth_method,
                account.first_name,
                account.last_name,
                account.quota,
                account.locked,
                account.expires.as_ref().map(format_datetime),
                format_datetime(&account.created_at),
                format_datetime(&account.updated_at),
                account.last_login.as_ref().map(format_datetime),
            ],
        )?;
        tx.execute(
            "INSERT INTO uid_history (uid, login_name, assigned_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(uid) DO UPDATE SET login_name = excluded.login_name,
                                            assigned_at = excluded.assigned_at",
            params![
                account.uid,
                account.login_name,
                format_datetime(&account.created_at)
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_account(&self, uid: Uid) -> Result<Option<Account>> {
        self.conn()
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE uid = ?1"),
                params![uid],
                row_to_account,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_account_by_name(&self, login_name: &str) -> Result<Option<Account>> {
        self.conn()
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE login_name = ?1"),
                params![login_name],
                row_to_account,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY login_name"
        ))?;
        let rows = stmt.query_map([], row_to_account)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_account(&self, account: &Account) -> Result<()> {
        let auth_method = serde_json::to_string(&account.auth_method)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT login_name FROM accounts WHERE uid = ?1",
                params![account.uid],
                |row| row.get(0),
            )
            .optional()?;
        let Some(previous) = previous else {
            return Err(Error::NotFound);
        };

        if previous != account.login_name {
            let taken: Option<Uid> = tx
                .query_row(
                    "SELECT uid FROM accounts WHERE login_name = ?1",
                    params![account.login_name],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(Error::AlreadyExists(account.login_name.clone()));
            }
            tx.execute(
                "UPDATE group_members SET login_name = ?1 WHERE login_name = ?2",
                params![account.login_name, previous],
            )?;
            tx.execute(
                "UPDATE uid_history SET login_name = ?1 WHERE uid = ?2",
                params![account.login_name, account.uid],
            )?;
        }

        tx.execute(
            "UPDATE accounts SET login_name = ?1, user_name = ?2, email = ?3, password_hash = ?4,
                auth_method = ?5, first_name = ?6, last_name = ?7, quota = ?8, locked = ?9,
                expires = ?10, updated_at = ?11, last_login = ?12
             WHERE uid = ?13",
            params![
                account.login_name,
                account.user_name,
                account.email,
                account.password_hash,
                auth_method,
                account.first_name,
                account.last_name,
                account.quota,
                account.locked,
                account.expires.as_ref().map(format_datetime),
                format_datetime(&account.updated_at),
                account.last_login.as_ref().map(format_datetime),
                account.uid,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_account(&self, uid: Uid) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let login_name: Option<String> = tx
            .query_row(
                "SELECT login_name FROM accounts WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()?;
        let Some(login_name) = login_name else {
            return Ok(false);
        };

        let now = format_datetime(&Utc::now());
        tx.execute(
            "UPDATE groups SET updated_at = ?1
             WHERE gid IN (SELECT gid FROM group_members WHERE login_name = ?2)",
            params![now, login_name],
        )?;
        tx.execute(
            "DELETE FROM group_members WHERE login_name = ?1",
            params![login_name],
        )?;
        tx.execute("DELETE FROM accounts WHERE uid = ?1", params![uid])?;

        tx.commit()?;
        Ok(true)
    }

    fn next_uid(&self) -> Result<Uid> {
        self.conn()
            .query_row(
                "SELECT COALESCE(MAX(uid) + 1, 0) FROM (
                     SELECT uid FROM uid_history UNION ALL SELECT uid FROM accounts
                 )",
                [],
                |row| row.get(0),
            )
            .map_err(Error::from)
    }

    fn uid_holder(&self, uid: Uid) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT login_name FROM uid_history WHERE uid = ?1",
                params![uid],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
    }

    // Group operations

    fn create_group(&self, group: &Group) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let taken: Option<Gid> = tx
            .query_row(
                "SELECT gid FROM groups WHERE group_name = ?1 OR gid = ?2",
                params![group.group_name, group.gid],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(Error::AlreadyExists(group.group_name.clone()));
        }

        tx.execute(
            "INSERT INTO groups (gid, group_name, info, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.gid,
                group.group_name,
                group.info,
                format_datetime(&group.created_at),
                format_datetime(&group.updated_at),
            ],
        )?;
        tx.execute(
            "INSERT INTO gid_history (gid, group_name, assigned_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(gid) DO UPDATE SET group_name = excluded.group_name,
                                            assigned_at = excluded.assigned_at",
            params![
                group.gid,
                group.group_name,
                format_datetime(&group.created_at)
            ],
        )?;
        insert_members(&tx, group)?;

        tx.commit()?;
        Ok(())
    }

    fn get_group(&self, gid: Gid) -> Result<Option<Group>> {
        let conn = self.conn();
        let groups = load_groups(
            &conn,
            "SELECT gid, group_name, info, created_at, updated_at FROM groups WHERE gid = ?1",
            params![gid],
        )?;
        Ok(groups.into_iter().next())
    }

    fn get_group_by_name(&self, group_name: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        let groups = load_groups(
            &conn,
            "SELECT gid, group_name, info, created_at, updated_at FROM groups WHERE group_name = ?1",
            params![group_name],
        )?;
        Ok(groups.into_iter().next())
    }

    fn list_groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn();
        load_groups(
            &conn,
            "SELECT gid, group_name, info, created_at, updated_at FROM groups ORDER BY group_name",
            [],
        )
    }

    fn update_group(&self, group: &Group) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let clash: Option<Gid> = tx
            .query_row(
                "SELECT gid FROM groups WHERE group_name = ?1 AND gid != ?2",
                params![group.group_name, group.gid],
                |row| row.get(0),
            )
            .optional()?;
        if clash.is_some() {
            return Err(Error::AlreadyExists(group.group_name.clone()));
        }

        let rows = tx.execute(
            "UPDATE groups SET group_name = ?1, info = ?2, updated_at = ?3 WHERE gid = ?4",
            params![
                group.group_name,
                group.info,
                format_datetime(&group.updated_at),
                group.gid
            ],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }
        tx.execute(
            "UPDATE gid_history SET group_name = ?1 WHERE gid = ?2",
            params![group.group_name, group.gid],
        )?;
        tx.execute(
            "DELETE FROM group_members WHERE gid = ?1",
            params![group.gid],
        )?;
        insert_members(&tx, group)?;

        tx.commit()?;
        Ok(())
    }

    fn delete_group(&self, gid: Gid) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM groups WHERE gid = ?1", params![gid])?;
        Ok(rows > 0)
    }

    fn next_gid(&self) -> Result<Gid> {
        self.conn()
            .query_row(
                "SELECT COALESCE(MAX(gid) + 1, 0) FROM (
                     SELECT gid FROM gid_history UNION ALL SELECT gid FROM groups
                 )",
                [],
                |row| row.get(0),
            )
            .map_err(Error::from)
    }

    fn list_account_groups(&self, login_name: &str) -> Result<Vec<Group>> {
        let conn = self.conn();
        load_groups(
            &conn,
            "SELECT g.gid, g.group_name, g.info, g.created_at, g.updated_at
             FROM groups g JOIN group_members m ON m.gid = g.gid
             WHERE m.login_name = ?1 ORDER BY g.group_name",
            params![login_name],
        )
    }

    // Grant index

    fn apply_grant_update(&self, update: &GrantUpdate) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let tag = update.file_tag.as_str();
        let now = format_datetime(&Utc::now());

        tx.execute("DELETE FROM file_shares WHERE file_tag = ?1", params![tag])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO file_shares (file_tag, owner_uid, target_kind, target_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for target in &update.targets {
                stmt.execute(params![tag, update.owner_uid, target.kind(), target.id()])?;
            }
        }

        for viewer in &update.reflect {
            tx.execute(
                &format!(
                    "INSERT INTO reflected ({REFLECTION_COLUMNS}) VALUES (?1, ?2, ?3, 'uid', NULL, ?4)
                     ON CONFLICT(viewer_uid, file_tag) DO UPDATE SET
                        owner_uid = excluded.owner_uid, via = 'uid', via_gid = NULL,
                        created_at = excluded.created_at"
                ),
                params![viewer, tag, update.owner_uid, now],
            )?;
            tx.execute(
                "DELETE FROM hidden_shares WHERE viewer_uid = ?1 AND file_tag = ?2",
                params![viewer, tag],
            )?;
        }

        for viewer in &update.unreflect {
            tx.execute(
                "DELETE FROM reflected WHERE viewer_uid = ?1 AND file_tag = ?2 AND via = 'uid'",
                params![viewer, tag],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_file_shares(&self, file_tag: &FileTag) -> Result<()> {
        self.conn().execute(
            "DELETE FROM file_shares WHERE file_tag = ?1",
            params![file_tag.as_str()],
        )?;
        Ok(())
    }

    fn list_pool_grants(&self, viewer_uid: Uid, gids: &[Gid]) -> Result<Vec<PoolGrant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT file_tag, owner_uid, target_kind, target_id FROM file_shares
             WHERE owner_uid != ?1 AND target_kind IN ('gid', 'local')
             ORDER BY file_tag, target_kind, target_id",
        )?;
        let rows = stmt.query_map(params![viewer_uid], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Uid>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u64>(3)?,
            ))
        })?;

        let mut grants = Vec::new();
        for row in rows {
            let (tag, owner_uid, kind, id) = row?;
            let via = match kind.as_str() {
                "local" => GrantVia::Local,
                "gid" if gids.contains(&id) => GrantVia::Gid(id),
                _ => continue,
            };
            let Ok(file_tag) = FileTag::parse(&tag) else {
                tracing::error!("Malformed file tag in grant index: '{tag}'");
                continue;
            };
            grants.push(PoolGrant {
                file_tag,
                owner_uid,
                via,
            });
        }
        Ok(grants)
    }

    fn add_reflection(&self, reflection: &Reflection) -> Result<bool> {
        let rows = self.conn().execute(
            &format!(
                "INSERT OR IGNORE INTO reflected ({REFLECTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                reflection.viewer_uid,
                reflection.file_tag.as_str(),
                reflection.owner_uid,
                reflection.via.kind(),
                reflection.via.gid(),
                format_datetime(&reflection.created_at),
            ],
        )?;
        Ok(rows > 0)
    }

    fn get_reflection(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<Option<Reflection>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REFLECTION_COLUMNS} FROM reflected WHERE viewer_uid = ?1 AND file_tag = ?2"
                ),
                params![viewer_uid, file_tag.as_str()],
                row_to_reflection,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_reflections(&self, viewer_uid: Uid) -> Result<Vec<Reflection>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REFLECTION_COLUMNS} FROM reflected WHERE viewer_uid = ?1 ORDER BY file_tag"
        ))?;
        let rows = stmt.query_map(params![viewer_uid], row_to_reflection)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_reflection(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM reflected WHERE viewer_uid = ?1 AND file_tag = ?2",
            params![viewer_uid, file_tag.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn dismiss_share(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO hidden_shares (viewer_uid, file_tag) VALUES (?1, ?2)",
            params![viewer_uid, file_tag.as_str()],
        )?;
        tx.execute(
            "DELETE FROM reflected WHERE viewer_uid = ?1 AND file_tag = ?2",
            params![viewer_uid, file_tag.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn is_hidden(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<bool> {
        let hidden: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM hidden_shares WHERE viewer_uid = ?1 AND file_tag = ?2",
                params![viewer_uid, file_tag.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hidden.is_some())
    }

    fn purge_uid(&self, uid: Uid) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM file_shares WHERE owner_uid = ?1", params![uid])?;
        tx.execute(
            "DELETE FROM file_shares WHERE target_kind = 'uid' AND target_id = ?1",
            params![uid],
        )?;
        tx.execute(
            "DELETE FROM reflected WHERE viewer_uid = ?1 OR owner_uid = ?1",
            params![uid],
        )?;
        tx.execute(
            "DELETE FROM hidden_shares WHERE viewer_uid = ?1",
            params![uid],
        )?;
        tx.commit()?;
        Ok(())
    }
}

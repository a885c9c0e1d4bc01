//! Resource repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the lookup/insert primitives the creation services build on.
//! - Keep SQL details inside core persistence boundary.
//!
//! # Invariants
//! - The repository never opens, commits or rolls back transactions; the
//!   caller's scope owns that.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::resource::{Resource, ResourceId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const RESOURCE_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    content
FROM resources";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for resource persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
}

impl RepoError {
    /// Returns whether the store gave up waiting for a lock.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Db(err) => err.is_busy(),
            Self::InvalidData(_) => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted resource data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for resource storage.
pub trait ResourceRepository {
    /// Locking lookup by uniqueness key.
    ///
    /// Must run inside a scope that holds the store write lock
    /// (`LockMode::Exclusive`, or a `Joined` caller transaction begun as
    /// `Immediate`) or behind a global serializer; only then does a `None`
    /// stay true until the scope ends.
    fn find_by_name_for_update(&self, name: &str) -> RepoResult<Option<Resource>>;
    /// Plain lookup by uniqueness key, no locking guarantees.
    fn find_by_name(&self, name: &str) -> RepoResult<Option<Resource>>;
    fn exists_by_name(&self, name: &str) -> RepoResult<bool>;
    fn insert_resource(&self, resource: &Resource) -> RepoResult<ResourceId>;
    fn get_resource(&self, id: ResourceId) -> RepoResult<Option<Resource>>;
    fn count_resources(&self) -> RepoResult<u64>;
    /// Lists all resources ordered by name, then id.
    fn list_resources(&self) -> RepoResult<Vec<Resource>>;
}

/// SQLite-backed resource repository.
///
/// Works on a plain connection or on a transaction (via deref).
pub struct SqliteResourceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteResourceRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ResourceRepository for SqliteResourceRepository<'_> {
    fn find_by_name_for_update(&self, name: &str) -> RepoResult<Option<Resource>> {
        // SQLite has no `FOR UPDATE`: the exclusion comes from the enclosing
        // `BEGIN IMMEDIATE`, whose write lock covers every row and gap.
        self.find_by_name(name)
    }

    fn find_by_name(&self, name: &str) -> RepoResult<Option<Resource>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RESOURCE_SELECT_SQL}
             WHERE name = ?1
             ORDER BY created_at ASC, uuid ASC
             LIMIT 1;"
        ))?;

        let mut rows = stmt.query([name])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_resource_row(row)?));
        }

        Ok(None)
    }

    fn exists_by_name(&self, name: &str) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM resources
                WHERE name = ?1
            );",
            [name],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn insert_resource(&self, resource: &Resource) -> RepoResult<ResourceId> {
        self.conn.execute(
            "INSERT INTO resources (
                uuid,
                name,
                content
            ) VALUES (?1, ?2, ?3);",
            params![
                resource.id.to_string(),
                resource.name.as_str(),
                resource.content.as_str(),
            ],
        )?;

        Ok(resource.id)
    }

    fn get_resource(&self, id: ResourceId) -> RepoResult<Option<Resource>> {
        let resource = self
            .conn
            .query_row(
                &format!("{RESOURCE_SELECT_SQL} WHERE uuid = ?1;"),
                [id.to_string()],
                |row| Ok(parse_resource_row(row)),
            )
            .optional()?;

        resource.transpose()
    }

    fn count_resources(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM resources;", [], |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative resource count `{count}`")))
    }

    fn list_resources(&self) -> RepoResult<Vec<Resource>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RESOURCE_SELECT_SQL} ORDER BY name ASC, uuid ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut resources = Vec::new();

        while let Some(row) = rows.next()? {
            resources.push(parse_resource_row(row)?);
        }

        Ok(resources)
    }
}

fn parse_resource_row(row: &Row<'_>) -> RepoResult<Resource> {
    let uuid_text: String = row.get("uuid")?;
    let id = Uuid::parse_str(&uuid_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{uuid_text}` in resources.uuid"))
    })?;

    Ok(Resource::with_id(id, row.get::<_, String>("name")?, row.get::<_, String>("content")?))
}

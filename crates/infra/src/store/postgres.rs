//! Postgres-backed portal store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | DomainError |
//! |------------|-----------------|-------------|
//! | Database (unique violation) | `23505` | `Conflict { field }` (field derived from the constraint name) |
//! | Database (foreign key violation) | `23503` | `InvariantViolation` |
//! | Database (other) | any | `StoreUnavailable` |
//! | PoolClosed / PoolTimedOut / Io / Tls | N/A | `StoreUnavailable` |
//! | Decode / ColumnNotFound | N/A | `InvariantViolation` |
//!
//! ## Atomicity
//!
//! Each mutating method runs in one transaction. Checks that must agree with
//! the write (uniqueness, referenced rows, share targets) run inside that
//! transaction; the unique constraints remain the final word under races.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use portal_audit::{AuditLog, NewAuditEntry};
use portal_auth::{NewRole, NewUser, Role, RoleChanges, User, UserChanges, parse_permissions};
use portal_core::{
    AuditLogId, DomainError, DomainResult, FileId, OrganizationId, Page, RoleId, UserId,
};
use portal_files::{FileAsset, FileShare, NewFileAsset};
use portal_members::{NewOrganization, Organization, OrganizationChanges};

use super::{PortalStore, dedup_targets};

/// Table definitions created by [`PostgresPortalStore::ensure_schema`].
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id                 BIGSERIAL PRIMARY KEY,
        name               TEXT NOT NULL,
        description        TEXT,
        api_key            TEXT,
        security_server_ip TEXT,
        CONSTRAINT organizations_name_key UNIQUE (name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id          BIGSERIAL PRIMARY KEY,
        name        TEXT NOT NULL,
        description TEXT,
        permissions TEXT[] NOT NULL DEFAULT '{}',
        CONSTRAINT roles_name_key UNIQUE (name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id              BIGSERIAL PRIMARY KEY,
        username        TEXT NOT NULL,
        email           TEXT NOT NULL,
        full_name       TEXT,
        password_hash   TEXT NOT NULL,
        is_active       BOOLEAN NOT NULL DEFAULT TRUE,
        organization_id BIGINT REFERENCES organizations (id),
        CONSTRAINT users_username_key UNIQUE (username),
        CONSTRAINT users_email_key UNIQUE (email)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        user_id BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        role_id BIGINT NOT NULL REFERENCES roles (id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id              BIGSERIAL PRIMARY KEY,
        stored_name     TEXT NOT NULL,
        original_name   TEXT NOT NULL,
        location        TEXT NOT NULL,
        size_bytes      BIGINT NOT NULL CHECK (size_bytes >= 0),
        checksum        TEXT NOT NULL,
        owner_id        BIGINT NOT NULL REFERENCES users (id),
        organization_id BIGINT NOT NULL REFERENCES organizations (id),
        uploaded_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_shares (
        file_id         BIGINT NOT NULL REFERENCES files (id) ON DELETE CASCADE,
        organization_id BIGINT NOT NULL REFERENCES organizations (id) ON DELETE CASCADE,
        granted_by      BIGINT NOT NULL,
        granted_at      TIMESTAMPTZ NOT NULL,
        CONSTRAINT file_shares_pkey PRIMARY KEY (file_id, organization_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id          BIGSERIAL PRIMARY KEY,
        actor_id    BIGINT,
        action      TEXT NOT NULL,
        target_type TEXT NOT NULL,
        target_id   BIGINT,
        details     TEXT,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS audit_logs_created_at_idx ON audit_logs (created_at DESC, id DESC)",
    "CREATE INDEX IF NOT EXISTS file_shares_organization_idx ON file_shares (organization_id)",
];

const USER_SELECT: &str = r#"
    SELECT
        u.id,
        u.username,
        u.email,
        u.full_name,
        u.password_hash,
        u.is_active,
        u.organization_id,
        ARRAY(SELECT ur.role_id FROM user_roles ur WHERE ur.user_id = u.id ORDER BY ur.role_id) AS role_ids
    FROM users u
"#;

const FILE_COLUMNS: &str = "f.id, f.stored_name, f.original_name, f.location, f.size_bytes, \
     f.checksum, f.owner_id, f.organization_id, f.uploaded_at";

/// Postgres-backed portal store.
///
/// `Send + Sync`; the SQLx pool handles connection sharing.
#[derive(Debug, Clone)]
pub struct PostgresPortalStore {
    pool: Arc<PgPool>,
}

impl PostgresPortalStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and make sure the tables exist.
    pub async fn connect(database_url: &str) -> DomainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create missing tables and indexes. Not a migration tool.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> DomainResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn begin(&self) -> DomainResult<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn load_user(
        tx: &mut Transaction<'_, Postgres>,
        id: UserId,
    ) -> DomainResult<Option<User>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE u.id = $1"))
            .bind(id.get())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("load_user", e))?;
        row.map(|r| decode::<UserRow>(&r).and_then(User::try_from)).transpose()
    }

    async fn load_role(
        tx: &mut Transaction<'_, Postgres>,
        id: RoleId,
    ) -> DomainResult<Option<Role>> {
        let row = sqlx::query("SELECT id, name, description, permissions FROM roles WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("load_role", e))?;
        row.map(|r| decode::<RoleRow>(&r).and_then(Role::try_from)).transpose()
    }

    async fn load_organization(
        tx: &mut Transaction<'_, Postgres>,
        id: OrganizationId,
    ) -> DomainResult<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, description, api_key, security_server_ip FROM organizations WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_organization", e))?;
        row.map(|r| decode::<OrganizationRow>(&r).map(Organization::from))
            .transpose()
    }

    async fn exists(
        tx: &mut Transaction<'_, Postgres>,
        sql: &str,
        id: i64,
    ) -> DomainResult<bool> {
        sqlx::query_scalar::<_, bool>(sql)
            .bind(id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("exists", e))
    }

    async fn existing_ids(
        tx: &mut Transaction<'_, Postgres>,
        table: &'static str,
        ids: &[i64],
    ) -> DomainResult<BTreeSet<i64>> {
        let found: Vec<i64> = sqlx::query_scalar(&format!(
            "SELECT id FROM {table} WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("existing_ids", e))?;
        Ok(found.into_iter().collect())
    }

    async fn require_roles(
        tx: &mut Transaction<'_, Postgres>,
        ids: &BTreeSet<RoleId>,
    ) -> DomainResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw: Vec<i64> = ids.iter().map(RoleId::get).collect();
        let found = Self::existing_ids(tx, "roles", &raw).await?;
        match raw.iter().find(|id| !found.contains(id)) {
            Some(missing) => Err(DomainError::missing::<Role>(RoleId::new(*missing))),
            None => Ok(()),
        }
    }

    async fn require_organization(
        tx: &mut Transaction<'_, Postgres>,
        id: Option<OrganizationId>,
    ) -> DomainResult<()> {
        let Some(id) = id else {
            return Ok(());
        };
        let exists = Self::exists(
            tx,
            "SELECT EXISTS (SELECT 1 FROM organizations WHERE id = $1)",
            id.get(),
        )
        .await?;
        if exists {
            Ok(())
        } else {
            Err(DomainError::UnknownOrganization { id })
        }
    }

    async fn set_user_roles(
        tx: &mut Transaction<'_, Postgres>,
        user: UserId,
        roles: &BTreeSet<RoleId>,
    ) -> DomainResult<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user.get())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("clear_user_roles", e))?;
        for role in roles {
            sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
                .bind(user.get())
                .bind(role.get())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("insert_user_role", e))?;
        }
        Ok(())
    }

    async fn commit(tx: Transaction<'_, Postgres>) -> DomainResult<()> {
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl PortalStore for PostgresPortalStore {
    async fn get_user(&self, id: UserId) -> DomainResult<Option<User>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE u.id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.map(|r| decode::<UserRow>(&r).and_then(User::try_from)).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> DomainResult<Option<User>> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE u.username = $1"))
            .bind(username)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_username", e))?;
        row.map(|r| decode::<UserRow>(&r).and_then(User::try_from)).transpose()
    }

    async fn list_users(&self, page: Page) -> DomainResult<Vec<User>> {
        let (offset, limit) = window(page);
        let rows = sqlx::query(&format!("{USER_SELECT} ORDER BY u.id OFFSET $1 LIMIT $2"))
            .bind(offset)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;
        rows.iter()
            .map(|r| decode::<UserRow>(r).and_then(User::try_from))
            .collect()
    }

    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn create_user(&self, user: NewUser) -> DomainResult<User> {
        let mut tx = self.begin().await?;

        let username_taken: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
                .bind(&user.username)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_username", e))?;
        if username_taken {
            return Err(DomainError::conflict("username"));
        }
        let email_taken: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
                .bind(&user.email)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_email", e))?;
        if email_taken {
            return Err(DomainError::conflict("email"));
        }
        Self::require_roles(&mut tx, &user.role_ids).await?;
        Self::require_organization(&mut tx, user.organization_id).await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, email, full_name, password_hash, is_active, organization_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.organization_id.map(|o| o.get()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        let id = UserId::new(id);

        Self::set_user_roles(&mut tx, id, &user.role_ids).await?;
        let created = Self::load_user(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::invariant("inserted user vanished"))?;
        Self::commit(tx).await?;
        Ok(created)
    }

    #[instrument(skip(self, changes), err)]
    async fn update_user(&self, id: UserId, changes: UserChanges) -> DomainResult<User> {
        let mut tx = self.begin().await?;
        let mut user = Self::load_user(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::missing::<User>(id))?;

        if let Some(email) = &changes.email {
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND id <> $2)",
            )
            .bind(email)
            .bind(id.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_email", e))?;
            if taken {
                return Err(DomainError::conflict("email"));
            }
        }
        if let Some(role_ids) = &changes.role_ids {
            Self::require_roles(&mut tx, role_ids).await?;
        }
        Self::require_organization(&mut tx, changes.organization_id).await?;

        changes.apply_to(&mut user);
        sqlx::query(
            r#"
            UPDATE users
            SET email = $2, full_name = $3, password_hash = $4, is_active = $5, organization_id = $6
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.organization_id.map(|o| o.get()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        if let Some(role_ids) = &changes.role_ids {
            Self::set_user_roles(&mut tx, id, role_ids).await?;
        }
        Self::commit(tx).await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn delete_user(&self, id: UserId) -> DomainResult<User> {
        let mut tx = self.begin().await?;
        let user = Self::load_user(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::missing::<User>(id))?;
        let owns_files = Self::exists(
            &mut tx,
            "SELECT EXISTS (SELECT 1 FROM files WHERE owner_id = $1)",
            id.get(),
        )
        .await?;
        if owns_files {
            return Err(DomainError::conflict("files"));
        }
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Self::commit(tx).await?;
        Ok(user)
    }

    async fn get_role(&self, id: RoleId) -> DomainResult<Option<Role>> {
        let row = sqlx::query("SELECT id, name, description, permissions FROM roles WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        row.map(|r| decode::<RoleRow>(&r).and_then(Role::try_from)).transpose()
    }

    async fn find_role_by_name(&self, name: &str) -> DomainResult<Option<Role>> {
        let row =
            sqlx::query("SELECT id, name, description, permissions FROM roles WHERE name = $1")
                .bind(name)
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("find_role_by_name", e))?;
        row.map(|r| decode::<RoleRow>(&r).and_then(Role::try_from)).transpose()
    }

    async fn roles_by_ids(&self, ids: &BTreeSet<RoleId>) -> DomainResult<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<i64> = ids.iter().map(RoleId::get).collect();
        let rows = sqlx::query(
            "SELECT id, name, description, permissions FROM roles WHERE id = ANY($1) ORDER BY id",
        )
        .bind(&raw)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("roles_by_ids", e))?;
        rows.iter()
            .map(|r| decode::<RoleRow>(r).and_then(Role::try_from))
            .collect()
    }

    async fn list_roles(&self, page: Page) -> DomainResult<Vec<Role>> {
        let (offset, limit) = window(page);
        let rows = sqlx::query(
            "SELECT id, name, description, permissions FROM roles ORDER BY id OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter()
            .map(|r| decode::<RoleRow>(r).and_then(Role::try_from))
            .collect()
    }

    #[instrument(skip(self, role), fields(name = %role.name), err)]
    async fn create_role(&self, role: NewRole) -> DomainResult<Role> {
        let row = sqlx::query(
            r#"
            INSERT INTO roles (name, description, permissions)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, permissions
            "#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(permission_strings(&role))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        decode::<RoleRow>(&row).and_then(Role::try_from)
    }

    #[instrument(skip(self, changes), err)]
    async fn update_role(&self, id: RoleId, changes: RoleChanges) -> DomainResult<Role> {
        let mut tx = self.begin().await?;
        let mut role = Self::load_role(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::missing::<Role>(id))?;
        changes.apply_to(&mut role);

        let permissions: Vec<String> = role
            .permissions
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        sqlx::query("UPDATE roles SET description = $2, permissions = $3 WHERE id = $1")
            .bind(id.get())
            .bind(&role.description)
            .bind(permissions)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;
        Self::commit(tx).await?;
        Ok(role)
    }

    #[instrument(skip(self, role), fields(name = %role.name), err)]
    async fn upsert_role(&self, role: NewRole) -> DomainResult<Role> {
        let row = sqlx::query(
            r#"
            INSERT INTO roles (name, description, permissions)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT roles_name_key
            DO UPDATE SET description = EXCLUDED.description, permissions = EXCLUDED.permissions
            RETURNING id, name, description, permissions
            "#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(permission_strings(&role))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_role", e))?;
        decode::<RoleRow>(&row).and_then(Role::try_from)
    }

    #[instrument(skip(self), err)]
    async fn delete_role(&self, id: RoleId) -> DomainResult<Role> {
        let mut tx = self.begin().await?;
        let role = Self::load_role(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::missing::<Role>(id))?;
        // user_roles rows go with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        Self::commit(tx).await?;
        Ok(role)
    }

    async fn get_organization(&self, id: OrganizationId) -> DomainResult<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, description, api_key, security_server_ip FROM organizations WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_organization", e))?;
        row.map(|r| decode::<OrganizationRow>(&r).map(Organization::from))
            .transpose()
    }

    async fn list_organizations(&self, page: Page) -> DomainResult<Vec<Organization>> {
        let (offset, limit) = window(page);
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, api_key, security_server_ip
            FROM organizations
            ORDER BY id
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_organizations", e))?;
        rows.iter()
            .map(|r| decode::<OrganizationRow>(r).map(Organization::from))
            .collect()
    }

    #[instrument(skip(self, org), fields(name = %org.name), err)]
    async fn create_organization(&self, org: NewOrganization) -> DomainResult<Organization> {
        let row = sqlx::query(
            r#"
            INSERT INTO organizations (name, description, api_key, security_server_ip)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, api_key, security_server_ip
            "#,
        )
        .bind(&org.name)
        .bind(&org.description)
        .bind(&org.api_key)
        .bind(&org.security_server_ip)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_organization", e))?;
        decode::<OrganizationRow>(&row).map(Organization::from)
    }

    #[instrument(skip(self, changes), err)]
    async fn update_organization(
        &self,
        id: OrganizationId,
        changes: OrganizationChanges,
    ) -> DomainResult<Organization> {
        let mut tx = self.begin().await?;
        let mut org = Self::load_organization(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::missing::<Organization>(id))?;
        changes.apply_to(&mut org);

        sqlx::query(
            r#"
            UPDATE organizations
            SET name = $2, description = $3, api_key = $4, security_server_ip = $5
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(&org.name)
        .bind(&org.description)
        .bind(&org.api_key)
        .bind(&org.security_server_ip)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_organization", e))?;
        Self::commit(tx).await?;
        Ok(org)
    }

    #[instrument(skip(self), err)]
    async fn delete_organization(&self, id: OrganizationId) -> DomainResult<Organization> {
        let mut tx = self.begin().await?;
        let org = Self::load_organization(&mut tx, id)
            .await?
            .ok_or_else(|| DomainError::missing::<Organization>(id))?;

        let has_users = Self::exists(
            &mut tx,
            "SELECT EXISTS (SELECT 1 FROM users WHERE organization_id = $1)",
            id.get(),
        )
        .await?;
        if has_users {
            return Err(DomainError::conflict("users"));
        }
        let has_files = Self::exists(
            &mut tx,
            "SELECT EXISTS (SELECT 1 FROM files WHERE organization_id = $1)",
            id.get(),
        )
        .await?;
        if has_files {
            return Err(DomainError::conflict("files"));
        }

        // grants targeting it go with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_organization", e))?;
        Self::commit(tx).await?;
        Ok(org)
    }

    async fn get_file(&self, id: FileId) -> DomainResult<Option<FileAsset>> {
        let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM files f WHERE f.id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_file", e))?;
        row.map(|r| decode::<FileRow>(&r).and_then(FileAsset::try_from)).transpose()
    }

    async fn files_visible_to(&self, org: OrganizationId) -> DomainResult<Vec<FileAsset>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {FILE_COLUMNS}
            FROM files f
            WHERE f.organization_id = $1
               OR EXISTS (
                   SELECT 1 FROM file_shares s
                   WHERE s.file_id = f.id AND s.organization_id = $1
               )
            ORDER BY f.id
            "#
        ))
        .bind(org.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("files_visible_to", e))?;
        rows.iter()
            .map(|r| decode::<FileRow>(r).and_then(FileAsset::try_from))
            .collect()
    }

    #[instrument(skip(self, file), fields(owner_id = %file.owner_id), err)]
    async fn create_file(&self, file: NewFileAsset) -> DomainResult<FileAsset> {
        let size = i64::try_from(file.size_bytes)
            .map_err(|_| DomainError::validation("file is too large"))?;
        let mut tx = self.begin().await?;
        let owner_exists = Self::exists(
            &mut tx,
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)",
            file.owner_id.get(),
        )
        .await?;
        if !owner_exists {
            return Err(DomainError::missing::<User>(file.owner_id));
        }
        Self::require_organization(&mut tx, Some(file.organization_id)).await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO files AS f (
                stored_name, original_name, location, size_bytes, checksum,
                owner_id, organization_id, uploaded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(&file.stored_name)
        .bind(&file.original_name)
        .bind(&file.location)
        .bind(size)
        .bind(&file.checksum)
        .bind(file.owner_id.get())
        .bind(file.organization_id.get())
        .bind(file.uploaded_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_file", e))?;
        let created = decode::<FileRow>(&row).and_then(FileAsset::try_from)?;
        Self::commit(tx).await?;
        Ok(created)
    }

    #[instrument(skip(self), err)]
    async fn delete_file(&self, id: FileId) -> DomainResult<FileAsset> {
        // file_shares rows go with it (ON DELETE CASCADE)
        let row = sqlx::query(&format!(
            "DELETE FROM files f WHERE f.id = $1 RETURNING {FILE_COLUMNS}"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_file", e))?;
        match row {
            Some(r) => decode::<FileRow>(&r).and_then(FileAsset::try_from),
            None => Err(DomainError::missing::<FileAsset>(id)),
        }
    }

    async fn shares_for_file(&self, id: FileId) -> DomainResult<Vec<FileShare>> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, organization_id, granted_by, granted_at
            FROM file_shares
            WHERE file_id = $1
            ORDER BY organization_id
            "#,
        )
        .bind(id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("shares_for_file", e))?;
        rows.iter()
            .map(|r| decode::<ShareRow>(r).map(FileShare::from))
            .collect()
    }

    #[instrument(skip(self, targets), fields(target_count = targets.len()), err)]
    async fn replace_shares(
        &self,
        id: FileId,
        targets: &[OrganizationId],
        granted_by: UserId,
        granted_at: DateTime<Utc>,
    ) -> DomainResult<Vec<FileShare>> {
        let mut tx = self.begin().await?;

        // Row lock serializes concurrent replacements of the same file's grants.
        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_file", e))?;
        if locked.is_none() {
            return Err(DomainError::missing::<FileAsset>(id));
        }

        let targets = dedup_targets(targets);
        let raw: Vec<i64> = targets.iter().map(OrganizationId::get).collect();
        let found = Self::existing_ids(&mut tx, "organizations", &raw).await?;
        if let Some(unknown) = targets.iter().find(|t| !found.contains(&t.get())) {
            return Err(DomainError::UnknownOrganization { id: *unknown });
        }

        sqlx::query("DELETE FROM file_shares WHERE file_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_shares", e))?;

        let grants = FileShare::grant_all(id, &targets.into_iter().collect(), granted_by, granted_at);
        for grant in &grants {
            sqlx::query(
                r#"
                INSERT INTO file_shares (file_id, organization_id, granted_by, granted_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(grant.file_id.get())
            .bind(grant.organization_id.get())
            .bind(grant.granted_by.get())
            .bind(grant.granted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_share", e))?;
        }

        Self::commit(tx).await?;
        Ok(grants)
    }

    #[instrument(skip(self), err)]
    async fn revoke_shares(&self, id: FileId) -> DomainResult<()> {
        let mut tx = self.begin().await?;
        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_file", e))?;
        if locked.is_none() {
            return Err(DomainError::missing::<FileAsset>(id));
        }

        sqlx::query("DELETE FROM file_shares WHERE file_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_shares", e))?;
        Self::commit(tx).await
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> DomainResult<AuditLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO audit_logs (actor_id, action, target_type, target_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, actor_id, action, target_type, target_id, details, created_at
            "#,
        )
        .bind(entry.actor_id.map(|a| a.get()))
        .bind(entry.action.as_str())
        .bind(entry.target_type.as_str())
        .bind(entry.target_id)
        .bind(&entry.details)
        .bind(entry.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        decode::<AuditRow>(&row).and_then(AuditLog::try_from)
    }

    async fn list_audit(&self, page: Page) -> DomainResult<Vec<AuditLog>> {
        let (offset, limit) = window(page);
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, action, target_type, target_id, details, created_at
            FROM audit_logs
            ORDER BY created_at DESC, id DESC
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audit", e))?;
        rows.iter()
            .map(|r| decode::<AuditRow>(r).and_then(AuditLog::try_from))
            .collect()
    }
}

fn window(page: Page) -> (i64, i64) {
    let page = Page::new(page.skip, page.limit);
    (
        i64::try_from(page.skip).unwrap_or(i64::MAX),
        i64::try_from(page.limit).unwrap_or(i64::MAX),
    )
}

fn permission_strings(role: &NewRole) -> Vec<String> {
    role.permissions
        .iter()
        .map(|p| p.as_str().to_string())
        .collect()
}

fn decode<'r, T: FromRow<'r, PgRow>>(row: &'r PgRow) -> DomainResult<T> {
    T::from_row(row).map_err(|e| DomainError::invariant(format!("failed to decode row: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

struct UserRow {
    id: i64,
    username: String,
    email: String,
    full_name: Option<String>,
    password_hash: String,
    is_active: bool,
    organization_id: Option<i64>,
    role_ids: Vec<i64>,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            password_hash: row.try_get("password_hash")?,
            is_active: row.try_get("is_active")?,
            organization_id: row.try_get("organization_id")?,
            role_ids: row.try_get("role_ids")?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = DomainError;

    fn try_from(row: UserRow) -> DomainResult<Self> {
        Ok(User {
            id: UserId::new(row.id),
            username: row.username,
            email: row.email,
            full_name: row.full_name,
            password_hash: row.password_hash,
            is_active: row.is_active,
            organization_id: row.organization_id.map(OrganizationId::new),
            role_ids: row.role_ids.into_iter().map(RoleId::new).collect(),
        })
    }
}

struct RoleRow {
    id: i64,
    name: String,
    description: Option<String>,
    permissions: Vec<String>,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            permissions: row.try_get("permissions")?,
        })
    }
}

impl TryFrom<RoleRow> for Role {
    type Error = DomainError;

    fn try_from(row: RoleRow) -> DomainResult<Self> {
        let permissions = parse_permissions(&row.permissions)
            .map_err(|e| DomainError::invariant(format!("role {}: {e}", row.id)))?;
        Ok(Role {
            id: RoleId::new(row.id),
            name: row.name,
            description: row.description,
            permissions,
        })
    }
}

struct OrganizationRow {
    id: i64,
    name: String,
    description: Option<String>,
    api_key: Option<String>,
    security_server_ip: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for OrganizationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrganizationRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            api_key: row.try_get("api_key")?,
            security_server_ip: row.try_get("security_server_ip")?,
        })
    }
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: OrganizationId::new(row.id),
            name: row.name,
            description: row.description,
            api_key: row.api_key,
            security_server_ip: row.security_server_ip,
        }
    }
}

struct FileRow {
    id: i64,
    stored_name: String,
    original_name: String,
    location: String,
    size_bytes: i64,
    checksum: String,
    owner_id: i64,
    organization_id: i64,
    uploaded_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for FileRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(FileRow {
            id: row.try_get("id")?,
            stored_name: row.try_get("stored_name")?,
            original_name: row.try_get("original_name")?,
            location: row.try_get("location")?,
            size_bytes: row.try_get("size_bytes")?,
            checksum: row.try_get("checksum")?,
            owner_id: row.try_get("owner_id")?,
            organization_id: row.try_get("organization_id")?,
            uploaded_at: row.try_get("uploaded_at")?,
        })
    }
}

impl TryFrom<FileRow> for FileAsset {
    type Error = DomainError;

    fn try_from(row: FileRow) -> DomainResult<Self> {
        let size_bytes = u64::try_from(row.size_bytes)
            .map_err(|_| DomainError::invariant(format!("file {} has negative size", row.id)))?;
        Ok(FileAsset {
            id: FileId::new(row.id),
            stored_name: row.stored_name,
            original_name: row.original_name,
            location: row.location,
            size_bytes,
            checksum: row.checksum,
            owner_id: UserId::new(row.owner_id),
            organization_id: OrganizationId::new(row.organization_id),
            uploaded_at: row.uploaded_at,
        })
    }
}

struct ShareRow {
    file_id: i64,
    organization_id: i64,
    granted_by: i64,
    granted_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ShareRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ShareRow {
            file_id: row.try_get("file_id")?,
            organization_id: row.try_get("organization_id")?,
            granted_by: row.try_get("granted_by")?,
            granted_at: row.try_get("granted_at")?,
        })
    }
}

impl From<ShareRow> for FileShare {
    fn from(row: ShareRow) -> Self {
        FileShare {
            file_id: FileId::new(row.file_id),
            organization_id: OrganizationId::new(row.organization_id),
            granted_by: UserId::new(row.granted_by),
            granted_at: row.granted_at,
        }
    }
}

struct AuditRow {
    id: i64,
    actor_id: Option<i64>,
    action: String,
    target_type: String,
    target_id: Option<i64>,
    details: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AuditRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditRow {
            id: row.try_get("id")?,
            actor_id: row.try_get("actor_id")?,
            action: row.try_get("action")?,
            target_type: row.try_get("target_type")?,
            target_id: row.try_get("target_id")?,
            details: row.try_get("details")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<AuditRow> for AuditLog {
    type Error = DomainError;

    fn try_from(row: AuditRow) -> DomainResult<Self> {
        Ok(AuditLog {
            id: AuditLogId::new(row.id),
            actor_id: row.actor_id.map(UserId::new),
            action: row
                .action
                .parse()
                .map_err(|e| DomainError::invariant(format!("audit log {}: {e}", row.id)))?,
            target_type: row
                .target_type
                .parse()
                .map_err(|e| DomainError::invariant(format!("audit log {}: {e}", row.id)))?,
            target_id: row.target_id,
            details: row.details,
            created_at: row.created_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DomainError::conflict(conflict_field(db_err.constraint())),
                Some("23503") => DomainError::invariant(msg),
                _ => DomainError::store_unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            DomainError::store_unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => DomainError::store_unavailable(format!("I/O error in {operation}: {e}")),
        sqlx::Error::Tls(e) => DomainError::store_unavailable(format!("TLS error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => {
            DomainError::invariant(format!("unexpected result shape in {operation}: {err}"))
        }
        _ => DomainError::store_unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

/// Unique field behind a violated constraint.
fn conflict_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_username_key") => "username",
        Some("users_email_key") => "email",
        Some("roles_name_key") | Some("organizations_name_key") => "name",
        Some("file_shares_pkey") => "share",
        _ => "record",
    }
}

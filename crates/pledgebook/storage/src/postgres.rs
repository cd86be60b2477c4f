//! PostgreSQL adapter for the pledgebook repository.
//!
//! This adapter is the transactional source-of-truth backend. Every pledge
//! write is an `UPDATE ... WHERE version = $expected`; the row lock taken by
//! that update serializes concurrent payments on one pledge, and a stale
//! writer sees zero affected rows and gets `Conflict`.

use crate::model::{DeleteOutcome, PledgeFilter};
use crate::traits::{CashbookStore, DirectoryStore, MembershipStore, PledgeStore};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use pledgebook_types::{
    Committee, CommitteeId, CommitteeMembership, DateRange, Expense, ExpenseId, Member, MemberId,
    OrgMembership, Offering, OfferingId, Organization, OrganizationId, ParseEnumError, Payment,
    PaymentId, Pledge, PledgeId, Project, ProjectId, UserId,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::str::FromStr;

const PLEDGE_COLUMNS: &str = "id, organization_id, member_id, committee_id, project_id, purpose, \
     total_amount, collected_amount, due_date, state, version, created_by, last_updated_by, \
     created_at, updated_at";

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Unavailable(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS pb_organizations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_committees (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL REFERENCES pb_organizations(id),
                name TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_members (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL REFERENCES pb_organizations(id),
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                status TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_projects (
                id TEXT PRIMARY KEY,
                committee_id TEXT NOT NULL REFERENCES pb_committees(id),
                name TEXT NOT NULL,
                description TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_org_memberships (
                user_id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL REFERENCES pb_organizations(id),
                role TEXT NOT NULL,
                status TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_committee_memberships (
                user_id TEXT NOT NULL,
                committee_id TEXT NOT NULL REFERENCES pb_committees(id),
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (user_id, committee_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_pledges (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                member_id TEXT NOT NULL REFERENCES pb_members(id),
                committee_id TEXT REFERENCES pb_committees(id),
                project_id TEXT REFERENCES pb_projects(id),
                purpose TEXT NOT NULL,
                total_amount NUMERIC NOT NULL CHECK (total_amount > 0),
                collected_amount NUMERIC NOT NULL,
                due_date DATE NOT NULL,
                state TEXT NOT NULL,
                version BIGINT NOT NULL,
                created_by TEXT NOT NULL,
                last_updated_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                CHECK (collected_amount >= 0 AND collected_amount <= total_amount)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_payments (
                id TEXT PRIMARY KEY,
                pledge_id TEXT NOT NULL REFERENCES pb_pledges(id) ON DELETE RESTRICT,
                amount NUMERIC NOT NULL CHECK (amount > 0),
                payment_date DATE NOT NULL,
                method TEXT NOT NULL,
                note TEXT,
                registered_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_offerings (
                id TEXT PRIMARY KEY,
                committee_id TEXT NOT NULL REFERENCES pb_committees(id),
                project_id TEXT,
                amount NUMERIC NOT NULL CHECK (amount > 0),
                date DATE NOT NULL,
                concept TEXT NOT NULL,
                registered_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS pb_expenses (
                id TEXT PRIMARY KEY,
                committee_id TEXT NOT NULL REFERENCES pb_committees(id),
                project_id TEXT,
                amount NUMERIC NOT NULL CHECK (amount > 0),
                date DATE NOT NULL,
                category TEXT NOT NULL,
                concept TEXT,
                registered_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS pb_payments_pledge_idx ON pb_payments (pledge_id)",
            "CREATE INDEX IF NOT EXISTS pb_pledges_committee_idx ON pb_pledges (committee_id)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    /// Distinguish "gone" from "someone else wrote first" after a guarded update missed.
    async fn missed_update(&self, id: &PledgeId, expected_version: u64) -> StorageError {
        let row = sqlx::query("SELECT version FROM pb_pledges WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(Some(row)) => match col::<i64>(&row, "version") {
                Ok(version) => StorageError::Conflict(format!(
                    "pledge {} is at version {}, expected {}",
                    id, version, expected_version
                )),
                Err(err) => err,
            },
            Ok(None) => StorageError::NotFound(format!("pledge {} not found", id)),
            Err(err) => map_sqlx_error(err),
        }
    }
}

#[async_trait]
impl DirectoryStore for PostgresRepository {
    async fn insert_organization(&self, organization: Organization) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO pb_organizations (id, name, slug, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(organization.id.0)
        .bind(organization.name)
        .bind(organization.slug)
        .bind(organization.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_organization(&self, id: &OrganizationId) -> StorageResult<Option<Organization>> {
        let row = sqlx::query("SELECT id, name, slug, created_at FROM pb_organizations WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(Organization {
                id: OrganizationId(col(&row, "id")?),
                name: col(&row, "name")?,
                slug: col(&row, "slug")?,
                created_at: col(&row, "created_at")?,
            })
        })
        .transpose()
    }

    async fn upsert_committee(&self, committee: Committee) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pb_committees (id, organization_id, name, description, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                status = EXCLUDED.status
            "#,
        )
        .bind(committee.id.0)
        .bind(committee.organization_id.0)
        .bind(committee.name)
        .bind(committee.description)
        .bind(committee.status.as_str())
        .bind(committee.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_committee(&self, id: &CommitteeId) -> StorageResult<Option<Committee>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, description, status, created_at
              FROM pb_committees
             WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(Committee {
                id: CommitteeId(col(&row, "id")?),
                organization_id: OrganizationId(col(&row, "organization_id")?),
                name: col(&row, "name")?,
                description: col(&row, "description")?,
                status: parse_enum(col(&row, "status")?)?,
                created_at: col(&row, "created_at")?,
            })
        })
        .transpose()
    }

    async fn upsert_member(&self, member: Member) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pb_members (id, organization_id, first_name, last_name, email, phone, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                status = EXCLUDED.status
            "#,
        )
        .bind(member.id.0)
        .bind(member.organization_id.0)
        .bind(member.first_name)
        .bind(member.last_name)
        .bind(member.email)
        .bind(member.phone)
        .bind(member.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_member(&self, id: &MemberId) -> StorageResult<Option<Member>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, first_name, last_name, email, phone, status
              FROM pb_members
             WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(Member {
                id: MemberId(col(&row, "id")?),
                organization_id: OrganizationId(col(&row, "organization_id")?),
                first_name: col(&row, "first_name")?,
                last_name: col(&row, "last_name")?,
                email: col(&row, "email")?,
                phone: col(&row, "phone")?,
                status: parse_enum(col(&row, "status")?)?,
            })
        })
        .transpose()
    }

    async fn upsert_project(&self, project: Project) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pb_projects (id, committee_id, name, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description
            "#,
        )
        .bind(project.id.0)
        .bind(project.committee_id.0)
        .bind(project.name)
        .bind(project.description)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> StorageResult<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, committee_id, name, description FROM pb_projects WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(Project {
                id: ProjectId(col(&row, "id")?),
                committee_id: CommitteeId(col(&row, "committee_id")?),
                name: col(&row, "name")?,
                description: col(&row, "description")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl MembershipStore for PostgresRepository {
    async fn upsert_org_membership(&self, membership: OrgMembership) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pb_org_memberships (user_id, organization_id, role, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                role = EXCLUDED.role,
                status = EXCLUDED.status
            "#,
        )
        .bind(membership.user_id.0)
        .bind(membership.organization_id.0)
        .bind(membership.role.as_str())
        .bind(membership.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_org_membership(&self, user_id: &UserId) -> StorageResult<Option<OrgMembership>> {
        let row = sqlx::query(
            "SELECT user_id, organization_id, role, status FROM pb_org_memberships WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(OrgMembership {
                organization_id: OrganizationId(col(&row, "organization_id")?),
                user_id: UserId(col(&row, "user_id")?),
                role: parse_enum(col(&row, "role")?)?,
                status: parse_enum(col(&row, "status")?)?,
            })
        })
        .transpose()
    }

    async fn upsert_committee_membership(
        &self,
        membership: CommitteeMembership,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pb_committee_memberships (user_id, committee_id, role, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, committee_id) DO UPDATE SET
                role = EXCLUDED.role,
                status = EXCLUDED.status
            "#,
        )
        .bind(membership.user_id.0)
        .bind(membership.committee_id.0)
        .bind(membership.role.as_str())
        .bind(membership.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_committee_membership(
        &self,
        user_id: &UserId,
        committee_id: &CommitteeId,
    ) -> StorageResult<Option<CommitteeMembership>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, committee_id, role, status
              FROM pb_committee_memberships
             WHERE user_id = $1 AND committee_id = $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(committee_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(CommitteeMembership {
                committee_id: CommitteeId(col(&row, "committee_id")?),
                user_id: UserId(col(&row, "user_id")?),
                role: parse_enum(col(&row, "role")?)?,
                status: parse_enum(col(&row, "status")?)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl PledgeStore for PostgresRepository {
    async fn insert_pledge(&self, pledge: Pledge) -> StorageResult<()> {
        if !pledge.collected_amount.is_zero() {
            return Err(StorageError::InvariantViolation(format!(
                "new pledge {} must start with nothing collected",
                pledge.id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO pb_pledges
                (id, organization_id, member_id, committee_id, project_id, purpose, total_amount,
                 collected_amount, due_date, state, version, created_by, last_updated_by,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(pledge.id.0)
        .bind(pledge.organization_id.0)
        .bind(pledge.member_id.0)
        .bind(pledge.committee_id.map(|id| id.0))
        .bind(pledge.project_id.map(|id| id.0))
        .bind(pledge.purpose)
        .bind(pledge.total_amount)
        .bind(pledge.collected_amount)
        .bind(pledge.due_date)
        .bind(pledge.state.as_str())
        .bind(to_i64(pledge.version)?)
        .bind(pledge.created_by.0)
        .bind(pledge.last_updated_by.0)
        .bind(pledge.created_at)
        .bind(pledge.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_pledge(&self, id: &PledgeId) -> StorageResult<Option<Pledge>> {
        let row = sqlx::query(&format!(
            "SELECT {PLEDGE_COLUMNS} FROM pb_pledges WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(pledge_row_to_record).transpose()
    }

    async fn put_pledge(&self, mut pledge: Pledge, expected_version: u64) -> StorageResult<Pledge> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let next_version = expected_version + 1;
        let updated = write_pledge(&mut tx, &pledge, expected_version, next_version).await?;
        if !updated {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(self.missed_update(&pledge.id, expected_version).await);
        }

        let paid = payment_sum(&mut tx, &pledge.id).await?;
        if paid != pledge.collected_amount {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(StorageError::InvariantViolation(format!(
                "pledge {} collected {} but payments sum to {}",
                pledge.id, pledge.collected_amount, paid
            )));
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        pledge.version = next_version;
        Ok(pledge)
    }

    async fn list_payments_for_pledge(&self, id: &PledgeId) -> StorageResult<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pledge_id, amount, payment_date, method, note, registered_by, created_at
              FROM pb_payments
             WHERE pledge_id = $1
             ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(payment_row_to_record).collect()
    }

    async fn commit_payment(
        &self,
        payment: Payment,
        mut pledge: Pledge,
        expected_version: u64,
    ) -> StorageResult<Pledge> {
        if payment.pledge_id != pledge.id {
            return Err(StorageError::InvalidInput(format!(
                "payment {} targets pledge {}, not {}",
                payment.id, payment.pledge_id, pledge.id
            )));
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let next_version = expected_version + 1;
        let updated = write_pledge(&mut tx, &pledge, expected_version, next_version).await?;
        if !updated {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(self.missed_update(&pledge.id, expected_version).await);
        }

        sqlx::query(
            r#"
            INSERT INTO pb_payments
                (id, pledge_id, amount, payment_date, method, note, registered_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id.as_str())
        .bind(payment.pledge_id.as_str())
        .bind(payment.amount)
        .bind(payment.payment_date)
        .bind(payment.method.as_str())
        .bind(payment.note.as_deref())
        .bind(payment.registered_by.as_str())
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let paid = payment_sum(&mut tx, &pledge.id).await?;
        if paid != pledge.collected_amount {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(StorageError::InvariantViolation(format!(
                "pledge {} collected {} but payments sum to {}",
                pledge.id, pledge.collected_amount, paid
            )));
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        pledge.version = next_version;
        Ok(pledge)
    }

    async fn delete_pledge_if_unpaid(&self, id: &PledgeId) -> StorageResult<DeleteOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let locked = sqlx::query("SELECT id FROM pb_pledges WHERE id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if locked.is_none() {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(DeleteOutcome::NotFound);
        }

        let row = sqlx::query("SELECT COUNT(*) AS payments FROM pb_payments WHERE pledge_id = $1")
            .bind(id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        let count: i64 = col(&row, "payments")?;
        if count > 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(DeleteOutcome::HasPayments(count as usize));
        }

        sqlx::query("DELETE FROM pb_pledges WHERE id = $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn list_pledges(&self, filter: &PledgeFilter) -> StorageResult<Vec<Pledge>> {
        let mut query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {PLEDGE_COLUMNS} FROM pb_pledges WHERE TRUE"));

        if let Some(ref org) = filter.organization_id {
            query.push(" AND organization_id = ").push_bind(org.0.clone());
        }
        if let Some(ref committee) = filter.committee_id {
            query.push(" AND committee_id = ").push_bind(committee.0.clone());
        }
        if let Some(ref member) = filter.member_id {
            query.push(" AND member_id = ").push_bind(member.0.clone());
        }
        if let Some(ref project) = filter.project_id {
            query.push(" AND project_id = ").push_bind(project.0.clone());
        }
        if !filter.states.is_empty() {
            let states: Vec<String> = filter.states.iter().map(|s| s.as_str().to_string()).collect();
            query.push(" AND state = ANY(").push_bind(states).push(")");
        }

        query.push(" ORDER BY created_at DESC, id ASC");
        if filter.window.limit > 0 {
            query.push(" LIMIT ").push_bind(usize_to_i64(filter.window.limit)?);
        }
        query.push(" OFFSET ").push_bind(usize_to_i64(filter.window.offset)?);

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(pledge_row_to_record).collect()
    }
}

#[async_trait]
impl CashbookStore for PostgresRepository {
    async fn insert_offering(&self, offering: Offering) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pb_offerings
                (id, committee_id, project_id, amount, date, concept, registered_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(offering.id.0)
        .bind(offering.committee_id.0)
        .bind(offering.project_id.map(|id| id.0))
        .bind(offering.amount)
        .bind(offering.date)
        .bind(offering.concept)
        .bind(offering.registered_by.0)
        .bind(offering.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn insert_expense(&self, expense: Expense) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pb_expenses
                (id, committee_id, project_id, amount, date, category, concept, registered_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(expense.id.0)
        .bind(expense.committee_id.0)
        .bind(expense.project_id.map(|id| id.0))
        .bind(expense.amount)
        .bind(expense.date)
        .bind(expense.category)
        .bind(expense.concept)
        .bind(expense.registered_by.0)
        .bind(expense.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_offerings(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Offering>> {
        let rows = sqlx::query(
            r#"
            SELECT id, committee_id, project_id, amount, date, concept, registered_by, created_at
              FROM pb_offerings
             WHERE committee_id = $1
               AND ($2::DATE IS NULL OR date >= $2)
               AND ($3::DATE IS NULL OR date <= $3)
             ORDER BY date ASC, id ASC
            "#,
        )
        .bind(committee_id.as_str())
        .bind(range.map(|r| r.start()))
        .bind(range.map(|r| r.end()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(Offering {
                    id: OfferingId(col(&row, "id")?),
                    committee_id: CommitteeId(col(&row, "committee_id")?),
                    project_id: col::<Option<String>>(&row, "project_id")?.map(ProjectId),
                    amount: col(&row, "amount")?,
                    date: col(&row, "date")?,
                    concept: col(&row, "concept")?,
                    registered_by: UserId(col(&row, "registered_by")?),
                    created_at: col(&row, "created_at")?,
                })
            })
            .collect()
    }

    async fn list_expenses(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Expense>> {
        let rows = sqlx::query(
            r#"
            SELECT id, committee_id, project_id, amount, date, category, concept, registered_by, created_at
              FROM pb_expenses
             WHERE committee_id = $1
               AND ($2::DATE IS NULL OR date >= $2)
               AND ($3::DATE IS NULL OR date <= $3)
             ORDER BY date ASC, id ASC
            "#,
        )
        .bind(committee_id.as_str())
        .bind(range.map(|r| r.start()))
        .bind(range.map(|r| r.end()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(Expense {
                    id: ExpenseId(col(&row, "id")?),
                    committee_id: CommitteeId(col(&row, "committee_id")?),
                    project_id: col::<Option<String>>(&row, "project_id")?.map(ProjectId),
                    amount: col(&row, "amount")?,
                    date: col(&row, "date")?,
                    category: col(&row, "category")?,
                    concept: col(&row, "concept")?,
                    registered_by: UserId(col(&row, "registered_by")?),
                    created_at: col(&row, "created_at")?,
                })
            })
            .collect()
    }
}

/// Version-guarded pledge update. Returns `false` when no row matched.
async fn write_pledge(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    pledge: &Pledge,
    expected_version: u64,
    next_version: u64,
) -> StorageResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pb_pledges
           SET purpose = $1,
               total_amount = $2,
               collected_amount = $3,
               due_date = $4,
               state = $5,
               version = $6,
               last_updated_by = $7,
               updated_at = $8,
               project_id = $9
         WHERE id = $10
           AND version = $11
        "#,
    )
    .bind(pledge.purpose.as_str())
    .bind(pledge.total_amount)
    .bind(pledge.collected_amount)
    .bind(pledge.due_date)
    .bind(pledge.state.as_str())
    .bind(to_i64(next_version)?)
    .bind(pledge.last_updated_by.as_str())
    .bind(pledge.updated_at)
    .bind(pledge.project_id.as_ref().map(|id| id.as_str()))
    .bind(pledge.id.as_str())
    .bind(to_i64(expected_version)?)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(result.rows_affected() == 1)
}

async fn payment_sum(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    pledge_id: &PledgeId,
) -> StorageResult<Decimal> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(amount), 0)::NUMERIC AS paid FROM pb_payments WHERE pledge_id = $1",
    )
    .bind(pledge_id.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    col(&row, "paid")
}

fn pledge_row_to_record(row: PgRow) -> StorageResult<Pledge> {
    let version: i64 = col(&row, "version")?;
    Ok(Pledge {
        id: PledgeId(col(&row, "id")?),
        organization_id: OrganizationId(col(&row, "organization_id")?),
        member_id: MemberId(col(&row, "member_id")?),
        committee_id: col::<Option<String>>(&row, "committee_id")?.map(CommitteeId),
        project_id: col::<Option<String>>(&row, "project_id")?.map(ProjectId),
        purpose: col(&row, "purpose")?,
        total_amount: col(&row, "total_amount")?,
        collected_amount: col(&row, "collected_amount")?,
        due_date: col::<NaiveDate>(&row, "due_date")?,
        state: parse_enum(col(&row, "state")?)?,
        version: u64::try_from(version)
            .map_err(|_| StorageError::Serialization(format!("negative version {version}")))?,
        created_by: UserId(col(&row, "created_by")?),
        last_updated_by: UserId(col(&row, "last_updated_by")?),
        created_at: col(&row, "created_at")?,
        updated_at: col(&row, "updated_at")?,
    })
}

fn payment_row_to_record(row: PgRow) -> StorageResult<Payment> {
    Ok(Payment {
        id: PaymentId(col(&row, "id")?),
        pledge_id: PledgeId(col(&row, "pledge_id")?),
        amount: col(&row, "amount")?,
        payment_date: col(&row, "payment_date")?,
        method: parse_enum(col(&row, "method")?)?,
        note: col(&row, "note")?,
        registered_by: UserId(col(&row, "registered_by")?),
        created_at: col(&row, "created_at")?,
    })
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StorageError::Backend(format!("column `{name}`: {e}")))
}

fn parse_enum<T>(raw: String) -> StorageResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    raw.parse()
        .map_err(|e: ParseEnumError| StorageError::Serialization(e.to_string()))
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => StorageError::Conflict(db_err.message().to_string()),
            // serialization_failure / deadlock_detected
            Some("40001") | Some("40P01") => StorageError::Conflict(db_err.message().to_string()),
            Some("23514") | Some("23503") => {
                StorageError::InvariantViolation(db_err.message().to_string())
            }
            _ => StorageError::Backend(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Unavailable(err.to_string())
        }
        _ => StorageError::Backend(err.to_string()),
    }
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::InvalidInput("version too large".to_string()))
}

fn usize_to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}

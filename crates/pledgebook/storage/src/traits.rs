use crate::model::{DeleteOutcome, PledgeFilter};
use crate::StorageResult;
use async_trait::async_trait;
use pledgebook_types::{
    Committee, CommitteeId, CommitteeMembership, DateRange, Expense, Member, MemberId,
    OrgMembership, Offering, Organization, OrganizationId, Payment, Pledge, PledgeId, Project,
    ProjectId, UserId,
};

/// Storage interface for tenant, committee, member and project records.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn insert_organization(&self, organization: Organization) -> StorageResult<()>;
    async fn get_organization(&self, id: &OrganizationId) -> StorageResult<Option<Organization>>;

    /// Insert or replace a committee. Committees are soft-deleted through `status`.
    async fn upsert_committee(&self, committee: Committee) -> StorageResult<()>;
    async fn get_committee(&self, id: &CommitteeId) -> StorageResult<Option<Committee>>;

    async fn upsert_member(&self, member: Member) -> StorageResult<()>;
    async fn get_member(&self, id: &MemberId) -> StorageResult<Option<Member>>;

    async fn upsert_project(&self, project: Project) -> StorageResult<()>;
    async fn get_project(&self, id: &ProjectId) -> StorageResult<Option<Project>>;
}

/// Storage interface for the two role tables consulted by authorization.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn upsert_org_membership(&self, membership: OrgMembership) -> StorageResult<()>;

    /// Organization-wide membership of a user.
    async fn get_org_membership(&self, user_id: &UserId) -> StorageResult<Option<OrgMembership>>;

    async fn upsert_committee_membership(
        &self,
        membership: CommitteeMembership,
    ) -> StorageResult<()>;

    async fn get_committee_membership(
        &self,
        user_id: &UserId,
        committee_id: &CommitteeId,
    ) -> StorageResult<Option<CommitteeMembership>>;
}

/// Storage interface for pledges and their payments.
#[async_trait]
pub trait PledgeStore: Send + Sync {
    /// Insert a new pledge. Fails with `Conflict` if the id is taken.
    async fn insert_pledge(&self, pledge: Pledge) -> StorageResult<()>;

    async fn get_pledge(&self, id: &PledgeId) -> StorageResult<Option<Pledge>>;

    /// Replace a pledge if its stored version still equals `expected_version`.
    ///
    /// Returns the stored pledge with its bumped version. A version mismatch
    /// yields `Conflict`; a missing pledge yields `NotFound`. Implementations
    /// must reject a `collected_amount` that differs from the payment sum.
    async fn put_pledge(&self, pledge: Pledge, expected_version: u64) -> StorageResult<Pledge>;

    /// Payments of one pledge, oldest first.
    async fn list_payments_for_pledge(&self, id: &PledgeId) -> StorageResult<Vec<Payment>>;

    /// Insert `payment` and write `pledge` in one atomic unit, guarded by
    /// `expected_version` exactly like [`PledgeStore::put_pledge`].
    ///
    /// After commit `pledge.collected_amount` equals the sum of all payments
    /// (including the new one) and does not exceed `pledge.total_amount`;
    /// otherwise nothing is written and `InvariantViolation` is returned.
    async fn commit_payment(
        &self,
        payment: Payment,
        pledge: Pledge,
        expected_version: u64,
    ) -> StorageResult<Pledge>;

    /// Delete a pledge only if it has no payments, atomically.
    async fn delete_pledge_if_unpaid(&self, id: &PledgeId) -> StorageResult<DeleteOutcome>;

    /// List pledges newest-first.
    async fn list_pledges(&self, filter: &PledgeFilter) -> StorageResult<Vec<Pledge>>;
}

/// Storage interface for committee income/outflow records. Append-only.
#[async_trait]
pub trait CashbookStore: Send + Sync {
    async fn insert_offering(&self, offering: Offering) -> StorageResult<()>;
    async fn insert_expense(&self, expense: Expense) -> StorageResult<()>;

    async fn list_offerings(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Offering>>;

    async fn list_expenses(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Expense>>;
}

/// Unified repository bundle handed to every core component.
pub trait Repository:
    DirectoryStore + MembershipStore + PledgeStore + CashbookStore + Send + Sync
{
}

impl<T> Repository for T where
    T: DirectoryStore + MembershipStore + PledgeStore + CashbookStore + Send + Sync
{
}

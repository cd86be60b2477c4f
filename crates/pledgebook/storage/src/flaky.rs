//! Fault injection over any repository, for exercising retry paths.
//!
//! [`FlakyRepository::fail_next`] makes the next calls fail with
//! `Unavailable` before they reach the store. [`FlakyRepository::lose_next_acks`]
//! lets the next writes land but reports them as `Unavailable`, the way a
//! dropped connection does after commit.

use crate::model::{DeleteOutcome, PledgeFilter};
use crate::traits::{CashbookStore, DirectoryStore, MembershipStore, PledgeStore, Repository};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use pledgebook_types::{
    Committee, CommitteeId, CommitteeMembership, DateRange, Expense, Member, MemberId,
    OrgMembership, Offering, Organization, OrganizationId, Payment, Pledge, PledgeId, Project,
    ProjectId, UserId,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct FlakyRepository {
    inner: Arc<dyn Repository>,
    outages: AtomicU32,
    lost_acks: AtomicU32,
    injected: AtomicU32,
}

impl FlakyRepository {
    pub fn new(inner: Arc<dyn Repository>) -> Self {
        Self {
            inner,
            outages: AtomicU32::new(0),
            lost_acks: AtomicU32::new(0),
            injected: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Repository> {
        &self.inner
    }

    /// Fail the next `n` calls, reads and writes alike.
    pub fn fail_next(&self, n: u32) {
        self.outages.store(n, Ordering::SeqCst);
    }

    /// Apply the next `n` writes but report them as failed.
    pub fn lose_next_acks(&self, n: u32) {
        self.lost_acks.store(n, Ordering::SeqCst);
    }

    /// Number of failures injected so far.
    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn take(&self, counter: &AtomicU32, what: &str) -> StorageResult<()> {
        if counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Unavailable(format!("injected: {what}")));
        }
        Ok(())
    }

    fn outage(&self) -> StorageResult<()> {
        self.take(&self.outages, "outage")
    }

    fn ack(&self) -> StorageResult<()> {
        self.take(&self.lost_acks, "lost acknowledgement")
    }
}

#[async_trait]
impl DirectoryStore for FlakyRepository {
    async fn insert_organization(&self, organization: Organization) -> StorageResult<()> {
        self.outage()?;
        self.inner.insert_organization(organization).await?;
        self.ack()
    }

    async fn get_organization(&self, id: &OrganizationId) -> StorageResult<Option<Organization>> {
        self.outage()?;
        self.inner.get_organization(id).await
    }

    async fn upsert_committee(&self, committee: Committee) -> StorageResult<()> {
        self.outage()?;
        self.inner.upsert_committee(committee).await
    }

    async fn get_committee(&self, id: &CommitteeId) -> StorageResult<Option<Committee>> {
        self.outage()?;
        self.inner.get_committee(id).await
    }

    async fn upsert_member(&self, member: Member) -> StorageResult<()> {
        self.outage()?;
        self.inner.upsert_member(member).await
    }

    async fn get_member(&self, id: &MemberId) -> StorageResult<Option<Member>> {
        self.outage()?;
        self.inner.get_member(id).await
    }

    async fn upsert_project(&self, project: Project) -> StorageResult<()> {
        self.outage()?;
        self.inner.upsert_project(project).await
    }

    async fn get_project(&self, id: &ProjectId) -> StorageResult<Option<Project>> {
        self.outage()?;
        self.inner.get_project(id).await
    }
}

#[async_trait]
impl MembershipStore for FlakyRepository {
    async fn upsert_org_membership(&self, membership: OrgMembership) -> StorageResult<()> {
        self.outage()?;
        self.inner.upsert_org_membership(membership).await
    }

    async fn get_org_membership(&self, user_id: &UserId) -> StorageResult<Option<OrgMembership>> {
        self.outage()?;
        self.inner.get_org_membership(user_id).await
    }

    async fn upsert_committee_membership(
        &self,
        membership: CommitteeMembership,
    ) -> StorageResult<()> {
        self.outage()?;
        self.inner.upsert_committee_membership(membership).await
    }

    async fn get_committee_membership(
        &self,
        user_id: &UserId,
        committee_id: &CommitteeId,
    ) -> StorageResult<Option<CommitteeMembership>> {
        self.outage()?;
        self.inner.get_committee_membership(user_id, committee_id).await
    }
}

#[async_trait]
impl PledgeStore for FlakyRepository {
    async fn insert_pledge(&self, pledge: Pledge) -> StorageResult<()> {
        self.outage()?;
        self.inner.insert_pledge(pledge).await?;
        self.ack()
    }

    async fn get_pledge(&self, id: &PledgeId) -> StorageResult<Option<Pledge>> {
        self.outage()?;
        self.inner.get_pledge(id).await
    }

    async fn put_pledge(&self, pledge: Pledge, expected_version: u64) -> StorageResult<Pledge> {
        self.outage()?;
        let stored = self.inner.put_pledge(pledge, expected_version).await?;
        self.ack()?;
        Ok(stored)
    }

    async fn list_payments_for_pledge(&self, id: &PledgeId) -> StorageResult<Vec<Payment>> {
        self.outage()?;
        self.inner.list_payments_for_pledge(id).await
    }

    async fn commit_payment(
        &self,
        payment: Payment,
        pledge: Pledge,
        expected_version: u64,
    ) -> StorageResult<Pledge> {
        self.outage()?;
        let stored = self
            .inner
            .commit_payment(payment, pledge, expected_version)
            .await?;
        self.ack()?;
        Ok(stored)
    }

    async fn delete_pledge_if_unpaid(&self, id: &PledgeId) -> StorageResult<DeleteOutcome> {
        self.outage()?;
        let outcome = self.inner.delete_pledge_if_unpaid(id).await?;
        self.ack()?;
        Ok(outcome)
    }

    async fn list_pledges(&self, filter: &PledgeFilter) -> StorageResult<Vec<Pledge>> {
        self.outage()?;
        self.inner.list_pledges(filter).await
    }
}

#[async_trait]
impl CashbookStore for FlakyRepository {
    async fn insert_offering(&self, offering: Offering) -> StorageResult<()> {
        self.outage()?;
        self.inner.insert_offering(offering).await?;
        self.ack()
    }

    async fn insert_expense(&self, expense: Expense) -> StorageResult<()> {
        self.outage()?;
        self.inner.insert_expense(expense).await?;
        self.ack()
    }

    async fn list_offerings(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Offering>> {
        self.outage()?;
        self.inner.list_offerings(committee_id, range).await
    }

    async fn list_expenses(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Expense>> {
        self.outage()?;
        self.inner.list_expenses(committee_id, range).await
    }
}

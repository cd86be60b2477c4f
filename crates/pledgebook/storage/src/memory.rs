//! In-memory reference implementation of the repository traits.
//!
//! This adapter is deterministic and test-friendly. Pledges and payments live
//! behind one lock so that [`PledgeStore::commit_payment`] is a single atomic
//! unit. Production deployments should use a transactional backend
//! (e.g. PostgreSQL).

use crate::model::{DeleteOutcome, PledgeFilter, QueryWindow};
use crate::traits::{CashbookStore, DirectoryStore, MembershipStore, PledgeStore};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use pledgebook_types::{
    Committee, CommitteeId, CommitteeMembership, DateRange, Expense, Member, MemberId,
    OrgMembership, Offering, Organization, OrganizationId, Payment, Pledge, PledgeId, Project,
    ProjectId, UserId,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct LedgerTables {
    pledges: HashMap<PledgeId, Pledge>,
    payments: HashMap<PledgeId, Vec<Payment>>,
}

impl LedgerTables {
    fn payment_sum(&self, id: &PledgeId) -> Decimal {
        self.payments
            .get(id)
            .map(|items| items.iter().map(|p| p.amount).sum())
            .unwrap_or(Decimal::ZERO)
    }

    /// Version check shared by `put_pledge` and `commit_payment`.
    fn check_version(&self, id: &PledgeId, expected_version: u64) -> StorageResult<()> {
        let current = self
            .pledges
            .get(id)
            .ok_or_else(|| StorageError::NotFound(format!("pledge {} not found", id)))?;
        if current.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "pledge {} is at version {}, expected {}",
                id, current.version, expected_version
            )));
        }
        Ok(())
    }
}

/// In-memory pledgebook repository.
#[derive(Default)]
pub struct InMemoryRepository {
    organizations: RwLock<HashMap<OrganizationId, Organization>>,
    committees: RwLock<HashMap<CommitteeId, Committee>>,
    members: RwLock<HashMap<MemberId, Member>>,
    projects: RwLock<HashMap<ProjectId, Project>>,
    org_memberships: RwLock<HashMap<UserId, OrgMembership>>,
    committee_memberships: RwLock<HashMap<(UserId, CommitteeId), CommitteeMembership>>,
    ledger: RwLock<LedgerTables>,
    offerings: RwLock<Vec<Offering>>,
    expenses: RwLock<Vec<Expense>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(name: &str) -> StorageError {
    StorageError::Backend(format!("{name} lock poisoned"))
}

#[async_trait]
impl DirectoryStore for InMemoryRepository {
    async fn insert_organization(&self, organization: Organization) -> StorageResult<()> {
        let mut guard = self
            .organizations
            .write()
            .map_err(|_| poisoned("organizations"))?;
        if guard.contains_key(&organization.id) {
            return Err(StorageError::Conflict(format!(
                "organization {} already exists",
                organization.id
            )));
        }
        if guard.values().any(|o| o.slug == organization.slug) {
            return Err(StorageError::Conflict(format!(
                "organization slug `{}` is taken",
                organization.slug
            )));
        }
        guard.insert(organization.id.clone(), organization);
        Ok(())
    }

    async fn get_organization(&self, id: &OrganizationId) -> StorageResult<Option<Organization>> {
        let guard = self
            .organizations
            .read()
            .map_err(|_| poisoned("organizations"))?;
        Ok(guard.get(id).cloned())
    }

    async fn upsert_committee(&self, committee: Committee) -> StorageResult<()> {
        let mut guard = self.committees.write().map_err(|_| poisoned("committees"))?;
        guard.insert(committee.id.clone(), committee);
        Ok(())
    }

    async fn get_committee(&self, id: &CommitteeId) -> StorageResult<Option<Committee>> {
        let guard = self.committees.read().map_err(|_| poisoned("committees"))?;
        Ok(guard.get(id).cloned())
    }

    async fn upsert_member(&self, member: Member) -> StorageResult<()> {
        let mut guard = self.members.write().map_err(|_| poisoned("members"))?;
        guard.insert(member.id.clone(), member);
        Ok(())
    }

    async fn get_member(&self, id: &MemberId) -> StorageResult<Option<Member>> {
        let guard = self.members.read().map_err(|_| poisoned("members"))?;
        Ok(guard.get(id).cloned())
    }

    async fn upsert_project(&self, project: Project) -> StorageResult<()> {
        let mut guard = self.projects.write().map_err(|_| poisoned("projects"))?;
        guard.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> StorageResult<Option<Project>> {
        let guard = self.projects.read().map_err(|_| poisoned("projects"))?;
        Ok(guard.get(id).cloned())
    }
}

#[async_trait]
impl MembershipStore for InMemoryRepository {
    async fn upsert_org_membership(&self, membership: OrgMembership) -> StorageResult<()> {
        let mut guard = self
            .org_memberships
            .write()
            .map_err(|_| poisoned("org memberships"))?;
        guard.insert(membership.user_id.clone(), membership);
        Ok(())
    }

    async fn get_org_membership(&self, user_id: &UserId) -> StorageResult<Option<OrgMembership>> {
        let guard = self
            .org_memberships
            .read()
            .map_err(|_| poisoned("org memberships"))?;
        Ok(guard.get(user_id).cloned())
    }

    async fn upsert_committee_membership(
        &self,
        membership: CommitteeMembership,
    ) -> StorageResult<()> {
        let mut guard = self
            .committee_memberships
            .write()
            .map_err(|_| poisoned("committee memberships"))?;
        guard.insert(
            (membership.user_id.clone(), membership.committee_id.clone()),
            membership,
        );
        Ok(())
    }

    async fn get_committee_membership(
        &self,
        user_id: &UserId,
        committee_id: &CommitteeId,
    ) -> StorageResult<Option<CommitteeMembership>> {
        let guard = self
            .committee_memberships
            .read()
            .map_err(|_| poisoned("committee memberships"))?;
        Ok(guard.get(&(user_id.clone(), committee_id.clone())).cloned())
    }
}

#[async_trait]
impl PledgeStore for InMemoryRepository {
    async fn insert_pledge(&self, pledge: Pledge) -> StorageResult<()> {
        let mut guard = self.ledger.write().map_err(|_| poisoned("ledger"))?;
        if guard.pledges.contains_key(&pledge.id) {
            return Err(StorageError::Conflict(format!(
                "pledge {} already exists",
                pledge.id
            )));
        }
        if !pledge.collected_amount.is_zero() {
            return Err(StorageError::InvariantViolation(format!(
                "new pledge {} must start with nothing collected",
                pledge.id
            )));
        }
        guard.pledges.insert(pledge.id.clone(), pledge);
        Ok(())
    }

    async fn get_pledge(&self, id: &PledgeId) -> StorageResult<Option<Pledge>> {
        let guard = self.ledger.read().map_err(|_| poisoned("ledger"))?;
        Ok(guard.pledges.get(id).cloned())
    }

    async fn put_pledge(&self, mut pledge: Pledge, expected_version: u64) -> StorageResult<Pledge> {
        let mut guard = self.ledger.write().map_err(|_| poisoned("ledger"))?;
        guard.check_version(&pledge.id, expected_version)?;

        let paid = guard.payment_sum(&pledge.id);
        if pledge.collected_amount != paid {
            return Err(StorageError::InvariantViolation(format!(
                "pledge {} collected {} but payments sum to {}",
                pledge.id, pledge.collected_amount, paid
            )));
        }
        if pledge.collected_amount > pledge.total_amount {
            return Err(StorageError::InvariantViolation(format!(
                "pledge {} total {} is below collected {}",
                pledge.id, pledge.total_amount, pledge.collected_amount
            )));
        }

        pledge.version = expected_version + 1;
        guard.pledges.insert(pledge.id.clone(), pledge.clone());
        Ok(pledge)
    }

    async fn list_payments_for_pledge(&self, id: &PledgeId) -> StorageResult<Vec<Payment>> {
        let guard = self.ledger.read().map_err(|_| poisoned("ledger"))?;
        Ok(guard.payments.get(id).cloned().unwrap_or_default())
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

        let mut guard = self.ledger.write().map_err(|_| poisoned("ledger"))?;
        guard.check_version(&pledge.id, expected_version)?;

        let paid = guard.payment_sum(&pledge.id) + payment.amount;
        if pledge.collected_amount != paid {
            return Err(StorageError::InvariantViolation(format!(
                "pledge {} collected {} but payments would sum to {}",
                pledge.id, pledge.collected_amount, paid
            )));
        }
        if paid > pledge.total_amount {
            return Err(StorageError::InvariantViolation(format!(
                "pledge {} would collect {} over a total of {}",
                pledge.id, paid, pledge.total_amount
            )));
        }

        pledge.version = expected_version + 1;
        guard
            .payments
            .entry(pledge.id.clone())
            .or_default()
            .push(payment);
        guard.pledges.insert(pledge.id.clone(), pledge.clone());
        Ok(pledge)
    }

    async fn delete_pledge_if_unpaid(&self, id: &PledgeId) -> StorageResult<DeleteOutcome> {
        let mut guard = self.ledger.write().map_err(|_| poisoned("ledger"))?;
        if !guard.pledges.contains_key(id) {
            return Ok(DeleteOutcome::NotFound);
        }
        let count = guard.payments.get(id).map(Vec::len).unwrap_or(0);
        if count > 0 {
            return Ok(DeleteOutcome::HasPayments(count));
        }
        guard.pledges.remove(id);
        guard.payments.remove(id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn list_pledges(&self, filter: &PledgeFilter) -> StorageResult<Vec<Pledge>> {
        let guard = self.ledger.read().map_err(|_| poisoned("ledger"))?;
        let mut values = guard
            .pledges
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(apply_window(values, filter.window))
    }
}

#[async_trait]
impl CashbookStore for InMemoryRepository {
    async fn insert_offering(&self, offering: Offering) -> StorageResult<()> {
        let mut guard = self.offerings.write().map_err(|_| poisoned("offerings"))?;
        if guard.iter().any(|o| o.id == offering.id) {
            return Err(StorageError::Conflict(format!(
                "offering {} already exists",
                offering.id
            )));
        }
        guard.push(offering);
        Ok(())
    }

    async fn insert_expense(&self, expense: Expense) -> StorageResult<()> {
        let mut guard = self.expenses.write().map_err(|_| poisoned("expenses"))?;
        if guard.iter().any(|e| e.id == expense.id) {
            return Err(StorageError::Conflict(format!(
                "expense {} already exists",
                expense.id
            )));
        }
        guard.push(expense);
        Ok(())
    }

    async fn list_offerings(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Offering>> {
        let guard = self.offerings.read().map_err(|_| poisoned("offerings"))?;
        Ok(guard
            .iter()
            .filter(|o| &o.committee_id == committee_id)
            .filter(|o| range.map_or(true, |r| r.contains(o.date)))
            .cloned()
            .collect())
    }

    async fn list_expenses(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> StorageResult<Vec<Expense>> {
        let guard = self.expenses.read().map_err(|_| poisoned("expenses"))?;
        Ok(guard
            .iter()
            .filter(|e| &e.committee_id == committee_id)
            .filter(|e| range.map_or(true, |r| r.contains(e.date)))
            .cloned()
            .collect())
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use pledgebook_types::{PaymentId, PaymentMethod, PledgeState};

    fn pledge(id: &str, total: i64) -> Pledge {
        let now = Utc::now();
        Pledge {
            id: PledgeId::new(id),
            organization_id: OrganizationId::new("org-1"),
            member_id: MemberId::new("m-1"),
            committee_id: Some(CommitteeId::new("c-1")),
            project_id: None,
            purpose: "roof".to_string(),
            total_amount: Decimal::from(total),
            collected_amount: Decimal::ZERO,
            due_date: NaiveDate::from_ymd_opt(2030, 6, 30).unwrap(),
            state: PledgeState::Active,
            version: 0,
            created_by: UserId::new("u-1"),
            last_updated_by: UserId::new("u-1"),
            created_at: now,
            updated_at: now,
        }
    }

    fn payment(pledge_id: &str, amount: i64) -> Payment {
        Payment {
            id: PaymentId::generate(),
            pledge_id: PledgeId::new(pledge_id),
            amount: Decimal::from(amount),
            payment_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            method: PaymentMethod::Cash,
            note: None,
            registered_by: UserId::new("u-1"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commit_payment_bumps_version_and_appends() {
        let repo = InMemoryRepository::new();
        repo.insert_pledge(pledge("p-1", 100)).await.unwrap();

        let mut next = pledge("p-1", 100);
        next.collected_amount = Decimal::from(40);
        let stored = repo
            .commit_payment(payment("p-1", 40), next, 0)
            .await
            .unwrap();

        assert_eq!(stored.version, 1);
        assert_eq!(repo.list_payments_for_pledge(&stored.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict_and_writes_nothing() {
        let repo = InMemoryRepository::new();
        repo.insert_pledge(pledge("p-1", 100)).await.unwrap();

        let mut first = pledge("p-1", 100);
        first.collected_amount = Decimal::from(60);
        repo.commit_payment(payment("p-1", 60), first, 0).await.unwrap();

        let mut second = pledge("p-1", 100);
        second.collected_amount = Decimal::from(60);
        let err = repo
            .commit_payment(payment("p-1", 60), second, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert!(err.is_transient());

        let payments = repo.list_payments_for_pledge(&PledgeId::new("p-1")).await.unwrap();
        assert_eq!(payments.len(), 1);
    }

    #[tokio::test]
    async fn commit_payment_rejects_collected_mismatch_and_overflow() {
        let repo = InMemoryRepository::new();
        repo.insert_pledge(pledge("p-1", 100)).await.unwrap();

        let mut lying = pledge("p-1", 100);
        lying.collected_amount = Decimal::from(10);
        let err = repo
            .commit_payment(payment("p-1", 40), lying, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvariantViolation(_)));

        let mut over = pledge("p-1", 100);
        over.collected_amount = Decimal::from(120);
        let err = repo
            .commit_payment(payment("p-1", 120), over, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn delete_is_refused_once_paid() {
        let repo = InMemoryRepository::new();
        repo.insert_pledge(pledge("p-1", 100)).await.unwrap();
        repo.insert_pledge(pledge("p-2", 100)).await.unwrap();

        let mut paid = pledge("p-1", 100);
        paid.collected_amount = Decimal::from(5);
        repo.commit_payment(payment("p-1", 5), paid, 0).await.unwrap();

        assert_eq!(
            repo.delete_pledge_if_unpaid(&PledgeId::new("p-1")).await.unwrap(),
            DeleteOutcome::HasPayments(1)
        );
        assert_eq!(
            repo.delete_pledge_if_unpaid(&PledgeId::new("p-2")).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert_eq!(
            repo.delete_pledge_if_unpaid(&PledgeId::new("p-2")).await.unwrap(),
            DeleteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn list_pledges_filters_by_state() {
        let repo = InMemoryRepository::new();
        repo.insert_pledge(pledge("p-1", 100)).await.unwrap();
        let mut cancelled = pledge("p-2", 100);
        cancelled.state = PledgeState::Cancelled;
        repo.insert_pledge(cancelled).await.unwrap();

        let live = repo
            .list_pledges(&PledgeFilter::default().with_states([
                PledgeState::Active,
                PledgeState::Completed,
                PledgeState::Expired,
            ]))
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, PledgeId::new("p-1"));
    }

    #[tokio::test]
    async fn organization_slug_is_unique() {
        let repo = InMemoryRepository::new();
        let org = |id: &str| Organization {
            id: OrganizationId::new(id),
            name: "Grace Chapel".to_string(),
            slug: "grace-chapel".to_string(),
            created_at: Utc::now(),
        };
        repo.insert_organization(org("org-1")).await.unwrap();
        let err = repo.insert_organization(org("org-2")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }
}

//! Pledgebook Balance - read-only financial aggregation.
//!
//! Income is the sum of pledge payments plus offerings; expenses are the sum
//! of expense records; the balance is their difference and may be negative.
//! Nothing here authorizes: callers decide access before asking for figures.
//! Every figure is read-only, so store reads are retried through [`ReadRetry`]
//! while the backend is unreachable.

#![deny(unsafe_code)]

use futures::future::try_join_all;
use pledgebook_storage::{PledgeFilter, ReadRetry, Repository, StorageError};
use pledgebook_types::{CommitteeId, DateRange, Payment, Pledge, PledgeState, ProjectId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub type BalanceResult<T> = Result<T, BalanceError>;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The store stayed unreachable for the whole retry budget.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl BalanceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BalanceError::StoreUnavailable(_))
    }
}

impl From<StorageError> for BalanceError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Income, outflow and their difference over one scope and date range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub pledge_income: Decimal,
    pub offering_income: Decimal,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    /// `total_income - total_expenses`; negative when overspent.
    pub balance: Decimal,
}

impl Balance {
    fn from_parts(pledge_income: Decimal, offering_income: Decimal, expenses: Decimal) -> Self {
        let total_income = pledge_income + offering_income;
        Self {
            pledge_income,
            offering_income,
            total_income,
            total_expenses: expenses,
            balance: total_income - expenses,
        }
    }

    pub fn is_overspent(&self) -> bool {
        self.balance < Decimal::ZERO
    }
}

/// Pledge counts per state and amounts over non-cancelled pledges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeSummary {
    pub active: usize,
    pub completed: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub total_pledged: Decimal,
    pub total_collected: Decimal,
    pub total_pending: Decimal,
}

impl PledgeSummary {
    pub fn count(&self) -> usize {
        self.active + self.completed + self.expired + self.cancelled
    }

    fn add(&mut self, pledge: &Pledge) {
        match pledge.state {
            PledgeState::Active => self.active += 1,
            PledgeState::Completed => self.completed += 1,
            PledgeState::Expired => self.expired += 1,
            PledgeState::Cancelled => {
                self.cancelled += 1;
                return;
            }
        }
        self.total_pledged += pledge.total_amount;
        self.total_collected += pledge.collected_amount;
        self.total_pending += pledge.pending_amount();
    }
}

pub struct BalanceAggregator {
    repo: Arc<dyn Repository>,
    retry: ReadRetry,
}

impl BalanceAggregator {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            retry: ReadRetry::default(),
        }
    }

    pub fn with_read_retry(mut self, retry: ReadRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Balance of one committee.
    ///
    /// Payments count by `payment_date`, offerings and expenses by `date`,
    /// all inclusive of both range ends. Payments of cancelled pledges still
    /// count; that money was received.
    pub async fn compute_committee_balance(
        &self,
        committee_id: &CommitteeId,
        range: Option<DateRange>,
    ) -> BalanceResult<Balance> {
        let filter = PledgeFilter::for_committee(committee_id.clone());
        let pledges = self
            .retry
            .run("list_pledges", || self.repo.list_pledges(&filter))
            .await?;
        let pledge_income = self.payment_income(&pledges, range).await?;

        let offering_income = self
            .retry
            .run("list_offerings", || self.repo.list_offerings(committee_id, range))
            .await?
            .iter()
            .map(|o| o.amount)
            .sum();
        let expenses = self
            .retry
            .run("list_expenses", || self.repo.list_expenses(committee_id, range))
            .await?
            .iter()
            .map(|e| e.amount)
            .sum();

        let balance = Balance::from_parts(pledge_income, offering_income, expenses);
        debug!(
            committee_id = %committee_id,
            ?range,
            income = %balance.total_income,
            expenses = %balance.total_expenses,
            balance = %balance.balance,
            "Computed committee balance"
        );
        Ok(balance)
    }

    /// Balance restricted to records tagged with one project.
    pub async fn compute_project_balance(
        &self,
        project_id: &ProjectId,
        range: Option<DateRange>,
    ) -> BalanceResult<Balance> {
        let project = self
            .retry
            .run("get_project", || self.repo.get_project(project_id))
            .await?
            .ok_or_else(|| BalanceError::NotFound(format!("project {}", project_id)))?;

        let filter = PledgeFilter {
            committee_id: Some(project.committee_id.clone()),
            project_id: Some(project_id.clone()),
            ..PledgeFilter::default()
        };
        let pledges = self
            .retry
            .run("list_pledges", || self.repo.list_pledges(&filter))
            .await?;
        let pledge_income = self.payment_income(&pledges, range).await?;

        let tagged = |tag: &Option<ProjectId>| tag.as_ref() == Some(project_id);
        let offering_income = self
            .retry
            .run("list_offerings", || self.repo.list_offerings(&project.committee_id, range))
            .await?
            .iter()
            .filter(|o| tagged(&o.project_id))
            .map(|o| o.amount)
            .sum();
        let expenses = self
            .retry
            .run("list_expenses", || self.repo.list_expenses(&project.committee_id, range))
            .await?
            .iter()
            .filter(|e| tagged(&e.project_id))
            .map(|e| e.amount)
            .sum();

        let balance = Balance::from_parts(pledge_income, offering_income, expenses);
        debug!(
            project_id = %project_id,
            ?range,
            balance = %balance.balance,
            "Computed project balance"
        );
        Ok(balance)
    }

    /// Counts and amounts for the pledges matching `filter`.
    pub async fn summarize_pledges(&self, filter: &PledgeFilter) -> BalanceResult<PledgeSummary> {
        let pledges = self
            .retry
            .run("list_pledges", || self.repo.list_pledges(filter))
            .await?;
        let mut summary = PledgeSummary::default();
        for pledge in &pledges {
            summary.add(pledge);
        }
        debug!(count = summary.count(), "Summarized pledges");
        Ok(summary)
    }

    async fn payment_income(
        &self,
        pledges: &[Pledge],
        range: Option<DateRange>,
    ) -> BalanceResult<Decimal> {
        let per_pledge: Vec<Vec<Payment>> = try_join_all(pledges.iter().map(|pledge| {
            self.retry.run("list_payments_for_pledge", || {
                self.repo.list_payments_for_pledge(&pledge.id)
            })
        }))
        .await?;

        Ok(per_pledge
            .iter()
            .flatten()
            .filter(|p| range.map_or(true, |r| r.contains(p.payment_date)))
            .map(|p| p.amount)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use pledgebook_authz::AuthorizationResolver;
    use pledgebook_ledger::{
        Cashbook, NewExpense, NewOffering, NewPledge, PaymentRequest, PledgeLedger,
    };
    use pledgebook_storage::flaky::FlakyRepository;
    use pledgebook_storage::memory::InMemoryRepository;
    use pledgebook_storage::{DirectoryStore, MembershipStore};
    use pledgebook_types::{
        Committee, CommitteeMembership, CommitteeRole, Member, MemberId, MembershipStatus,
        OrgMembership, OrgRole, OrganizationId, PaymentMethod, PledgeId, Project, UserId,
    };

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    struct Books {
        store: Arc<FlakyRepository>,
        aggregator: BalanceAggregator,
        ledger: PledgeLedger,
        cashbook: Cashbook,
        leader: UserId,
        committee: CommitteeId,
        project: ProjectId,
    }

    async fn books() -> Books {
        let repo = Arc::new(InMemoryRepository::new());
        let org = OrganizationId::new("org-1");
        let committee = CommitteeId::new("missions");
        let project = ProjectId::new("well");
        let leader = UserId::new("u-leader");
        repo.upsert_committee(Committee {
            id: committee.clone(),
            organization_id: org.clone(),
            name: "Missions".into(),
            description: None,
            status: MembershipStatus::Active,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        repo.upsert_project(Project {
            id: project.clone(),
            committee_id: committee.clone(),
            name: "Village well".into(),
            description: None,
        })
        .await
        .unwrap();
        repo.upsert_member(Member {
            id: MemberId::new("m-1"),
            organization_id: org.clone(),
            first_name: "Rosa".into(),
            last_name: "Vega".into(),
            email: None,
            phone: None,
            status: MembershipStatus::Active,
        })
        .await
        .unwrap();
        repo.upsert_org_membership(OrgMembership {
            organization_id: org,
            user_id: leader.clone(),
            role: OrgRole::Member,
            status: MembershipStatus::Active,
        })
        .await
        .unwrap();
        repo.upsert_committee_membership(CommitteeMembership {
            committee_id: committee.clone(),
            user_id: leader.clone(),
            role: CommitteeRole::Leader,
            status: MembershipStatus::Active,
        })
        .await
        .unwrap();

        let store = Arc::new(FlakyRepository::new(repo));
        let shared: Arc<dyn Repository> = store.clone();
        let resolver = AuthorizationResolver::new(shared.clone());
        Books {
            store,
            aggregator: BalanceAggregator::new(shared.clone()),
            ledger: PledgeLedger::new(shared.clone(), resolver.clone()),
            cashbook: Cashbook::new(shared, resolver),
            leader,
            committee,
            project,
        }
    }

    impl Books {
        async fn pledge(&self, total: i64, project: Option<ProjectId>) -> PledgeId {
            self.ledger
                .create_pledge(
                    NewPledge {
                        member_id: MemberId::new("m-1"),
                        committee_id: Some(self.committee.clone()),
                        project_id: project,
                        purpose: "Mission trip".into(),
                        total_amount: Decimal::from(total),
                        due_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                    },
                    &self.leader,
                )
                .await
                .unwrap()
                .id
        }

        async fn pay(&self, pledge_id: &PledgeId, amount: i64, date: NaiveDate) {
            self.ledger
                .register_payment(
                    PaymentRequest {
                        pledge_id: pledge_id.clone(),
                        amount: Decimal::from(amount),
                        payment_date: date,
                        method: PaymentMethod::Cash,
                        note: None,
                    },
                    &self.leader,
                )
                .await
                .unwrap();
        }

        async fn offering(&self, amount: i64, date: NaiveDate, project: Option<ProjectId>) {
            self.cashbook
                .record_offering(
                    NewOffering {
                        committee_id: self.committee.clone(),
                        project_id: project,
                        amount: Decimal::from(amount),
                        date,
                        concept: "Special offering".into(),
                    },
                    &self.leader,
                )
                .await
                .unwrap();
        }

        async fn expense(&self, amount: i64, date: NaiveDate, project: Option<ProjectId>) {
            self.cashbook
                .record_expense(
                    NewExpense {
                        committee_id: self.committee.clone(),
                        project_id: project,
                        amount: Decimal::from(amount),
                        date,
                        category: "travel".into(),
                        concept: None,
                    },
                    &self.leader,
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn balance_adds_payments_and_offerings_minus_expenses() {
        let b = books().await;
        let first = b.pledge(60, None).await;
        let second = b.pledge(100, None).await;
        b.pay(&first, 30, day(1, 10)).await;
        b.pay(&first, 20, day(2, 10)).await;
        b.pay(&second, 50, day(3, 10)).await;
        b.offering(100, day(1, 15), None).await;
        b.expense(75, day(2, 20), None).await;

        let balance = b
            .aggregator
            .compute_committee_balance(&b.committee, None)
            .await
            .unwrap();
        assert_eq!(balance.pledge_income, Decimal::from(100));
        assert_eq!(balance.total_income, Decimal::from(200));
        assert_eq!(balance.total_expenses, Decimal::from(75));
        assert_eq!(balance.balance, Decimal::from(125));
    }

    #[tokio::test]
    async fn date_range_is_inclusive_on_both_ends() {
        let b = books().await;
        let pledge = b.pledge(500, None).await;
        b.pay(&pledge, 10, day(1, 31)).await;
        b.pay(&pledge, 20, day(2, 1)).await;
        b.pay(&pledge, 40, day(2, 29)).await;
        b.pay(&pledge, 80, day(3, 1)).await;
        b.offering(5, day(2, 1), None).await;
        b.expense(7, day(3, 1), None).await;

        let february = DateRange::new(day(2, 1), day(2, 29)).unwrap();
        let balance = b
            .aggregator
            .compute_committee_balance(&b.committee, Some(february))
            .await
            .unwrap();
        assert_eq!(balance.pledge_income, Decimal::from(60));
        assert_eq!(balance.offering_income, Decimal::from(5));
        assert_eq!(balance.total_expenses, Decimal::ZERO);
        assert_eq!(balance.balance, Decimal::from(65));
    }

    #[tokio::test]
    async fn overspending_is_reported_not_hidden() {
        let b = books().await;
        b.offering(50, day(1, 1), None).await;
        b.expense(80, day(1, 2), None).await;
        let balance = b
            .aggregator
            .compute_committee_balance(&b.committee, None)
            .await
            .unwrap();
        assert_eq!(balance.balance, Decimal::from(-30));
        assert!(balance.is_overspent());
    }

    #[tokio::test]
    async fn empty_committee_has_zero_balance() {
        let b = books().await;
        let balance = b
            .aggregator
            .compute_committee_balance(&CommitteeId::new("unknown"), None)
            .await
            .unwrap();
        assert_eq!(balance, Balance::default());
    }

    #[tokio::test]
    async fn project_balance_only_counts_tagged_records() {
        let b = books().await;
        let tagged = b.pledge(100, Some(b.project.clone())).await;
        let untagged = b.pledge(100, None).await;
        b.pay(&tagged, 40, day(4, 1)).await;
        b.pay(&untagged, 90, day(4, 1)).await;
        b.offering(10, day(4, 2), Some(b.project.clone())).await;
        b.offering(1_000, day(4, 2), None).await;
        b.expense(15, day(4, 3), Some(b.project.clone())).await;

        let balance = b
            .aggregator
            .compute_project_balance(&b.project, None)
            .await
            .unwrap();
        assert_eq!(balance.total_income, Decimal::from(50));
        assert_eq!(balance.total_expenses, Decimal::from(15));
        assert_eq!(balance.balance, Decimal::from(35));

        assert!(matches!(
            b.aggregator
                .compute_project_balance(&ProjectId::new("nope"), None)
                .await,
            Err(BalanceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn summary_counts_states_and_skips_cancelled_amounts() {
        let b = books().await;
        let done = b.pledge(40, None).await;
        b.pay(&done, 40, day(5, 1)).await;
        let open = b.pledge(100, None).await;
        b.pay(&open, 25, day(5, 1)).await;
        let dropped = b.pledge(70, None).await;
        b.ledger.cancel_pledge(&dropped, &b.leader).await.unwrap();

        let summary = b
            .aggregator
            .summarize_pledges(&PledgeFilter::for_committee(b.committee.clone()))
            .await
            .unwrap();
        assert_eq!(
            (summary.active, summary.completed, summary.cancelled),
            (1, 1, 1)
        );
        assert_eq!(summary.count(), 3);
        assert_eq!(summary.total_pledged, Decimal::from(140));
        assert_eq!(summary.total_collected, Decimal::from(65));
        assert_eq!(summary.total_pending, Decimal::from(75));
    }

    #[tokio::test]
    async fn brief_outage_does_not_fail_the_balance() {
        let b = books().await;
        let pledge = b.pledge(100, None).await;
        b.pay(&pledge, 60, day(6, 1)).await;
        b.expense(20, day(6, 2), None).await;

        b.store.fail_next(2);
        let balance = b
            .aggregator
            .compute_committee_balance(&b.committee, None)
            .await
            .unwrap();
        assert_eq!(balance.balance, Decimal::from(40));
        assert_eq!(b.store.injected(), 2);
    }

    #[tokio::test]
    async fn lasting_outage_surfaces_as_store_unavailable() {
        let b = books().await;
        let aggregator = BalanceAggregator::new(b.store.clone()).with_read_retry(ReadRetry {
            max_attempts: 2,
            backoff_ms: 1,
        });

        b.store.fail_next(10);
        let err = aggregator
            .summarize_pledges(&PledgeFilter::for_committee(b.committee.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, BalanceError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(b.store.injected(), 2);
    }

    #[test]
    fn backend_faults_are_typed_storage_errors() {
        let err = BalanceError::from(StorageError::Backend("disk full".into()));
        assert!(matches!(err, BalanceError::Storage(_)));
        assert!(!err.is_retryable());
    }
}

use crate::error::{LedgerError, LedgerResult};
use crate::guard::{permits, Guard, Need};
use crate::retry::RetryPolicy;
use crate::transitioner::StateTransitioner;
use chrono::{NaiveDate, Utc};
use pledgebook_authz::{AccessScope, AuthorizationResolver};
use pledgebook_storage::{DeleteOutcome, PledgeFilter, Repository};
use pledgebook_types::{
    CommitteeId, MemberId, Payment, PaymentId, PaymentMethod, Pledge, PledgeId, PledgeState,
    ProjectId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Input for [`PledgeLedger::create_pledge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPledge {
    pub member_id: MemberId,
    /// `None` makes an organization-wide pledge.
    #[serde(default)]
    pub committee_id: Option<CommitteeId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub purpose: String,
    pub total_amount: Decimal,
    pub due_date: NaiveDate,
}

/// Input for [`PledgeLedger::register_payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub pledge_id: PledgeId,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    #[serde(default)]
    pub note: Option<String>,
}

/// Editable pledge fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeUpdate {
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

/// A pledge with its payment history and progress figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeDetail {
    pub pledge: Pledge,
    /// Oldest first.
    pub payments: Vec<Payment>,
    pub pending_amount: Decimal,
    /// `collected / total`, unclamped.
    pub progress_ratio: Decimal,
    /// Rounded and clamped to `0..=100`.
    pub progress_percent: u8,
}

/// Pledge and payment operations, each authorized and version-checked.
///
/// The collected amount of a pledge is never trusted from a previous read:
/// every payment re-derives it from the stored payments and commits through
/// the pledge's version, retrying on contention.
pub struct PledgeLedger {
    repo: Arc<dyn Repository>,
    guard: Guard,
    policy: RetryPolicy,
}

impl PledgeLedger {
    pub fn new(repo: Arc<dyn Repository>, resolver: AuthorizationResolver) -> Self {
        Self {
            repo,
            guard: Guard::new(resolver),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Create an active pledge.
    ///
    /// The pledge id is fixed before the first attempt, so a retry after a
    /// lost acknowledgement returns the pledge that already landed.
    pub async fn create_pledge(&self, input: NewPledge, actor: &UserId) -> LedgerResult<Pledge> {
        if input.purpose.trim().is_empty() {
            return Err(LedgerError::Validation("purpose must not be empty".into()));
        }
        if input.total_amount <= Decimal::ZERO {
            return Err(LedgerError::Validation("total amount must be positive".into()));
        }
        let pledge_id = PledgeId::generate();
        self.policy
            .run("create_pledge", || self.try_create_pledge(&input, &pledge_id, actor))
            .await
    }

    async fn try_create_pledge(
        &self,
        input: &NewPledge,
        pledge_id: &PledgeId,
        actor: &UserId,
    ) -> LedgerResult<Pledge> {
        let Some(member) = self.repo.get_member(&input.member_id).await? else {
            return Err(self.guard.hidden(actor, "member").await);
        };
        let scope = match input.committee_id {
            Some(ref committee_id) => AccessScope::Committee(committee_id.clone()),
            None => AccessScope::Organization(member.organization_id.clone()),
        };
        self.guard.require(actor, &scope, Need::Manage).await?;

        if let Some(ref committee_id) = input.committee_id {
            let committee = self
                .repo
                .get_committee(committee_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("committee {}", committee_id)))?;
            if committee.organization_id != member.organization_id {
                return Err(self.guard.hidden(actor, "member").await);
            }
            if !committee.status.is_active() {
                return Err(LedgerError::Validation(format!(
                    "committee {} is inactive",
                    committee_id
                )));
            }
        }
        if !member.status.is_active() {
            return Err(LedgerError::Validation(format!(
                "member {} is inactive",
                member.id
            )));
        }
        if let Some(ref project_id) = input.project_id {
            let project = self
                .repo
                .get_project(project_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("project {}", project_id)))?;
            if input.committee_id.as_ref() != Some(&project.committee_id) {
                return Err(LedgerError::Validation(format!(
                    "project {} does not belong to the pledge's committee",
                    project_id
                )));
            }
        }

        if let Some(existing) = self.repo.get_pledge(pledge_id).await? {
            debug!(pledge_id = %pledge_id, "Pledge stored by an earlier attempt");
            return Ok(existing);
        }

        let now = Utc::now();
        let pledge = Pledge {
            id: pledge_id.clone(),
            organization_id: member.organization_id,
            member_id: member.id,
            committee_id: input.committee_id.clone(),
            project_id: input.project_id.clone(),
            purpose: input.purpose.trim().to_string(),
            total_amount: input.total_amount,
            collected_amount: Decimal::ZERO,
            due_date: input.due_date,
            state: PledgeState::Active,
            version: 0,
            created_by: actor.clone(),
            last_updated_by: actor.clone(),
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_pledge(pledge.clone()).await?;

        info!(
            pledge_id = %pledge.id,
            member_id = %pledge.member_id,
            committee_id = ?pledge.committee_id,
            total = %pledge.total_amount,
            actor = %actor,
            "Pledge created"
        );
        Ok(pledge)
    }

    /// Record a payment and refresh the pledge's collected amount and state.
    ///
    /// A non-positive amount is refused like an overpayment, with the current
    /// pending amount attached.
    ///
    /// Replaying the same request after a lost acknowledgement does not pay
    /// twice: the payment id is fixed before the first attempt and an attempt
    /// that finds it already stored returns it.
    pub async fn register_payment(
        &self,
        request: PaymentRequest,
        actor: &UserId,
    ) -> LedgerResult<Payment> {
        let payment_id = PaymentId::generate();
        self.policy
            .run("register_payment", || self.try_register_payment(&request, &payment_id, actor))
            .await
    }

    async fn try_register_payment(
        &self,
        request: &PaymentRequest,
        payment_id: &PaymentId,
        actor: &UserId,
    ) -> LedgerResult<Payment> {
        let pledge = self
            .load_guarded(&request.pledge_id, actor, Need::Manage)
            .await?;
        if pledge.state == PledgeState::Cancelled {
            return Err(LedgerError::InvalidState {
                pledge_id: pledge.id,
                state: pledge.state,
            });
        }

        let payments = self.repo.list_payments_for_pledge(&pledge.id).await?;
        if let Some(existing) = payments.iter().find(|p| &p.id == payment_id) {
            return Ok(existing.clone());
        }
        let collected: Decimal = payments.iter().map(|p| p.amount).sum();
        let pending = pledge.total_amount - collected;
        if request.amount <= Decimal::ZERO || request.amount > pending {
            return Err(LedgerError::AmountExceedsPending {
                requested: request.amount,
                pending: pending.max(Decimal::ZERO),
            });
        }

        let now = Utc::now();
        let payment = Payment {
            id: payment_id.clone(),
            pledge_id: pledge.id.clone(),
            amount: request.amount,
            payment_date: request.payment_date,
            method: request.method,
            note: request.note.clone(),
            registered_by: actor.clone(),
            created_at: now,
        };

        let expected_version = pledge.version;
        let previous_state = pledge.state;
        let mut next = pledge;
        next.collected_amount = collected + request.amount;
        next.state = StateTransitioner::derive_state(
            next.state,
            next.collected_amount,
            next.total_amount,
            next.due_date,
            now.date_naive(),
        );
        next.last_updated_by = actor.clone();
        next.updated_at = now;

        let stored = self
            .repo
            .commit_payment(payment.clone(), next, expected_version)
            .await?;

        info!(
            pledge_id = %stored.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            collected = %stored.collected_amount,
            actor = %actor,
            "Payment registered"
        );
        if stored.state != previous_state {
            info!(
                pledge_id = %stored.id,
                from = %previous_state,
                to = %stored.state,
                "Pledge state transitioned"
            );
        }
        Ok(payment)
    }

    pub async fn get_pledge_detail(
        &self,
        pledge_id: &PledgeId,
        actor: &UserId,
    ) -> LedgerResult<PledgeDetail> {
        self.policy
            .run("get_pledge_detail", || self.try_get_pledge_detail(pledge_id, actor))
            .await
    }

    async fn try_get_pledge_detail(
        &self,
        pledge_id: &PledgeId,
        actor: &UserId,
    ) -> LedgerResult<PledgeDetail> {
        let pledge = self.load_guarded(pledge_id, actor, Need::Read).await?;
        let payments = self.repo.list_payments_for_pledge(pledge_id).await?;
        Ok(PledgeDetail {
            pending_amount: pledge.pending_amount(),
            progress_ratio: pledge.progress_ratio(),
            progress_percent: pledge.progress_percent(),
            pledge,
            payments,
        })
    }

    /// Change purpose, total or due date; the state is re-derived.
    pub async fn update_pledge(
        &self,
        pledge_id: &PledgeId,
        update: PledgeUpdate,
        actor: &UserId,
    ) -> LedgerResult<Pledge> {
        if let Some(ref purpose) = update.purpose {
            if purpose.trim().is_empty() {
                return Err(LedgerError::Validation("purpose must not be empty".into()));
            }
        }
        if update.total_amount.is_some_and(|total| total <= Decimal::ZERO) {
            return Err(LedgerError::Validation("total amount must be positive".into()));
        }
        self.policy
            .run("update_pledge", || self.try_update_pledge(pledge_id, &update, actor))
            .await
    }

    async fn try_update_pledge(
        &self,
        pledge_id: &PledgeId,
        update: &PledgeUpdate,
        actor: &UserId,
    ) -> LedgerResult<Pledge> {
        let pledge = self.load_guarded(pledge_id, actor, Need::Manage).await?;
        if pledge.state == PledgeState::Cancelled {
            return Err(LedgerError::InvalidState {
                pledge_id: pledge.id,
                state: pledge.state,
            });
        }

        let expected_version = pledge.version;
        let mut next = pledge;
        if let Some(ref purpose) = update.purpose {
            next.purpose = purpose.trim().to_string();
        }
        if let Some(total) = update.total_amount {
            if total < next.collected_amount {
                return Err(LedgerError::Validation(format!(
                    "total {} is below the collected amount {}",
                    total, next.collected_amount
                )));
            }
            next.total_amount = total;
        }
        if let Some(due_date) = update.due_date {
            next.due_date = due_date;
        }
        let now = Utc::now();
        next.state = StateTransitioner::derive_state(
            next.state,
            next.collected_amount,
            next.total_amount,
            next.due_date,
            now.date_naive(),
        );
        next.last_updated_by = actor.clone();
        next.updated_at = now;

        let stored = self.repo.put_pledge(next, expected_version).await?;
        info!(pledge_id = %stored.id, state = %stored.state, actor = %actor, "Pledge updated");
        Ok(stored)
    }

    /// Cancel a pledge. Cancelling an already cancelled pledge is a no-op.
    pub async fn cancel_pledge(&self, pledge_id: &PledgeId, actor: &UserId) -> LedgerResult<Pledge> {
        self.policy
            .run("cancel_pledge", || self.try_cancel_pledge(pledge_id, actor))
            .await
    }

    async fn try_cancel_pledge(&self, pledge_id: &PledgeId, actor: &UserId) -> LedgerResult<Pledge> {
        let pledge = self.load_guarded(pledge_id, actor, Need::Manage).await?;
        if pledge.state == PledgeState::Cancelled {
            return Ok(pledge);
        }

        let expected_version = pledge.version;
        let mut next = pledge;
        next.state = PledgeState::Cancelled;
        next.last_updated_by = actor.clone();
        next.updated_at = Utc::now();

        let stored = self.repo.put_pledge(next, expected_version).await?;
        info!(pledge_id = %stored.id, actor = %actor, "Pledge cancelled");
        Ok(stored)
    }

    /// Delete a pledge that has no payments. Refused with
    /// `HasDependentPayments` once any payment exists.
    pub async fn delete_pledge(&self, pledge_id: &PledgeId, actor: &UserId) -> LedgerResult<()> {
        let sent = AtomicBool::new(false);
        self.policy
            .run("delete_pledge", || self.try_delete_pledge(pledge_id, actor, &sent))
            .await
    }

    async fn try_delete_pledge(
        &self,
        pledge_id: &PledgeId,
        actor: &UserId,
        sent: &AtomicBool,
    ) -> LedgerResult<()> {
        // Only an attempt that passed the guard sets `sent`, so a pledge gone
        // on replay was deleted by that attempt.
        let replay = sent.load(Ordering::SeqCst);
        if replay && self.repo.get_pledge(pledge_id).await?.is_none() {
            debug!(pledge_id = %pledge_id, "Pledge deleted by an earlier attempt");
            return Ok(());
        }
        self.load_guarded(pledge_id, actor, Need::Manage).await?;
        sent.store(true, Ordering::SeqCst);

        match self.repo.delete_pledge_if_unpaid(pledge_id).await? {
            DeleteOutcome::Deleted => {
                info!(pledge_id = %pledge_id, actor = %actor, "Pledge deleted");
                Ok(())
            }
            DeleteOutcome::NotFound => Err(LedgerError::NotFound(format!("pledge {}", pledge_id))),
            DeleteOutcome::HasPayments(payments) => Err(LedgerError::HasDependentPayments {
                pledge_id: pledge_id.clone(),
                payments,
            }),
        }
    }

    /// Pledges matching `filter` that `actor` may read, newest first.
    ///
    /// A filter naming a committee the actor cannot read is refused outright;
    /// otherwise unreadable pledges are silently dropped.
    pub async fn list_pledges(
        &self,
        actor: &UserId,
        filter: PledgeFilter,
    ) -> LedgerResult<Vec<Pledge>> {
        self.policy
            .run("list_pledges", || self.try_list_pledges(actor, &filter))
            .await
    }

    async fn try_list_pledges(
        &self,
        actor: &UserId,
        filter: &PledgeFilter,
    ) -> LedgerResult<Vec<Pledge>> {
        if let Some(ref committee_id) = filter.committee_id {
            self.guard
                .require(actor, &AccessScope::Committee(committee_id.clone()), Need::Read)
                .await?;
        }

        let candidates = self.repo.list_pledges(filter).await?;
        let mut scope = self.guard.resolver().scoped(actor.clone());
        let mut visible = Vec::with_capacity(candidates.len());
        for pledge in candidates {
            let decision = scope.decide(&AccessScope::of_pledge(&pledge)).await?;
            if permits(&decision, Need::Read) {
                visible.push(pledge);
            }
        }
        debug!(
            actor = %actor,
            visible = visible.len(),
            scopes = scope.resolved(),
            "Listed pledges"
        );
        Ok(visible)
    }

    async fn load_guarded(
        &self,
        pledge_id: &PledgeId,
        actor: &UserId,
        need: Need,
    ) -> LedgerResult<Pledge> {
        let Some(pledge) = self.repo.get_pledge(pledge_id).await? else {
            return Err(self.guard.hidden(actor, "pledge").await);
        };
        self.guard
            .require(actor, &AccessScope::of_pledge(&pledge), need)
            .await?;
        Ok(pledge)
    }
}

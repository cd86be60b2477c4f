use crate::error::{LedgerError, LedgerResult};
use crate::guard::{Guard, Need};
use crate::retry::RetryPolicy;
use chrono::{NaiveDate, Utc};
use pledgebook_authz::{AccessScope, AuthorizationResolver};
use pledgebook_storage::{Repository, StorageError, StorageResult};
use pledgebook_types::{CommitteeId, Expense, ExpenseId, Offering, OfferingId, ProjectId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOffering {
    pub committee_id: CommitteeId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub concept: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpense {
    pub committee_id: CommitteeId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub category: String,
    #[serde(default)]
    pub concept: Option<String>,
}

/// Committee income and outflow outside of pledges. Append-only.
///
/// Record ids are fixed before the first attempt. An insert that collides
/// with its own id on a retry means the earlier attempt landed.
pub struct Cashbook {
    repo: Arc<dyn Repository>,
    guard: Guard,
    policy: RetryPolicy,
}

impl Cashbook {
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

    pub async fn record_offering(
        &self,
        input: NewOffering,
        actor: &UserId,
    ) -> LedgerResult<Offering> {
        positive(input.amount)?;
        let concept = non_blank(&input.concept, "concept")?;
        let offering = Offering {
            id: OfferingId::generate(),
            committee_id: input.committee_id,
            project_id: input.project_id,
            amount: input.amount,
            date: input.date,
            concept,
            registered_by: actor.clone(),
            created_at: Utc::now(),
        };

        let sent = AtomicBool::new(false);
        self.policy
            .run("record_offering", || async {
                self.check_target(&offering.committee_id, offering.project_id.as_ref(), actor)
                    .await?;
                let inserted = self.repo.insert_offering(offering.clone()).await;
                landed(inserted, &sent, offering.id.as_str())
            })
            .await?;
        info!(
            offering_id = %offering.id,
            committee_id = %offering.committee_id,
            amount = %offering.amount,
            actor = %actor,
            "Offering recorded"
        );
        Ok(offering)
    }

    pub async fn record_expense(&self, input: NewExpense, actor: &UserId) -> LedgerResult<Expense> {
        positive(input.amount)?;
        let category = non_blank(&input.category, "category")?;
        let expense = Expense {
            id: ExpenseId::generate(),
            committee_id: input.committee_id,
            project_id: input.project_id,
            amount: input.amount,
            date: input.date,
            category,
            concept: input
                .concept
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            registered_by: actor.clone(),
            created_at: Utc::now(),
        };

        let sent = AtomicBool::new(false);
        self.policy
            .run("record_expense", || async {
                self.check_target(&expense.committee_id, expense.project_id.as_ref(), actor)
                    .await?;
                let inserted = self.repo.insert_expense(expense.clone()).await;
                landed(inserted, &sent, expense.id.as_str())
            })
            .await?;
        info!(
            expense_id = %expense.id,
            committee_id = %expense.committee_id,
            amount = %expense.amount,
            category = %expense.category,
            actor = %actor,
            "Expense recorded"
        );
        Ok(expense)
    }

    async fn check_target(
        &self,
        committee_id: &CommitteeId,
        project_id: Option<&ProjectId>,
        actor: &UserId,
    ) -> LedgerResult<()> {
        self.guard
            .require(actor, &AccessScope::Committee(committee_id.clone()), Need::Manage)
            .await?;

        let committee = self
            .repo
            .get_committee(committee_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("committee {}", committee_id)))?;
        if !committee.status.is_active() {
            return Err(LedgerError::Validation(format!(
                "committee {} is inactive",
                committee_id
            )));
        }

        if let Some(project_id) = project_id {
            let project = self
                .repo
                .get_project(project_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("project {}", project_id)))?;
            if &project.committee_id != committee_id {
                return Err(LedgerError::Validation(format!(
                    "project {} belongs to another committee",
                    project_id
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of one insert attempt. A conflict after an earlier attempt
/// reached the store is that attempt's record.
fn landed(inserted: StorageResult<()>, sent: &AtomicBool, id: &str) -> LedgerResult<()> {
    let replay = sent.swap(true, Ordering::SeqCst);
    match inserted {
        Err(StorageError::Conflict(_)) if replay => {
            debug!(record_id = id, "Record stored by an earlier attempt");
            Ok(())
        }
        other => other.map_err(LedgerError::from),
    }
}

fn positive(amount: Decimal) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation("amount must be positive".into()));
    }
    Ok(())
}

fn non_blank(value: &str, field: &str) -> LedgerResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

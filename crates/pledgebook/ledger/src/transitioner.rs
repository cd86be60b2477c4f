//! Pledge lifecycle.
//!
//! The state of a pledge is a pure function of its amounts, its due date and
//! whether it was cancelled. [`StateTransitioner::derive_state`] is that
//! function; everything else here only persists its result.

use crate::error::{LedgerError, LedgerResult};
use crate::retry::RetryPolicy;
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use pledgebook_storage::{PledgeFilter, Repository};
use pledgebook_types::{PledgeId, PledgeState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub pledge_id: PledgeId,
    pub from: PledgeState,
    pub to: PledgeState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Summary of one sweep over all non-cancelled pledges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub transitioned: usize,
    /// Pledges deleted between listing and recompute.
    pub skipped: usize,
    pub failed: usize,
    pub transitions: Vec<Transition>,
}

impl SweepReport {
    fn record(&mut self, pledge_id: &PledgeId, outcome: LedgerResult<Transition>) {
        self.examined += 1;
        match outcome {
            Ok(transition) if transition.changed() => {
                self.transitioned += 1;
                self.transitions.push(transition);
            }
            Ok(_) => {}
            Err(LedgerError::NotFound(_)) => {
                self.skipped += 1;
                debug!(pledge_id = %pledge_id, "Pledge vanished before recompute");
            }
            Err(err) => {
                self.failed += 1;
                warn!(pledge_id = %pledge_id, error = %err, "Failed to recompute pledge");
            }
        }
    }
}

pub struct StateTransitioner {
    repo: Arc<dyn Repository>,
    policy: RetryPolicy,
    concurrency: usize,
}

impl StateTransitioner {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            policy: RetryPolicy::default(),
            concurrency: 8,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Maximum number of pledges recomputed at once during a sweep.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Lifecycle rule.
    ///
    /// Cancelled is sticky. Otherwise a fully collected pledge is completed,
    /// even past its due date; an unpaid pledge whose due date has passed is
    /// expired; anything else is active.
    pub fn derive_state(
        current: PledgeState,
        collected: Decimal,
        total: Decimal,
        due_date: NaiveDate,
        today: NaiveDate,
    ) -> PledgeState {
        if current == PledgeState::Cancelled {
            PledgeState::Cancelled
        } else if collected >= total {
            PledgeState::Completed
        } else if due_date < today {
            PledgeState::Expired
        } else {
            PledgeState::Active
        }
    }

    /// Re-derive and persist the state of one pledge as of today (UTC).
    pub async fn recompute(&self, pledge_id: &PledgeId) -> LedgerResult<Transition> {
        self.recompute_at(pledge_id, Utc::now().date_naive()).await
    }

    /// Re-derive and persist the state of one pledge as of `today`.
    ///
    /// Idempotent: an unchanged state is not written.
    pub async fn recompute_at(
        &self,
        pledge_id: &PledgeId,
        today: NaiveDate,
    ) -> LedgerResult<Transition> {
        self.policy
            .run("recompute", || self.try_recompute(pledge_id, today))
            .await
    }

    async fn try_recompute(
        &self,
        pledge_id: &PledgeId,
        today: NaiveDate,
    ) -> LedgerResult<Transition> {
        let pledge = self
            .repo
            .get_pledge(pledge_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("pledge {}", pledge_id)))?;

        let next = Self::derive_state(
            pledge.state,
            pledge.collected_amount,
            pledge.total_amount,
            pledge.due_date,
            today,
        );
        let transition = Transition {
            pledge_id: pledge.id.clone(),
            from: pledge.state,
            to: next,
        };
        if !transition.changed() {
            return Ok(transition);
        }

        let expected_version = pledge.version;
        let mut updated = pledge;
        updated.state = next;
        updated.updated_at = Utc::now();
        self.repo.put_pledge(updated, expected_version).await?;

        info!(
            pledge_id = %transition.pledge_id,
            from = %transition.from,
            to = %transition.to,
            "Pledge state transitioned"
        );
        Ok(transition)
    }

    /// Recompute every non-cancelled pledge as of today (UTC).
    pub async fn sweep_all(&self) -> LedgerResult<SweepReport> {
        self.sweep_all_at(Utc::now().date_naive()).await
    }

    /// Recompute every non-cancelled pledge as of `today`.
    ///
    /// Failures on individual pledges are counted and logged; only a failure
    /// to list pledges aborts the sweep. A pledge deleted mid-sweep is skipped.
    pub async fn sweep_all_at(&self, today: NaiveDate) -> LedgerResult<SweepReport> {
        let filter = PledgeFilter::default().with_states([
            PledgeState::Active,
            PledgeState::Completed,
            PledgeState::Expired,
        ]);
        let pledges = self
            .policy
            .run("sweep_list", || async {
                self.repo.list_pledges(&filter).await.map_err(LedgerError::from)
            })
            .await?;
        debug!(count = pledges.len(), %today, "Sweeping pledges");

        let outcomes: Vec<(PledgeId, LedgerResult<Transition>)> =
            stream::iter(pledges.into_iter().map(|pledge| async move {
                let outcome = self.recompute_at(&pledge.id, today).await;
                (pledge.id, outcome)
            }))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (pledge_id, outcome) in outcomes {
            report.record(&pledge_id, outcome);
        }

        info!(
            examined = report.examined,
            transitioned = report.transitioned,
            skipped = report.skipped,
            failed = report.failed,
            "Sweep complete"
        );
        Ok(report)
    }
}

use crate::ids::{
    CommitteeId, ExpenseId, MemberId, OfferingId, OrganizationId, PaymentId, PledgeId, ProjectId,
    UserId,
};
use crate::vocabulary::{CommitteeRole, MembershipStatus, OrgRole, PaymentMethod, PledgeState};
use crate::InvalidDateRange;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Unique, URL-safe.
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMembership {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role: OrgRole,
    pub status: MembershipStatus,
}

/// A sub-ledger scope inside an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    pub id: CommitteeId,
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMembership {
    pub committee_id: CommitteeId,
    pub user_id: UserId,
    pub role: CommitteeRole,
    pub status: MembershipStatus,
}

/// The person a pledge is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub organization_id: OrganizationId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub status: MembershipStatus,
}

impl Member {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub committee_id: CommitteeId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A fixed-amount financial commitment made by a member.
///
/// `collected_amount` is a denormalized copy of the sum of the pledge's
/// payments. It is only ever written together with a payment insert (or a
/// re-derivation from the payment rows), and `version` is bumped on every
/// write so concurrent writers can detect each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pledge {
    pub id: PledgeId,
    pub organization_id: OrganizationId,
    pub member_id: MemberId,
    /// `None` for organization-wide pledges.
    pub committee_id: Option<CommitteeId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub purpose: String,
    pub total_amount: Decimal,
    pub collected_amount: Decimal,
    pub due_date: NaiveDate,
    pub state: PledgeState,
    pub version: u64,
    pub created_by: UserId,
    pub last_updated_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pledge {
    /// Amount still owed; never negative.
    pub fn pending_amount(&self) -> Decimal {
        (self.total_amount - self.collected_amount).max(Decimal::ZERO)
    }

    /// Raw `collected / total` ratio, unclamped. Zero when the total is zero.
    pub fn progress_ratio(&self) -> Decimal {
        if self.total_amount.is_zero() {
            return Decimal::ZERO;
        }
        self.collected_amount / self.total_amount
    }

    /// `round(collected / total * 100)`, clamped to `0..=100` for display.
    pub fn progress_percent(&self) -> u8 {
        let percent = (self.progress_ratio() * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
        percent.to_u8().unwrap_or(0)
    }
}

/// Append-only settlement against a pledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub pledge_id: PledgeId,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    #[serde(default)]
    pub note: Option<String>,
    pub registered_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Committee income not tied to a pledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,
    pub committee_id: CommitteeId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub concept: String,
    pub registered_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Committee outflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub committee_id: CommitteeId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub category: String,
    #[serde(default)]
    pub concept: Option<String>,
    pub registered_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidDateRange> {
        if start > end {
            return Err(InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

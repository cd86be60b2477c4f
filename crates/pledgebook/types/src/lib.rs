//! Pledgebook Types - the shared vocabulary of the pledge/payment ledger.
//!
//! Roles, statuses, pledge states and payment methods are closed enums. Values
//! read from a store or a transport are parsed through [`std::str::FromStr`] and
//! unknown strings are rejected instead of being carried around as text.

#![deny(unsafe_code)]

mod ids;
mod records;
mod vocabulary;

pub use ids::{
    CommitteeId, ExpenseId, MemberId, OfferingId, OrganizationId, PaymentId, PledgeId, ProjectId,
    UserId,
};
pub use records::{
    Committee, CommitteeMembership, DateRange, Expense, Member, OrgMembership, Offering,
    Organization, Payment, Pledge, Project,
};
pub use vocabulary::{
    CommitteeRole, MembershipStatus, OrgRole, ParseEnumError, PaymentMethod, PledgeState,
};

/// Error raised when a [`DateRange`] is built with `start > end`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date range: {start} is after {end}")]
pub struct InvalidDateRange {
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
}

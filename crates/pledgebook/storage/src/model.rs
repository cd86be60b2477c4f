use pledgebook_types::{CommitteeId, MemberId, OrganizationId, Pledge, PledgeState, ProjectId};
use serde::{Deserialize, Serialize};

/// Generic query window for paged reads. `limit == 0` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Pledge listing filter. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeFilter {
    pub organization_id: Option<OrganizationId>,
    pub committee_id: Option<CommitteeId>,
    pub member_id: Option<MemberId>,
    pub project_id: Option<ProjectId>,
    /// Any-of; empty matches every state.
    #[serde(default)]
    pub states: Vec<PledgeState>,
    #[serde(default)]
    pub window: QueryWindow,
}

impl PledgeFilter {
    pub fn for_committee(committee_id: CommitteeId) -> Self {
        Self {
            committee_id: Some(committee_id),
            ..Default::default()
        }
    }

    pub fn with_states(mut self, states: impl IntoIterator<Item = PledgeState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn matches(&self, pledge: &Pledge) -> bool {
        if let Some(ref org) = self.organization_id {
            if &pledge.organization_id != org {
                return false;
            }
        }
        if let Some(ref committee) = self.committee_id {
            if pledge.committee_id.as_ref() != Some(committee) {
                return false;
            }
        }
        if let Some(ref member) = self.member_id {
            if &pledge.member_id != member {
                return false;
            }
        }
        if let Some(ref project) = self.project_id {
            if pledge.project_id.as_ref() != Some(project) {
                return false;
            }
        }
        self.states.is_empty() || self.states.contains(&pledge.state)
    }
}

/// Result of a guarded pledge deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Rejected; the pledge still has this many payments.
    HasPayments(usize),
}

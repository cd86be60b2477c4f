#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use pledgebook_storage::memory::InMemoryRepository;
use pledgebook_storage::{DirectoryStore, MembershipStore};
use pledgebook_types::{
    Committee, CommitteeId, CommitteeMembership, CommitteeRole, Member, MemberId,
    MembershipStatus, OrgMembership, OrgRole, Organization, OrganizationId, UserId,
};

pub const ORG: &str = "org-1";
pub const COMMITTEE: &str = "building";
pub const MEMBER: &str = "m-1";
pub const TREASURER: &str = "u-treasurer";

pub fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 12, 31).unwrap()
}

/// One organization, one committee with a treasurer, one member.
pub async fn seed(repo: &InMemoryRepository) {
    let now = Utc::now();
    repo.insert_organization(Organization {
        id: OrganizationId::new(ORG),
        name: "First Church".into(),
        slug: "first-church".into(),
        created_at: now,
    })
    .await
    .unwrap();
    repo.upsert_committee(Committee {
        id: CommitteeId::new(COMMITTEE),
        organization_id: OrganizationId::new(ORG),
        name: "Building".into(),
        description: Some("New sanctuary".into()),
        status: MembershipStatus::Active,
        created_at: now,
    })
    .await
    .unwrap();
    repo.upsert_member(Member {
        id: MemberId::new(MEMBER),
        organization_id: OrganizationId::new(ORG),
        first_name: "Luis".into(),
        last_name: "Mora".into(),
        email: Some("luis@example.org".into()),
        phone: None,
        status: MembershipStatus::Active,
    })
    .await
    .unwrap();
    repo.upsert_org_membership(OrgMembership {
        organization_id: OrganizationId::new(ORG),
        user_id: UserId::new(TREASURER),
        role: OrgRole::Member,
        status: MembershipStatus::Active,
    })
    .await
    .unwrap();
    repo.upsert_committee_membership(CommitteeMembership {
        committee_id: CommitteeId::new(COMMITTEE),
        user_id: UserId::new(TREASURER),
        role: CommitteeRole::Treasurer,
        status: MembershipStatus::Active,
    })
    .await
    .unwrap();
}

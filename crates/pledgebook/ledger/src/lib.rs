//! Pledgebook Ledger - pledges, payments and their lifecycle.
//!
//! [`PledgeLedger`] is the only writer of pledges and payments. Every
//! operation is authorized through [`pledgebook_authz::AuthorizationResolver`]
//! and every write goes through the pledge's version, so concurrent payments
//! against one pledge serialize instead of overwriting each other.
//! [`StateTransitioner`] owns the lifecycle rule and the periodic sweep, and
//! [`Cashbook`] records committee offerings and expenses.

#![deny(unsafe_code)]

mod cashbook;
mod error;
mod guard;
mod ledger;
mod retry;
mod transitioner;

pub use cashbook::{Cashbook, NewExpense, NewOffering};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{NewPledge, PaymentRequest, PledgeDetail, PledgeLedger, PledgeUpdate};
pub use retry::RetryPolicy;
pub use transitioner::{StateTransitioner, SweepReport, Transition};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use pledgebook_authz::AuthorizationResolver;
    use pledgebook_storage::memory::InMemoryRepository;
    use pledgebook_storage::{
        DirectoryStore, MembershipStore, PledgeFilter, PledgeStore, Repository,
    };
    use pledgebook_types::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        ledger: PledgeLedger,
        cashbook: Cashbook,
        admin: UserId,
        leader: UserId,
        secretary: UserId,
        outsider: UserId,
        committee: CommitteeId,
        member: MemberId,
    }

    fn due() -> NaiveDate {
        NaiveDate::from_ymd_opt(2099, 12, 31).unwrap()
    }

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let org = OrganizationId::new("org-a");
        let other_org = OrganizationId::new("org-b");
        let now = Utc::now();
        for (id, slug) in [(&org, "a"), (&other_org, "b")] {
            repo.insert_organization(Organization {
                id: id.clone(),
                name: slug.to_uppercase(),
                slug: slug.to_string(),
                created_at: now,
            })
            .await
            .unwrap();
        }
        let committee = CommitteeId::new("youth");
        repo.upsert_committee(Committee {
            id: committee.clone(),
            organization_id: org.clone(),
            name: "Youth".into(),
            description: None,
            status: MembershipStatus::Active,
            created_at: now,
        })
        .await
        .unwrap();
        let member = MemberId::new("m-ana");
        repo.upsert_member(Member {
            id: member.clone(),
            organization_id: org.clone(),
            first_name: "Ana".into(),
            last_name: "Diaz".into(),
            email: None,
            phone: None,
            status: MembershipStatus::Active,
        })
        .await
        .unwrap();

        let admin = UserId::new("u-admin");
        let leader = UserId::new("u-leader");
        let secretary = UserId::new("u-secretary");
        let outsider = UserId::new("u-outsider");
        for (user, org_id, role) in [
            (&admin, &org, OrgRole::Admin),
            (&leader, &org, OrgRole::Member),
            (&secretary, &org, OrgRole::Member),
            (&outsider, &other_org, OrgRole::Admin),
        ] {
            repo.upsert_org_membership(OrgMembership {
                organization_id: org_id.clone(),
                user_id: user.clone(),
                role,
                status: MembershipStatus::Active,
            })
            .await
            .unwrap();
        }
        for (user, role) in [
            (&leader, CommitteeRole::Leader),
            (&secretary, CommitteeRole::Secretary),
        ] {
            repo.upsert_committee_membership(CommitteeMembership {
                committee_id: committee.clone(),
                user_id: user.clone(),
                role,
                status: MembershipStatus::Active,
            })
            .await
            .unwrap();
        }

        let shared: Arc<dyn Repository> = repo.clone();
        let resolver = AuthorizationResolver::new(shared.clone());
        Fixture {
            ledger: PledgeLedger::new(shared.clone(), resolver.clone()),
            cashbook: Cashbook::new(shared, resolver),
            repo,
            admin,
            leader,
            secretary,
            outsider,
            committee,
            member,
        }
    }

    impl Fixture {
        fn new_pledge(&self, total: i64) -> NewPledge {
            NewPledge {
                member_id: self.member.clone(),
                committee_id: Some(self.committee.clone()),
                project_id: None,
                purpose: "New roof".into(),
                total_amount: dec(total),
                due_date: due(),
            }
        }

        fn payment(&self, pledge_id: &PledgeId, amount: i64) -> PaymentRequest {
            PaymentRequest {
                pledge_id: pledge_id.clone(),
                amount: dec(amount),
                payment_date: Utc::now().date_naive(),
                method: PaymentMethod::Cash,
                note: None,
            }
        }
    }

    #[tokio::test]
    async fn leader_creates_and_secretary_cannot() {
        let f = fixture().await;
        let pledge = f.ledger.create_pledge(f.new_pledge(500), &f.leader).await.unwrap();
        assert_eq!(pledge.state, PledgeState::Active);
        assert_eq!(pledge.collected_amount, Decimal::ZERO);
        assert_eq!(pledge.organization_id, OrganizationId::new("org-a"));

        let err = f
            .ledger
            .create_pledge(f.new_pledge(500), &f.secretary)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AuthorizationDenied));

        // Secretaries can still read.
        let detail = f.ledger.get_pledge_detail(&pledge.id, &f.secretary).await.unwrap();
        assert_eq!(detail.pending_amount, dec(500));
    }

    #[tokio::test]
    async fn create_validates_input() {
        let f = fixture().await;
        let mut zero = f.new_pledge(0);
        assert!(matches!(
            f.ledger.create_pledge(zero.clone(), &f.admin).await,
            Err(LedgerError::Validation(_))
        ));
        zero.total_amount = dec(10);
        zero.purpose = "   ".into();
        assert!(matches!(
            f.ledger.create_pledge(zero, &f.admin).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn org_wide_pledge_requires_global_admin() {
        let f = fixture().await;
        let mut input = f.new_pledge(100);
        input.committee_id = None;
        assert!(matches!(
            f.ledger.create_pledge(input.clone(), &f.leader).await,
            Err(LedgerError::AuthorizationDenied)
        ));
        let pledge = f.ledger.create_pledge(input, &f.admin).await.unwrap();
        assert_eq!(pledge.committee_id, None);
    }

    #[tokio::test]
    async fn missing_and_foreign_pledges_look_the_same() {
        let f = fixture().await;
        let pledge = f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        let ghost = PledgeId::new("ghost");

        // Admin of another organization: NotFound for both.
        for id in [&pledge.id, &ghost] {
            assert!(matches!(
                f.ledger.get_pledge_detail(id, &f.outsider).await,
                Err(LedgerError::NotFound(_))
            ));
        }
        // Non-admin: AuthorizationDenied for both.
        let nobody = UserId::new("u-nobody");
        for id in [&pledge.id, &ghost] {
            assert!(matches!(
                f.ledger.get_pledge_detail(id, &nobody).await,
                Err(LedgerError::AuthorizationDenied)
            ));
        }
    }

    #[tokio::test]
    async fn overpayment_is_rejected_and_nothing_changes() {
        let f = fixture().await;
        let pledge = f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        f.ledger
            .register_payment(f.payment(&pledge.id, 70), &f.leader)
            .await
            .unwrap();

        let err = f
            .ledger
            .register_payment(f.payment(&pledge.id, 31), &f.leader)
            .await
            .unwrap_err();
        match err {
            LedgerError::AmountExceedsPending { requested, pending } => {
                assert_eq!(requested, dec(31));
                assert_eq!(pending, dec(30));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let detail = f.ledger.get_pledge_detail(&pledge.id, &f.admin).await.unwrap();
        assert_eq!(detail.payments.len(), 1);
        assert_eq!(detail.pledge.collected_amount, dec(70));
        assert_eq!(detail.progress_percent, 70);
    }

    #[tokio::test]
    async fn non_positive_payment_reports_pending_amount() {
        let f = fixture().await;
        let pledge = f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        for amount in [0, -5] {
            assert!(matches!(
                f.ledger
                    .register_payment(f.payment(&pledge.id, amount), &f.leader)
                    .await,
                Err(LedgerError::AmountExceedsPending { pending, .. }) if pending == dec(100)
            ));
        }
    }

    #[tokio::test]
    async fn cancelled_pledge_takes_no_payments() {
        let f = fixture().await;
        let pledge = f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        let cancelled = f.ledger.cancel_pledge(&pledge.id, &f.leader).await.unwrap();
        assert_eq!(cancelled.state, PledgeState::Cancelled);

        let again = f.ledger.cancel_pledge(&pledge.id, &f.leader).await.unwrap();
        assert_eq!(again.version, cancelled.version);

        assert!(matches!(
            f.ledger
                .register_payment(f.payment(&pledge.id, 10), &f.leader)
                .await,
            Err(LedgerError::InvalidState {
                state: PledgeState::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn delete_is_refused_once_paid() {
        let f = fixture().await;
        let unpaid = f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        f.ledger.delete_pledge(&unpaid.id, &f.leader).await.unwrap();
        assert!(f.repo.get_pledge(&unpaid.id).await.unwrap().is_none());

        let paid = f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        f.ledger
            .register_payment(f.payment(&paid.id, 10), &f.leader)
            .await
            .unwrap();
        assert!(matches!(
            f.ledger.delete_pledge(&paid.id, &f.leader).await,
            Err(LedgerError::HasDependentPayments { payments: 1, .. })
        ));
    }

    #[tokio::test]
    async fn update_cannot_drop_total_below_collected() {
        let f = fixture().await;
        let pledge = f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        f.ledger
            .register_payment(f.payment(&pledge.id, 60), &f.leader)
            .await
            .unwrap();

        let too_low = PledgeUpdate {
            total_amount: Some(dec(50)),
            ..PledgeUpdate::default()
        };
        assert!(matches!(
            f.ledger.update_pledge(&pledge.id, too_low, &f.leader).await,
            Err(LedgerError::Validation(_))
        ));

        let exact = PledgeUpdate {
            total_amount: Some(dec(60)),
            ..PledgeUpdate::default()
        };
        let updated = f.ledger.update_pledge(&pledge.id, exact, &f.leader).await.unwrap();
        assert_eq!(updated.state, PledgeState::Completed);
    }

    #[tokio::test]
    async fn listing_hides_unreadable_pledges() {
        let f = fixture().await;
        f.ledger.create_pledge(f.new_pledge(100), &f.leader).await.unwrap();
        let mut org_wide = f.new_pledge(100);
        org_wide.committee_id = None;
        f.ledger.create_pledge(org_wide, &f.admin).await.unwrap();

        let all = f.ledger.list_pledges(&f.admin, PledgeFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        let committee_only = f
            .ledger
            .list_pledges(&f.secretary, PledgeFilter::default())
            .await
            .unwrap();
        assert_eq!(committee_only.len(), 1);
        let none = f
            .ledger
            .list_pledges(&f.outsider, PledgeFilter::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn cashbook_requires_manage_and_positive_amounts() {
        let f = fixture().await;
        let offering = NewOffering {
            committee_id: f.committee.clone(),
            project_id: None,
            amount: dec(100),
            date: Utc::now().date_naive(),
            concept: "Sunday collection".into(),
        };
        assert!(matches!(
            f.cashbook.record_offering(offering.clone(), &f.secretary).await,
            Err(LedgerError::AuthorizationDenied)
        ));
        let stored = f.cashbook.record_offering(offering, &f.leader).await.unwrap();
        assert_eq!(stored.registered_by, f.leader);

        let expense = NewExpense {
            committee_id: f.committee.clone(),
            project_id: None,
            amount: dec(-1),
            date: Utc::now().date_naive(),
            category: "supplies".into(),
            concept: None,
        };
        assert!(matches!(
            f.cashbook.record_expense(expense, &f.admin).await,
            Err(LedgerError::Validation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        // Any sequence of attempted payments keeps collected equal to the
        // payment sum and never above the total.
        #[test]
        fn payments_preserve_collected_invariants(
            total in 1i64..500,
            amounts in prop::collection::vec(-20i64..200, 0..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let f = fixture().await;
                let pledge = f.ledger.create_pledge(f.new_pledge(total), &f.leader).await.unwrap();
                let mut accepted = 0i64;
                for amount in amounts {
                    let outcome = f
                        .ledger
                        .register_payment(f.payment(&pledge.id, amount), &f.leader)
                        .await;
                    if amount > 0 && accepted + amount <= total {
                        prop_assert!(outcome.is_ok());
                        accepted += amount;
                    } else {
                        prop_assert!(outcome.is_err());
                    }
                }

                let detail = f.ledger.get_pledge_detail(&pledge.id, &f.admin).await.unwrap();
                let sum: Decimal = detail.payments.iter().map(|p| p.amount).sum();
                prop_assert_eq!(detail.pledge.collected_amount, sum);
                prop_assert_eq!(sum, dec(accepted));
                prop_assert!(detail.pledge.collected_amount <= detail.pledge.total_amount);
                let expected_state = if accepted == total {
                    PledgeState::Completed
                } else {
                    PledgeState::Active
                };
                prop_assert_eq!(detail.pledge.state, expected_state);
                Ok(())
            })?;
        }

        // Progress is always displayable even when the ratio itself is not.
        #[test]
        fn progress_percent_stays_in_range(total in 1i64..10_000, paid in 0i64..10_000) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let f = fixture().await;
                let pledge = f.ledger.create_pledge(f.new_pledge(total), &f.leader).await.unwrap();
                let paid = paid.min(total);
                if paid > 0 {
                    f.ledger
                        .register_payment(f.payment(&pledge.id, paid), &f.leader)
                        .await
                        .unwrap();
                }
                let detail = f.ledger.get_pledge_detail(&pledge.id, &f.leader).await.unwrap();
                prop_assert!(detail.progress_percent <= 100);
                prop_assert!(detail.progress_ratio >= Decimal::ZERO);
                Ok(())
            })?;
        }
    }
}

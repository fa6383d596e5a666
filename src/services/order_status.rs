//! Order lifecycle rules.
//!
//! ```text
//! pending ──► pending_payment ──► paid
//!    │               │   └──────► failed
//!    │               │
//!    └───────────────┴──► accepted | rejected ◄── paid
//! ```
//!
//! `accepted`, `rejected` and `failed` are terminal. Only the move into
//! `accepted` commits stock, coupon and commission side effects.

use crate::entities::order::OrderStatus;

/// Whether `from -> to` is a legal single step.
/// Re-applying the current status is not a transition; callers treat it as a no-op.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    matches!(
        (from, to),
        (Pending, PendingPayment)
            | (PendingPayment, Paid)
            | (PendingPayment, Failed)
            | (Pending | PendingPayment | Paid, Accepted)
            | (Pending | PendingPayment | Paid, Rejected)
    )
}

pub fn is_terminal(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Accepted | OrderStatus::Rejected | OrderStatus::Failed
    )
}

/// Transitions that decrement stock, consume the coupon and credit commission
pub fn commits_side_effects(to: OrderStatus) -> bool {
    to == OrderStatus::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use sea_orm::Iterable;
    use OrderStatus::*;

    #[rstest]
    #[case(Pending, PendingPayment, true)]
    #[case(PendingPayment, Paid, true)]
    #[case(PendingPayment, Failed, true)]
    #[case(Pending, Accepted, true)]
    #[case(PendingPayment, Accepted, true)]
    #[case(Paid, Accepted, true)]
    #[case(Pending, Rejected, true)]
    #[case(Paid, Rejected, true)]
    #[case(Pending, Paid, false)]
    #[case(Pending, Failed, false)]
    #[case(Paid, Failed, false)]
    #[case(Paid, PendingPayment, false)]
    #[case(Failed, PendingPayment, false)]
    #[case(Failed, Accepted, false)]
    #[case(Accepted, Rejected, false)]
    #[case(Rejected, Accepted, false)]
    #[case(Accepted, Paid, false)]
    fn transition_table(#[case] from: OrderStatus, #[case] to: OrderStatus, #[case] ok: bool) {
        assert_eq!(can_transition(from, to), ok, "{from} -> {to}");
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in OrderStatus::iter().filter(|s| is_terminal(*s)) {
            for to in OrderStatus::iter() {
                assert!(!can_transition(from, to), "{from} -> {to} must be refused");
            }
        }
    }

    #[test]
    fn failed_only_from_pending_payment() {
        let sources: Vec<_> = OrderStatus::iter()
            .filter(|from| can_transition(*from, Failed))
            .collect();
        assert_eq!(sources, vec![PendingPayment]);
    }

    #[test]
    fn only_acceptance_commits() {
        let committing: Vec<_> = OrderStatus::iter()
            .filter(|s| commits_side_effects(*s))
            .collect();
        assert_eq!(committing, vec![Accepted]);
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::iter().collect::<Vec<_>>())
    }

    proptest! {
        /// Any walk through legal steps passes through `accepted` at most once
        #[test]
        fn walks_commit_at_most_once(steps in prop::collection::vec(any_status(), 0..24)) {
            let mut current = Pending;
            let mut commits = 0;
            for target in steps {
                if current != target && can_transition(current, target) {
                    if commits_side_effects(target) {
                        commits += 1;
                    }
                    current = target;
                }
            }
            prop_assert!(commits <= 1);
        }
    }
}

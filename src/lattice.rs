//! The value contract for dataflow facts.

use std::fmt::Debug;

/// A meet semi-lattice for dataflow analysis.
///
/// Dataflow values form a partially ordered set where every pair of elements
/// has a greatest lower bound (meet). The meet operation combines values
/// along control flow confluences; for may-analyses it is usually set union,
/// for must-analyses set intersection. Which of the two it denotes is the
/// client's choice — the engine only relies on the algebraic laws.
///
/// # Laws
///
/// Implementations must satisfy the following laws:
///
/// - **Idempotency**: `a.clone().meet(a) == a`
/// - **Commutativity**: `a.meet(b) == b.meet(a)`
/// - **Associativity**: `a.meet(b).meet(c) == a.meet(b.meet(c))`
/// - **Identity**: `Self::top().meet(a) == a`
///
/// `Clone` must be deep enough that mutating a clone never affects the
/// original, and `PartialEq` is the equality the engine uses to detect
/// stabilisation and to key contexts by boundary value.
///
/// # Termination
///
/// The fixpoint terminates when every descending `meet`-chain of values
/// reaching any single method is finite. Clients over infinite lattices
/// must widen in their transfer functions.
pub trait MeetSemiLattice: Clone + PartialEq + Debug {
    /// Returns the top element, the identity of [`meet`](Self::meet).
    ///
    /// Top is the initial value at every node before any transfer has been
    /// applied to it.
    #[must_use]
    fn top() -> Self;

    /// Computes the meet (greatest lower bound) of two elements.
    ///
    /// This method consumes both operands, similar to [`std::ops::Add`],
    /// which allows implementations to reuse allocations. Clone the
    /// operands first if they are still needed.
    #[must_use]
    fn meet(self, other: Self) -> Self;
}

/// A "lifted" lattice over `Option<T>` where `None` is top.
///
/// This constructs a new lattice by adding a top element (`None`) above an
/// existing lattice `T`, which is useful when "no information yet" needs to
/// be distinguished from every actual value of `T`.
///
/// - `None` is the top element and the identity for `meet`
/// - `Some(x).meet(Some(y)) == Some(x.meet(y))`
impl<T: MeetSemiLattice> MeetSemiLattice for Option<T> {
    fn top() -> Self {
        None
    }

    fn meet(self, other: Self) -> Self {
        match (self, other) {
            (None, it) | (it, None) => it,
            (Some(lhs), Some(rhs)) => Some(lhs.meet(rhs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::MeetSemiLattice;

    /// The two-point lattice: `true` is top, `false` is bottom.
    impl MeetSemiLattice for bool {
        fn top() -> Self {
            true
        }

        fn meet(self, other: Self) -> Self {
            self && other
        }
    }

    #[test]
    fn lifted_top_is_identity() {
        assert_eq!(None.meet(Some(false)), Some(false));
        assert_eq!(Some(true).meet(None), Some(true));
        assert_eq!(Option::<bool>::top().meet(None), None);
    }

    proptest! {
        #[test]
        fn lifted_meet_laws(
            lhs in any::<Option<bool>>(),
            rhs in any::<Option<bool>>(),
            third in any::<Option<bool>>(),
        ) {
            prop_assert_eq!(lhs.meet(lhs), lhs);
            prop_assert_eq!(lhs.meet(rhs), rhs.meet(lhs));
            prop_assert_eq!(lhs.meet(rhs).meet(third), lhs.meet(rhs.meet(third)));
            prop_assert_eq!(Option::<bool>::top().meet(lhs), lhs);
        }
    }
}

//! The client analysis contract.

use crate::{context::Context, lattice::MeetSemiLattice, program::Program};

/// The direction information flows in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Direction {
    /// Information flows with control flow, from method entry to exit.
    #[display("forward")]
    Forward,
    /// Information flows against control flow, from method exit to entry.
    #[display("backward")]
    Backward,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// An interprocedural dataflow analysis problem.
///
/// A problem supplies the lattice-valued boundary values and the four
/// transfer functions the solver applies while driving the fixpoint. All
/// transfer functions receive the [`Context`] being analysed read-only and
/// may fail with the associated [`Err`](Self::Err) type; infallible
/// analyses use [`std::convert::Infallible`].
///
/// Transfer functions must be monotone with respect to
/// [`MeetSemiLattice::meet`] for the result to be a sound fixpoint. The
/// solver applies a defensive `meet` with the previous value after every
/// transfer, so a mildly non-monotone client still terminates on finite
/// lattices, at the cost of precision.
///
/// # Direction
///
/// The `value` argument of each transfer function is the value on the side
/// the information arrives from, and the result lands on the other side:
/// in a [`Forward`](Direction::Forward) analysis [`normal_flow`](Self::normal_flow)
/// maps the value before a node to the value after it, in a
/// [`Backward`](Direction::Backward) analysis the value after a node to the
/// value before it. The callee boundary follows the same mirror: forward
/// analyses key callee contexts by entry value (produced by
/// [`call_entry_flow`](Self::call_entry_flow)) and read back their exit
/// value (through [`call_exit_flow`](Self::call_exit_flow)); backward
/// analyses key by exit value (produced by `call_exit_flow`) and read back
/// the entry value (through `call_entry_flow`).
pub trait DataflowProblem<P: Program> {
    /// The dataflow value computed at every node.
    type Value: MeetSemiLattice;

    /// The error transfer functions may fail with.
    type Err;

    /// The direction this analysis runs in.
    fn direction(&self) -> Direction;

    /// The boundary value for one entry point of the program.
    fn boundary_value(&self, entry_point: &P::Method) -> Self::Value;

    /// Transfer for a non-call node.
    ///
    /// # Errors
    /// Fails when the transfer cannot be computed (e.g. broken IR).
    fn normal_flow(
        &mut self,
        context: &Context<P::Method, P::Node, Self::Value>,
        node: &P::Node,
        value: &Self::Value,
    ) -> Result<Self::Value, Self::Err>;

    /// Maps a caller-side value at a call node to the callee's entry-side
    /// boundary (e.g. binds actual arguments to formal parameters).
    ///
    /// # Errors
    /// Fails when the transfer cannot be computed.
    fn call_entry_flow(
        &mut self,
        context: &Context<P::Method, P::Node, Self::Value>,
        callee: &P::Method,
        node: &P::Node,
        value: &Self::Value,
    ) -> Result<Self::Value, Self::Err>;

    /// Maps a callee's exit-side boundary value back to the caller side of
    /// a call node (e.g. extracts the returned value).
    ///
    /// # Errors
    /// Fails when the transfer cannot be computed.
    fn call_exit_flow(
        &mut self,
        context: &Context<P::Method, P::Node, Self::Value>,
        callee: &P::Method,
        node: &P::Node,
        value: &Self::Value,
    ) -> Result<Self::Value, Self::Err>;

    /// Carries the caller's local state across a call node: everything the
    /// callee cannot affect. The solver meets the result with the
    /// contributions of the resolved callees, and uses it alone when a call
    /// has no analysable target.
    ///
    /// # Errors
    /// Fails when the transfer cannot be computed.
    fn call_local_flow(
        &mut self,
        context: &Context<P::Method, P::Node, Self::Value>,
        node: &P::Node,
        value: &Self::Value,
    ) -> Result<Self::Value, Self::Err>;
}

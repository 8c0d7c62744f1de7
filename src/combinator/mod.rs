//! Convenience combinators over promise chains.
//!
//! These are part of the core because they exercise the same engine
//! invariants as user code:
//!
//! - [`all`]: resolve with every input's result, input order preserved
//! - [`race`]: settle like the first input to settle
//! - [`race_and_reject`] / [`race_and_resolve`]: race, then settle losers
//! - [`do_while`]: driver-controlled loop with `do_continue`/`do_break`

pub mod all;
pub mod do_while;
pub mod race;

pub use all::all;
pub use do_while::do_while;
pub use race::{race, race_and_reject, race_and_resolve};

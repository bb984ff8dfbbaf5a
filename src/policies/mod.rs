//! # Policies
//!
//! Extensions built purely on the public hook API. Each owns a disjoint set
//! of specification terms and state entries and checks for its own terms
//! before acting, so any combination can be registered.
//!
//! - `terminology` reads `label`, `helpText` and `symbol` and keeps no state.
//! - `validation` reads `validator`, `mandatory`, `disabled` and `hidden`; it
//!   writes `validated`, `error`, `allErrors` and the flags.

pub mod terminology;
pub mod validation;

pub use terminology::Terminology;
pub use validation::Validation;

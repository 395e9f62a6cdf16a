//! Pure progression rules. Nothing in here performs I/O; the service layer
//! loads a snapshot, runs these functions over it and commits the result.

pub mod achievements;
pub mod ledger;
pub mod streak;
pub mod xp;

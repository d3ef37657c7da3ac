//! Utility modules for the Flowbar monitor.
//!
//! # Modules
//!
//! - [`in_flight`]: Single-slot guard that keeps a periodic tick from overlapping itself
//! - [`relative_time`]: Strict relative-time phrases ("5 minutes", "1 hour")

pub mod in_flight;
pub mod relative_time;

pub use in_flight::{InFlight, InFlightPermit};
pub use relative_time::{distance_strict, distance_to_now_strict};

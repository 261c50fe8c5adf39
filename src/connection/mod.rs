//! Connection tracking for outbound groups
//!
//! Groups configured with `interrupt_exist_connections` route every
//! connection they hand out through an [`InterruptGroup`], so switching the
//! active member closes what the previous member was carrying.

mod interrupt;

pub use interrupt::{InterruptGroup, InterruptibleStream};

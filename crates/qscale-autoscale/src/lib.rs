//! qscale-autoscale — queue-depth driven replica scaling.
//!
//! Samples the queue depth and live replica count for each service group,
//! decides whether to move the group by one replica, actuates every role of
//! the group together, and confirms the new replicas are ready.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if since_last_action < cooldown:
//!     None                                  // cooldown dominates
//! elif depth > scale_up_threshold and replicas < max:
//!     ScaleUp(min(replicas + 1, max))
//! elif depth < scale_down_threshold and replicas > min:
//!     ScaleDown(max(replicas - 1, min))
//! else:
//!     None                                  // hysteresis band
//! ```
//!
//! Both comparisons are strict, so a depth equal to either threshold sits
//! inside the band. Cooldown is tracked per service group and only starts
//! after a confirmed successful action.

pub mod control_loop;
pub mod controller;
pub mod decision;
pub mod error;

pub use control_loop::{ControlLoop, GroupReport, Outcome, TickReport};
pub use controller::ReplicaController;
pub use decision::decide;
pub use error::{RoleFailure, ScalingError};

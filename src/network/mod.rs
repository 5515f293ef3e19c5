//! Network subsystem: device transports and socket helpers

pub mod connector;
pub mod socket;

pub use connector::{plan_forward, ForwardPlan, TransportConnector};
pub use socket::{dial, SessionStream};

mod booking;
mod credit;
mod payment_session;
mod reconciliation;

pub use booking::*;
pub use credit::*;
pub use payment_session::*;
pub use reconciliation::*;

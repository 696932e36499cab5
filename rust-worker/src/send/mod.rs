//! Delivery: the transport contract, the HTTP transport, and the
//! retrying executor that drains jobs.

pub mod executor;
pub mod mailgun;
pub mod transport;

pub use executor::{RetryPolicy, SendExecutor};
pub use mailgun::MailgunTransport;
pub use transport::{Transport, TransportError};

pub mod errors;
pub mod ids;
pub mod payload;

pub use errors::{CloseError, DependencyError, RouteError};
pub use ids::{ConnectionId, InstanceId, LogicalName};
pub use payload::{format_error, format_reply, Payload};

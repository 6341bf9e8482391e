pub mod actor;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dependency;
pub mod directory;
pub mod handler;
pub mod mock;
pub mod router;
pub mod server;
pub mod upgrade;

pub use actor::SessionActor;
pub use config::{ConfigError, ServerConfig};
pub use dependency::{Dependency, HttpDependency};
pub use directory::ActorDirectory;
pub use handler::SessionHandler;
pub use router::{build_router, RouterState};
pub use server::{start, start_with_dependency, ServerError, ServerHandle};

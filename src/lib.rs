pub mod actor;
pub mod allocator;
pub mod authorizer;
pub mod detector;
pub mod eventual;
pub mod ids;
pub mod master;
pub mod messages;
pub mod ratelimit;
pub mod registrar;
pub mod resources;
pub mod state;

pub use actor::clock::Clock;
pub use actor::{Envelope, Pid, Router};
pub use eventual::{Eventual, Promise};
pub use master::config::MasterConfig;
pub use master::{Master, MasterExit, MasterHandle};
pub use resources::{Resource, Resources};

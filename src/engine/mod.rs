mod callback;
mod chain;
mod executor;
mod node;
mod rule;
mod sandbox;

pub use callback::*;
pub use chain::ChainRuntime;
pub use executor::*;
pub use node::NodeRegistry;
pub use rule::RuleEngine;
pub use sandbox::{JsSandbox, DEFAULT_SCRIPT_TIMEOUT_MS};

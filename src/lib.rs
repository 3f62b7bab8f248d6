pub mod components;
pub mod engine;
pub mod transport;
pub mod types;

pub use components::*;
pub use engine::RuleEngine;
pub use transport::*;
pub use types::*;

mod filter;
mod log;
mod transform_js;

pub use filter::{ScriptFilterConfig, ScriptFilterNode};
pub use log::{LogConfig, LogNode};
pub use transform_js::{ScriptTransformConfig, ScriptTransformNode};

pub mod api;
pub mod fixtures;

pub use api::{ScriptedApi, ScriptedFamily};

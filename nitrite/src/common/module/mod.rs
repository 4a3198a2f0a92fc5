mod module;
mod plugin_manager;

pub use module::*;
pub use plugin_manager::*;

mod constants;
mod event_bus;
mod meta;
mod module;
mod nitrite_id;
mod security;
mod util;
mod value;

pub use constants::*;
pub use event_bus::*;
pub use meta::*;
pub use module::*;
pub use nitrite_id::*;
pub(crate) use security::AuthService;
pub use util::*;
pub use value::*;

pub mod app;
pub mod character;

pub use app::{App, Role};
pub use character::{Character, CharacterId, DelegatedToken};

pub mod code;
pub mod health;
pub mod verify;

pub use self::code::code;
pub use self::health::{health, live, ready};
pub use self::verify::verify;

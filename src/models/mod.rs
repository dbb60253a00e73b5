pub mod friend;
pub mod message;
pub mod nudge;
pub mod room;
pub mod user;

pub use friend::*;
pub use message::*;
pub use nudge::*;
pub use room::*;
pub use user::*;

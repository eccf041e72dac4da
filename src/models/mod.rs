pub mod attachment;
pub mod conversation;
pub mod message;
pub mod presence;
pub mod reaction;
pub mod typing;

pub use attachment::*;
pub use conversation::*;
pub use message::*;
pub use presence::*;
pub use reaction::*;
pub use typing::*;

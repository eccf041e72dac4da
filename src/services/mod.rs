pub mod conversations;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod presence;
pub mod reactions;
pub mod typing;

pub use conversations::ConversationStore;
pub use engine::{ChatEngine, InitialMessage};
pub use ledger::MessageLedger;
pub use presence::PresenceTracker;
pub use reactions::ReactionRegistry;
pub use typing::TypingSignalBus;

pub mod chat;
pub mod conversations;
pub mod queries;
pub mod title_generation;

pub use chat::{Chat, ChatPhase, ASSISTANT_ERROR_MESSAGE};
pub use conversations::{
    create_conversation, rename_conversation, save_message, update_conversation, CreatedConversation,
};
pub use title_generation::{RemoteTitleGenerator, TitleGenerator, TitleOutcome, TitleTask};

pub mod chat;
pub mod system;

pub use chat::chat_group;
pub use system::system_group;

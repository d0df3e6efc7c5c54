pub mod json_file;
pub mod memory;
pub mod repository;
pub mod settings;

pub use json_file::JsonFileConversationStore;
pub use memory::InMemoryConversationStore;
pub use repository::ConversationRepository;
pub use settings::SettingsStore;

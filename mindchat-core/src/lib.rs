pub mod config;
pub mod message;

pub use config::{
    Config, ConfigError, CounselingSettings, EmbeddingSettings, Paths, RoutingSettings, Settings,
    SettingsError, load_dotenv,
};
pub use message::{ChatMessage, ChatRole, Conversation};

pub mod archive;
pub mod cache;
pub mod email;
pub mod moderation;
pub mod ranking;
pub mod search_index;
pub mod sms;

pub use archive::ArchiveSyncHandler;
pub use cache::CacheInvalidationHandler;
pub use email::EmailHandler;
pub use moderation::ModerationCheckHandler;
pub use ranking::RankingTriggerHandler;
pub use search_index::SearchIndexHandler;
pub use sms::SmsHandler;

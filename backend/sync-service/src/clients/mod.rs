pub mod archive;
pub mod email;
pub mod moderation;
pub mod search;
pub mod sms;

pub use archive::{ArchiveClient, ArchiveError, ArchivedPost};
pub use email::{EmailClient, EmailError};
pub use moderation::{CheckError, CheckOutcome, ContentChecker, HttpContentChecker};
pub use search::{PostDocument, SearchError, SearchIndexClient};
pub use sms::{SmsClient, SmsError};

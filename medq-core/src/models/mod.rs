pub mod document;
pub mod people;
pub mod query;
pub mod review;
pub mod suggestion;

pub use document::{ExtractedDocuments, QueryDocument};
pub use people::{Doctor, Patient};
pub use query::{Page, Query, QueryFilter, QueryPriority, QueryStatus};
pub use review::{Review, ReviewFilter};
pub use suggestion::Suggestion;

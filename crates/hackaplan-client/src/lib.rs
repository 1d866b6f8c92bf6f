pub mod extractor;
pub mod fetcher;
pub mod search;

pub use extractor::DevpostExtractor;
pub use fetcher::ReqwestFetcher;
pub use search::{HackathonSearchClient, HackathonSuggestion};

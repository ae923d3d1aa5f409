pub mod fetcher;
pub mod parser;

pub use fetcher::{ReqwestFetcher, classify_status};
pub use parser::{BOOK_FIELDS, CatalogPageParser};

//! Repositories: record encoding and entity lifecycle on top of the store.

pub mod request;
pub mod response;

pub use self::request::RequestRepository;
pub use self::response::ResponseRepository;

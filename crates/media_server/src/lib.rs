pub mod adapters;
pub mod codec;
pub mod errors;
pub mod models;
pub mod recovery;

pub use adapters::{new, MediaServerAdapter};
pub use errors::MediaServerError;
pub use models::{ActiveStream, ServerConnection, ServerType};

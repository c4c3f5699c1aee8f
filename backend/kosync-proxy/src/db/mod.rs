pub mod library;
pub mod session_store;

pub use library::{BookRef, LibraryDirectory, MySqlLibraryDirectory};
pub use session_store::{MySqlSessionStore, SessionStore};

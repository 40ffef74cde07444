pub mod auth;
pub mod fanout;
pub mod fcm;
pub mod firestore;

pub use auth::*;
pub use fanout::*;
pub use fcm::*;
pub use firestore::*;

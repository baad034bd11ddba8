//! Direct messaging between students and teachers.
//!
//! `ChatService` performs the persisted operations (directory, load, mark
//! read, send, subscribe). `ChatSession` holds one viewer's view state and
//! decides what each async completion or live delivery does to it.

pub mod delivery;
pub mod directory;
pub mod error;
pub mod identity;
pub mod service;
pub mod session;
pub mod store;
pub mod thread;

pub use delivery::{ChangeFeed, DeliveryChannel, DeliveryEvent, ReconnectPolicy, Subscription};
pub use directory::Directory;
pub use error::{ChatError, ValidationError};
pub use identity::IdentityProvider;
pub use service::ChatService;
pub use session::{ChatSession, DirectoryToken, Inbound, ThreadToken, UnreadToken};
pub use store::{MessageStore, ProfileStore, SqliteStore};
pub use thread::ThreadView;

pub mod bag;
pub mod error;
pub mod id;
pub mod types;

pub use bag::{AttributeBag, FlashBag, SessionBag};
pub use error::{Error, Result};
pub use id::{validate_session_id, IdGenerator, RandomIdGenerator};
pub use types::{SessionRecord, ATTRIBUTES_KEY, FLASHES_KEY};

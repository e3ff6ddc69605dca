pub mod codec;
pub mod error;
pub mod reference;

pub use codec::{decode, encode, secret_plain_value, to_plain};
pub use error::SerdeError;
pub use reference::{collect_refs, check_no_pending_refs, ResourceRef};

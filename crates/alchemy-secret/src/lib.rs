pub mod error;
pub mod keyring;
pub mod secret;

pub use error::SecretError;
pub use keyring::{decrypt, encrypt, load_or_create_salt, rotate, DerivedKey};
pub use secret::{Secret, SecretEnvelope};

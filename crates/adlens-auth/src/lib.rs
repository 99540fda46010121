pub mod exchange;
pub mod locks;
pub mod service;

pub use exchange::{AccountDirectory, HttpAccountDirectory, HttpTokenExchanger, RefreshedCredential, TokenExchanger};
pub use locks::{KeyedGuard, KeyedLocks};
pub use service::CredentialService;

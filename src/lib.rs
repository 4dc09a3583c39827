pub mod browser;
pub mod core;
pub mod orders;
pub mod portal;
pub mod verify;

// --- Primary exports ---
pub use self::core::config;
pub use self::core::types;
pub use self::core::AppState;
pub use self::verify::{VerificationAttempt, Verifier, VerifyError, NO_RECORD_PHRASE};

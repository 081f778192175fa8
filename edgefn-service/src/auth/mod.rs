//! Authentication building blocks: password hashing, JWT minting, API key
//! management. These back the `basic_auth`/`bearer_jwt`/`api_key` evaluators
//! in `auth_chain` and the admin-facing credential management surface.
//!
//! # Example
//!
//! ```rust,ignore
//! use edgefn_service::auth::PasswordHasher;
//!
//! let hasher = PasswordHasher::default();
//! let hash = hasher.hash("my_secure_password")?;
//! assert!(hasher.verify("my_secure_password", &hash)?);
//! ```

// Configuration
pub mod config;

// Password hashing (Argon2id)
pub mod password;

// Token generation
pub mod tokens;

// API key management
pub mod api_keys;

// Re-exports for convenience
pub use config::{AuthConfig, PasswordConfig, TokenGenerationConfig};

pub use password::PasswordHasher;

pub use tokens::{TokenGenerator, TokenPair};

#[cfg(feature = "jwt")]
pub use tokens::jwt_generator::JwtGenerator;

// API key exports
pub use api_keys::{ApiKey, ApiKeyGenerator, ApiKeyStorage};

#[cfg(feature = "cache")]
pub use api_keys::RedisApiKeyStorage;

#[cfg(feature = "database")]
pub use api_keys::PgApiKeyStorage;

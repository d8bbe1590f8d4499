//! # Tally Testkit
//!
//! Testing utilities for Tally.
//!
//! ## Overview
//!
//! - **Fixtures**: deterministic node identities and signed link state
//! - **Backends**: scripted settlement backends that record every call
//! - **Generators**: proptest strategies for amounts, ratios and accounts
//!
//! ## Test Fixtures
//!
//! ```rust
//! use tally_testkit::TestIdentity;
//!
//! let alice = TestIdentity::with_seed(1);
//! let bytes = alice.signed_link_state("test", 1);
//! assert!(!bytes.is_empty());
//! ```
//!
//! ## Mock Backends
//!
//! ```rust,ignore
//! let backend = Arc::new(MockBackend::pending());
//! node.register_scheme("stub", backend.clone());
//! // ... settlement starts and waits ...
//! backend.release();
//! ```

pub mod backends;
pub mod fixtures;
pub mod generators;

pub use backends::{MockBackend, SettleCall};
pub use fixtures::{multi_party_identities, TestIdentity};
pub use generators::{amount, peer_account_snapshot, ratio};

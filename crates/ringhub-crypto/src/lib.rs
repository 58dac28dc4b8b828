//! Identification and session security.
//!
//! `srp` carries the SRP-6a state machine (host and user roles, RFC 5054
//! groups, identity-hiding fake salt/nonce); `identity` the verifier store
//! interface the handlers consume; `secure` the session-key AEAD framing
//! applied to authenticated connections.

pub mod identity;
pub mod secure;
pub mod srp;

pub use identity::{IdentityRecord, IdentityStore, MemoryIdentityStore};
pub use secure::{SealError, SecureChannel, TAG_LENGTH};
pub use srp::{enroll, AuthError, HostAuth, Srp, SrpGroup, SrpHash, UserAuth};

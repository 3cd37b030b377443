//! Arbor Master - the control-plane facade
//!
//! The master ties the subsystems together: the allocator's per-agent
//! ledgers, the ACL-backed authorizer, the registry of outstanding
//! offers, and one ordered notification channel per framework. Operators
//! reserve and unreserve through it; frameworks receive, accept, and
//! decline offers through it.
//!
//! Two properties hold across every surface:
//!
//! - Offers are immutable. Any transform of resources an offer embeds
//!   rescinds the offer; the transformed resources come back in a fresh
//!   offer on a later allocation pass.
//! - Operations on one agent serialize behind that agent's operation
//!   lock. There is no cluster-wide lock; agents proceed in parallel.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod framework;
pub mod master;
pub mod offers;
pub mod reservations;

pub use config::MasterConfig;
pub use error::{MasterError, Result};
pub use framework::FrameworkChannel;
pub use master::Master;
pub use offers::OfferManager;

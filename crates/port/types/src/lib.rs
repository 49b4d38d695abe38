//! Port Types - Core types for the proxy node agent
//!
//! Port is the control-plane agent that runs on every node of a proxy fleet.
//! It keeps the node's live user set in line with the central source of truth,
//! meters per-user traffic, and reports traffic deltas upstream.
//!
//! ## Key Concepts
//!
//! - **UserRecord**: A user as seen by the authoritative source
//! - **Credential**: The routing credential the live proxy authenticates with
//! - **NodeProfile**: Identity and scheduling attributes of this node
//! - **TrafficSample**: A raw counter reading pulled from the live proxy
//! - **UploadRecord**: One reported traffic delta

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod ids;
pub mod node;
pub mod traffic;
pub mod user;

// Re-export main types
pub use ids::{NodeId, UserId};
pub use node::NodeProfile;
pub use traffic::{Direction, TrafficSample, UploadRecord};
pub use user::{Credential, UserRecord};

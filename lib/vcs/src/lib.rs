//! Version-control gateway for buildpulse.
//!
//! This crate provides:
//!
//! - **VcsGateway**: the abstract "latest commit for a ref" capability
//!   consumed by trigger processors
//! - **GitHttpGateway**: an implementation speaking the Git smart-HTTP
//!   protocol (`info/refs?service=git-upload-pack`)
//! - **Ref advertisement parsing**: pkt-line decoding of the upload-pack
//!   ref advertisement

pub mod error;
pub mod gateway;
pub mod refs;

pub use error::VcsError;
pub use gateway::{GitHttpGateway, VcsGateway};
pub use refs::{AdvertisedRef, normalize_ref, parse_ref_advertisement};

//! backport-github: GitHub collaborators for the backport engine
//!
//! - [`GitHubClient`]: REST implementation of `PlatformApi`
//! - [`StaticTokenProvider`]: `TokenProvider` backed by a configured token

pub mod client;
pub mod error;
mod models;
pub mod token;

pub use client::{GitHubClient, PATCH_MEDIA_TYPE};
pub use error::{GitHubError, Result};
pub use token::StaticTokenProvider;

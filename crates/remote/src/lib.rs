//! Client for the external asynchronous video-generation API.
//!
//! Provides typed wire DTOs, a reqwest-based HTTP wrapper, and the
//! [`RemoteJobClient`] trait the orchestration engine consumes. The
//! engine only ever sees the trait, so tests substitute scripted fakes.

pub mod api;
pub mod client;
pub mod messages;

pub use api::{GenerationApi, GenerationApiError};
pub use client::{HttpRemoteClient, RemoteClientError, RemoteJobClient, RemoteJobHandle, RemoteJobStatus};

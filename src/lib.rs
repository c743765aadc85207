//! Aikido Provider
//!
//! An infrastructure-as-code provider plugin for the
//! [Aikido Security](https://www.aikido.dev) public API. It manages teams and
//! exposes the workspace's users as a data source.
//!
//! # Overview
//!
//! - **Provider root** ([`AikidoProvider`]): resolves credentials and owns the
//!   API client shared by every handler
//! - **`aikido_team` resource**: full create/read/update/delete plus import by
//!   numeric id
//! - **`aikido_users` data source**: every active user of the workspace
//! - **API client** ([`client`]): OAuth2 client-credentials against the public
//!   API with a cached bearer token
//! - **Server helpers**: gRPC server with the plugin handshake
//!
//! # Running
//!
//! The binary is spawned by the host, never run by hand:
//!
//! ```ignore
//! use terraform_provider_aikido::{init_logging, serve, AikidoProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(AikidoProvider::new(env!("CARGO_PKG_VERSION"))).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! Once the server listens it prints a single line on stdout:
//!
//! ```text
//! 1|1|tcp|127.0.0.1:50051|grpc
//! ```
//!
//! Format: `<core_version>|<protocol_version>|tcp|<address>|grpc`. Logs are
//! written to stderr so stdout only carries the handshake.
//!
//! The service is `aikido.provider.v1.Provider`. It is not Terraform's
//! tfplugin5/tfplugin6 protocol, so Terraform cannot load the binary without a
//! host that speaks `aikido.provider.v1`. The host must set
//! [`MAGIC_COOKIE_KEY`] to [`MAGIC_COOKIE_VALUE`] before spawning the plugin.
//!
//! # Configuration
//!
//! | Attribute       | Environment variable        | Required |
//! |-----------------|-----------------------------|----------|
//! | `client_id`     | `AIKIDO_CLIENT_ID`          | yes      |
//! | `client_secret` | `AIKIDO_CLIENT_SECRET`      | yes      |
//! | `base_url`      | `AIKIDO_BASE_URL`           | no       |
//!
//! Explicit configuration wins over the environment.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use client::{AikidoApi, AikidoClient, ClientError, Credentials};
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{AikidoProvider, PROVIDER_TYPE_NAME};
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    handshake_line, launched_by_host, AttributeChange, ImportedResource, PlanResult,
    ProviderMetadata, ServerCapabilities, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION,
    UNKNOWN_VALUE,
};
pub use validation::{is_valid, validate, validate_result};

pub use async_trait::async_trait;

pub use serde_json;
pub use tonic;
pub use tracing;

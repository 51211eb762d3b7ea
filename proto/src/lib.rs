#![cfg_attr(docsrs, feature(doc_auto_cfg))]
//! This crate contains the generated protobuf files for the snap plugin RPC protocol
//! and provides type-safe Rust structures for protocol messages.
//!
//! # Feature flags
//!
//! ## Code generation
//! - `gen-tonic-messages`: Generate message types using [tonic](https://github.com/hyperium/tonic) and [prost](https://github.com/tokio-rs/prost)
//! - `gen-tonic`: Generate gRPC client/server code using [tonic](https://github.com/hyperium/tonic) (includes `gen-tonic-messages`)
//!
//! ## Serialization
//! - `with-serde`: Add serde serialization support to generated types
//!
//! ## Misc
//! - `full`: Enable all features above
//!
//! By default, the `full` feature is enabled.

// Tonic generated code - skip formatting and lint checks
#[rustfmt::skip]
#[allow(warnings)]
#[doc(hidden)]
#[cfg(feature = "gen-tonic-messages")]
pub mod tonic {
    pub mod snap {
        pub mod plugin {
            pub mod v1 {
                include!("proto/tonic/snap.plugin.v1.rs");
            }
        }
    }
}

// Re-export the generated types for easier access
#[cfg(feature = "gen-tonic-messages")]
pub use crate::tonic::snap::plugin::v1;

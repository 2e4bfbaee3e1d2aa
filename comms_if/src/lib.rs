//! # Communications interface crate.
//!
//! Provides the controller's protocol: the message model and its frame codec, and the
//! transports used to carry frames between the controller and its peers.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Message model, requests, responses, commands and broadcasts
pub mod msg;

/// Network module
pub mod net;

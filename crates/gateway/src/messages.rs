//! Message types for the dialects spoken at the gateway boundary.
//!
//! Each protocol keeps its own wire types; the `unified` module is the
//! canonical interchange shape every conversion goes through.

pub(crate) mod gemini;
pub(crate) mod openai;
pub(crate) mod responses;
pub(crate) mod unified;

//! Wire formats spoken by the gateway.
//!
//! `openai` models the downstream surface (Chat Completions plus the
//! models/error envelopes); `bedrock` models the upstream Converse
//! family. Both are plain serde types with no I/O.

pub mod bedrock;
pub mod openai;

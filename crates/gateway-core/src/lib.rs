#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared leaf types and text utilities for the iskoces gateway
//! (request/response model, document chunking, language-code handling).

pub mod chunker;
pub mod lang;
pub mod request;

pub use chunker::split;
pub use lang::normalize;
pub use request::{
    DocumentPayload, TranslationPrimitive, TranslationRequest, TranslationResponse,
};

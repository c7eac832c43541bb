//! Request signing.

pub mod sigv4;

pub use sigv4::SigV4Signer;

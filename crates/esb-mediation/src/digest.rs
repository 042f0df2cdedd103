use sha2::{Digest, Sha256};

use esb_common::CacheError;

use crate::context::MessageContext;

/// Deterministic fingerprint of a request, used as the cache lookup key
///
/// Implementations must return the same value for the same logical request
/// across restarts and cluster nodes.
pub trait DigestGenerator: Send + Sync {
    fn digest(&self, ctx: &MessageContext) -> Result<String, CacheError>;
}

/// SHA-256 over destination, media type and body, hex encoded
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digest;

impl DigestGenerator for Sha256Digest {
    fn digest(&self, ctx: &MessageContext) -> Result<String, CacheError> {
        let mut hasher = Sha256::new();
        hasher.update(ctx.to.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(ctx.envelope.content_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(&ctx.envelope.body);
        Ok(hex::encode(hasher.finalize()))
    }
}

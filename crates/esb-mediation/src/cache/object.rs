use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One cached request and, once it arrives, its response
///
/// An object without a response is "in flight": the request was seen and a
/// response is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedObject {
    request_hash: String,
    response: Option<Bytes>,
    timeout_millis: i64,
    expire_at_millis: Option<i64>,
}

impl CachedObject {
    pub fn new(request_hash: impl Into<String>, timeout_millis: i64) -> Self {
        Self {
            request_hash: request_hash.into(),
            response: None,
            timeout_millis,
            expire_at_millis: None,
        }
    }

    pub fn request_hash(&self) -> &str {
        &self.request_hash
    }

    pub fn response(&self) -> Option<&Bytes> {
        self.response.as_ref()
    }

    pub fn timeout_millis(&self) -> i64 {
        self.timeout_millis
    }

    pub fn expire_at_millis(&self) -> Option<i64> {
        self.expire_at_millis
    }

    pub fn is_pending(&self) -> bool {
        self.response.is_none()
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        matches!(self.expire_at_millis, Some(at) if now_millis > at)
    }

    /// Usable as a cache hit at `now_millis`
    pub fn is_servable(&self, now_millis: i64) -> bool {
        self.response.is_some() && !self.is_expired(now_millis)
    }

    /// Capture the response and start its TTL; a zero timeout never expires
    pub fn set_response(&mut self, response: Bytes, now_millis: i64) {
        self.response = Some(response);
        self.expire_at_millis = (self.timeout_millis > 0).then(|| now_millis.saturating_add(self.timeout_millis));
    }

    /// Return to the in-flight state
    pub fn expire(&mut self) {
        self.response = None;
        self.expire_at_millis = None;
    }

    pub fn set_timeout(&mut self, timeout_millis: i64) {
        self.timeout_millis = timeout_millis;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_object_is_pending() {
        let obj = CachedObject::new("h", 1000);
        assert!(obj.is_pending());
        assert!(!obj.is_expired(i64::MAX));
        assert!(!obj.is_servable(0));
    }

    #[test]
    fn test_expiry_after_timeout() {
        let mut obj = CachedObject::new("h", 1000);
        obj.set_response(Bytes::from_static(b"r"), 5_000);

        assert_eq!(obj.expire_at_millis(), Some(6_000));
        assert!(obj.is_servable(6_000));
        assert!(obj.is_expired(6_001));
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let mut obj = CachedObject::new("h", 0);
        obj.set_response(Bytes::from_static(b"r"), 5_000);
        assert!(obj.is_servable(i64::MAX));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let mut obj = CachedObject::new("h", i64::MAX);
        obj.set_response(Bytes::from_static(b"r"), 5_000);

        assert_eq!(obj.expire_at_millis(), Some(i64::MAX));
        assert!(obj.is_servable(i64::MAX));
    }

    #[test]
    fn test_expire_clears_response() {
        let mut obj = CachedObject::new("h", 10);
        obj.set_response(Bytes::from_static(b"r"), 0);
        obj.expire();
        assert!(obj.is_pending());
        assert_eq!(obj.expire_at_millis(), None);
    }
}

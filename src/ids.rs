use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::request::RequestAdapter;

/// Header carrying a caller-provided request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Strongly typed request identifier backed by ULID.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(pub ulid::Ulid);

impl RequestId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Attempt to parse from a header string; if invalid, generate a new one.
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.parse::<RequestId>().ok())
            .unwrap_or_default()
    }

    /// Reuse the request's `x-request-id` when it is a valid ULID.
    pub fn from_request(request: &dyn RequestAdapter) -> Self {
        let headers = request.header();
        let value = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(REQUEST_ID_HEADER))
            .and_then(|(_, v)| v.as_str());
        Self::from_header_or_new(value)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = ulid::Ulid::from_string(s)?;
        Ok(RequestId(id))
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<RequestId>()
            .map_err(|_| serde::de::Error::custom("invalid request id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SimpleRequest;
    use http::Method;

    #[test]
    fn test_request_id_from_header() {
        let id = RequestId::new();
        let req = SimpleRequest::new(Method::GET, "/").with_header("X-Request-Id", id.to_string());
        assert_eq!(RequestId::from_request(&req), id);
    }

    #[test]
    fn test_invalid_header_generates_new_id() {
        let req = SimpleRequest::new(Method::GET, "/").with_header("x-request-id", "not-a-ulid");
        let a = RequestId::from_request(&req);
        let b = RequestId::from_request(&req);
        assert_ne!(a, b);
    }

    #[test]
    fn test_serde_as_string() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

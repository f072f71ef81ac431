//! Request descriptors and partition keys.

use std::collections::BTreeMap;
use std::net::IpAddr;

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// The attributes of an incoming request the engine may route on.
///
/// Built by the host from whatever its transport exposes. The engine only
/// reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    client_addr: Option<IpAddr>,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl RequestDescriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the query parameters of a raw query string such as `a=1&tier=gold`.
    ///
    /// A leading `?` is ignored, parameters without `=` get an empty value and
    /// the last occurrence of a repeated name wins. Names and values are
    /// percent-decoded with `+` read as a space; a component that does not
    /// decode to UTF-8 is kept as written.
    pub fn from_query_string(query: &str) -> Self {
        let mut descriptor = Self::new();
        for pair in query.trim_start_matches('?').split('&') {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            descriptor
                .query
                .insert(decode_component(name), decode_component(value));
        }
        descriptor
    }

    /// Builder-style: set the client address
    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    /// Builder-style: add a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Builder-style: add a header. Header names are case-insensitive.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// The client address, when the host knows it.
    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }

    /// Value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A key that uniquely identifies a partition.
///
/// The key is composed of the policy name and the partition key the policy's
/// routing produced for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// The policy this partition belongs to
    pub policy: String,
    /// The routing key within the policy
    pub key: String,
}

impl PartitionKey {
    /// Key of the shared partition that absorbs new keys once a store is full.
    pub const OVERFLOW: &'static str = "__overflow__";

    /// Create a new partition key.
    pub fn new(policy: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            key: key.into(),
        }
    }

    /// The overflow partition of a policy.
    pub fn overflow(policy: &str) -> Self {
        Self::new(policy, Self::OVERFLOW)
    }

    /// Whether this is an overflow partition.
    pub fn is_overflow(&self) -> bool {
        self.key == Self::OVERFLOW
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.policy, self.key)
    }
}

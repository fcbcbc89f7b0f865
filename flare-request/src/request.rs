use std::net::IpAddr;

use http::request::Parts;
use http::{HeaderMap, Method, Version};
use serde_json::Value;

/// The transport connection an [`HttpRequest`] arrived on.
///
/// Hosts that know the connection details insert this into the extensions of the `http` request,
/// where [`HttpRequest::from_parts`] picks it up.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Connection {
    /// Address of the peer.
    pub remote_address: Option<IpAddr>,
    /// Port of the peer.
    pub remote_port: Option<u16>,
    /// Address the connection was accepted on.
    pub local_address: Option<IpAddr>,
    /// Port the connection was accepted on.
    pub local_port: Option<u16>,
    /// Bytes received on this connection.
    pub bytes_read: u64,
    /// Bytes sent on this connection.
    pub bytes_written: u64,
    /// `true` if the connection is TLS encrypted.
    pub encrypted: bool,
}

/// An inbound HTTP request as seen by a function host.
///
/// Hosts usually fill only a subset of the fields. Optional values are resolved by the
/// [`RequestSnapshot`](crate::RequestSnapshot) extractor.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Protocol name, `http` or `https`, if the host determined it.
    pub protocol: Option<String>,
    /// Host name without port, if the host determined it.
    pub hostname: Option<String>,
    /// Host as addressed by the client, possibly including a port.
    pub host: Option<String>,
    /// The request method.
    pub method: Method,
    /// The request target, usually path and query. May also be an absolute URL.
    pub url: String,
    /// The path without query string, if the host routed the request.
    pub path: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// HTTP protocol version.
    pub http_version: Version,
    /// Route parameters.
    pub params: Option<Value>,
    /// Parsed query string.
    pub query: Option<Value>,
    /// Parsed request body.
    pub body: Option<Value>,
    /// Client address as determined by the host, e.g. from proxy headers.
    pub ip: Option<IpAddr>,
    /// The transport connection.
    pub connection: Option<Connection>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            protocol: None,
            hostname: None,
            host: None,
            method: Method::GET,
            url: "/".to_owned(),
            path: None,
            headers: HeaderMap::new(),
            http_version: Version::HTTP_11,
            params: None,
            query: None,
            body: None,
            ip: None,
            connection: None,
        }
    }
}

impl HttpRequest {
    /// Creates a request from the head of an `http` request.
    ///
    /// The query string is parsed into `query`. A [`Connection`] stored in the request extensions
    /// becomes the request's connection. The body is not available from the head and must be set
    /// separately.
    pub fn from_parts(parts: &Parts) -> Self {
        let uri = &parts.uri;

        let url = match uri.scheme() {
            Some(_) => uri.to_string(),
            None => uri
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| "/".to_owned()),
        };

        let query = uri.query().and_then(parse_query);

        Self {
            protocol: uri.scheme_str().map(str::to_owned),
            hostname: uri.host().map(str::to_owned),
            host: None,
            method: parts.method.clone(),
            url,
            path: Some(uri.path().to_owned()),
            headers: parts.headers.clone(),
            http_version: parts.version,
            params: None,
            query,
            body: None,
            ip: None,
            connection: parts.extensions.get::<Connection>().cloned(),
        }
    }

    /// Returns the first value of the given header as string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

fn parse_query(query: &str) -> Option<Value> {
    let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok()?;
    let object = pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    Some(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_from_parts() {
        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri("/items/42?sort=asc&limit=10")
            .header("host", "example.com:8080")
            .body(())
            .unwrap();

        request.extensions_mut().insert(Connection {
            local_port: Some(8080),
            ..Default::default()
        });

        let (parts, _) = request.into_parts();
        let request = HttpRequest::from_parts(&parts);

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "/items/42?sort=asc&limit=10");
        assert_eq!(request.path.as_deref(), Some("/items/42"));
        assert_eq!(request.protocol, None);
        assert_eq!(request.header("host"), Some("example.com:8080"));
        assert_eq!(request.query, Some(json!({"limit": "10", "sort": "asc"})));
        assert_eq!(request.connection.and_then(|c| c.local_port), Some(8080));
    }

    #[test]
    fn test_from_parts_absolute() {
        let (parts, _) = http::Request::builder()
            .uri("https://example.com/a")
            .body(())
            .unwrap()
            .into_parts();

        let request = HttpRequest::from_parts(&parts);

        assert_eq!(request.url, "https://example.com/a");
        assert_eq!(request.protocol.as_deref(), Some("https"));
        assert_eq!(request.hostname.as_deref(), Some("example.com"));
        assert_eq!(request.query, None);
    }
}

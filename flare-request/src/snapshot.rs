use std::collections::BTreeMap;
use std::net::IpAddr;

use http::header::{HOST, REFERER};
use http::{HeaderMap, Version};
use serde::Serialize;
use serde_json::Value;

use crate::request::{Connection, HttpRequest};

/// Placeholder route parameter inserted by some hosts for wildcard routes.
const PLACEHOLDER_PARAM: &str = "0";

/// Connection details of a [`RequestSnapshot`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Address of the peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    /// Port of the peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    /// Bytes received on this connection.
    pub bytes_read: u64,
    /// Bytes sent on this connection.
    pub bytes_written: u64,
    /// Port the connection was accepted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    /// Address the connection was accepted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,
    /// `IPv4` or `IPv6`, derived from the local address.
    #[serde(rename = "IPVersion", skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<&'static str>,
}

impl ConnectionSnapshot {
    fn from_connection(connection: &Connection) -> Self {
        Self {
            remote_address: connection.remote_address.map(|addr| addr.to_string()),
            remote_port: connection.remote_port,
            bytes_read: connection.bytes_read,
            bytes_written: connection.bytes_written,
            local_port: connection.local_port,
            local_address: connection.local_address.map(|addr| addr.to_string()),
            ip_version: connection.local_address.map(|addr| match addr {
                IpAddr::V4(_) => "IPv4",
                IpAddr::V6(_) => "IPv6",
            }),
        }
    }
}

/// A canonical, diagnostics-friendly view of an [`HttpRequest`].
///
/// Attached to reports as the `request` metadata section. Absent or empty `params`, `query` and
/// `body` values are omitted rather than serialized as empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    /// Absolute request URL.
    pub url: String,
    /// Request path.
    pub path: String,
    /// Request method.
    pub http_method: String,
    /// Request headers, with repeated headers joined by `", "`.
    pub headers: BTreeMap<String, String>,
    /// HTTP version, such as `1.1`.
    pub http_version: &'static str,
    /// Route parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Query parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    /// Request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Address of the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    /// The referring page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Connection details, if the host provided them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSnapshot>,
}

impl RequestSnapshot {
    /// Extracts the snapshot from a request.
    pub fn from_request(request: &HttpRequest) -> Self {
        let connection = request.connection.as_ref();

        let client_ip = request
            .ip
            .or_else(|| connection.and_then(|c| c.remote_address))
            .map(|ip| ip.to_string());

        let referer = request
            .header(REFERER.as_str())
            .or_else(|| request.header("referrer"))
            .map(str::to_owned);

        Self {
            url: absolute_url(request),
            path: request_path(request),
            http_method: request.method.as_str().to_owned(),
            headers: flatten_headers(&request.headers),
            http_version: version_str(request.http_version),
            params: normalize_params(request.params.as_ref()),
            query: non_empty(request.query.as_ref()),
            body: non_empty(request.body.as_ref()),
            client_ip,
            referer,
            connection: connection.map(ConnectionSnapshot::from_connection),
        }
    }

    /// Serializes the snapshot into a metadata value.
    pub fn to_value(&self) -> Value {
        // Serialization of plain strings, numbers and JSON values cannot fail.
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Returns `true` if `url` starts with a URL scheme followed by `://`.
fn is_absolute(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Strips a trailing `:<port>` from a host.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn absolute_url(request: &HttpRequest) -> String {
    if is_absolute(&request.url) {
        return request.url.clone();
    }

    let connection = request.connection.as_ref();

    let protocol = match &request.protocol {
        Some(protocol) => protocol.as_str(),
        None if connection.is_some_and(|c| c.encrypted) => "https",
        None => "http",
    };

    let host = request
        .hostname
        .as_deref()
        .or(request.host.as_deref())
        .or_else(|| request.header(HOST.as_str()))
        .map(strip_port)
        .unwrap_or_default();

    let port = match connection.and_then(|c| c.local_port) {
        None | Some(80) | Some(443) => String::new(),
        Some(port) => format!(":{port}"),
    };

    format!("{protocol}://{host}{port}{}", request.url)
}

fn request_path(request: &HttpRequest) -> String {
    if let Some(path) = &request.path {
        return path.clone();
    }

    let url = request.url.as_str();
    let without_query = url.split_once('?').map_or(url, |(path, _)| path);
    without_query.to_owned()
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::<String, String>::new();

    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }

    flat
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

/// Returns the value if it is a non-empty object or array.
///
/// Scalars such as unparsed text bodies are not considered structured data and are dropped.
fn non_empty(value: Option<&Value>) -> Option<Value> {
    match value? {
        Value::Object(map) if !map.is_empty() => Some(Value::Object(map.clone())),
        Value::Array(items) if !items.is_empty() => Some(Value::Array(items.clone())),
        _ => None,
    }
}

/// Removes the placeholder parameter and drops params that end up empty.
fn normalize_params(params: Option<&Value>) -> Option<Value> {
    let mut params = params?.as_object()?.clone();

    if params.len() == 1 && params.get(PLACEHOLDER_PARAM).is_some_and(Value::is_null) {
        params.remove(PLACEHOLDER_PARAM);
    }

    non_empty(Some(&Value::Object(params)))
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use http::{HeaderValue, Method};
    use insta::assert_json_snapshot;
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    fn example_request() -> HttpRequest {
        HttpRequest {
            protocol: Some("http".to_owned()),
            hostname: Some("example.com".to_owned()),
            url: "/a/b".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_url_without_port() {
        let snapshot = RequestSnapshot::from_request(&example_request());
        assert_eq!(snapshot.url, "http://example.com/a/b");
        assert_eq!(snapshot.path, "/a/b");
    }

    #[test]
    fn test_url_non_default_port() {
        let request = HttpRequest {
            connection: Some(Connection {
                local_port: Some(8080),
                ..Default::default()
            }),
            ..example_request()
        };

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.url, "http://example.com:8080/a/b");
    }

    #[test]
    fn test_url_default_ports() {
        for port in [80, 443] {
            let request = HttpRequest {
                connection: Some(Connection {
                    local_port: Some(port),
                    ..Default::default()
                }),
                ..example_request()
            };

            let snapshot = RequestSnapshot::from_request(&request);
            assert_eq!(snapshot.url, "http://example.com/a/b");
        }
    }

    #[test]
    fn test_url_from_host_header() {
        let mut request = HttpRequest {
            url: "/search?q=1".to_owned(),
            connection: Some(Connection {
                encrypted: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        request
            .headers
            .insert(HOST, HeaderValue::from_static("example.com:3000"));

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.url, "https://example.com/search?q=1");
        assert_eq!(snapshot.path, "/search");
    }

    #[test]
    fn test_url_host_field_with_port() {
        let request = HttpRequest {
            host: Some("localhost:8080".to_owned()),
            ..Default::default()
        };

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.url, "http://localhost/");
    }

    #[test]
    fn test_url_already_absolute() {
        let request = HttpRequest {
            url: "https://api.example.com/v1/items".to_owned(),
            ..example_request()
        };

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.url, "https://api.example.com/v1/items");
    }

    #[test]
    fn test_placeholder_params() {
        let request = HttpRequest {
            params: Some(json!({"0": null})),
            ..example_request()
        };

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.params, None);
    }

    #[test]
    fn test_placeholder_with_value_kept() {
        let request = HttpRequest {
            params: Some(json!({"0": "files/report.pdf"})),
            ..example_request()
        };

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.params, Some(json!({"0": "files/report.pdf"})));
    }

    #[test]
    fn test_empty_collections_omitted() {
        let request = HttpRequest {
            params: Some(json!({})),
            query: Some(json!({})),
            body: Some(json!("raw text")),
            ..example_request()
        };

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.params, None);
        assert_eq!(snapshot.query, None);
        assert_eq!(snapshot.body, None);
    }

    #[test]
    fn test_client_ip_fallback() {
        let request = HttpRequest {
            connection: Some(Connection {
                remote_address: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
                ..Default::default()
            }),
            ..example_request()
        };
        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.client_ip.as_deref(), Some("10.0.0.7"));

        let request = HttpRequest {
            ip: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1))),
            ..request
        };
        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.client_ip.as_deref(), Some("203.0.113.1"));
    }

    #[test]
    fn test_full_snapshot() {
        let mut request = HttpRequest {
            method: Method::POST,
            url: "/orders?dry_run=true".to_owned(),
            path: Some("/orders".to_owned()),
            query: Some(json!({"dry_run": "true"})),
            body: Some(json!({"quantity": 2, "sku": "A-1"})),
            connection: Some(Connection {
                remote_address: Some(IpAddr::V6(Ipv6Addr::LOCALHOST)),
                remote_port: Some(51234),
                local_address: Some(IpAddr::V6(Ipv6Addr::LOCALHOST)),
                local_port: Some(8080),
                bytes_read: 120,
                bytes_written: 0,
                encrypted: false,
            }),
            ..Default::default()
        };
        request
            .headers
            .insert(HOST, HeaderValue::from_static("shop.example.com"));
        request
            .headers
            .insert(REFERER, HeaderValue::from_static("https://shop.example.com/cart"));
        request
            .headers
            .append("x-tag", HeaderValue::from_static("a"));
        request
            .headers
            .append("x-tag", HeaderValue::from_static("b"));

        assert_json_snapshot!(RequestSnapshot::from_request(&request), @r###"
        {
          "url": "http://shop.example.com:8080/orders?dry_run=true",
          "path": "/orders",
          "httpMethod": "POST",
          "headers": {
            "host": "shop.example.com",
            "referer": "https://shop.example.com/cart",
            "x-tag": "a, b"
          },
          "httpVersion": "1.1",
          "query": {
            "dry_run": "true"
          },
          "body": {
            "quantity": 2,
            "sku": "A-1"
          },
          "clientIp": "::1",
          "referer": "https://shop.example.com/cart",
          "connection": {
            "remoteAddress": "::1",
            "remotePort": 51234,
            "bytesRead": 120,
            "bytesWritten": 0,
            "localPort": 8080,
            "localAddress": "::1",
            "IPVersion": "IPv6"
          }
        }
        "###);
    }
}

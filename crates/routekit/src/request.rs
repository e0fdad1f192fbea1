// File: src/request.rs
// Purpose: Request context handed to route scripts

use crate::script::ScriptRequest;
use axum::http::{request::Parts, HeaderMap, Method};
use std::collections::HashMap;

/// The parts of a request a route handler sees
#[derive(Clone)]
pub struct RequestContext {
    pub method: Method,

    /// Request path, without the query string
    pub path: String,

    /// Query parameters from URL (?key=value)
    pub query: HashMap<String, String>,

    pub headers: HeaderMap,

    /// Parsed cookies
    pub cookies: HashMap<String, String>,

    /// Raw body as UTF-8 (lossy)
    pub body: String,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

impl RequestContext {
    pub fn from_parts(parts: &Parts, body: &[u8]) -> Self {
        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parse_query(parts.uri.query().unwrap_or("")),
            cookies: Self::parse_cookies(&parts.headers),
            headers: parts.headers.clone(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Parse cookies from Cookie header
    fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
        let mut cookies = HashMap::new();

        if let Some(cookie_header) = headers.get("cookie") {
            if let Ok(cookie_str) = cookie_header.to_str() {
                for cookie in cookie_str.split(';') {
                    let cookie = cookie.trim();
                    if let Some((key, value)) = cookie.split_once('=') {
                        cookies.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        cookies
    }

    pub fn get_cookie(&self, name: &str) -> Option<&String> {
        self.cookies.get(name)
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Check if request accepts JSON
    pub fn accepts_json(&self) -> bool {
        self.get_header("accept")
            .map(|accept| accept.contains("json"))
            .unwrap_or(false)
    }

    /// The `request` value seen by a script
    pub fn to_script_request(&self, params: &HashMap<String, String>) -> ScriptRequest {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();

        ScriptRequest {
            method: self.method.as_str().to_string(),
            path: self.path.clone(),
            params: params.clone(),
            query: self.query.clone(),
            headers,
            cookies: self.cookies.clone(),
            body: self.body.clone(),
        }
    }
}

/// Parses `a=1&b=two%20words`; later duplicates win
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(text: &str) -> String {
    let text = text.replace('+', " ");
    urlencoding::decode(&text)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn context(uri: &str, headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = Request::builder().method("POST").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        RequestContext::from_parts(&parts, b"{\"a\":1}")
    }

    #[test]
    fn test_query_and_cookies() {
        let ctx = context("/search?q=hello+world&page=2&flag", &[("Cookie", "session=abc; theme=dark")]);

        assert_eq!(ctx.path, "/search");
        assert_eq!(ctx.query.get("q").unwrap(), "hello world");
        assert_eq!(ctx.query.get("page").unwrap(), "2");
        assert_eq!(ctx.query.get("flag").unwrap(), "");
        assert_eq!(ctx.get_cookie("theme").unwrap(), "dark");
    }

    #[test]
    fn test_accepts_json() {
        assert!(context("/", &[("Accept", "application/json")]).accepts_json());
        assert!(!context("/", &[("Accept", "text/html")]).accepts_json());
        assert!(!context("/", &[]).accepts_json());
    }

    #[test]
    fn test_script_request() {
        let ctx = context("/about/42?tab=bio", &[("X-Trace", "t1"), ("Cookie", "session=abc")]);
        let params = HashMap::from([("id".to_string(), "42".to_string())]);
        let request = ctx.to_script_request(&params);

        assert_eq!(request.method, "POST");
        assert_eq!(request.params["id"], "42");
        assert_eq!(request.query["tab"], "bio");
        assert_eq!(request.headers["x-trace"], "t1");
        assert_eq!(request.cookies["session"], "abc");
        assert_eq!(request.body, "{\"a\":1}");
    }

    #[test]
    fn test_percent_decoding() {
        let query = parse_query("name=J%C3%BCrgen&x=%ZZ");
        assert_eq!(query["name"], "Jürgen");
        assert_eq!(query["x"], "%ZZ");
    }
}

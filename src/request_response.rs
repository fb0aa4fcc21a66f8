use std::{borrow::Cow, fmt::Display, io::Read};

use bstr::ByteSlice;
use flate2::read::GzDecoder;
use http::{header::{HeaderName, CONTENT_ENCODING}, HeaderMap, HeaderValue, Method, StatusCode};
use url::form_urlencoded;

use crate::{http_sender::RawResponse, template, utils::HttpSimError};

/// Ordered multi-map of form fields.
pub type FormFields = Vec<(String, String)>;

/// Keeps one entry per key, holding the last value given for it. Keys stay
/// at the position of their first appearance.
pub(crate) fn collapse_form(fields: &FormFields) -> FormFields {
    let mut collapsed: FormFields = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        match collapsed.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.clone(),
            None => collapsed.push((key.clone(), value.clone()))
        }
    }

    collapsed
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    /// Sent as `application/x-www-form-urlencoded`
    Form(FormFields)
}

impl Body {
    pub fn form<K: ToString, V: ToString>(fields: &[(K, V)]) -> Self {
        Body::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(text) => text.is_empty(),
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Form(fields) => fields.is_empty()
        }
    }

    pub(crate) fn count_placeholders(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Text(text) => template::count_placeholders(text),
            Body::Bytes(bytes) => template::count_placeholders(bytes.to_str_lossy().as_ref()),
            Body::Form(fields) => {
                collapse_form(fields)
                    .iter()
                    .map(|(k, v)| template::count_placeholders(k) + template::count_placeholders(v))
                    .sum()
            }
        }
    }

    /// Copy that shares no storage with `self`; form fields are collapsed to
    /// their last value.
    pub(crate) fn deep_copy(&self) -> Body {
        match self {
            Body::Form(fields) => Body::Form(collapse_form(fields)),
            other => other.clone()
        }
    }

    /// Bytes to put on the wire, `None` for an absent body.
    pub fn encode(&self) -> Option<Vec<u8>> {
        match self {
            Body::Empty => None,
            Body::Text(text) => Some(text.as_bytes().to_vec()),
            Body::Bytes(bytes) => Some(bytes.clone()),
            Body::Form(fields) => {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(collapse_form(fields))
                    .finish();
                Some(encoded.into_bytes())
            }
        }
    }
}

// -----------------------------------------------------------------------------------------------//

#[derive(Clone, Debug)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Body,
    /// Hand back redirect responses as they are instead of following them
    pub ignore_redirects: bool
}

impl Request {
    pub fn new(method: Method, url: &str) -> Self {
        Request {
            url: url.to_string(),
            method,
            headers: HeaderMap::default(),
            body: Body::Empty,
            ignore_redirects: false
        }
    }

    pub fn get(url: &str) -> Self {
        Request::new(Method::GET, url)
    }

    pub fn post(url: &str) -> Self {
        Request::new(Method::POST, url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, HttpSimError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn ignoring_redirects(mut self) -> Self {
        self.ignore_redirects = true;
        self
    }

    /// Headers with every value cloned into fresh storage.
    pub(crate) fn deep_copy(&self) -> Request {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (k, v) in self.headers.iter() {
            headers.append(k.clone(), HeaderValue::from_bytes(v.as_bytes()).unwrap_or_else(|_| v.clone()));
        }

        Request {
            url: self.url.clone(),
            method: self.method.clone(),
            headers,
            body: self.body.deep_copy(),
            ignore_redirects: self.ignore_redirects
        }
    }

    /// Header names and values joined the way they are counted for the
    /// placeholder sanity check.
    pub(crate) fn headers_text(&self) -> String {
        self.headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k.as_str(), v.as_bytes().to_str_lossy()))
            .collect::<Vec<String>>()
            .join("\r\n")
    }
}

fn headers_to_string(headers: &HeaderMap) -> String {
    let mut result = String::default();
    let mut keys_list: Vec<&str> = headers
        .keys()
        .map(|k| {
            k.as_str()
        })
        .collect();

    keys_list.sort();
    for key in keys_list {
        let v_iter = headers
            .get_all(key)
            .iter()
            .map(|val| {
                val.as_bytes().to_str_lossy()
            })
            .collect::<Vec<Cow<str>>>()
            .join("; ");

        result.push_str(&format!("{}: {}\r\n", key, v_iter));
    }

    result
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            Body::Empty => Cow::Borrowed(""),
            Body::Text(text) => Cow::Borrowed(text.as_str()),
            Body::Bytes(bytes) => bytes.to_str_lossy(),
            Body::Form(_) => {
                let encoded = self.body.encode().unwrap_or_default();
                Cow::Owned(encoded.to_str_lossy().to_string())
            }
        };

        write!(
            f,
            "{} {}\r\n{}\r\n{}",
            self.method.as_str(),
            self.url.as_str(),
            headers_to_string(&self.headers),
            body
        )
    }
}

// -----------------------------------------------------------------------------------------------//

/// Inflates `body` when `headers` say it is gzip encoded, returns it
/// untouched otherwise.
pub fn decode_body(headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>, HttpSimError> {
    let gzipped = match headers.get(CONTENT_ENCODING) {
        Some(encoding) => encoding.as_bytes() == b"gzip",
        None => false
    };

    if !gzipped {
        return Ok(body.to_vec());
    }

    let mut decoder = GzDecoder::new(body);
    let mut decoded: Vec<u8> = Vec::with_capacity(body.len() * 2);
    if let Err(err) = decoder.read_to_end(&mut decoded) {
        return Err(HttpSimError::Decode(err.to_string()));
    }

    Ok(decoded)
}

/// Response captured by a step: the transport response plus the fully read,
/// decoded body.
#[derive(Clone, Debug)]
pub struct Response {
    pub raw: RawResponse,
    pub body: Vec<u8>
}

impl Response {
    pub fn from_raw(raw: RawResponse) -> Result<Self, HttpSimError> {
        let body = decode_body(&raw.headers, &raw.body)?;
        Ok(Response { raw, body })
    }

    pub fn status(&self) -> StatusCode {
        self.raw.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.raw.headers
    }

    pub fn text(&self) -> Cow<'_, str> {
        self.body.to_str_lossy()
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}\r\n{}\r\n{}",
            &self.raw.version,
            &self.raw.status,
            headers_to_string(&self.raw.headers),
            self.text()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    #[test]
    fn form_collapses_to_last_value() {
        let body = Body::form(&[("a", "1"), ("b", "2"), ("a", "3")]);
        assert_eq!(body.deep_copy(), Body::form(&[("a", "3"), ("b", "2")]));
        assert_eq!(body.encode(), Some(b"a=3&b=2".to_vec()));
    }

    #[test]
    fn form_encoding_escapes() {
        let body = Body::form(&[("user name", "a&b=c")]);
        assert_eq!(body.encode(), Some(b"user+name=a%26b%3Dc".to_vec()));
    }

    #[test]
    fn placeholders_are_counted_per_body_kind() {
        assert_eq!(Body::Empty.count_placeholders(), 0);
        assert_eq!(Body::Text("{{ .a }}{{ .b }}".to_string()).count_placeholders(), 2);
        assert_eq!(Body::Bytes(b"{{ .a }}".to_vec()).count_placeholders(), 1);

        // Only the last value of a repeated key counts
        let form = Body::form(&[("{{ .k }}", "{{ .v }}"), ("{{ .k }}", "plain")]);
        assert_eq!(form.count_placeholders(), 1);
    }

    #[test]
    fn deep_copied_request_keeps_content() {
        let request = Request::post("http://localhost/login")
            .with_header("X-Token", "{{ .csrf }}")
            .unwrap()
            .with_body(Body::Text("user={{ .user }}".to_string()))
            .ignoring_redirects();

        let copy = request.deep_copy();
        assert_eq!(copy.url, request.url);
        assert_eq!(copy.headers, request.headers);
        assert_eq!(copy.body, request.body);
        assert!(copy.ignore_redirects);
    }

    #[test]
    fn gzip_bodies_are_inflated() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"token=abc;").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert_eq!(decode_body(&headers, &compressed).unwrap(), b"token=abc;".to_vec());

        assert_eq!(decode_body(&HeaderMap::new(), b"plain").unwrap(), b"plain".to_vec());
    }

    #[test]
    fn broken_gzip_is_a_decode_error() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert!(matches!(decode_body(&headers, b"not gzip"), Err(HttpSimError::Decode(_))));
    }
}

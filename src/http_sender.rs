use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode};
use log::debug;
use reqwest::{cookie::Jar, redirect::Policy, Client, ClientBuilder, Url, Version};

use crate::{request_response::{Body, Request}, utils::HttpSimError};

/// Cookie storage shared by every request of one flow run.
pub type SessionStore = Arc<Jar>;

pub fn new_session() -> SessionStore {
    Arc::new(Jar::default())
}

/// Whether redirects are followed, decided for every call separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    Follow,
    /// Return the redirect response itself
    ReturnLast
}

impl RedirectPolicy {
    pub fn for_request(request: &Request) -> Self {
        if request.ignore_redirects {
            RedirectPolicy::ReturnLast
        }
        else {
            RedirectPolicy::Follow
        }
    }
}

/// Response as handed back by a transport: body fully read, not decoded.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub url: String,
    pub status: StatusCode,
    pub version: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        RawResponse {
            url: String::default(),
            status,
            version: "HTTP/1.1".to_string(),
            headers,
            body
        }
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &Request, redirects: RedirectPolicy) -> Result<RawResponse, HttpSimError>;
}

// ---------------------------------------------------------------------------------------------- //

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whole-request timeout, `None` waits forever
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub max_redirects: usize
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout: Some(Duration::from_secs(30)),
            user_agent: None,
            max_redirects: 10
        }
    }
}

/// reqwest backed transport. Both inner clients share the same session
/// store, so cookies set while following redirects are visible to requests
/// that do not follow them and the other way around.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    following: Client,
    direct: Client,
    session: SessionStore
}

fn client_builder(session: &SessionStore, config: &ClientConfig) -> ClientBuilder {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .cookie_provider(session.clone());

    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(user_agent) = config.user_agent.as_ref() {
        builder = builder.user_agent(user_agent.as_str());
    }

    builder
}

impl ReqwestClient {
    pub fn new(session: SessionStore, config: &ClientConfig) -> Result<Self, HttpSimError> {
        let following = client_builder(&session, config)
            .redirect(Policy::limited(config.max_redirects))
            .build()?;

        let direct = client_builder(&session, config)
            .redirect(Policy::none())
            .build()?;

        Ok(ReqwestClient { following, direct, session })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }
}

fn version_to_string(version: Version) -> String {
    match version {
        Version::HTTP_11 => "HTTP/1.1".to_string(),
        Version::HTTP_09 => "HTTP/0.9".to_string(),
        Version::HTTP_10 => "HTTP/1.0".to_string(),
        Version::HTTP_2 => "HTTP/2".to_string(),
        Version::HTTP_3 => "HTTP/3".to_string(),
        _ => "HTTP/UNKNOWN".to_string()
    }
}

async fn raw_from_reqwest(rsp: reqwest::Response) -> Result<RawResponse, HttpSimError> {
    let url = rsp.url().to_string();
    let status = rsp.status();
    let version = version_to_string(rsp.version());
    let headers = rsp.headers().clone();
    let body = rsp.bytes().await?.to_vec();

    Ok(RawResponse { url, status, version, headers, body })
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: &Request, redirects: RedirectPolicy) -> Result<RawResponse, HttpSimError> {
        let client = match redirects {
            RedirectPolicy::Follow => &self.following,
            RedirectPolicy::ReturnLast => &self.direct
        };

        let url = Url::parse(&request.url)?;
        let mut headers = request.headers.clone();
        if let Body::Form(_) = request.body {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
            }
        }

        let mut builder = client
            .request(request.method.clone(), url)
            .headers(headers);

        if let Some(body) = request.body.encode() {
            builder = builder.body(body);
        }

        debug!("HttpSender - {} {} ({:?})", request.method.as_str(), &request.url, redirects);
        let response = builder.send().await?;
        debug!("HttpSender - {} {} answered {}", request.method.as_str(), &request.url, response.status());

        raw_from_reqwest(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_policy_follows_request_flag() {
        let request = Request::get("http://localhost/");
        assert_eq!(RedirectPolicy::for_request(&request), RedirectPolicy::Follow);
        assert_eq!(RedirectPolicy::for_request(&request.ignoring_redirects()), RedirectPolicy::ReturnLast);
    }

    #[test]
    fn client_builds_with_shared_session() {
        let session = new_session();
        let client = ReqwestClient::new(session.clone(), &ClientConfig::default()).unwrap();
        assert!(Arc::ptr_eq(client.session(), &session));
    }
}

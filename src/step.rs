mod substitution;

use std::{fmt::Debug, sync::Arc};

use http::{HeaderMap, StatusCode};
use log::debug;

use crate::{
    extraction::Extractor,
    http_sender::{HttpClient, RedirectPolicy},
    request_response::{Request, Response},
    utils::HttpSimError,
    values::{first_missing, Value, ValueStore},
};

/// Called with the status, headers and decoded body once the step's values
/// are extracted. An `Err` fails the step with the given message.
pub type PostHook = Arc<dyn Fn(StatusCode, &HeaderMap, &[u8]) -> Result<(), String> + Send + Sync>;

/// One request of a flow.
#[derive(Clone)]
pub struct Step {
    /// Only used in diagnostics
    pub name: String,
    pub request: Request,
    /// Filled once the step has run
    pub response: Option<Response>,

    /// Values that must be known before the request can be sent
    pub keys_input: Arc<[String]>,
    /// Applied in order to the response body, results go to the flow values
    pub keys_output: Vec<Arc<dyn Extractor>>,
    pub post_hook: Option<PostHook>
}

impl Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("request", &self.request)
            .field("response", &self.response)
            .field("keys_input", &self.keys_input)
            .field("keys_output", &self.keys_output)
            .field("post_hook", &self.post_hook.is_some())
            .finish()
    }
}

impl Step {
    pub fn new(name: &str, request: Request) -> Self {
        Step {
            name: name.to_string(),
            request,
            response: None,
            keys_input: Arc::from(Vec::<String>::new()),
            keys_output: Vec::default(),
            post_hook: None
        }
    }

    pub fn with_keys_input<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.keys_input = keys
            .iter()
            .map(|k| k.as_ref().to_string())
            .collect::<Vec<String>>()
            .into();
        self
    }

    pub fn with_extractor<E: Extractor + 'static>(mut self, extractor: E) -> Self {
        self.keys_output.push(Arc::new(extractor));
        self
    }

    pub fn with_post_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(StatusCode, &HeaderMap, &[u8]) -> Result<(), String> + Send + Sync + 'static
    {
        self.post_hook = Some(Arc::new(hook));
        self
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Copy for a separate run: request rebuilt from fresh storage, no
    /// response; declarations, extractors and hook shared.
    pub(crate) fn complete_copy(&self) -> Step {
        Step {
            name: self.name.clone(),
            request: self.request.deep_copy(),
            response: None,
            keys_input: Arc::clone(&self.keys_input),
            keys_output: self.keys_output.clone(),
            post_hook: self.post_hook.clone()
        }
    }

    /// Runs the step against `values`, adding whatever it extracts. Errors
    /// carry the step index and name.
    pub async fn run(&mut self, client: &dyn HttpClient, values: &mut ValueStore, index: usize) -> Result<(), HttpSimError> {
        match self.run_unlabeled(client, values).await {
            Ok(()) => Ok(()),
            Err(err) => Err(err.in_step(index, &self.name))
        }
    }

    async fn run_unlabeled(&mut self, client: &dyn HttpClient, values: &mut ValueStore) -> Result<(), HttpSimError> {
        if let Some(key) = first_missing(self.keys_input.iter(), values) {
            return Err(HttpSimError::MissingValue { key: key.to_string() });
        }

        self.sanity_check()?;

        self.replace_in_body(values)?;
        self.replace_in_header(values)?;
        self.replace_in_url(values)?;

        debug!("Step - '{}' sending {} {}", &self.name, self.request.method.as_str(), &self.request.url);
        let raw = client
            .send(&self.request, RedirectPolicy::for_request(&self.request))
            .await?;

        let response = self.response.insert(Response::from_raw(raw)?);
        debug!("Step - '{}' received {} with {} body bytes", &self.name, response.status(), response.body.len());

        {
            let text = response.text();
            for extractor in self.keys_output.iter() {
                let (name, value) = extractor.extract(text.as_ref(), values)?;
                if name.is_empty() {
                    return Err(HttpSimError::UnnamedExtraction { value });
                }

                debug!("Step - '{}' extracted '{}' ({} chars)", &self.name, &name, value.chars().count());
                values.insert(name, Value::Text(value));
            }
        }

        if let Some(hook) = self.post_hook.as_ref() {
            if let Err(reason) = hook(response.status(), response.headers(), &response.body) {
                return Err(HttpSimError::Validation(reason));
            }
        }

        Ok(())
    }
}

use std::{collections::BTreeMap, fs, path, time::Duration};

use http::{header::HeaderName, HeaderMap, Method, StatusCode};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_yaml as yml;
use shellexpand::tilde;

use crate::{
    extraction::ExtractionRule,
    flow::Flow,
    http_sender::ClientConfig,
    request_response::{Body, Request},
    step::Step,
    utils::HttpSimError,
    values::{Value, ValueStore},
};

pub const DEFAULT_CONFIG_PATH: &str = "~/.httpsim/config.yaml";

fn default_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings of the `httpsim` runner.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub debug_file: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout_secs: default_timeout(),
            user_agent: None,
            debug_file: None,
            log_level: default_log_level()
        }
    }
}

impl Config {
    /// Reads the config at `config_name`, writing a default one there first
    /// if nothing exists yet.
    pub fn load_or_create(config_name: &str) -> Result<Config, HttpSimError> {
        let config_name = tilde(config_name).to_string();
        let config_path = path::Path::new(&config_name);

        if config_path.exists() {
            let file = fs::File::open(config_path)?;
            let config: Config = yml::from_reader(file)?;
            return Ok(config);
        }

        let default_config = Config::default();
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = fs::File::create(config_path)?;
        yml::to_writer(file, &default_config)?;
        debug!("Config - default config written to {}", &config_name);

        Ok(default_config)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: if self.timeout_secs == 0 { None } else { Some(Duration::from_secs(self.timeout_secs)) },
            user_agent: self.user_agent.clone(),
            ..Default::default()
        }
    }
}

// -----------------------------------------------------------------------------------------------//

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BodyConfig {
    Text(String),
    /// Raw bytes, base64 encoded
    Base64(String),
    Form(Vec<(String, String)>)
}

impl BodyConfig {
    fn to_body(&self) -> Result<Body, HttpSimError> {
        let body = match self {
            BodyConfig::Text(text) => Body::Text(text.clone()),
            BodyConfig::Base64(encoded) => Body::Bytes(base64::decode(encoded)?),
            BodyConfig::Form(fields) => Body::Form(fields.clone())
        };

        Ok(body)
    }
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RequestConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<BodyConfig>,
    #[serde(default)]
    pub ignore_redirects: bool
}

impl RequestConfig {
    fn to_request(&self) -> Result<Request, HttpSimError> {
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())?;
        let mut request = Request::new(method, &self.url);

        for (name, value) in self.headers.iter() {
            request = request.with_header(name, value)?;
        }

        if let Some(body) = self.body.as_ref() {
            request = request.with_body(body.to_body()?);
        }

        if self.ignore_redirects {
            request = request.ignoring_redirects();
        }

        Ok(request)
    }
}

/// Response checks compiled into a step's post-hook.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ExpectConfig {
    /// Accepted status codes, any status if empty
    #[serde(default)]
    pub status: Vec<u16>,
    #[serde(default)]
    pub body_contains: Option<String>,
    #[serde(default)]
    pub header_present: Vec<String>
}

impl ExpectConfig {
    pub fn check(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Result<(), String> {
        if !self.status.is_empty() && !self.status.contains(&status.as_u16()) {
            return Err(format!("status {} is not one of {:?}", status.as_u16(), &self.status));
        }

        if let Some(needle) = self.body_contains.as_ref() {
            let found = body
                .windows(needle.len().max(1))
                .any(|w| w == needle.as_bytes());

            if !needle.is_empty() && !found {
                return Err(format!("body does not contain '{}'", needle));
            }
        }

        for name in self.header_present.iter() {
            if !headers.contains_key(name.as_str()) {
                return Err(format!("header '{}' is absent", name));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepConfig {
    pub name: String,
    pub request: RequestConfig,
    #[serde(default)]
    pub keys_input: Vec<String>,
    #[serde(default)]
    pub keys_output: Vec<ExtractionRule>,
    #[serde(default)]
    pub expect: Option<ExpectConfig>
}

impl StepConfig {
    fn check_up(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("step name is empty".to_string());
        }

        if self.request.url.is_empty() {
            return Err(format!("step '{}' has an empty url", &self.name));
        }

        if let Err(err) = Method::from_bytes(self.request.method.to_uppercase().as_bytes()) {
            return Err(format!("step '{}': {}", &self.name, err));
        }

        for name in self.request.headers.keys() {
            if let Err(err) = HeaderName::from_bytes(name.as_bytes()) {
                return Err(format!("step '{}', header '{}': {}", &self.name, name, err));
            }
        }

        if let Some(BodyConfig::Base64(encoded)) = self.request.body.as_ref() {
            if let Err(err) = base64::decode(encoded) {
                return Err(format!("step '{}' has a malformed base64 body: {}", &self.name, err));
            }
        }

        for rule in self.keys_output.iter() {
            if let Err(err) = rule.check_up() {
                return Err(format!("step '{}': {}", &self.name, err));
            }
        }

        Ok(())
    }

    fn to_step(&self) -> Result<Step, HttpSimError> {
        let mut step = Step::new(&self.name, self.request.to_request()?)
            .with_keys_input(&self.keys_input);

        for rule in self.keys_output.iter() {
            step = step.with_extractor(rule.clone());
        }

        if let Some(expect) = self.expect.clone() {
            step = step.with_post_hook(move |status, headers, body| expect.check(status, headers, body));
        }

        Ok(step)
    }
}

/// Declarative form of a [`Flow`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FlowConfig {
    #[serde(default)]
    pub required_values: Vec<String>,
    pub steps: Vec<StepConfig>
}

impl FlowConfig {
    pub fn from_file(filename: &str) -> Result<FlowConfig, HttpSimError> {
        let file = fs::File::open(tilde(filename).as_ref())?;
        let flow: FlowConfig = yml::from_reader(file)?;
        Ok(flow)
    }

    pub fn from_yaml(text: &str) -> Result<FlowConfig, HttpSimError> {
        Ok(yml::from_str(text)?)
    }

    pub fn check_up(&self) -> Result<(), HttpSimError> {
        if self.steps.is_empty() {
            return Err(HttpSimError::Config("flow has no steps".to_string()));
        }

        for step in self.steps.iter() {
            if let Err(err_str) = step.check_up() {
                return Err(HttpSimError::Config(err_str));
            }
        }

        Ok(())
    }

    pub fn into_flow(&self) -> Result<Flow, HttpSimError> {
        self.check_up()?;

        let mut steps: Vec<Step> = Vec::with_capacity(self.steps.len());
        for step in self.steps.iter() {
            steps.push(step.to_step()?);
        }

        Ok(Flow::new(&self.required_values, steps))
    }
}

// -----------------------------------------------------------------------------------------------//

fn scalar_to_value(key: &str, value: yml::Value) -> Result<Value, HttpSimError> {
    let text = match value {
        yml::Value::String(s) => s,
        yml::Value::Number(n) => n.to_string(),
        yml::Value::Bool(b) => b.to_string(),
        yml::Value::Null => String::default(),
        _ => {
            let err_str = format!("value of '{}' must be a scalar", key);
            return Err(HttpSimError::Config(err_str));
        }
    };

    Ok(Value::Text(text))
}

fn mapping_to_store(mapping: yml::Mapping) -> Result<ValueStore, HttpSimError> {
    let mut store = ValueStore::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = match key {
            yml::Value::String(s) => s,
            yml::Value::Number(n) => n.to_string(),
            other => {
                let err_str = format!("unsupported key in values: {:?}", other);
                return Err(HttpSimError::Config(err_str));
            }
        };

        let value = scalar_to_value(&key, value)?;
        store.insert(key, value);
    }

    Ok(store)
}

/// Parses a values document: one mapping for a single run, or a list of
/// mappings for one run each.
pub fn parse_value_sets(text: &str) -> Result<Vec<ValueStore>, HttpSimError> {
    match yml::from_str::<yml::Value>(text)? {
        yml::Value::Mapping(mapping) => Ok(vec![mapping_to_store(mapping)?]),
        yml::Value::Sequence(items) => {
            let mut sets = Vec::with_capacity(items.len());
            for item in items {
                let yml::Value::Mapping(mapping) = item else {
                    return Err(HttpSimError::Config("every entry of a values list must be a mapping".to_string()));
                };

                sets.push(mapping_to_store(mapping)?);
            }

            Ok(sets)
        },
        yml::Value::Null => Ok(vec![ValueStore::default()]),
        _ => Err(HttpSimError::Config("values must be a mapping or a list of mappings".to_string()))
    }
}

pub fn load_value_sets(filename: &str) -> Result<Vec<ValueStore>, HttpSimError> {
    let text = fs::read_to_string(tilde(filename).as_ref())?;
    parse_value_sets(&text)
}

/// Splits a `key=value` command line assignment.
pub fn parse_assignment(assignment: &str) -> Result<(String, String), HttpSimError> {
    let Some((key, value)) = assignment.split_once('=') else {
        let err_str = format!("expected key=value, got '{}'", assignment);
        return Err(HttpSimError::Config(err_str));
    };

    if key.is_empty() {
        let err_str = format!("empty key in '{}'", assignment);
        return Err(HttpSimError::Config(err_str));
    }

    Ok((key.to_string(), value.to_string()))
}

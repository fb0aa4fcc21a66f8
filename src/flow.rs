use std::fmt::Display;

use log::{debug, info, warn};

use crate::{
    http_sender::{new_session, ClientConfig, HttpClient, ReqwestClient, SessionStore},
    step::Step,
    utils::HttpSimError,
    values::{first_missing, ValueStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    NotStarted,
    /// Index of the step being executed
    Running(usize),
    Completed,
    /// Index of the step that failed
    Failed(usize)
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Failed(_))
    }
}

impl Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowState::NotStarted => write!(f, "not started"),
            FlowState::Running(i) => write!(f, "running step {}", i),
            FlowState::Completed => write!(f, "completed"),
            FlowState::Failed(i) => write!(f, "failed at step {}", i)
        }
    }
}

/// Ordered sequence of steps sharing one value store and one session.
#[derive(Debug)]
pub struct Flow {
    pub required_values: Vec<String>,
    pub steps: Vec<Step>,
    pub client_config: ClientConfig,
    values: ValueStore,
    session: Option<SessionStore>,
    state: FlowState
}

impl Flow {
    pub fn new<S: AsRef<str>>(required_values: &[S], steps: Vec<Step>) -> Self {
        Flow {
            required_values: required_values
                .iter()
                .map(|v| v.as_ref().to_string())
                .collect(),
            steps,
            client_config: ClientConfig::default(),
            values: ValueStore::default(),
            session: None,
            state: FlowState::NotStarted
        }
    }

    /// Runs with a caller supplied cookie store instead of a fresh one.
    pub fn with_session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    pub fn values(&self) -> &ValueStore {
        &self.values
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionStore> {
        self.session.as_ref()
    }

    /// Executes every step with a reqwest transport bound to the flow's
    /// session store.
    pub async fn execute(&mut self, values: ValueStore) -> Result<(), HttpSimError> {
        self.check_required(&values)?;

        let session = self.session.get_or_insert_with(new_session).clone();
        let client = ReqwestClient::new(session, &self.client_config)?;
        self.run_steps(&client, values).await
    }

    /// Executes every step through `client`. The session store is still
    /// initialised, although only `client` decides what to do with cookies.
    pub async fn execute_with(&mut self, client: &dyn HttpClient, values: ValueStore) -> Result<(), HttpSimError> {
        self.check_required(&values)?;

        self.session.get_or_insert_with(new_session);
        self.run_steps(client, values).await
    }

    fn check_required(&self, values: &ValueStore) -> Result<(), HttpSimError> {
        if let Some(key) = first_missing(self.required_values.iter(), values) {
            warn!("Flow - required value '{}' is missing or empty", key);
            return Err(HttpSimError::MissingValue { key: key.to_string() });
        }

        Ok(())
    }

    async fn run_steps(&mut self, client: &dyn HttpClient, values: ValueStore) -> Result<(), HttpSimError> {
        self.values = values;
        info!("Flow - starting {} steps", self.steps.len());

        for (index, step) in self.steps.iter_mut().enumerate() {
            self.state = FlowState::Running(index);
            debug!("Flow - executing step {}.'{}'", index, &step.name);

            if let Err(err) = step.run(client, &mut self.values, index).await {
                warn!("Flow - {}", &err);
                self.state = FlowState::Failed(index);
                return Err(err);
            }
        }

        self.state = FlowState::Completed;
        info!("Flow - completed with {} values", self.values.len());
        Ok(())
    }

    /// Independent copy for another run: steps rebuilt from fresh storage,
    /// values and session dropped, state reset. Extractors and hooks stay
    /// shared.
    pub fn complete_copy(&self) -> Flow {
        Flow {
            required_values: self.required_values.clone(),
            steps: self.steps.iter().map(|s| s.complete_copy()).collect(),
            client_config: self.client_config.clone(),
            values: ValueStore::default(),
            session: None,
            state: FlowState::NotStarted
        }
    }
}

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use httpsim::{
    Body, ExtractionRule, Extractor, Flow, FlowState, HttpClient, HttpSimError, RawResponse, RedirectPolicy, Request, Step,
    Value, ValueStore,
};

type Responder = Box<dyn Fn(&Request) -> (u16, String) + Send + Sync>;

/// Answers from a closure and remembers every request it was given.
struct Recorder {
    respond: Responder,
    sent: Mutex<Vec<(Request, RedirectPolicy)>>
}

impl Recorder {
    fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&Request) -> (u16, String) + Send + Sync + 'static
    {
        Arc::new(Recorder { respond: Box::new(respond), sent: Mutex::new(Vec::new()) })
    }

    fn sent(&self) -> Vec<(Request, RedirectPolicy)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for Recorder {
    async fn send(&self, request: &Request, redirects: RedirectPolicy) -> Result<RawResponse, HttpSimError> {
        self.sent.lock().unwrap().push((request.clone(), redirects));
        tokio::task::yield_now().await;

        let (status, body) = (self.respond)(request);
        let status = StatusCode::from_u16(status).unwrap();
        Ok(RawResponse::new(status, HeaderMap::new(), body.into_bytes()))
    }
}

/// Fails every request after the first `healthy` ones.
struct FlakyClient {
    healthy: usize,
    calls: AtomicUsize
}

#[async_trait]
impl HttpClient for FlakyClient {
    async fn send(&self, _request: &Request, _redirects: RedirectPolicy) -> Result<RawResponse, HttpSimError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.healthy {
            return Err(HttpSimError::Transport("connection refused".to_string()));
        }

        Ok(RawResponse::new(StatusCode::OK, HeaderMap::new(), b"<input name=\"csrf\" value=\"t0k3n\">".to_vec()))
    }
}

/// Extractor that forgets to name what it found.
#[derive(Debug)]
struct Nameless;

impl Extractor for Nameless {
    fn extract(&self, body: &str, _values: &ValueStore) -> Result<(String, String), HttpSimError> {
        Ok((String::new(), body.to_string()))
    }
}

fn values(pairs: &[(&str, &str)]) -> ValueStore {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

fn path_of(request: &Request) -> String {
    request.url.trim_start_matches("http://target").to_string()
}

fn login_flow() -> Flow {
    let home = Step::new("home", Request::get("http://target/home"))
        .with_extractor(ExtractionRule::new("name=\"csrf\" value=\"", "\"", "csrf"));

    let login = Step::new(
        "login",
        Request::post("http://target/login")
            .with_body(Body::form(&[("user", "{{ .user }}"), ("csrf", "{{ .csrf }}")]))
            .ignoring_redirects()
    )
    .with_keys_input(&["user", "csrf"])
    .with_post_hook(|status, _, _| {
        if status == StatusCode::OK {
            Ok(())
        }
        else {
            Err(format!("login answered {}", status))
        }
    });

    let profile = Step::new("profile", Request::get("http://target/profile/{{ .user }}"))
        .with_keys_input(&["user"]);

    Flow::new(&["user"], vec![home, login, profile])
}

#[tokio::test]
async fn missing_required_value_sends_nothing() {
    let recorder = Recorder::new(|_| (200, String::new()));

    let mut flow = login_flow();
    let err = flow.execute_with(&*recorder, ValueStore::new()).await.unwrap_err();
    assert!(matches!(err, HttpSimError::MissingValue { ref key } if key == "user"));

    let mut flow = login_flow();
    let err = flow.execute_with(&*recorder, values(&[("user", "")])).await.unwrap_err();
    assert!(matches!(err, HttpSimError::MissingValue { .. }));

    assert!(recorder.sent().is_empty());
    assert_eq!(flow.state(), FlowState::NotStarted);
}

#[tokio::test]
async fn failing_hook_stops_the_flow() {
    let recorder = Recorder::new(|request| {
        match path_of(request).as_str() {
            "/home" => (200, "<input name=\"csrf\" value=\"t0k3n\">".to_string()),
            "/login" => (403, "denied".to_string()),
            _ => (200, "profile".to_string())
        }
    });

    let mut flow = login_flow();
    let err = flow.execute_with(&*recorder, values(&[("user", "alice")])).await.unwrap_err();

    assert_eq!(err.step_index(), Some(1));
    assert!(err.to_string().starts_with("Step 1.'login' failed"));
    assert!(matches!(err.root(), HttpSimError::Validation(_)));
    assert_eq!(flow.state(), FlowState::Failed(1));

    // Values from the first step survive the failure
    assert_eq!(flow.values().get("csrf"), Some(&Value::from("t0k3n")));

    let sent = recorder.sent();
    assert_eq!(sent.len(), 2);
    assert!(flow.steps[1].response().is_some());
    assert!(flow.steps[2].response().is_none());
}

#[tokio::test]
async fn extracted_values_reach_later_steps() {
    let recorder = Recorder::new(|request| {
        match path_of(request).as_str() {
            "/home" => (200, "<input name=\"csrf\" value=\"t0k3n\">".to_string()),
            _ => (200, "ok".to_string())
        }
    });

    let mut flow = login_flow();
    flow.execute_with(&*recorder, values(&[("user", "alice")])).await.unwrap();
    assert_eq!(flow.state(), FlowState::Completed);

    let sent = recorder.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].1, RedirectPolicy::Follow);
    assert_eq!(sent[1].1, RedirectPolicy::ReturnLast);
    assert_eq!(sent[1].0.body, Body::form(&[("user", "alice"), ("csrf", "t0k3n")]));
    assert_eq!(sent[2].0.url, "http://target/profile/alice");
    assert_eq!(flow.steps[0].response().unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn extraction_failure_names_the_step() {
    let recorder = Recorder::new(|_| (200, "no token here".to_string()));

    let mut flow = login_flow();
    let err = flow.execute_with(&*recorder, values(&[("user", "alice")])).await.unwrap_err();

    assert_eq!(err.step_index(), Some(0));
    assert!(matches!(err.root(), HttpSimError::NotFound { ref name } if name == "csrf"));
    assert_eq!(recorder.sent().len(), 1);
}

#[tokio::test]
async fn clones_run_concurrently_without_sharing_state() {
    // Echoes the submitted user back, so every run must extract its own
    let recorder = Recorder::new(|request| {
        let body = match &request.body {
            Body::Text(text) => text.clone(),
            _ => String::new()
        };
        (200, format!("[{}]", body))
    });

    let echo = Step::new("echo", Request::post("http://target/echo").with_body(Body::Text("{{ .user }}".to_string())))
        .with_keys_input(&["user"])
        .with_extractor(ExtractionRule::new("[", "]", "seen"));
    let definition = Flow::new(&["user"], vec![echo]);

    let mut first = definition.complete_copy();
    let mut second = definition.complete_copy();

    let (a, b) = tokio::join!(
        first.execute_with(&*recorder, values(&[("user", "alice")])),
        second.execute_with(&*recorder, values(&[("user", "bob")]))
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(first.values().get("seen"), Some(&Value::from("alice")));
    assert_eq!(second.values().get("seen"), Some(&Value::from("bob")));

    // The definition itself was never touched
    assert_eq!(definition.steps[0].request.body, Body::Text("{{ .user }}".to_string()));
    assert!(definition.values().is_empty());
    assert_eq!(recorder.sent().len(), 2);
}

#[tokio::test]
async fn copy_of_executed_flow_is_reset() {
    let recorder = Recorder::new(|_| (200, "<input name=\"csrf\" value=\"t0k3n\">".to_string()));

    let mut flow = login_flow();
    let pristine = flow.complete_copy();
    flow.execute_with(&*recorder, values(&[("user", "alice")])).await.unwrap();
    assert!(flow.session().is_some());

    let copy = flow.complete_copy();
    assert_eq!(copy.state(), FlowState::NotStarted);
    assert!(copy.values().is_empty());
    assert!(copy.session().is_none());
    assert!(copy.steps.iter().all(|s| s.response().is_none()));
    assert_eq!(copy.required_values, pristine.required_values);

    // Declarations and hooks are shared, not rebuilt
    assert!(Arc::ptr_eq(&copy.steps[1].keys_input, &flow.steps[1].keys_input));
    assert!(Arc::ptr_eq(
        copy.steps[1].post_hook.as_ref().unwrap(),
        flow.steps[1].post_hook.as_ref().unwrap()
    ));

    // A pristine copy runs again from scratch
    let mut again = pristine.complete_copy();
    again.execute_with(&*recorder, values(&[("user", "bob")])).await.unwrap();
    assert_eq!(recorder.sent()[4].0.body, Body::form(&[("user", "bob"), ("csrf", "t0k3n")]));
}

#[tokio::test]
async fn sanity_check_runs_before_sending() {
    let recorder = Recorder::new(|_| (200, String::new()));
    let step = Step::new("short", Request::get("http://target/static"))
        .with_keys_input(&["user"]);

    let mut flow = Flow::new(&["user"], vec![step]);
    let err = flow.execute_with(&*recorder, values(&[("user", "alice")])).await.unwrap_err();

    assert!(matches!(err.root(), HttpSimError::NotEnoughReplacements));
    assert!(recorder.sent().is_empty());
}

#[tokio::test]
async fn transport_error_is_returned_with_step_context() {
    let client = FlakyClient { healthy: 1, calls: AtomicUsize::new(0) };

    let mut flow = login_flow();
    let err = flow.execute_with(&client, values(&[("user", "alice")])).await.unwrap_err();

    assert_eq!(err.step_index(), Some(1));
    assert_eq!(err.to_string(), "Step 1.'login' failed: transport error: connection refused");
    assert!(matches!(err.root(), HttpSimError::Transport(ref msg) if msg == "connection refused"));
    assert_eq!(flow.state(), FlowState::Failed(1));

    // The profile step was never attempted
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    assert!(flow.steps[1].response().is_none());
    assert!(flow.steps[2].response().is_none());
    assert_eq!(flow.values().get("csrf"), Some(&Value::from("t0k3n")));
}

#[tokio::test]
async fn unnamed_extraction_aborts_the_flow() {
    let recorder = Recorder::new(|_| (200, "secret".to_string()));

    let first = Step::new("first", Request::get("http://target/first")).with_extractor(Nameless);
    let second = Step::new("second", Request::get("http://target/second"));
    let mut flow = Flow::new::<&str>(&[], vec![first, second]);

    let err = flow.execute_with(&*recorder, ValueStore::new()).await.unwrap_err();

    assert_eq!(err.step_index(), Some(0));
    assert!(matches!(err.root(), HttpSimError::UnnamedExtraction { ref value } if value == "secret"));
    assert_eq!(flow.state(), FlowState::Failed(0));
    assert!(flow.values().is_empty());
    assert_eq!(recorder.sent().len(), 1);
}

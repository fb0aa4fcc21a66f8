pub mod config;
pub mod extraction;
pub mod flow;
pub mod http_sender;
pub mod request_response;
pub mod step;
pub mod template;
pub mod utils;
pub mod values;

pub use extraction::{ExtractionRule, Extractor};
pub use flow::{Flow, FlowState};
pub use http_sender::{ClientConfig, HttpClient, RawResponse, RedirectPolicy, ReqwestClient, SessionStore};
pub use request_response::{Body, Request, Response};
pub use step::Step;
pub use utils::HttpSimError;
pub use values::{Value, ValueStore};

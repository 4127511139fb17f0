// Scripted transport for unit tests

use crate::scrobbler::traits::{HttpResponse, Transport, TransportError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A request body as seen by the transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn params(&self) -> BTreeMap<String, String> {
        self.body
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                let value = urlencoding::decode(value).ok()?.into_owned();
                Some((key.to_string(), value))
            })
            .collect()
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.params().remove(key)
    }
}

type Responder = Box<dyn Fn(&RecordedRequest) -> Result<HttpResponse, TransportError> + Send>;

/// Replays queued outcomes in order; falls back to a responder or to HTTP 500
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    responder: Mutex<Option<Responder>>,
    requests: Mutex<Vec<RecordedRequest>>,
    reachable: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn push_failure(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    /// Answer requests that are not covered by the script
    pub fn respond_with(
        &self,
        responder: impl Fn(&RecordedRequest) -> Result<HttpResponse, TransportError> + Send + 'static,
    ) {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Transport for ScriptedTransport {
    fn post_form(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let request = RecordedRequest {
            url: url.to_string(),
            body: body.to_string(),
        };
        self.requests.lock().unwrap().push(request.clone());

        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            return outcome;
        }
        match self.responder.lock().unwrap().as_ref() {
            Some(responder) => responder(&request),
            None => Ok(HttpResponse::new(500, "")),
        }
    }

    fn probe(&self, _url: &str) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

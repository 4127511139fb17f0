// Asynchronous Last.fm calls
// Requests run on their own short-lived thread; results are posted back to a
// reply context owned by the caller and run only when the caller pumps it.

use super::error::ApiError;
use super::lastfm::LastFmClient;
use super::track::TrackInfo;
use crate::session::Session;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type Completion = Box<dyn FnOnce() + Send>;

/// Caller-side queue of completions.
///
/// Whoever owns the context decides which thread the callbacks run on by
/// calling [`ReplyContext::run_pending`] or [`ReplyContext::run_next`] there.
pub struct ReplyContext {
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
}

/// Cloneable handle request threads use to post completions
#[derive(Clone)]
pub struct ReplyHandle {
    sender: Sender<Completion>,
}

impl ReplyContext {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> ReplyHandle {
        ReplyHandle {
            sender: self.sender.clone(),
        }
    }

    /// Run every completion that has already arrived
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            completion();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one completion and run it
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => {
                completion();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for ReplyContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyHandle {
    fn post(&self, completion: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(completion)).is_err() {
            log::debug!("Reply context dropped, discarding completion");
        }
    }
}

impl LastFmClient {
    /// Token exchange off the calling thread. The session is stored and
    /// persisted on the reply context, right before `callback` runs.
    pub fn authenticate_async<F>(self: &Arc<Self>, token: &str, reply: &ReplyHandle, callback: F)
    where
        F: FnOnce(Result<Session, ApiError>) + Send + 'static,
    {
        let client = Arc::clone(self);
        let token = token.to_string();
        let reply = reply.clone();

        thread::spawn(move || {
            let result = client.fetch_session(&token);
            reply.post(move || {
                let result = result.inspect(|session| client.adopt_session(session));
                callback(result);
            });
        });
    }

    /// Fire-and-forget now playing notification
    pub fn update_now_playing_async<F>(self: &Arc<Self>, track: &TrackInfo, reply: &ReplyHandle, callback: F)
    where
        F: FnOnce(Result<(), ApiError>) + Send + 'static,
    {
        self.spawn_track_request(track, reply, callback, |client, track| {
            client.update_now_playing(track)
        });
    }

    /// Scrobble off the calling thread; unlike the queue this is never retried
    pub fn scrobble_async<F>(self: &Arc<Self>, track: &TrackInfo, reply: &ReplyHandle, callback: F)
    where
        F: FnOnce(Result<(), ApiError>) + Send + 'static,
    {
        self.spawn_track_request(track, reply, callback, |client, track| client.scrobble(track));
    }

    fn spawn_track_request<F, R>(self: &Arc<Self>, track: &TrackInfo, reply: &ReplyHandle, callback: F, request: R)
    where
        F: FnOnce(Result<(), ApiError>) + Send + 'static,
        R: FnOnce(&LastFmClient, &TrackInfo) -> Result<(), ApiError> + Send + 'static,
    {
        let reply = reply.clone();

        let precondition = if !self.is_authenticated() {
            Err(ApiError::NotAuthenticated)
        } else if !track.has_required_fields() {
            Err(ApiError::MissingMetadata)
        } else {
            Ok(())
        };
        if let Err(e) = precondition {
            reply.post(move || callback(Err(e)));
            return;
        }

        let client = Arc::clone(self);
        let track = track.clone();
        thread::spawn(move || {
            let result = request(&client, &track);
            reply.post(move || callback(result));
        });
    }
}

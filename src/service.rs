// Scrobble service
// Owns the client, session store, delivery queue and drain scheduler

use crate::config::Config;
use crate::playback::PlaybackAction;
use crate::queue::{DeliveryQueue, DrainReport};
use crate::scheduler::DrainScheduler;
use crate::scrobbler::signature::sanitize_key;
use crate::scrobbler::{
    HttpTransport, LastFmClient, ReplyContext, SessionCheck, TrackInfo, Transport,
};
use crate::session::{Session, SessionStore};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct ScrobbleService {
    client: Arc<LastFmClient>,
    store: SessionStore,
    queue: Arc<DeliveryQueue>,
    replies: ReplyContext,
    drain_interval: Duration,
    scheduler: Option<DrainScheduler>,
    /// File the legacy session key is removed from once it has been dealt with
    config_path: Option<PathBuf>,
}

impl ScrobbleService {
    /// Build the service with the attohttpc transport and start the drain loop
    pub fn start(config: &Config, config_path: Option<&Path>) -> Result<Self> {
        let mut service = Self::open(config, config_path)?;
        service.start_scheduler()?;
        Ok(service)
    }

    /// Build the service with the attohttpc transport, without draining in the background
    pub fn open(config: &Config, config_path: Option<&Path>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(
            config.connect_timeout(),
            config.request_timeout(),
        ));
        Self::new(config, config_path, transport)
    }

    /// Build the service without starting the drain loop.
    ///
    /// The stored session is restored and validated before the queue is
    /// loaded, so nothing is submitted with a stale session. `config_path`
    /// is where `config` came from, if anywhere.
    pub fn new(
        config: &Config,
        config_path: Option<&Path>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let data_dir = config.data_dir()?;
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let store = SessionStore::in_dir(&data_dir);
        let client = Arc::new(LastFmClient::new(
            config.client_settings(),
            transport,
            store.clone(),
        ));
        client.set_credentials(&config.lastfm.api_key, &config.lastfm.api_secret);

        let service = Self {
            client,
            store,
            queue: Arc::new(DeliveryQueue::in_dir(&data_dir, config.queue_policy())),
            replies: ReplyContext::new(),
            drain_interval: config.drain_interval(),
            scheduler: None,
            config_path: config_path.map(Path::to_path_buf),
        };
        service.restore_session(&config.lastfm.session_key);

        Ok(service)
    }

    pub fn start_scheduler(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Ok(());
        }
        let scheduler = DrainScheduler::spawn(
            Arc::clone(&self.queue),
            Arc::clone(&self.client),
            self.drain_interval,
        )
        .context("Failed to start drain scheduler")?;
        self.scheduler = Some(scheduler);
        Ok(())
    }

    fn restore_session(&self, legacy_session_key: &str) {
        match self.store.load() {
            Some(session) => {
                if !self.client.has_credentials() {
                    log::warn!("Cannot validate session - missing API credentials");
                    self.client.invalidate_session();
                    return;
                }

                self.client.set_session_key(&session.key);
                log::debug!("Validating session...");
                match self.client.validate_session() {
                    Ok(true) => log::info!("Authenticated as: {}", session.name),
                    Ok(false) | Err(_) => {
                        log::warn!("Saved session invalid, clearing");
                        self.client.invalidate_session();
                    }
                }
            }
            None => {
                let legacy_key = sanitize_key(legacy_session_key);
                if legacy_key.is_empty() {
                    log::info!("Not authenticated - run `lastfm-relay auth` to connect an account");
                    return;
                }
                if !self.client.has_credentials() {
                    log::warn!("Ignoring session key from config - missing API credentials");
                    return;
                }

                self.client.set_session_key(&legacy_key);
                log::debug!("Validating session from config...");
                match self.client.check_session() {
                    SessionCheck::Valid => {
                        self.store.save(&Session {
                            key: legacy_key,
                            name: String::new(),
                        });
                        self.forget_legacy_session_key();
                        log::info!("Session key from config migrated to the session file");
                    }
                    SessionCheck::Rejected => {
                        log::warn!("Config session invalid, clearing");
                        self.forget_legacy_session_key();
                    }
                    // Only a confirmed key is promoted to the session file
                    SessionCheck::Inconclusive(e) => {
                        log::warn!("Could not verify session key from config ({}), not using it", e);
                        self.client.set_session_key("");
                    }
                }
            }
        }
    }

    /// Blank `lastfm.session_key` in the config file
    fn forget_legacy_session_key(&self) {
        let Some(path) = self.config_path.as_deref() else {
            return;
        };
        if !path.exists() {
            return;
        }

        let result = Config::load_from(path).and_then(|mut config| {
            if config.lastfm.session_key.is_empty() {
                return Ok(());
            }
            config.lastfm.session_key.clear();
            config.save_to(path)
        });
        if let Err(e) = result {
            log::error!("Failed to remove session key from {:?}: {:#}", path, e);
        }
    }

    pub fn client(&self) -> &Arc<LastFmClient> {
        &self.client
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    /// Context on which asynchronous completions run
    pub fn replies(&self) -> &ReplyContext {
        &self.replies
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    /// Name of the authenticated account, if any
    pub fn account_name(&self) -> Option<String> {
        self.store
            .load()
            .map(|session| session.name)
            .filter(|name| !name.is_empty())
    }

    /// Best-effort now playing; never queued or retried
    pub fn now_playing(&self, track: &TrackInfo) {
        let description = track.to_string();
        self.client
            .update_now_playing_async(track, &self.replies.handle(), move |result| match result {
                Ok(()) => log::info!("Now playing updated: {}", description),
                Err(e) => log::debug!("Now playing not sent for {}: {}", description, e),
            });
    }

    /// Queue a scrobble, then try to deliver right away
    pub fn submit(&self, track: TrackInfo) -> DrainReport {
        self.queue.enqueue(track);
        self.queue.drain(&self.client)
    }

    /// One drain cycle outside the schedule
    pub fn flush(&self) -> DrainReport {
        self.queue.drain(&self.client)
    }

    pub fn handle_action(&self, action: PlaybackAction) {
        match action {
            PlaybackAction::NowPlaying(track) => self.now_playing(&track),
            PlaybackAction::Scrobble(track) => {
                self.submit(track);
            }
        }
    }

    /// Forget the session in memory and on disk
    pub fn logout(&self) {
        self.client.invalidate_session();
        self.forget_legacy_session_key();
        log::info!("Logged out of Last.fm");
    }

    /// Stop the drain loop and wait for it
    pub fn shutdown(mut self) {
        self.stop_scheduler();
        self.replies.run_pending();
        log::info!("Shutdown complete");
    }

    fn stop_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
    }
}

impl Drop for ScrobbleService {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{NewTrack, PlaybackEvent, PlaybackTracker};
    use crate::scrobbler::{HttpResponse, TransportError};
    use crate::test_support::ScriptedTransport;
    use crate::text_cleanup::TextCleaner;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.data_dir = Some(dir.path().to_path_buf());
        config.lastfm.api_key = "key".to_string();
        config.lastfm.api_secret = "secret".to_string();
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 4;
        config
    }

    fn write_config(dir: &TempDir, session_key: &str) -> PathBuf {
        let mut config = config(dir);
        config.lastfm.session_key = session_key.to_string();
        let path = dir.path().join("lastfm_relay.toml");
        config.save_to(&path).unwrap();
        path
    }

    fn stored_session(dir: &TempDir) -> SessionStore {
        let store = SessionStore::in_dir(dir.path());
        store.save(&Session {
            key: "stored".to_string(),
            name: "listener".to_string(),
        });
        store
    }

    #[test]
    fn restores_valid_session() {
        let dir = tempfile::tempdir().unwrap();
        stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(200, r#"{"session":{"name":"listener"}}"#);

        let service = ScrobbleService::new(&config(&dir), None, transport.clone()).unwrap();
        assert!(service.is_authenticated());
        assert_eq!(service.client().session_key(), "stored");
        assert_eq!(service.account_name().as_deref(), Some("listener"));
    }

    #[test]
    fn rejected_session_is_cleared_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(403, "");

        let service = ScrobbleService::new(&config(&dir), None, transport).unwrap();
        assert!(!service.is_authenticated());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn offline_startup_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_failure(TransportError::Connect("refused".to_string()));

        let service = ScrobbleService::new(&config(&dir), None, transport).unwrap();
        assert!(service.is_authenticated());
        assert!(store.load().is_some());
    }

    #[test]
    fn missing_credentials_clear_stored_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        let mut config = config(&dir);
        config.lastfm.api_secret.clear();

        let service = ScrobbleService::new(&config, None, transport.clone()).unwrap();
        assert!(!service.is_authenticated());
        assert_eq!(store.load(), None);
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn legacy_config_key_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(200, "{}");
        let mut config = config(&dir);
        config.lastfm.session_key = " legacy-key \n".to_string();

        let service = ScrobbleService::new(&config, None, transport).unwrap();
        assert_eq!(service.client().session_key(), "legacy-key");
        assert_eq!(service.session_store().load().unwrap().key, "legacy-key");
    }

    #[test]
    fn submit_delivers_immediately() {
        let dir = tempfile::tempdir().unwrap();
        stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_with(|_| Ok(HttpResponse::new(200, "{}")));

        let service = ScrobbleService::new(&config(&dir), None, transport.clone()).unwrap();
        let report = service.submit(TrackInfo::new("Artist", "Title").with_timestamp(1000));
        assert_eq!(report.delivered, 1);
        assert_eq!(service.queue().size(), 0);
        let last = transport.last_request().unwrap();
        assert_eq!(last.param("method").as_deref(), Some("track.scrobble"));
    }

    #[test]
    fn queued_scrobbles_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_with(|_| Ok(HttpResponse::new(200, "{}")));
        transport.set_reachable(false);

        {
            let service = ScrobbleService::new(&config(&dir), None, transport.clone()).unwrap();
            service.submit(TrackInfo::new("Artist", "Offline").with_timestamp(1000));
            assert_eq!(service.queue().size(), 1);
        }

        transport.set_reachable(true);
        let service = ScrobbleService::new(&config(&dir), None, transport.clone()).unwrap();
        assert_eq!(service.queue().size(), 1);
        assert_eq!(service.flush().delivered, 1);
        assert_eq!(service.queue().size(), 0);
    }

    #[test]
    fn playback_events_drive_the_service() {
        let dir = tempfile::tempdir().unwrap();
        stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_with(|_| Ok(HttpResponse::new(200, "{}")));
        let service = ScrobbleService::new(&config(&dir), None, transport.clone()).unwrap();
        let mut tracker = PlaybackTracker::new(true, 50, TextCleaner::disabled());

        let events = [
            PlaybackEvent::NewTrack(NewTrack {
                artist: "Artist".to_string(),
                title: "Title".to_string(),
                length: 200.0,
                ..NewTrack::default()
            }),
            PlaybackEvent::Position { elapsed: 100.0 },
        ];
        for event in events {
            if let Some(action) = tracker.handle(event, service.is_authenticated(), 5000) {
                service.handle_action(action);
            }
        }
        assert!(service.replies().run_next(Duration::from_secs(5)));

        let methods: Vec<String> = transport
            .requests()
            .iter()
            .filter_map(|request| request.param("method"))
            .collect();
        assert!(methods.contains(&"track.updateNowPlaying".to_string()));
        assert!(methods.contains(&"track.scrobble".to_string()));
        assert_eq!(service.queue().size(), 0);
    }

    #[test]
    fn logout_forgets_session() {
        let dir = tempfile::tempdir().unwrap();
        stored_session(&dir);
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(200, "{}");
        let mut service = ScrobbleService::new(&config(&dir), None, transport).unwrap();
        service.start_scheduler().unwrap();

        service.logout();
        assert!(!service.is_authenticated());
        assert_eq!(service.session_store().load(), None);
        service.shutdown();
    }

    #[test]
    fn logout_after_migration_stays_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "legacy");
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_with(|_| Ok(HttpResponse::new(200, "{}")));

        {
            let config = Config::load_from(&path).unwrap();
            let service = ScrobbleService::new(&config, Some(path.as_path()), transport.clone()).unwrap();
            assert!(service.is_authenticated());
            assert_eq!(Config::load_from(&path).unwrap().lastfm.session_key, "");
            service.logout();
        }

        let config = Config::load_from(&path).unwrap();
        let service = ScrobbleService::new(&config, Some(path.as_path()), transport).unwrap();
        assert!(!service.is_authenticated());
        assert_eq!(service.session_store().load(), None);
    }

    #[test]
    fn rejected_session_stays_gone_after_offline_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "legacy");
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(200, "{}");

        {
            let config = Config::load_from(&path).unwrap();
            let service = ScrobbleService::new(&config, Some(path.as_path()), transport.clone()).unwrap();
            assert!(service.is_authenticated());

            transport.push_response(403, "");
            service.submit(TrackInfo::new("Artist", "Title").with_timestamp(1000));
            assert!(!service.is_authenticated());
            assert_eq!(service.session_store().load(), None);
        }

        transport.push_failure(TransportError::Timeout);
        let config = Config::load_from(&path).unwrap();
        let service = ScrobbleService::new(&config, Some(path.as_path()), transport).unwrap();
        assert!(!service.is_authenticated());
        assert_eq!(service.session_store().load(), None);
    }

    #[test]
    fn unverified_legacy_key_is_not_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "legacy");
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_failure(TransportError::Timeout);

        let config = Config::load_from(&path).unwrap();
        let service = ScrobbleService::new(&config, Some(path.as_path()), transport).unwrap();
        assert!(!service.is_authenticated());
        assert_eq!(service.session_store().load(), None);
        // Kept for a later start that can reach the server
        assert_eq!(Config::load_from(&path).unwrap().lastfm.session_key, "legacy");
    }

    #[test]
    fn rejected_legacy_key_is_removed_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "legacy");
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(403, "");

        let config = Config::load_from(&path).unwrap();
        let service = ScrobbleService::new(&config, Some(path.as_path()), transport).unwrap();
        assert!(!service.is_authenticated());
        assert_eq!(Config::load_from(&path).unwrap().lastfm.session_key, "");
    }
}

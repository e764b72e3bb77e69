//! Daemon wiring
//!
//! Builds the schedule store, publisher, API server, calendar worker, media
//! poller, ringer and voice pipeline from a [`Config`], then runs until Ctrl-C.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::ApiServer;
use crate::calendar::CalendarSyncWorker;
use crate::config::Config;
use crate::media::{HomeAssistantPlayer, MediaPlayer};
use crate::pipeline::{
    AssistClient, AudioSink, LlmClient, PipelineOrchestrator, PipelineParts, PipelineSettings,
    Ringer, Route, Sensitivity,
};
use crate::publisher::{BusDisplay, DisplaySurface, PERSIST_DELAY, StatePublisher, SyncBus, load_snapshot};
use crate::remote::{HomeAssistantAssist, OpenAiChat};
use crate::schedule::{ScheduleStore, SystemClock, spawn_ticker};
use crate::shortcuts::{InfoProviders, ShortcutExecutor};
use crate::voice::{AudioCapture, MicrophoneSource, OpenAiSpeech, SpeakerSink};
use crate::Result;

/// The Hearth daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the audio devices cannot be opened or the API server
    /// cannot bind
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        tracing::info!(
            port = config.api_server.port,
            namespace = %config.api_server.namespace,
            voice = config.voice.enabled,
            "daemon running"
        );

        let store = Arc::new(ScheduleStore::new(
            Arc::new(SystemClock),
            config.schedule.store_settings(),
        ));
        restore_schedules(&store, config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        let bus = Arc::new(SyncBus::new(&config.api_server.namespace));
        let display: Arc<dyn DisplaySurface> = Arc::new(BusDisplay::new(Arc::clone(&bus)));
        let (commands, publisher) = StatePublisher::new(Arc::clone(&store), Arc::clone(&bus), Arc::clone(&display))
            .persist_to(config.schedules_path(), PERSIST_DELAY)
            .until(shutdown_rx.clone())
            .spawn();

        let api = ApiServer::new(Arc::clone(&bus), commands, config.api_server.port)
            .spawn(stopped(shutdown_rx.clone()));

        let mut background: Vec<JoinHandle<()>> = vec![spawn_ticker(Arc::clone(&store), config.schedule.tick)];
        if config.calendar.feeds.is_empty() {
            tracing::debug!("no calendar feeds configured");
        } else {
            background.push(CalendarSyncWorker::new(Arc::clone(&store), config.calendar.clone()).spawn());
        }

        let media = media_player(config);
        let sensitivity = Sensitivity::new(config.voice.trigger_level, config.voice.elevated_trigger_level);
        if let Some(player) = &media {
            background.push(sensitivity.spawn_poller(Arc::clone(player), config.media.poll_interval));
        }

        if config.voice.enabled {
            let executor = ShortcutExecutor::new(
                Arc::clone(&store),
                Arc::new(InfoProviders::new(config.info.clone())),
                media.clone(),
                display,
            );
            let sink: Arc<dyn AudioSink> = Arc::new(SpeakerSink::open()?);
            let ringer = Ringer::new(Arc::clone(&store), Arc::clone(&sink), media.clone(), config.remote.timeout)
                .spawn(shutdown_rx.clone());
            let orchestrator =
                build_pipeline(config, executor, sink, media, store, Arc::clone(&bus), sensitivity)?;
            tracing::info!(
                wake_words = ?config.voice.wake_words.iter().map(|w| w.phrase.as_str()).collect::<Vec<_>>(),
                "hearth ready"
            );
            orchestrator.run(shutdown_rx.clone()).await?;
            if let Err(e) = ringer.await {
                tracing::warn!(error = %e, "ringer task failed");
            }
        } else {
            tracing::info!("hearth ready (voice disabled)");
            stopped(shutdown_rx.clone()).await;
        }

        for task in background {
            task.abort();
        }
        if let Err(e) = publisher.await {
            tracing::warn!(error = %e, "state publisher task failed");
        }
        match api.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "API server stopped with error"),
            Err(e) => tracing::warn!(error = %e, "API server task failed"),
            Ok(Ok(())) => {}
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Rebuild the store from the persisted schedule file
///
/// A missing file starts empty; an unreadable one is logged and ignored.
fn restore_schedules(store: &ScheduleStore, config: &Config) {
    let path = config.schedules_path();
    match load_snapshot(&path) {
        Ok(Some(snapshot)) => {
            let entities: Vec<_> = snapshot.entities().cloned().collect();
            tracing::info!(count = entities.len(), path = %path.display(), "schedules restored");
            store.restore(entities, snapshot.paused_days);
        }
        Ok(None) => tracing::debug!(path = %path.display(), "no persisted schedules"),
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to load schedules"),
    }
}

fn media_player(config: &Config) -> Option<Arc<dyn MediaPlayer>> {
    let media = &config.media;
    match (&media.url, &media.token, &media.entity_id) {
        (Some(url), Some(token), Some(entity_id)) => {
            tracing::info!(entity_id = %entity_id, "media player configured");
            Some(Arc::new(HomeAssistantPlayer::new(
                url,
                token.clone(),
                entity_id,
                config.remote.timeout,
            )))
        }
        _ => {
            tracing::debug!("no media player configured");
            None
        }
    }
}

/// Open the audio devices and assemble the orchestrator
///
/// Audio device failures are fatal at startup.
fn build_pipeline(
    config: &Config,
    executor: ShortcutExecutor,
    sink: Arc<dyn AudioSink>,
    media: Option<Arc<dyn MediaPlayer>>,
    store: Arc<ScheduleStore>,
    bus: Arc<SyncBus>,
    sensitivity: Sensitivity,
) -> Result<PipelineOrchestrator> {
    let capture = AudioCapture::open()?;

    let uses = |route: Route| config.voice.wake_words.iter().any(|w| w.route == route);
    let llm: Option<Arc<dyn LlmClient>> = uses(Route::Llm).then(|| Arc::new(OpenAiChat::new(&config.remote)) as _);
    let assist: Option<Arc<dyn AssistClient>> = if uses(Route::Assist) {
        Some(Arc::new(HomeAssistantAssist::new(&config.remote)?))
    } else {
        None
    };

    let parts = PipelineParts {
        source: Box::new(MicrophoneSource::new(capture, &config.voice)),
        sink,
        speech: Arc::new(OpenAiSpeech::new(&config.remote, &config.voice)),
        llm,
        assist,
        media,
        executor,
    };

    Ok(PipelineOrchestrator::new(
        PipelineSettings::from_config(config),
        config.voice.wake_words.clone(),
        parts,
        store,
        bus,
        sensitivity,
    ))
}

/// Resolves once shutdown is requested or its sender is gone
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

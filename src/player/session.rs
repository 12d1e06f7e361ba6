//! Playback session: one source, its stages and its clock

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::audio::AudioDevice;
use crate::codec::DecoderFactory;
use crate::config::PlayerConfig;
use crate::demux::{self, Demuxer};
use crate::error::{Error, Result};
use crate::media::{MediaInfo, MediaKind, StreamInfo};
use crate::player::pipeline::{
    Leftovers, PauseGate, Pipeline, PlaybackEvent, ResourceCounter, SessionOutcome, StageContext, Supervisor,
    Tracked, VideoOutput,
};
use crate::render::Surface;
use crate::stats::{PlaybackCounters, PlaybackStats};
use crate::sync::PresentationClock;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Stages of a session, either parked or running
struct Stages {
    /// Present while no pipeline runs
    demuxer: Option<Tracked<Box<dyn Demuxer>>>,
    pipeline: Option<Pipeline>,
    audio: Option<Arc<dyn AudioDevice>>,
    released: bool,
}

/// The playback context bound to one source.
///
/// Opening scans the source; nothing plays until
/// [`start_video`](Self::start_video) or [`start_audio`](Self::start_audio)
/// enables a stream. Streams can be enabled while the other one is already
/// playing. The session is torn down by [`release`](Self::release) or on
/// drop, after every stage thread has exited.
pub struct PlaybackSession {
    id: u64,
    source: String,
    info: MediaInfo,
    ctx: Arc<StageContext>,
    factory: Arc<dyn DecoderFactory>,
    events: Receiver<PlaybackEvent>,
    stages: Mutex<Stages>,
}

impl PlaybackSession {
    /// Open `source` (FLV path or `rtmp://` URL) and scan its streams
    pub fn open(
        source: &str,
        config: PlayerConfig,
        factory: Arc<dyn DecoderFactory>,
        resources: Arc<ResourceCounter>,
    ) -> Result<Self> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let stop = Arc::new(AtomicBool::new(false));

        let demuxer = demux::open(source, &config, Arc::clone(&stop)).map_err(|e| {
            tracing::warn!(session_id = id, source = %source, error = %e, "Open failed");
            e
        })?;
        let info = demuxer.info().clone();
        let demuxer = resources.track(demuxer);

        tracing::info!(
            session_id = id,
            source = %source,
            streams = info.streams.len(),
            duration_ms = ?info.duration_ms,
            "Session opened"
        );

        let (supervisor, events) = Supervisor::new(id);
        let ctx = Arc::new(StageContext {
            session_id: id,
            config,
            stop,
            clock: Arc::new(PresentationClock::new()),
            counters: Arc::new(PlaybackCounters::new()),
            resources,
            gate: PauseGate::default(),
            supervisor,
        });

        Ok(Self {
            id,
            source: source.to_string(),
            info,
            ctx,
            factory,
            events,
            stages: Mutex::new(Stages {
                demuxer: Some(demuxer),
                pipeline: None,
                audio: None,
                released: false,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Streams and metadata found while opening
    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    /// Present the video stream on `surface`. A zero `width`/`height` uses
    /// the surface's own size.
    pub fn start_video(&self, surface: Box<dyn Surface>, width: u32, height: u32) -> Result<()> {
        let stream = self.stream(MediaKind::Video)?;
        let mut stages = self.stages.lock();
        self.check_live(&stages)?;
        if stages.pipeline.as_ref().is_some_and(Pipeline::has_video) {
            return Err(Error::InvalidState("video already started".into()));
        }
        let decoder = self.decoder(&stream)?;
        let pipeline = self.ensure_pipeline(&mut stages)?;
        pipeline.attach_video(&stream, decoder, VideoOutput { surface, width, height })?;
        pipeline.launch()?;
        tracing::info!(session_id = self.id, stream = stream.index, width, height, "Video started");
        Ok(())
    }

    /// Play the audio stream on `device`
    pub fn start_audio(&self, device: Arc<dyn AudioDevice>) -> Result<()> {
        let stream = self.stream(MediaKind::Audio)?;
        let mut stages = self.stages.lock();
        self.check_live(&stages)?;
        if stages.pipeline.as_ref().is_some_and(Pipeline::has_audio) {
            return Err(Error::InvalidState("audio already started".into()));
        }
        let decoder = self.decoder(&stream)?;
        if self.ctx.gate.is_paused() {
            device.pause();
        }
        let pipeline = self.ensure_pipeline(&mut stages)?;
        pipeline.attach_audio(&stream, decoder, Arc::clone(&device))?;
        pipeline.launch()?;
        stages.audio = Some(device);
        tracing::info!(
            session_id = self.id,
            stream = stream.index,
            sample_rate = stream.sample_rate,
            channels = stream.channels,
            "Audio started"
        );
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let stages = self.stages.lock();
        self.check_live(&stages)?;
        if self.ctx.gate.is_paused() {
            return Ok(());
        }
        self.ctx.gate.pause();
        self.ctx.clock.pause();
        if let Some(device) = stages.audio.as_ref() {
            device.pause();
        }
        tracing::info!(session_id = self.id, position_ms = self.position(), "Paused");
        self.ctx.supervisor.emit(PlaybackEvent::Paused);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let stages = self.stages.lock();
        self.check_live(&stages)?;
        if !self.ctx.gate.is_paused() {
            return Ok(());
        }
        self.ctx.clock.resume();
        if let Some(device) = stages.audio.as_ref() {
            device.resume();
        }
        self.ctx.gate.resume();
        tracing::info!(session_id = self.id, position_ms = self.position(), "Resumed");
        self.ctx.supervisor.emit(PlaybackEvent::Resumed);
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.ctx.gate.is_paused()
    }

    /// Continue from the key frame at or before `position_ms`. Returns the
    /// position actually reached.
    ///
    /// Running stages are stopped, the demuxer repositioned and the enabled
    /// streams restarted with fresh decoders.
    pub fn seek(&self, position_ms: u64) -> Result<u64> {
        if !self.info.seekable {
            return Err(Error::SeekUnsupported);
        }
        let mut stages = self.stages.lock();
        self.check_live(&stages)?;

        let (mut demuxer, video, restart_audio) = match stages.pipeline.take() {
            Some(pipeline) => {
                let restart_audio = pipeline.has_audio();
                self.ctx.stop.store(true, Ordering::Release);
                let Leftovers { demuxer, video } = pipeline.shutdown();
                self.ctx.stop.store(false, Ordering::Release);
                let demuxer =
                    demuxer.ok_or_else(|| Error::InvalidState("demux stage did not hand back its source".into()))?;
                (demuxer, video, restart_audio)
            }
            None => match stages.demuxer.take() {
                Some(demuxer) => (demuxer, None, false),
                None => return Err(Error::InvalidState("no source to seek".into())),
            },
        };

        let reached = demuxer.seek(position_ms);
        self.ctx.clock.reset();
        if let Some(device) = stages.audio.as_ref() {
            device.clear();
        }
        stages.demuxer = Some(demuxer);

        // Even a failed seek leaves the source readable where it was
        self.restart(&mut stages, video, restart_audio)?;
        let reached = reached?;

        tracing::info!(session_id = self.id, requested = position_ms, reached, "Seeked");
        self.ctx.supervisor.emit(PlaybackEvent::Seeked { position_ms: reached });
        Ok(reached)
    }

    fn restart(&self, stages: &mut Stages, video: Option<VideoOutput>, audio: bool) -> Result<()> {
        if let Some(output) = video {
            if let Some(stream) = self.info.stream(MediaKind::Video).cloned() {
                let decoder = self.decoder(&stream)?;
                self.ensure_pipeline(stages)?.attach_video(&stream, decoder, output)?;
            }
        }
        if audio {
            if let (Some(stream), Some(device)) = (self.info.stream(MediaKind::Audio).cloned(), stages.audio.clone()) {
                let decoder = self.decoder(&stream)?;
                self.ensure_pipeline(stages)?.attach_audio(&stream, decoder, device)?;
            }
        }
        // Both streams are routed before the first packet is read
        if let Some(pipeline) = stages.pipeline.as_mut() {
            pipeline.launch()?;
        }
        Ok(())
    }

    /// Stop playback. The outcome becomes `Stopped` unless it was already
    /// settled.
    pub fn stop(&self) {
        let mut stages = self.stages.lock();
        self.halt(&mut stages);
    }

    fn halt(&self, stages: &mut Stages) {
        self.ctx.supervisor.settle(SessionOutcome::Stopped);
        self.ctx.stop.store(true, Ordering::Release);
        if let Some(pipeline) = stages.pipeline.take() {
            let leftovers = pipeline.shutdown();
            if let Some(demuxer) = leftovers.demuxer {
                stages.demuxer = Some(demuxer);
            }
        }
    }

    /// Stop, join every stage thread, then close the source and the audio
    /// device. Idempotent.
    pub fn release(&self) {
        let mut stages = self.stages.lock();
        if stages.released {
            return;
        }
        self.halt(&mut stages);
        if let Some(mut demuxer) = stages.demuxer.take() {
            demuxer.close();
        }
        if let Some(device) = stages.audio.take() {
            device.close();
        }
        stages.released = true;
        tracing::info!(session_id = self.id, "Session released");
    }

    /// Master clock position in milliseconds
    pub fn position(&self) -> u64 {
        self.ctx.clock.position_ms().max(0) as u64
    }

    pub fn stats(&self) -> PlaybackStats {
        let underruns = self.stages.lock().audio.as_ref().map(|d| d.underruns()).unwrap_or(0);
        self.ctx.counters.snapshot(underruns)
    }

    /// Final outcome, once settled
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.ctx.supervisor.outcome()
    }

    /// Block until the session has an outcome; `None` on timeout
    pub fn wait(&self, timeout: Option<Duration>) -> Option<SessionOutcome> {
        self.ctx.supervisor.wait(timeout)
    }

    /// Session notifications. Every receiver sees each event once between
    /// them; clone before handing out to several consumers.
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events.clone()
    }

    fn stream(&self, kind: MediaKind) -> Result<StreamInfo> {
        self.info
            .stream(kind)
            .cloned()
            .ok_or_else(|| Error::InvalidState(format!("{} has no {:?} stream", self.source, kind)))
    }

    fn check_live(&self, stages: &Stages) -> Result<()> {
        if stages.released {
            return Err(Error::InvalidState("session released".into()));
        }
        if let Some(outcome) = self.ctx.supervisor.outcome() {
            return Err(Error::InvalidState(format!("session already ended: {:?}", outcome)));
        }
        Ok(())
    }

    fn decoder(&self, stream: &StreamInfo) -> Result<Tracked<Box<dyn crate::codec::Decoder>>> {
        let decoder = self.factory.create(stream).map_err(|e| {
            tracing::warn!(session_id = self.id, stream = stream.index, codec = stream.codec.name(), error = %e, "No decoder");
            e
        })?;
        Ok(self.ctx.resources.track(decoder))
    }

    fn ensure_pipeline<'a>(&self, stages: &'a mut Stages) -> Result<&'a mut Pipeline> {
        if stages.pipeline.is_none() {
            let demuxer = stages
                .demuxer
                .take()
                .ok_or_else(|| Error::InvalidState("source already closed".into()))?;
            stages.pipeline = Some(Pipeline::new(Arc::clone(&self.ctx), demuxer));
        }
        stages
            .pipeline
            .as_mut()
            .ok_or_else(|| Error::InvalidState("pipeline not running".into()))
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("streams", &self.info.streams.len())
            .finish()
    }
}

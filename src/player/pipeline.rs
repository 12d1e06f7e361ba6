//! Stage threads of a playback session
//!
//! ```text
//!          ┌─packets─> decode(video) ─frames─> video feeder ─> Surface
//!  demux ──┤
//!          └─packets─> decode(audio) ─frames─> audio feeder ─> AudioDevice
//! ```
//!
//! Every arrow is a [`BoundedQueue`]. A stage that gives up closes its
//! input queue, so the producer fails its next push and stops feeding it;
//! a stage that runs out of input flushes and closes its output queue.
//! Outcomes flow the same way: the feeder at the end of a chain reports
//! how its stream ended to the [`Supervisor`].

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::audio::{AudioDevice, AudioSink};
use crate::codec::Decoder;
use crate::config::PlayerConfig;
use crate::demux::stage::{self as demux_stage, PacketRoutes};
use crate::demux::Demuxer;
use crate::error::{Error, Result};
use crate::media::{Frame, MediaKind, Packet, StreamInfo};
use crate::queue::BoundedQueue;
use crate::render::{Surface, VideoRenderer};
use crate::stats::PlaybackCounters;
use crate::sync::{ClockSource, PresentationClock, Synchronizer, Verdict};

/// Live stage threads and owned resources (demuxers, decoders)
#[derive(Debug, Default)]
pub struct ResourceCounter {
    threads: AtomicUsize,
    resources: AtomicUsize,
}

impl ResourceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(&self) -> usize {
        self.threads.load(Ordering::Acquire)
    }

    pub fn resources(&self) -> usize {
        self.resources.load(Ordering::Acquire)
    }

    fn thread_guard(self: &Arc<Self>) -> ThreadGuard {
        self.threads.fetch_add(1, Ordering::AcqRel);
        ThreadGuard {
            counter: Arc::clone(self),
        }
    }

    /// Count `value` as live until it is dropped
    pub(crate) fn track<T>(self: &Arc<Self>, value: T) -> Tracked<T> {
        self.resources.fetch_add(1, Ordering::AcqRel);
        Tracked {
            value,
            counter: Arc::clone(self),
        }
    }
}

struct ThreadGuard {
    counter: Arc<ResourceCounter>,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        self.counter.threads.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A counted resource
pub(crate) struct Tracked<T> {
    value: T,
    counter: Arc<ResourceCounter>,
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.counter.resources.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Blocks the feeders while the session is paused
#[derive(Debug, Default)]
pub(crate) struct PauseGate {
    paused: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    pub(crate) fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub(crate) fn resume(&self) {
        *self.paused.lock() = false;
        self.cond.notify_all();
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Wake waiters so they notice a stop request
    pub(crate) fn wake_all(&self) {
        self.cond.notify_all();
    }

    /// Block while paused. `false` when stop was requested.
    pub(crate) fn wait(&self, stop: &AtomicBool) -> bool {
        let mut paused = self.paused.lock();
        while *paused {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            self.cond.wait_for(&mut paused, Duration::from_millis(50));
        }
        !stop.load(Ordering::Acquire)
    }
}

/// How a playback session ended. Reported exactly once.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// Every enabled stream played to its end
    Finished,
    /// Stopped or released by the caller
    Stopped,
    /// A session-fatal error
    Failed(Arc<Error>),
}

impl SessionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SessionOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            SessionOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Notifications from a playback session
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    StreamStarted { stream: usize, kind: MediaKind },
    /// The stream played to its end
    StreamEnded { stream: usize, kind: MediaKind },
    /// The stream failed and was disabled; others keep playing
    StreamDisabled {
        stream: usize,
        kind: MediaKind,
        error: Arc<Error>,
    },
    Paused,
    Resumed,
    Seeked { position_ms: u64 },
    Outcome(SessionOutcome),
}

/// How a feeder's stream came to an end
pub(crate) enum StreamExit {
    Ended,
    Stopped,
    Failed(Error),
}

/// Tracks running streams and settles the session outcome
pub(crate) struct Supervisor {
    session_id: u64,
    active: Mutex<HashSet<usize>>,
    outcome: Mutex<Option<SessionOutcome>>,
    settled: Condvar,
    events: Sender<PlaybackEvent>,
}

impl Supervisor {
    pub(crate) fn new(session_id: u64) -> (Self, Receiver<PlaybackEvent>) {
        let (events, receiver) = crossbeam_channel::unbounded();
        let supervisor = Self {
            session_id,
            active: Mutex::new(HashSet::new()),
            outcome: Mutex::new(None),
            settled: Condvar::new(),
            events,
        };
        (supervisor, receiver)
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn stream_started(&self, stream: usize, kind: MediaKind) {
        self.active.lock().insert(stream);
        self.emit(PlaybackEvent::StreamStarted { stream, kind });
    }

    /// Feeder exit. The last stream to end settles the session: finished,
    /// or failed with the error that took the last stream down.
    pub(crate) fn stream_exited(&self, stream: usize, kind: MediaKind, exit: StreamExit) {
        let remaining = {
            let mut active = self.active.lock();
            active.remove(&stream);
            active.len()
        };
        match exit {
            StreamExit::Stopped => {}
            StreamExit::Ended => {
                tracing::debug!(session_id = self.session_id, stream, "Stream ended");
                self.emit(PlaybackEvent::StreamEnded { stream, kind });
                if remaining == 0 {
                    self.settle(SessionOutcome::Finished);
                }
            }
            StreamExit::Failed(error) => {
                let error = Arc::new(error);
                tracing::warn!(
                    session_id = self.session_id,
                    stream,
                    kind = ?kind,
                    error = %error,
                    "Stream disabled"
                );
                self.emit(PlaybackEvent::StreamDisabled {
                    stream,
                    kind,
                    error: Arc::clone(&error),
                });
                if remaining == 0 {
                    self.settle(SessionOutcome::Failed(error));
                }
            }
        }
    }

    /// Session-fatal failure
    pub(crate) fn fail(&self, error: Error) {
        self.settle(SessionOutcome::Failed(Arc::new(error)));
    }

    /// Record the outcome unless one is already set. Returns whether this
    /// call set it.
    pub(crate) fn settle(&self, outcome: SessionOutcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        match &outcome {
            SessionOutcome::Failed(e) => {
                tracing::error!(session_id = self.session_id, error = %e, "Session failed")
            }
            other => tracing::info!(session_id = self.session_id, outcome = ?other, "Session ended"),
        }
        *slot = Some(outcome.clone());
        self.settled.notify_all();
        drop(slot);
        self.emit(PlaybackEvent::Outcome(outcome));
        true
    }

    pub(crate) fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.lock().clone()
    }

    /// Block until the outcome is known, at most `timeout`
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<SessionOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.settled.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.settled.wait(&mut slot),
            }
        }
        slot.clone()
    }
}

/// State every stage of a session shares
pub(crate) struct StageContext {
    pub(crate) session_id: u64,
    pub(crate) config: PlayerConfig,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) clock: Arc<PresentationClock>,
    pub(crate) counters: Arc<PlaybackCounters>,
    pub(crate) resources: Arc<ResourceCounter>,
    pub(crate) gate: PauseGate,
    pub(crate) supervisor: Supervisor,
}

impl StageContext {
    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Spawn a named stage thread, counted while it runs
    fn spawn<T, F>(&self, name: String, body: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.resources.thread_guard();
        let session_id = self.session_id;
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = guard;
            tracing::debug!(session_id, stage = %name, "Stage started");
            let out = body();
            tracing::debug!(session_id, stage = %name, "Stage exited");
            out
        })?;
        Ok(handle)
    }
}

/// Decoded output on its way to a feeder. A decoder that fails sends the
/// error down the same queue, so the feeder reports the stream once.
pub(crate) enum FrameItem {
    Frame(Frame),
    Failed(Error),
}

/// Where a video stream goes
pub(crate) struct VideoOutput {
    pub(crate) surface: Box<dyn Surface>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// Running stage threads of one session
pub(crate) struct Pipeline {
    ctx: Arc<StageContext>,
    routes: PacketRoutes,
    /// Source waiting for [`Pipeline::launch`]
    parked: Option<Tracked<Box<dyn Demuxer>>>,
    demux: Option<JoinHandle<Tracked<Box<dyn Demuxer>>>>,
    decoders: Vec<JoinHandle<()>>,
    video: Option<(usize, JoinHandle<VideoOutput>)>,
    audio: Option<JoinHandle<()>>,
    queues: Vec<Box<dyn Fn() + Send>>,
}

/// What survives a pipeline shutdown for the next run
pub(crate) struct Leftovers {
    pub(crate) demuxer: Option<Tracked<Box<dyn Demuxer>>>,
    pub(crate) video: Option<VideoOutput>,
}

impl Pipeline {
    /// Take over `demuxer`. Nothing reads it until [`launch`](Self::launch),
    /// so the streams attached before that see every packet.
    pub(crate) fn new(ctx: Arc<StageContext>, demuxer: Tracked<Box<dyn Demuxer>>) -> Self {
        Self {
            ctx,
            routes: PacketRoutes::new(),
            parked: Some(demuxer),
            demux: None,
            decoders: Vec::new(),
            video: None,
            audio: None,
            queues: Vec::new(),
        }
    }

    /// Start the demux stage if it is not running yet. Packets of streams
    /// attached later than this are discarded until their route exists.
    pub(crate) fn launch(&mut self) -> Result<()> {
        let Some(demuxer) = self.parked.take() else {
            return Ok(());
        };
        let ctx = Arc::clone(&self.ctx);
        let routes = self.routes.clone();
        let name = format!("demux-{}", self.ctx.session_id);
        self.demux = Some(self.ctx.spawn(name, move || demux_stage::run(ctx, demuxer, routes))?);
        Ok(())
    }

    fn spawn_decoder(
        &mut self,
        stream: &StreamInfo,
        decoder: Tracked<Box<dyn Decoder>>,
        frame_capacity: usize,
    ) -> Result<BoundedQueue<FrameItem>> {
        let index = stream.index;
        let packets = BoundedQueue::with_name(format!("packets-{}", index), self.ctx.config.packet_queue_capacity);
        let frames = BoundedQueue::with_name(format!("frames-{}", index), frame_capacity);
        self.track_queue(&packets);
        self.track_queue(&frames);

        let handle = {
            let ctx = Arc::clone(&self.ctx);
            let (packets, frames) = (packets.clone(), frames.clone());
            let kind = stream.kind();
            let name = format!("decode-{}-{}", self.ctx.session_id, index);
            self.ctx
                .spawn(name, move || run_decoder(ctx, index, kind, decoder, packets, frames))?
        };
        self.decoders.push(handle);
        self.routes.add(index, packets);
        Ok(frames)
    }

    fn track_queue<T: Send + 'static>(&mut self, queue: &BoundedQueue<T>) {
        let queue = queue.clone();
        self.queues.push(Box::new(move || queue.close()));
    }

    pub(crate) fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub(crate) fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub(crate) fn attach_video(
        &mut self,
        stream: &StreamInfo,
        decoder: Tracked<Box<dyn Decoder>>,
        output: VideoOutput,
    ) -> Result<()> {
        let frames = self.spawn_decoder(stream, decoder, self.ctx.config.video_frame_queue_capacity)?;
        let index = stream.index;
        self.ctx.supervisor.stream_started(index, MediaKind::Video);
        let handle = {
            let ctx = Arc::clone(&self.ctx);
            let name = format!("video-{}", self.ctx.session_id);
            self.ctx.spawn(name, move || run_video_feeder(ctx, index, frames, output))?
        };
        self.video = Some((index, handle));
        Ok(())
    }

    pub(crate) fn attach_audio(
        &mut self,
        stream: &StreamInfo,
        decoder: Tracked<Box<dyn Decoder>>,
        device: Arc<dyn AudioDevice>,
    ) -> Result<()> {
        let frames = self.spawn_decoder(stream, decoder, self.ctx.config.audio_frame_queue_capacity)?;
        let index = stream.index;
        self.ctx.supervisor.stream_started(index, MediaKind::Audio);
        let handle = {
            let ctx = Arc::clone(&self.ctx);
            let name = format!("audio-{}", self.ctx.session_id);
            self.ctx.spawn(name, move || run_audio_feeder(ctx, index, frames, device))?
        };
        self.audio = Some(handle);
        Ok(())
    }

    /// Stop every stage and join it. The caller has set the stop flag.
    pub(crate) fn shutdown(mut self) -> Leftovers {
        self.ctx.gate.wake_all();
        self.routes.close_all();
        for close in self.queues.drain(..) {
            close();
        }

        let demuxer = match self.demux.take() {
            Some(handle) => handle.join().ok(),
            None => self.parked.take(),
        };
        for handle in self.decoders.drain(..) {
            let _ = handle.join();
        }
        let video = self.video.take().and_then(|(_, h)| h.join().ok());
        if let Some(handle) = self.audio.take() {
            let _ = handle.join();
        }
        tracing::debug!(session_id = self.ctx.session_id, "Pipeline stopped");
        Leftovers { demuxer, video }
    }
}

fn run_decoder(
    ctx: Arc<StageContext>,
    stream: usize,
    kind: MediaKind,
    mut decoder: Tracked<Box<dyn Decoder>>,
    packets: BoundedQueue<Packet>,
    frames: BoundedQueue<FrameItem>,
) {
    let decoded = match kind {
        MediaKind::Video => &ctx.counters.video_frames_decoded,
        MediaKind::Audio => &ctx.counters.audio_frames_decoded,
    };
    let mut failure = None;

    'packets: loop {
        if ctx.is_stopping() {
            break;
        }
        let Some(packet) = packets.pop() else {
            if !ctx.is_stopping() {
                match decoder.flush() {
                    Ok(()) => {
                        while let Some(frame) = decoder.retrieve() {
                            PlaybackCounters::inc(decoded);
                            if frames.push(FrameItem::Frame(frame)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => failure = Some(e),
                }
            }
            break;
        };

        if let Err(e) = decoder.submit(&packet) {
            failure = Some(e);
            break;
        }
        while let Some(frame) = decoder.retrieve() {
            PlaybackCounters::inc(decoded);
            if frames.push(FrameItem::Frame(frame)).is_err() {
                break 'packets;
            }
        }
    }

    packets.close();
    if let Some(error) = failure {
        PlaybackCounters::inc(&ctx.counters.decode_errors);
        tracing::warn!(session_id = ctx.session_id, stream, codec = decoder.name(), error = %error, "Decoder failed");
        let _ = frames.push(FrameItem::Failed(error));
    }
    frames.close();
}

fn run_video_feeder(
    ctx: Arc<StageContext>,
    stream: usize,
    frames: BoundedQueue<FrameItem>,
    mut output: VideoOutput,
) -> VideoOutput {
    let mut renderer = VideoRenderer::with_viewport(output.width, output.height);
    let mut sync = Synchronizer::new(Arc::clone(&ctx.clock), &ctx.config, true);

    let exit = loop {
        if !ctx.gate.wait(&ctx.stop) {
            break StreamExit::Stopped;
        }
        let frame = match frames.pop() {
            Some(FrameItem::Frame(Frame::Video(frame))) => frame,
            Some(FrameItem::Frame(Frame::Audio(_))) => continue,
            Some(FrameItem::Failed(e)) => break StreamExit::Failed(e),
            None if ctx.is_stopping() => break StreamExit::Stopped,
            None => break StreamExit::Ended,
        };

        match sync.wait_for(frame.pts_ms, frame.discontinuity, &ctx.stop) {
            Verdict::Present => match renderer.present(&frame, output.surface.as_mut()) {
                Ok(()) => {
                    PlaybackCounters::inc(&ctx.counters.frames_presented);
                    tracing::trace!(session_id = ctx.session_id, pts = frame.pts_ms, "Frame presented");
                }
                Err(e) => {
                    PlaybackCounters::inc(&ctx.counters.surface_errors);
                    break StreamExit::Failed(e);
                }
            },
            Verdict::Drop => PlaybackCounters::inc(&ctx.counters.frames_dropped),
            Verdict::Stopped => break StreamExit::Stopped,
        }
    };

    frames.close();
    let exit = match exit {
        StreamExit::Failed(_) | StreamExit::Ended if ctx.is_stopping() => StreamExit::Stopped,
        other => other,
    };
    ctx.supervisor.stream_exited(stream, MediaKind::Video, exit);
    output
}

fn run_audio_feeder(
    ctx: Arc<StageContext>,
    stream: usize,
    frames: BoundedQueue<FrameItem>,
    device: Arc<dyn AudioDevice>,
) {
    let mut sink = AudioSink::new(device, Arc::clone(&ctx.clock), Arc::clone(&ctx.stop));
    let drop_ms = ctx.config.drop_threshold.as_millis() as i64;

    let exit = loop {
        if !ctx.gate.wait(&ctx.stop) {
            break StreamExit::Stopped;
        }
        let frame = match frames.pop() {
            Some(FrameItem::Frame(Frame::Audio(frame))) => frame,
            Some(FrameItem::Frame(Frame::Video(_))) => continue,
            Some(FrameItem::Failed(e)) => break StreamExit::Failed(e),
            None if ctx.is_stopping() => break StreamExit::Stopped,
            None => break StreamExit::Ended,
        };

        // Before audio owns the clock, audio already behind the picture is
        // not worth playing
        if !frame.discontinuity && frame.pts_ms >= 0 && ctx.clock.source() == ClockSource::Wall {
            if let Some(master) = ctx.clock.master_time() {
                if frame.end_pts_ms() < master - drop_ms {
                    tracing::trace!(session_id = ctx.session_id, pts = frame.pts_ms, master, "Skipping late audio");
                    continue;
                }
            }
        }

        if let Err(e) = sink.enqueue(&frame) {
            break StreamExit::Failed(e);
        }
        PlaybackCounters::inc(&ctx.counters.audio_frames_played);
    };

    let exit = match exit {
        StreamExit::Failed(_) | StreamExit::Ended if ctx.is_stopping() => StreamExit::Stopped,
        other => other,
    };
    match exit {
        StreamExit::Ended => sink.drain(),
        _ => ctx.clock.end_audio(),
    }
    frames.close();
    ctx.supervisor.stream_exited(stream, MediaKind::Audio, exit);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_counter_guards() {
        let counter = Arc::new(ResourceCounter::new());
        let tracked = counter.track(5u32);
        assert_eq!(*tracked, 5);
        assert_eq!(counter.resources(), 1);
        {
            let _thread = counter.thread_guard();
            assert_eq!(counter.threads(), 1);
        }
        assert_eq!(counter.threads(), 0);
        drop(tracked);
        assert_eq!(counter.resources(), 0);
    }

    #[test]
    fn test_gate_blocks_until_resumed() {
        let gate = Arc::new(PauseGate::default());
        let stop = Arc::new(AtomicBool::new(false));
        gate.pause();
        let waiter = {
            let (gate, stop) = (Arc::clone(&gate), Arc::clone(&stop));
            thread::spawn(move || gate.wait(&stop))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        gate.resume();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_gate_releases_on_stop() {
        let gate = PauseGate::default();
        let stop = AtomicBool::new(true);
        gate.pause();
        assert!(!gate.wait(&stop));
    }

    #[test]
    fn test_outcome_settled_once() {
        let (supervisor, events) = Supervisor::new(1);
        supervisor.stream_started(0, MediaKind::Video);
        supervisor.stream_started(1, MediaKind::Audio);

        supervisor.stream_exited(0, MediaKind::Video, StreamExit::Failed(Error::SurfaceLost));
        assert!(supervisor.outcome().is_none());

        supervisor.stream_exited(1, MediaKind::Audio, StreamExit::Ended);
        assert!(matches!(supervisor.outcome(), Some(SessionOutcome::Finished)));

        assert!(!supervisor.settle(SessionOutcome::Stopped));
        let outcomes = events
            .try_iter()
            .filter(|e| matches!(e, PlaybackEvent::Outcome(_)))
            .count();
        assert_eq!(outcomes, 1);
    }

    #[test]
    fn test_last_stream_failure_fails_session() {
        let (supervisor, _events) = Supervisor::new(2);
        supervisor.stream_started(0, MediaKind::Video);
        supervisor.stream_exited(0, MediaKind::Video, StreamExit::Failed(Error::decode(0, "corrupt")));
        let outcome = supervisor.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(matches!(outcome.error(), Some(Error::Decode { stream: 0, .. })));
    }

    #[test]
    fn test_wait_times_out() {
        let (supervisor, _events) = Supervisor::new(3);
        assert!(supervisor.wait(Some(Duration::from_millis(10))).is_none());
    }
}

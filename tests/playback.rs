//! End-to-end playback through the engine

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, init_tracing, FakePeer, Fixture, PeerMode, VIDEO_HEIGHT, VIDEO_WIDTH};
use streamcast::codec::{BuiltinDecoders, Decoder, DecoderFactory, FactoryChain};
use streamcast::media::Codec;
use streamcast::{
    AudioDevice, Engine, Error, Frame, MemorySurface, Packet, PixelFormat, PlaybackEvent, PlayerConfig,
    RingBufferDevice, SessionOutcome, StreamInfo,
};

const WAIT: Duration = Duration::from_secs(10);

fn surface() -> MemorySurface {
    MemorySurface::new(64, 48, PixelFormat::Rgba)
}

fn device() -> Arc<RingBufferDevice> {
    Arc::new(RingBufferDevice::new(44100, 2, Duration::from_millis(200)).unwrap())
}

#[test]
fn test_file_plays_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::default().write(&dir.path().join("clip.flv"));

    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let info = engine.info(handle).unwrap();
    assert_eq!(info.streams.len(), 2);
    assert_eq!(info.duration_ms, Some(400));

    let screen = surface();
    let speaker = device();
    engine.start_video(handle, Box::new(screen.clone()), 0, 0).unwrap();
    engine.start_audio(handle, speaker.clone()).unwrap();

    let outcome = engine.wait(handle, Some(WAIT)).unwrap();
    assert!(matches!(outcome, Some(SessionOutcome::Finished)), "{outcome:?}");

    let stats = engine.stats(handle).unwrap();
    assert_eq!(stats.video_frames_decoded, 10);
    assert_eq!(stats.frames_presented + stats.frames_dropped, 10);
    assert!(stats.frames_presented >= 1);
    assert_eq!(stats.audio_frames_decoded, 10);
    assert_eq!(stats.decode_errors, 0);
    assert!(speaker.frames_played() > 0);

    let shown = screen.presented_pts();
    assert!(shown.windows(2).all(|w| w[0] <= w[1]), "{shown:?}");
    let last = screen.last_frame().unwrap();
    assert_eq!((last.width, last.height), (64, 48));
    assert_eq!(last.format, PixelFormat::Rgba);

    engine.release(handle).unwrap();
    assert_eq!(engine.live_threads(), 0);
    assert_eq!(engine.live_resources(), 0);
    assert!(speaker.is_closed());
}

#[test]
fn test_open_release_cycles_leave_nothing_behind() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::default().write(&dir.path().join("cycle.flv"));
    let source = path.to_str().unwrap();

    let engine = Engine::default();
    for round in 0..5 {
        let handle = engine.open(source).unwrap();
        if round % 2 == 0 {
            engine.start_video(handle, Box::new(surface()), 0, 0).unwrap();
            engine.start_audio(handle, device()).unwrap();
            std::thread::sleep(Duration::from_millis(30));
        }
        engine.release(handle).unwrap();
        assert_eq!(engine.live_threads(), 0, "round {round}");
        assert_eq!(engine.live_resources(), 0, "round {round}");
    }
    assert_eq!(engine.sessions(), 0);
}

#[test]
fn test_release_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(2).write(&dir.path().join("twice.flv"));
    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    engine.release(handle).unwrap();
    assert!(matches!(engine.release(handle), Err(Error::InvalidState(_))));
    assert!(matches!(engine.position(handle), Err(Error::InvalidState(_))));
}

#[test]
fn test_non_flv_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("movie.mp4");
    std::fs::write(&path, b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00").unwrap();

    let engine = Engine::default();
    let err = engine.open(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)), "{err:?}");
    assert_eq!(engine.live_resources(), 0);
}

#[test]
fn test_start_without_stream_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(2).write(&dir.path().join("silent.flv"));
    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    assert!(matches!(engine.start_audio(handle, device()), Err(Error::InvalidState(_))));

    engine.start_video(handle, Box::new(surface()), 0, 0).unwrap();
    assert!(matches!(
        engine.start_video(handle, Box::new(surface()), 0, 0),
        Err(Error::InvalidState(_))
    ));
    engine.release(handle).unwrap();
}

#[test]
fn test_seek_restarts_from_key_frame() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(25).write(&dir.path().join("seek.flv"));

    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let events = engine.events(handle).unwrap();
    let screen = surface();
    engine.start_video(handle, Box::new(screen.clone()), 0, 0).unwrap();
    assert!(eventually(WAIT, || screen.frames_submitted() >= 1));

    assert_eq!(engine.seek(handle, 620).unwrap(), 600);
    let outcome = engine.wait(handle, Some(WAIT)).unwrap();
    assert!(matches!(outcome, Some(SessionOutcome::Finished)), "{outcome:?}");

    let shown = screen.presented_pts();
    assert!(shown.contains(&600), "{shown:?}");
    assert_eq!(shown.last(), Some(&960));
    assert!(events
        .try_iter()
        .any(|e| matches!(e, PlaybackEvent::Seeked { position_ms: 600 })));

    engine.release(handle).unwrap();
    assert_eq!(engine.live_threads(), 0);
}

#[test]
fn test_pause_holds_presentation() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(25).write(&dir.path().join("pause.flv"));

    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let screen = surface();
    engine.start_video(handle, Box::new(screen.clone()), 0, 0).unwrap();
    assert!(eventually(WAIT, || screen.frames_submitted() >= 2));

    engine.pause(handle).unwrap();
    let position = engine.position(handle).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let before = screen.frames_submitted();
    std::thread::sleep(Duration::from_millis(250));
    assert!(screen.frames_submitted() - before <= 1);
    assert!(engine.position(handle).unwrap() <= position + 5);

    engine.resume(handle).unwrap();
    let outcome = engine.wait(handle, Some(WAIT)).unwrap();
    assert!(matches!(outcome, Some(SessionOutcome::Finished)), "{outcome:?}");
    engine.release(handle).unwrap();
}

#[test]
fn test_stop_reports_stopped_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(25).write(&dir.path().join("stop.flv"));

    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let events = engine.events(handle).unwrap();
    engine.start_video(handle, Box::new(surface()), 0, 0).unwrap();
    engine.stop(handle).unwrap();

    assert!(matches!(engine.outcome(handle).unwrap(), Some(SessionOutcome::Stopped)));
    assert!(matches!(engine.pause(handle), Err(Error::InvalidState(_))));
    engine.release(handle).unwrap();

    let outcomes = events
        .try_iter()
        .filter(|e| matches!(e, PlaybackEvent::Outcome(_)))
        .count();
    assert_eq!(outcomes, 1);
}

#[test]
fn test_first_stream_sees_every_packet() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(5).write(&dir.path().join("short.flv"));
    let source = path.to_str().unwrap();

    let engine = Engine::default();
    for round in 0..20 {
        let handle = engine.open(source).unwrap();
        engine.start_video(handle, Box::new(surface()), 0, 0).unwrap();
        let outcome = engine.wait(handle, Some(WAIT)).unwrap();
        assert!(matches!(outcome, Some(SessionOutcome::Finished)), "round {round}: {outcome:?}");

        let stats = engine.stats(handle).unwrap();
        assert_eq!(stats.packets_discarded, 0, "round {round}");
        assert_eq!(stats.video_frames_decoded, 5, "round {round}");
        engine.release(handle).unwrap();
    }
}

#[test]
fn test_stream_started_after_source_drained_ends() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fixture = Fixture {
        video_frames: 50,
        audio_tags: 50,
        ..Fixture::default()
    };
    let path = fixture.write(&dir.path().join("late.flv"));

    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let events = engine.events(handle).unwrap();
    engine.start_video(handle, Box::new(surface()), 0, 0).unwrap();
    // The whole 2 s file fits the packet queue, so reading is done by now
    std::thread::sleep(Duration::from_millis(300));
    engine.start_audio(handle, device()).unwrap();

    let outcome = engine.wait(handle, Some(Duration::from_secs(6))).unwrap();
    assert!(matches!(outcome, Some(SessionOutcome::Finished)), "{outcome:?}");
    assert_eq!(engine.stats(handle).unwrap().video_frames_decoded, 50);
    assert!(events.try_iter().any(|e| matches!(
        e,
        PlaybackEvent::StreamEnded { kind: streamcast::MediaKind::Audio, .. }
    )));

    engine.release(handle).unwrap();
    assert_eq!(engine.live_threads(), 0);
    assert_eq!(engine.live_resources(), 0);
}

#[test]
fn test_lost_surface_fails_video_only_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(25).write(&dir.path().join("lost.flv"));

    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let screen = surface();
    engine.start_video(handle, Box::new(screen.clone()), 0, 0).unwrap();
    assert!(eventually(WAIT, || screen.frames_submitted() >= 1));
    screen.invalidate();

    let outcome = engine.wait(handle, Some(WAIT)).unwrap().unwrap();
    assert!(matches!(outcome.error(), Some(Error::SurfaceLost)), "{outcome:?}");
    assert_eq!(engine.stats(handle).unwrap().surface_errors, 1);
    engine.release(handle).unwrap();
    assert_eq!(engine.live_threads(), 0);
}

/// Delegates to the built-in decoder and fails after a few packets
struct FailingVideo {
    inner: Box<dyn Decoder>,
    remaining: Arc<AtomicUsize>,
}

impl Decoder for FailingVideo {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn submit(&mut self, packet: &Packet) -> streamcast::Result<()> {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 0 {
            return Err(Error::Decode {
                stream: packet.stream_index,
                reason: "corrupt block".into(),
            });
        }
        self.inner.submit(packet)
    }

    fn retrieve(&mut self) -> Option<Frame> {
        self.inner.retrieve()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }
}

struct FailingVideoFactory {
    after: usize,
}

impl DecoderFactory for FailingVideoFactory {
    fn create(&self, stream: &StreamInfo) -> streamcast::Result<Box<dyn Decoder>> {
        if !matches!(stream.codec, Codec::Video(_)) {
            return Err(Error::Decode {
                stream: stream.index,
                reason: "video only".into(),
            });
        }
        Ok(Box::new(FailingVideo {
            inner: BuiltinDecoders.create(stream)?,
            remaining: Arc::new(AtomicUsize::new(self.after)),
        }))
    }
}

#[test]
fn test_decode_error_disables_only_that_stream() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::default().write(&dir.path().join("corrupt.flv"));

    let factory = FactoryChain::new()
        .with(FailingVideoFactory { after: 3 })
        .with(BuiltinDecoders);
    let engine = Engine::with_decoders(PlayerConfig::default(), factory);
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let events = engine.events(handle).unwrap();
    engine.start_video(handle, Box::new(surface()), 0, 0).unwrap();
    engine.start_audio(handle, device()).unwrap();

    let outcome = engine.wait(handle, Some(WAIT)).unwrap();
    assert!(matches!(outcome, Some(SessionOutcome::Finished)), "{outcome:?}");

    let stats = engine.stats(handle).unwrap();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.audio_frames_decoded, 10);
    assert!(events.try_iter().any(|e| matches!(
        e,
        PlaybackEvent::StreamDisabled { kind: streamcast::MediaKind::Video, .. }
    )));
    engine.release(handle).unwrap();
}

#[test]
fn test_decode_error_on_sole_stream_fails_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::video_only(10).write(&dir.path().join("sole.flv"));

    let engine = Engine::with_decoders(PlayerConfig::default(), FailingVideoFactory { after: 2 });
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    engine.start_video(handle, Box::new(surface()), 0, 0).unwrap();

    let outcome = engine.wait(handle, Some(WAIT)).unwrap().unwrap();
    assert!(matches!(outcome.error(), Some(Error::Decode { .. })), "{outcome:?}");
    engine.release(handle).unwrap();
    assert_eq!(engine.live_resources(), 0);
}

#[test]
fn test_remote_stream_plays_to_end() {
    init_tracing();
    let fixture = Fixture::video_only(10);
    let (addr, peer) = FakePeer::spawn(PeerMode::Serve {
        metadata: Some(fixture.metadata()),
        tags: fixture.tags(),
    });

    let engine = Engine::default();
    let screen = MemorySurface::new(VIDEO_WIDTH, VIDEO_HEIGHT, PixelFormat::Bgr24);
    let url = format!("rtmp://{}/live/test", addr);
    let handle = engine.play_remote(&url, Box::new(screen.clone()), 0, 0).unwrap();
    assert!(!engine.info(handle).unwrap().seekable);
    assert!(matches!(engine.seek(handle, 0), Err(Error::SeekUnsupported)));

    let outcome = engine.wait(handle, Some(WAIT)).unwrap();
    assert!(matches!(outcome, Some(SessionOutcome::Finished)), "{outcome:?}");
    assert!(screen.frames_submitted() >= 1);

    engine.release(handle).unwrap();
    assert_eq!(engine.live_threads(), 0);
    assert_eq!(engine.live_resources(), 0);

    let log = peer.join().unwrap();
    assert!(log.commands.contains(&"play".to_string()));
    assert_eq!(log.commands.last().map(String::as_str), Some("deleteStream"));
}

#[test]
fn test_remote_connect_refused() {
    // Bind then drop to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let engine = Engine::default();
    let err = engine
        .play_remote(&format!("rtmp://127.0.0.1:{}/live/none", port), Box::new(surface()), 0, 0)
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");
    assert_eq!(engine.sessions(), 0);
    assert_eq!(engine.live_resources(), 0);
}

#[test]
fn test_device_reports_underruns_in_stats() {
    let dir = tempfile::tempdir().unwrap();
    let path = Fixture::audio_only(5).write(&dir.path().join("short.flv"));
    let engine = Engine::default();
    let handle = engine.open(path.to_str().unwrap()).unwrap();
    let speaker = device();
    engine.start_audio(handle, speaker.clone()).unwrap();
    engine.wait(handle, Some(WAIT)).unwrap();
    assert_eq!(engine.stats(handle).unwrap().audio_underruns, speaker.underruns());
    engine.release(handle).unwrap();
}

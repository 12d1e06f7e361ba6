//! Demux stage: reads packets and routes them to per-stream queues

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::demux::Demuxer;
use crate::media::Packet;
use crate::player::pipeline::{StageContext, Tracked};
use crate::queue::BoundedQueue;
use crate::stats::PlaybackCounters;

/// Packet queue of every enabled stream, by stream index
#[derive(Clone, Default)]
pub(crate) struct PacketRoutes {
    inner: Arc<Mutex<RouteTable>>,
}

#[derive(Default)]
struct RouteTable {
    routes: HashMap<usize, BoundedQueue<Packet>>,
    /// The demux stage has stopped feeding
    finished: bool,
}

impl PacketRoutes {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Route `stream` to `queue`. Once the demux stage is done the queue is
    /// closed at once, so its consumer sees end of stream instead of waiting
    /// for packets nobody will read.
    pub(crate) fn add(&self, stream: usize, queue: BoundedQueue<Packet>) {
        let mut table = self.inner.lock();
        if table.finished {
            queue.close();
            return;
        }
        if let Some(old) = table.routes.insert(stream, queue) {
            old.close();
        }
    }

    fn get(&self, stream: usize) -> Option<BoundedQueue<Packet>> {
        self.inner.lock().routes.get(&stream).cloned()
    }

    fn remove(&self, stream: usize) {
        self.inner.lock().routes.remove(&stream);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().routes.len()
    }

    /// Close and forget every route; consumers drain and see end of stream.
    /// Routes added afterwards are closed on arrival.
    pub(crate) fn close_all(&self) {
        let mut table = self.inner.lock();
        table.finished = true;
        for (_, queue) in table.routes.drain() {
            queue.close();
        }
    }
}

/// Stage body. Runs until end of stream, a read error, stop, or every
/// route has gone away; hands the demuxer back for seeking or release.
pub(crate) fn run(
    ctx: Arc<StageContext>,
    mut demuxer: Tracked<Box<dyn Demuxer>>,
    routes: PacketRoutes,
) -> Tracked<Box<dyn Demuxer>> {
    let session_id = ctx.session_id;
    loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }
        let packet = match demuxer.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                tracing::info!(session_id, "End of stream");
                break;
            }
            Err(e) => {
                if !ctx.stop.load(Ordering::Acquire) {
                    tracing::error!(session_id, error = %e, "Demux failed");
                    ctx.supervisor.fail(e);
                }
                break;
            }
        };
        PlaybackCounters::inc(&ctx.counters.packets_read);

        let stream = packet.stream_index;
        let Some(queue) = routes.get(stream) else {
            PlaybackCounters::inc(&ctx.counters.packets_discarded);
            continue;
        };
        tracing::trace!(session_id, stream, pts = packet.pts_ms, "Routing packet");
        // Blocking push only fails once the decoder has gone: the stream
        // was disabled or the session is stopping
        if queue.push(packet).is_err() {
            routes.remove(stream);
            PlaybackCounters::inc(&ctx.counters.packets_discarded);
            if routes.len() == 0 && !ctx.stop.load(Ordering::Acquire) {
                tracing::debug!(session_id, "No stream left to feed");
                break;
            }
        }
    }
    routes.close_all();
    demuxer
}

//! FLV file demuxer

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use crate::amf::AmfValue;
use crate::demux::{Demuxer, StreamTable};
use crate::error::{Error, Result};
use crate::media::flv::{FlvTagType, VideoFrameType};
use crate::media::{FlvReader, FlvTag, MediaInfo, MediaKind, Packet};

/// One seek point: a tag to restart reading from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    pub timestamp_ms: u64,
    /// Offset of the tag header
    pub offset: u64,
}

/// Demuxer for FLV files or any seekable FLV byte source
pub struct FlvFileDemuxer<R = BufReader<File>> {
    reader: FlvReader<R>,
    info: MediaInfo,
    streams: StreamTable,
    /// Packets read while probing, handed out first
    replay: VecDeque<Packet>,
    index: Option<Vec<SeekPoint>>,
    discontinuity: bool,
}

impl FlvFileDemuxer<BufReader<File>> {
    pub fn open(path: &Path, scan_tags: usize) -> Result<Self> {
        let file = File::open(path)?;
        let demuxer = Self::from_reader(BufReader::new(file), scan_tags)?;
        tracing::info!(
            path = %path.display(),
            streams = demuxer.info.streams.len(),
            duration_ms = ?demuxer.info.duration_ms,
            "Opened FLV file"
        );
        Ok(demuxer)
    }
}

impl<R: Read + Seek + Send> FlvFileDemuxer<R> {
    /// Validate the header and scan for streams.
    ///
    /// Reads ahead until every stream the header announces has been seen,
    /// or `scan_tags` tags have been read.
    pub fn from_reader(inner: R, scan_tags: usize) -> Result<Self> {
        let reader = FlvReader::new(inner)?;
        let mut demuxer = Self {
            reader,
            info: MediaInfo {
                seekable: true,
                ..Default::default()
            },
            streams: StreamTable::default(),
            replay: VecDeque::new(),
            index: None,
            discontinuity: false,
        };
        demuxer.scan(scan_tags.max(1))?;
        Ok(demuxer)
    }

    fn scan(&mut self, limit: usize) -> Result<()> {
        let header = *self.reader.header();
        let mut tags = 0;
        while tags < limit {
            let complete = (!header.has_audio || self.streams.has(MediaKind::Audio))
                && (!header.has_video || self.streams.has(MediaKind::Video))
                && !self.info.streams.is_empty();
            if complete {
                break;
            }
            let Some(packet) = self.next_media()? else {
                break;
            };
            self.replay.push_back(packet);
            tags += 1;
        }

        if self.info.streams.is_empty() {
            return Err(Error::unsupported("no audio or video stream found"));
        }
        // Metadata usually precedes the first media tag
        if let Some(meta) = self.info.metadata.clone() {
            self.info.apply_metadata(&meta);
        }
        tracing::debug!(
            scanned = tags,
            streams = self.info.streams.len(),
            has_index = self.index.is_some(),
            "FLV scan finished"
        );
        Ok(())
    }

    /// Next audio or video packet; script tags update metadata on the way
    fn next_media(&mut self) -> Result<Option<Packet>> {
        while let Some((offset, tag)) = self.reader.next_tag()? {
            if tag.is_script() {
                self.on_script(&tag);
                continue;
            }
            let Some(index) = self.streams.index_for(&tag, &mut self.info) else {
                tracing::trace!(offset, "Skipping empty media tag");
                continue;
            };
            if let Some(packet) = Packet::from_tag(index, &tag) {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    fn on_script(&mut self, tag: &FlvTag) {
        let Some(meta) = tag.parse_metadata() else {
            return;
        };
        if self.index.is_none() {
            self.index = keyframe_index(&meta);
        }
        self.info.apply_metadata(&meta);
    }

    /// Seek points from one pass over the tag headers: video key frames,
    /// or every audio tag in a file without video
    fn scan_index(&mut self) -> Result<Vec<SeekPoint>> {
        let resume = self.reader.position();
        self.reader.rewind()?;
        let has_video = self.streams.has(MediaKind::Video);
        let mut points = Vec::new();
        while let Some((offset, header, first)) = self.reader.skip_tag()? {
            let point = match header.kind() {
                Some(FlvTagType::Video) => VideoFrameType::from_byte(first).is_some_and(|t| t.is_keyframe()),
                Some(FlvTagType::Audio) => !has_video,
                _ => false,
            };
            if point {
                points.push(SeekPoint {
                    timestamp_ms: header.timestamp as u64,
                    offset,
                });
            }
        }
        self.reader.seek_to(resume)?;
        tracing::debug!(points = points.len(), "Built seek index by scanning");
        Ok(points)
    }

    pub fn seek_index(&self) -> Option<&[SeekPoint]> {
        self.index.as_deref()
    }
}

/// `keyframes.times` (seconds) paired with `keyframes.filepositions`
fn keyframe_index(meta: &AmfValue) -> Option<Vec<SeekPoint>> {
    let keyframes = meta.get("keyframes")?;
    let times = keyframes.get_numbers("times");
    let positions = keyframes.get_numbers("filepositions");
    if times.is_empty() || times.len() != positions.len() {
        return None;
    }
    let mut points: Vec<SeekPoint> = times
        .iter()
        .zip(&positions)
        .filter(|(t, p)| **t >= 0.0 && **p > 0.0)
        .map(|(t, p)| SeekPoint {
            timestamp_ms: (t * 1000.0).round() as u64,
            offset: *p as u64,
        })
        .collect();
    points.sort_by_key(|p| p.timestamp_ms);
    (!points.is_empty()).then_some(points)
}

impl<R: Read + Seek + Send> Demuxer for FlvFileDemuxer<R> {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let packet = match self.replay.pop_front() {
            Some(packet) => Some(packet),
            None => self.next_media()?,
        };
        Ok(packet.map(|p| {
            if std::mem::take(&mut self.discontinuity) {
                p.with_discontinuity()
            } else {
                p
            }
        }))
    }

    fn seek(&mut self, position_ms: u64) -> Result<u64> {
        if self.index.is_none() {
            let scanned = self.scan_index()?;
            self.index = Some(scanned);
        }
        let target = self
            .index
            .as_deref()
            .and_then(|points| points.iter().rev().find(|p| p.timestamp_ms <= position_ms).or(points.first()))
            .copied();

        let reached = match target {
            Some(point) => {
                self.reader.seek_to(point.offset)?;
                point.timestamp_ms
            }
            None => {
                self.reader.rewind()?;
                0
            }
        };
        self.replay.clear();
        self.discontinuity = true;
        tracing::debug!(requested = position_ms, reached, "FLV seek");
        Ok(reached)
    }
}

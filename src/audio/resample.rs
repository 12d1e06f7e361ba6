//! Sample rate and channel conversion for the audio sink

/// Convert interleaved `samples` from `from` channels to `to` channels.
///
/// Mono is duplicated into every output channel. Otherwise output channel
/// `c` is the average of the input channels `i` with `i % to == c`, which
/// folds 5.1 or stereo down; upmixing from more than one channel repeats
/// input channel `c % from`.
pub fn remix(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if from < to {
            out.extend((0..to).map(|c| frame[c % from]));
        } else {
            for c in 0..to {
                let (sum, n) = frame
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % to == c)
                    .fold((0i32, 0i32), |(s, n), (_, &v)| (s + v as i32, n + 1));
                out.push((sum / n.max(1)) as i16);
            }
        }
    }
    out
}

/// Linear-interpolation resampler over interleaved frames.
///
/// Input arrives in chunks; the fractional read position and the last
/// input frame carry over, so chunk boundaries are seamless.
#[derive(Debug, Clone)]
pub struct Resampler {
    in_rate: u32,
    out_rate: u32,
    channels: usize,
    /// Next output position in input frames, relative to the current
    /// chunk. In `[-1, 0)` it interpolates from `prev`.
    pos: f64,
    prev: Option<Vec<i16>>,
}

impl Resampler {
    pub fn new(in_rate: u32, out_rate: u32, channels: u16) -> Self {
        Self {
            in_rate: in_rate.max(1),
            out_rate: out_rate.max(1),
            channels: channels.max(1) as usize,
            pos: 0.0,
            prev: None,
        }
    }

    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.in_rate == self.out_rate
    }

    /// Forget carried state, as after a seek
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.prev = None;
    }

    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        let ch = self.channels;
        let frames = input.len() / ch;
        if frames == 0 {
            return Vec::new();
        }
        let step = self.in_rate as f64 / self.out_rate as f64;
        let estimate = ((frames as f64 / step) as usize + 2) * ch;
        let mut out = Vec::with_capacity(estimate);

        let sample = |index: isize, c: usize, prev: &Option<Vec<i16>>| -> i16 {
            if index < 0 {
                prev.as_ref().map(|p| p[c]).unwrap_or(input[c])
            } else {
                input[index as usize * ch + c]
            }
        };

        while self.pos < (frames - 1) as f64 {
            let base = self.pos.floor();
            let frac = self.pos - base;
            let i = base as isize;
            for c in 0..ch {
                let a = sample(i, c, &self.prev) as f64;
                let b = sample(i + 1, c, &self.prev) as f64;
                out.push((a + (b - a) * frac).round() as i16);
            }
            self.pos += step;
        }

        self.pos -= frames as f64;
        self.prev = Some(input[(frames - 1) * ch..frames * ch].to_vec());
        out
    }
}

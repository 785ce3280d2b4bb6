use std::time::Duration;

/// Time spent in each stage for a single frame.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameTimes {
    pub decode: Duration,
    pub inference: Duration,
    pub annotate: Duration,
    pub encode: Duration,
}

impl FrameTimes {
    pub fn total(&self) -> Duration {
        self.decode + self.inference + self.annotate + self.encode
    }

    fn combine(&self, other: &FrameTimes, f: impl Fn(Duration, Duration) -> Duration) -> Self {
        Self {
            decode: f(self.decode, other.decode),
            inference: f(self.inference, other.inference),
            annotate: f(self.annotate, other.annotate),
            encode: f(self.encode, other.encode),
        }
    }
}

/// Collects [`FrameTimes`] over a run for avg/min/max reporting.
#[derive(Debug, Default)]
pub struct AggregatedTimes {
    frames: Vec<FrameTimes>,
}

impl AggregatedTimes {
    pub fn push(&mut self, times: FrameTimes) {
        self.frames.push(times);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `skip_first` drops the first frame, which carries session warm-up cost.
    fn samples(&self, skip_first: bool) -> &[FrameTimes] {
        if skip_first && self.frames.len() > 1 {
            &self.frames[1..]
        } else {
            &self.frames
        }
    }

    pub fn avg(&self, skip_first: bool) -> FrameTimes {
        let samples = self.samples(skip_first);
        if samples.is_empty() {
            return FrameTimes::default();
        }
        let n = samples.len() as u32;
        let sum = samples
            .iter()
            .fold(FrameTimes::default(), |acc, t| acc.combine(t, |a, b| a + b));
        FrameTimes {
            decode: sum.decode / n,
            inference: sum.inference / n,
            annotate: sum.annotate / n,
            encode: sum.encode / n,
        }
    }

    pub fn min(&self, skip_first: bool) -> FrameTimes {
        let samples = self.samples(skip_first);
        match samples.split_first() {
            Some((first, rest)) => rest.iter().fold(*first, |acc, t| acc.combine(t, Duration::min)),
            None => FrameTimes::default(),
        }
    }

    pub fn max(&self, skip_first: bool) -> FrameTimes {
        self.samples(skip_first)
            .iter()
            .fold(FrameTimes::default(), |acc, t| acc.combine(t, Duration::max))
    }
}

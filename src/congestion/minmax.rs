//! Windowed min/max estimator over three ranked samples, after the Linux
//! kernel's `lib/minmax.c` as used by BBR.

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    time: u64,
    value: u64,
}

/// Maintains the maximum of a series over a rolling window of `window`
/// time units (round-trip rounds or microseconds, caller's choice).
///
/// Invariant: `samples[0] >= samples[1] >= samples[2]` and all three lie
/// within `window` of each other.
#[derive(Debug, Clone)]
pub struct MinMax {
    window: u64,
    samples: [Sample; 3],
}

impl MinMax {
    pub fn new(window: u64) -> Self {
        Self {
            window,
            samples: [Sample::default(); 3],
        }
    }

    /// Best (largest in-window) estimate.
    pub fn get(&self) -> u64 {
        self.samples[0].value
    }

    pub fn reset(&mut self, time: u64, value: u64) {
        self.samples = [Sample { time, value }; 3];
    }

    pub fn update_max(&mut self, time: u64, value: u64) {
        let sample = Sample { time, value };
        if self.samples[0].value == 0                                // uninitialized
            || sample.value >= self.samples[0].value                 // new max
            || sample.time.wrapping_sub(self.samples[2].time) > self.window
        {
            self.reset(time, value);
            return;
        }

        if sample.value >= self.samples[1].value {
            self.samples[1] = sample;
            self.samples[2] = sample;
        } else if sample.value >= self.samples[2].value {
            self.samples[2] = sample;
        }

        self.subwin_update(sample);
    }

    fn subwin_update(&mut self, sample: Sample) {
        let dt = sample.time.wrapping_sub(self.samples[0].time);
        if dt > self.window {
            // Passed the entire window without a new best: promote the 2nd
            // and 3rd choices. The 2nd choice may itself be outside the
            // window, hence the second shift.
            self.samples[0] = self.samples[1];
            self.samples[1] = self.samples[2];
            self.samples[2] = sample;
            if sample.time.wrapping_sub(self.samples[0].time) > self.window {
                self.samples[0] = self.samples[1];
                self.samples[1] = self.samples[2];
                self.samples[2] = sample;
            }
        } else if self.samples[1].time == self.samples[0].time && dt > self.window / 4 {
            // A quarter of the window passed without a 2nd choice.
            self.samples[1] = sample;
            self.samples[2] = sample;
        } else if self.samples[2].time == self.samples[1].time && dt > self.window / 2 {
            // Half the window passed without a 3rd choice.
            self.samples[2] = sample;
        }
    }
}

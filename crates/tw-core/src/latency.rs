//! Histogram of tick age at the point a consumer applies it.
//!
//! The relay records `now - tick.timestamp_us` for every tick it writes into
//! the price book and logs a summary every N ticks, which is the cross-process
//! transit time from generation to shared-memory visibility.
//!
//! Bins are 10µs wide up to 100ms (10 000 bins); slower samples land in the
//! last bin but still count toward `max` and the average.

const BIN_WIDTH_US: u64 = 10;
const NUM_BINS: usize = 10_000;

/// Summary of recorded samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
    pub p50_us: u64,
    pub p99_us: u64,
}

impl std::fmt::Display for AgeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} min={}µs max={}µs avg={:.1}µs p50={}µs p99={}µs",
            self.count, self.min_us, self.max_us, self.avg_us, self.p50_us, self.p99_us,
        )
    }
}

/// Not thread-safe; each consumer loop owns one.
pub struct AgeHistogram {
    bins: Box<[u32]>,
    count: u64,
    sum: u128,
    min: u64,
    max: u64,
}

impl AgeHistogram {
    pub fn new() -> Self {
        Self { bins: vec![0u32; NUM_BINS].into_boxed_slice(), count: 0, sum: 0, min: u64::MAX, max: 0 }
    }

    #[inline]
    pub fn record(&mut self, age_us: u64) {
        self.count += 1;
        self.sum += age_us as u128;
        self.min = self.min.min(age_us);
        self.max = self.max.max(age_us);
        let bin = ((age_us / BIN_WIDTH_US) as usize).min(NUM_BINS - 1);
        self.bins[bin] = self.bins[bin].saturating_add(1);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` until at least one sample is recorded.
    pub fn stats(&self) -> Option<AgeStats> {
        if self.count == 0 {
            return None;
        }
        Some(AgeStats {
            count: self.count,
            min_us: self.min,
            max_us: self.max,
            avg_us: self.sum as f64 / self.count as f64,
            p50_us: self.quantile(0.50),
            p99_us: self.quantile(0.99),
        })
    }

    /// Return the summary and start a fresh period.
    pub fn take(&mut self) -> Option<AgeStats> {
        let stats = self.stats();
        self.bins.fill(0);
        self.count = 0;
        self.sum = 0;
        self.min = u64::MAX;
        self.max = 0;
        stats
    }

    fn quantile(&self, q: f64) -> u64 {
        let target = ((self.count as f64 * q).ceil() as u64).max(1);
        let mut seen = 0u64;
        for (i, &n) in self.bins.iter().enumerate() {
            seen += n as u64;
            if seen >= target {
                // Never report past the largest observed sample.
                return ((i as u64) * BIN_WIDTH_US).min(self.max);
            }
        }
        self.max
    }
}

impl Default for AgeHistogram {
    fn default() -> Self {
        Self::new()
    }
}

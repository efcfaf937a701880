use rand::{rng, Rng};
use tokio::time::Duration;

pub trait Jitter: Sized {
    fn add_spread(&self, spread: Duration) -> Self;
}

impl Jitter for Duration {
    fn add_spread(&self, spread: Duration) -> Self {
        let nanos = spread.as_nanos();
        if nanos == 0 {
            return *self;
        }
        let spread = rng().random_range(0..nanos);
        self.saturating_add(Duration::from_nanos(
            u64::try_from(spread).unwrap_or(u64::MAX),
        ))
    }
}

use std::{iter::Take, time::Duration};

/// An infinite stream of retry delays. The first delay is `start`; each
/// subsequent delay is the previous one times `factor`, capped at `max`.
///
/// Use `take(n)` to bound the number of attempts, and [`Retry::retry`] to
/// drive a fallible operation with it. The delays are meant for
/// [std::thread::sleep]; do NOT use this with asynchronous code.
pub struct ExponentialBackoff {
    next: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            next: start.min(max),
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next;
        self.next = (current * self.factor).min(self.max);
        Some(current)
    }
}

/// Retry a function with a [Result] type until it succeeds or the [Iterator]
/// of delays runs out.
pub trait Retry {
    /// Call `f` until it returns [Ok]. After every failed attempt but the
    /// last, `sleep` receives the error and the delay to wait before the
    /// next attempt; it is where logging and the actual sleeping happen. If
    /// the delays run out, the last [Err] is returned, and `None` is
    /// returned only if there were no delays at all.
    fn retry<F, S, T, E>(&mut self, mut f: F, sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
        Self: Iterator<Item = Duration> + Sized,
    {
        let mut last_err = None;
        let mut iter = self.peekable();

        while let Some(delay) = iter.next() {
            match f() {
                Ok(v) => return Some(Ok(v)),
                Err(e) => {
                    if iter.peek().is_some() {
                        sleep(&e, delay);
                    }
                    last_err = Some(Err(e));
                }
            }
        }
        last_err
    }
}

impl Retry for ExponentialBackoff {}

impl Retry for Take<ExponentialBackoff> {}

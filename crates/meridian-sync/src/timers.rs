//! Named deadline table driving a session's timeouts and intervals.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Timer {
    deadline: Instant,
    interval: Option<Duration>,
}

/// Cancelable one-shot and repeating timers keyed by `K`.
///
/// The table never sleeps itself; the session runner waits for
/// [`Timers::next_deadline`] and feeds [`Timers::take_expired`] back in.
#[derive(Debug)]
pub struct Timers<K> {
    timers: HashMap<K, Timer>,
}

impl<K: Copy + Eq + Hash + Ord> Timers<K> {
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
        }
    }

    /// Arm a one-shot timer unless it already runs.
    pub fn set_delay(&mut self, key: K, delay: Duration) {
        self.timers.entry(key).or_insert(Timer {
            deadline: Instant::now() + delay,
            interval: None,
        });
    }

    /// Arm a one-shot timer, replacing any running one.
    pub fn reset_delay(&mut self, key: K, delay: Duration) {
        self.timers.insert(
            key,
            Timer {
                deadline: Instant::now() + delay,
                interval: None,
            },
        );
    }

    /// Arm a repeating timer.
    pub fn set_interval(&mut self, key: K, interval: Duration) {
        self.timers.insert(
            key,
            Timer {
                deadline: Instant::now() + interval,
                interval: Some(interval),
            },
        );
    }

    pub fn clear(&mut self, key: K) {
        self.timers.remove(&key);
    }

    pub fn clear_all(&mut self) {
        self.timers.clear();
    }

    pub fn exists(&self, key: K) -> bool {
        self.timers.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest deadline of any armed timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Remove fired one-shots and reschedule fired intervals.
    ///
    /// Keys come back ordered by deadline, ties broken by key order.
    pub fn take_expired(&mut self, now: Instant) -> Vec<K> {
        let mut fired: Vec<(Instant, K)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(k, t)| (t.deadline, *k))
            .collect();
        fired.sort();

        for (_, key) in &fired {
            let reschedule = match self.timers.get_mut(key) {
                Some(timer) => match timer.interval {
                    Some(interval) => {
                        timer.deadline = now + interval;
                        true
                    }
                    None => false,
                },
                None => true,
            };
            if !reschedule {
                self.timers.remove(key);
            }
        }

        fired.into_iter().map(|(_, k)| k).collect()
    }
}

impl<K: Copy + Eq + Hash + Ord> Default for Timers<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once() {
        let mut timers = Timers::new();
        timers.set_delay(1u8, Duration::from_millis(100));
        assert!(timers.take_expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(timers.take_expired(Instant::now()), vec![1]);
        assert!(!timers.exists(1));
        assert!(timers.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_delay_keeps_running_timer() {
        let mut timers = Timers::new();
        timers.set_delay(1u8, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(60)).await;
        timers.set_delay(1u8, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(timers.take_expired(Instant::now()), vec![1]);

        timers.set_delay(2u8, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(60)).await;
        timers.reset_delay(2u8, Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(timers.take_expired(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_reschedules() {
        let mut timers = Timers::new();
        timers.set_interval(3u8, Duration::from_secs(5));
        timers.set_delay(1u8, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(timers.take_expired(Instant::now()), vec![1, 3]);
        assert!(timers.exists(3));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(timers.take_expired(Instant::now()), vec![3]);

        timers.clear(3);
        assert!(timers.is_empty());
    }
}

//! Periodic eviction of replies that never arrived.

use super::stats::Counters;
use super::table::ReplyTable;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Scan cadence of a [`TimeoutReaper`]
#[derive(Debug, Clone, Copy)]
pub struct ReaperSchedule {
    pub initial_delay: Duration,
    pub period: Duration,
    /// Extra age beyond a future's timeout before it is evicted
    pub guard: Duration,
}

/// Background task sweeping a [`ReplyTable`] at a fixed rate.
///
/// Stops when dropped or [`stop`](Self::stop)ped.
pub struct TimeoutReaper {
    handle: JoinHandle<()>,
}

impl TimeoutReaper {
    /// Spawn the sweep on the current tokio runtime
    pub(crate) fn start(
        table: Arc<ReplyTable>,
        counters: Arc<Counters>,
        schedule: ReaperSchedule,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(schedule.initial_delay).await;
            let mut ticker = tokio::time::interval(schedule.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reaped = sweep(&table, schedule.guard);
                if reaped > 0 {
                    Counters::add(&counters.reaped, reaped as u64);
                    debug!("reaper evicted {} timed out replies", reaped);
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for TimeoutReaper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One scan: evict expired futures, then fire the callbacks of the
/// callback-style ones.
///
/// Waiting callers are left to their own deadline; evicting them only keeps
/// a late reply from being matched. Returns the number of evicted futures.
pub fn sweep(table: &ReplyTable, guard: Duration) -> usize {
    let expired = table.evict_expired(guard);
    for future in &expired {
        warn!("remove timeout command {}", future);
    }

    for future in &expired {
        if !future.is_async_callback() {
            continue;
        }
        if future.complete(None) {
            future.invoke_callback();
        }
    }
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remoting::reply::ReplyFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sweep_fires_callbacks_and_skips_waiters() {
        let table = ReplyTable::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        table.register(Arc::new(ReplyFuture::with_callback(
            1,
            Duration::from_millis(0),
            move |future| {
                assert!(future.response().is_none());
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));
        let waiter = Arc::new(ReplyFuture::new(2, Duration::from_millis(0)));
        table.register(Arc::clone(&waiter));
        table.register(Arc::new(ReplyFuture::new(3, Duration::from_secs(60))));

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sweep(&table, Duration::from_millis(1)), 2);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!waiter.is_done());
        assert!(table.contains(3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unbounded_timeout_does_not_block_other_evictions() {
        let table = ReplyTable::new();
        let fired = Arc::new(AtomicUsize::new(0));

        table.register(Arc::new(ReplyFuture::with_callback(
            1,
            Duration::MAX,
            |_| panic!("must not be reaped"),
        )));
        let counter = Arc::clone(&fired);
        table.register(Arc::new(ReplyFuture::with_callback(
            2,
            Duration::from_millis(0),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )));

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sweep(&table, Duration::from_millis(1)), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(table.contains(1));
        assert!(!table.contains(2));
    }

    #[test]
    fn test_panicking_callback_does_not_stop_sweep() {
        let table = ReplyTable::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for opaque in 0..3 {
            let counter = Arc::clone(&fired);
            table.register(Arc::new(ReplyFuture::with_callback(
                opaque,
                Duration::from_millis(0),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if opaque == 1 {
                        panic!("callback failure");
                    }
                },
            )));
        }

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sweep(&table, Duration::from_millis(0)), 3);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_already_completed_future_is_not_called_back_twice() {
        let table = ReplyTable::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let future = Arc::new(ReplyFuture::with_callback(
            1,
            Duration::from_millis(0),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));
        table.register(Arc::clone(&future));
        assert!(future.complete(None));

        std::thread::sleep(Duration::from_millis(5));
        sweep(&table, Duration::from_millis(0));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_background_reaper_evicts_and_stops() {
        let table = Arc::new(ReplyTable::new());
        let counters = Arc::new(Counters::default());
        table.register(Arc::new(ReplyFuture::new(1, Duration::from_millis(10))));

        let reaper = TimeoutReaper::start(
            Arc::clone(&table),
            Arc::clone(&counters),
            ReaperSchedule {
                initial_delay: Duration::from_millis(0),
                period: Duration::from_millis(10),
                guard: Duration::from_millis(10),
            },
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            while !table.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(counters.reaped.load(Ordering::Relaxed), 1);

        reaper.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reaper.is_running());
    }
}

//! Change debouncing.
//!
//! Coalesces bursts of [`ChangeEvent`]s into one [`ChangeSignal`] per window,
//! so an editor that writes several times per save triggers a single reload.
//!
//! A window opens with the first event after a quiet period. Two timers then
//! compete: the quiet timer, pushed back by every new event, and the max-wait
//! timer, fixed at the window's opening. Whichever expires first closes the
//! window.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::event::{ChangeEvent, ChangeKind, ChangeSignal};

/// Debounce timings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Quiet period that closes the window.
    pub quiet: Duration,
    /// Longest a window may stay open under a continuous event stream.
    pub max_wait: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            quiet: Duration::from_millis(300),
            max_wait: Duration::from_millis(2000),
        }
    }
}

/// An open debounce window.
#[derive(Clone, Copy, Debug)]
struct Window {
    opened: Instant,
    quiet_deadline: Instant,
}

/// Coalesces change events into debounced signals.
///
/// Owned by a single task; [`run`](Self::run) drives it from a channel.
pub struct ChangeDebouncer {
    config: DebounceConfig,
    pending: HashMap<PathBuf, ChangeKind>,
    event_count: usize,
    window: Option<Window>,
}

impl ChangeDebouncer {
    /// Create a debouncer with the given timings.
    #[must_use]
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            event_count: 0,
            window: None,
        }
    }

    /// Record an event observed at `now`.
    ///
    /// Opens a window if none is open and pushes back the quiet deadline.
    pub fn record(&mut self, event: ChangeEvent, now: Instant) {
        match self.pending.entry(event.path) {
            Entry::Vacant(entry) => {
                entry.insert(event.kind);
            }
            Entry::Occupied(mut entry) => {
                if let Some(coalesced) = Self::coalesce(*entry.get(), event.kind) {
                    entry.insert(coalesced);
                } else {
                    // Created then removed: nothing happened as far as clients can tell
                    entry.remove();
                }
            }
        }
        self.event_count += 1;

        let opened = self.window.map_or(now, |w| w.opened);
        self.window = Some(Window {
            opened,
            quiet_deadline: now + self.config.quiet,
        });
    }

    /// Coalesce two change kinds for the same path.
    ///
    /// Returns `None` if both events cancel out (Created + Removed).
    #[allow(clippy::match_same_arms)]
    fn coalesce(existing: ChangeKind, new: ChangeKind) -> Option<ChangeKind> {
        use ChangeKind::{Created, Modified, Removed, Renamed};

        match (existing, new) {
            // Created + anything
            (Created, Created) => Some(Created),  // Duplicate
            (Created, Modified) => Some(Created), // Content included in create
            (Created, Removed) => None,           // Never existed for clients
            (Created, Renamed) => Some(Created),  // Still new

            // Modified + anything
            (Modified, Created) => Some(Created),   // Recreated
            (Modified, Modified) => Some(Modified), // Normal debounce
            (Modified, Removed) => Some(Removed),   // Gone
            (Modified, Renamed) => Some(Renamed),

            // Removed + anything
            (Removed, Created) => Some(Modified), // Replaced (atomic save)
            (Removed, Modified) => Some(Removed), // Stale, ignore new
            (Removed, Removed) => Some(Removed),  // Duplicate
            (Removed, Renamed) => Some(Renamed),

            // Renamed + anything
            (Renamed, Created) => Some(Created),
            (Renamed, Modified) => Some(Renamed),
            (Renamed, Removed) => Some(Removed),
            (Renamed, Renamed) => Some(Renamed),
        }
    }

    /// When the open window closes, or `None` if no window is open.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.window
            .map(|w| w.quiet_deadline.min(w.opened + self.config.max_wait))
    }

    /// Close the window if its deadline has passed at `now`.
    ///
    /// Returns the signal for the closed window. A window whose changes all
    /// cancelled out closes without a signal.
    pub fn take_due(&mut self, now: Instant) -> Option<ChangeSignal> {
        if self.deadline()? > now {
            return None;
        }

        self.window = None;
        let event_count = std::mem::take(&mut self.event_count);
        let changes = std::mem::take(&mut self.pending);

        if changes.is_empty() {
            tracing::debug!(event_count, "Debounce window closed with no net changes");
            return None;
        }

        Some(ChangeSignal::new(changes.into_iter().collect(), event_count))
    }

    /// Whether a window is open.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.window.is_some()
    }

    /// Consume events and emit signals until cancelled or either channel
    /// closes.
    ///
    /// An open window is discarded on shutdown.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ChangeEvent>,
        signals: mpsc::Sender<ChangeSignal>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.deadline();

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                event = events.recv() => {
                    let Some(event) = event else { break };
                    tracing::trace!(path = %event.path.display(), kind = event.kind.as_str(), "Debouncing change");
                    self.record(event, Instant::now());
                }

                () = sleep_until(deadline) => {}
            }

            // Checked after every event too, so a saturated channel cannot
            // starve the max-wait timer
            if let Some(signal) = self.take_due(Instant::now()) {
                tracing::debug!(
                    paths = signal.changes().len(),
                    events = signal.event_count(),
                    "Emitting change signal"
                );
                if signals.send(signal).await.is_err() {
                    break;
                }
            }
        }

        if self.is_pending() {
            tracing::debug!("Discarding pending changes on shutdown");
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const QUIET: Duration = Duration::from_millis(300);
    const MAX_WAIT: Duration = Duration::from_millis(1000);

    fn debouncer() -> ChangeDebouncer {
        ChangeDebouncer::new(DebounceConfig {
            quiet: QUIET,
            max_wait: MAX_WAIT,
        })
    }

    fn modified(path: &str) -> ChangeEvent {
        ChangeEvent::new(ChangeKind::Modified, path)
    }

    #[test]
    fn test_single_event_emitted_after_quiet_window() {
        let mut debouncer = debouncer();
        let t0 = Instant::now();

        debouncer.record(modified("/site/index.html"), t0);

        assert!(debouncer.take_due(t0 + QUIET - Duration::from_millis(1)).is_none());

        let signal = debouncer.take_due(t0 + QUIET).unwrap();
        assert_eq!(
            signal.changes().get(&PathBuf::from("/site/index.html")),
            Some(&ChangeKind::Modified)
        );
        assert_eq!(signal.event_count(), 1);

        assert!(!debouncer.is_pending());
        assert!(debouncer.take_due(t0 + QUIET * 10).is_none());
    }

    #[test]
    fn test_burst_within_window_yields_one_signal() {
        let mut debouncer = debouncer();
        let t0 = Instant::now();

        for i in 0..5 {
            debouncer.record(modified("/site/index.html"), t0 + Duration::from_millis(i * 10));
        }

        let last = t0 + Duration::from_millis(40);
        assert!(debouncer.take_due(last + QUIET - Duration::from_millis(1)).is_none());

        let signal = debouncer.take_due(last + QUIET).unwrap();
        assert_eq!(signal.changes().len(), 1);
        assert_eq!(signal.event_count(), 5);
        assert!(debouncer.take_due(last + QUIET * 10).is_none());
    }

    #[test]
    fn test_max_wait_caps_the_window() {
        let mut debouncer = debouncer();
        let t0 = Instant::now();

        // An event every 100ms keeps pushing the quiet deadline back
        let mut t = t0;
        while t < t0 + MAX_WAIT {
            debouncer.record(modified("/site/app.js"), t);
            t += Duration::from_millis(100);
        }

        assert_eq!(debouncer.deadline(), Some(t0 + MAX_WAIT));
        assert!(debouncer.take_due(t0 + MAX_WAIT).is_some());
    }

    #[test]
    fn test_signal_collects_all_paths() {
        let mut debouncer = debouncer();
        let t0 = Instant::now();

        debouncer.record(modified("/site/a.css"), t0);
        debouncer.record(ChangeEvent::new(ChangeKind::Created, "/site/b.html"), t0);

        let signal = debouncer.take_due(t0 + QUIET).unwrap();
        let paths: Vec<_> = signal.paths().map(|p| p.to_path_buf()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/site/a.css"), PathBuf::from("/site/b.html")]
        );
    }

    #[test]
    fn test_created_then_removed_emits_nothing() {
        let mut debouncer = debouncer();
        let t0 = Instant::now();

        debouncer.record(ChangeEvent::new(ChangeKind::Created, "/site/tmp.html"), t0);
        debouncer.record(ChangeEvent::new(ChangeKind::Removed, "/site/tmp.html"), t0);

        assert!(debouncer.take_due(t0 + QUIET).is_none());
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_new_window_after_flush() {
        let mut debouncer = debouncer();
        let t0 = Instant::now();

        debouncer.record(modified("/site/index.html"), t0);
        assert!(debouncer.take_due(t0 + QUIET).is_some());

        let t1 = t0 + QUIET * 5;
        debouncer.record(modified("/site/index.html"), t1);
        assert_eq!(debouncer.deadline(), Some(t1 + QUIET));
    }

    #[test]
    fn test_coalesce_all_combinations() {
        use ChangeKind::{Created, Modified, Removed, Renamed};

        assert_eq!(ChangeDebouncer::coalesce(Created, Created), Some(Created));
        assert_eq!(ChangeDebouncer::coalesce(Created, Modified), Some(Created));
        assert_eq!(ChangeDebouncer::coalesce(Created, Removed), None);
        assert_eq!(ChangeDebouncer::coalesce(Created, Renamed), Some(Created));

        assert_eq!(ChangeDebouncer::coalesce(Modified, Created), Some(Created));
        assert_eq!(ChangeDebouncer::coalesce(Modified, Modified), Some(Modified));
        assert_eq!(ChangeDebouncer::coalesce(Modified, Removed), Some(Removed));
        assert_eq!(ChangeDebouncer::coalesce(Modified, Renamed), Some(Renamed));

        assert_eq!(ChangeDebouncer::coalesce(Removed, Created), Some(Modified));
        assert_eq!(ChangeDebouncer::coalesce(Removed, Modified), Some(Removed));
        assert_eq!(ChangeDebouncer::coalesce(Removed, Removed), Some(Removed));
        assert_eq!(ChangeDebouncer::coalesce(Removed, Renamed), Some(Renamed));

        assert_eq!(ChangeDebouncer::coalesce(Renamed, Created), Some(Created));
        assert_eq!(ChangeDebouncer::coalesce(Renamed, Modified), Some(Renamed));
        assert_eq!(ChangeDebouncer::coalesce(Renamed, Removed), Some(Removed));
        assert_eq!(ChangeDebouncer::coalesce(Renamed, Renamed), Some(Renamed));
    }

    fn spawn_debouncer() -> (
        mpsc::Sender<ChangeEvent>,
        mpsc::Receiver<ChangeSignal>,
        CancellationToken,
    ) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        tokio::spawn(debouncer().run(event_rx, signal_tx, cancel.clone()));
        (event_tx, signal_rx, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_coalesces_rapid_writes() {
        let (events, mut signals, _cancel) = spawn_debouncer();
        let start = Instant::now();

        for _ in 0..5 {
            events.send(modified("/site/index.html")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let signal = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.event_count(), 5);
        assert!(start.elapsed() <= Duration::from_millis(50) + QUIET);

        let second = tokio::time::timeout(Duration::from_secs(5), signals.recv()).await;
        assert!(second.is_err(), "expected exactly one signal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emits_under_continuous_storm() {
        let (events, mut signals, cancel) = spawn_debouncer();
        let start = Instant::now();

        let producer_cancel = cancel.clone();
        tokio::spawn(async move {
            while !producer_cancel.is_cancelled() {
                if events.send(modified("/site/app.js")).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let signal = tokio::time::timeout(MAX_WAIT * 2, signals.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(start.elapsed() <= MAX_WAIT + Duration::from_millis(10));
        assert!(signal.event_count() > 1);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_discards_pending_on_shutdown() {
        let (events, mut signals, cancel) = spawn_debouncer();

        events.send(modified("/site/index.html")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        // Sender is dropped when the task exits without flushing
        assert!(signals.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_events_close() {
        let (events, mut signals, _cancel) = spawn_debouncer();

        drop(events);

        assert!(signals.recv().await.is_none());
    }
}

//! Performance-monitor spans.
//!
//! External profilers hook frame work through an enter/leave callback
//! pair. Spans are RAII guards, so enter and leave always pair up and
//! nest strictly even on early returns; the hooks only see balanced
//! brackets.

use std::sync::Arc;

use parking_lot::RwLock;

/// Profiler colors used by the library's own brackets.
pub mod colors {
    /// Waiting for the peer to grant a frame.
    pub const WAIT: u32 = 0x0060_60c0;
    /// Lock bookkeeping.
    pub const LOCK: u32 = 0x0040_c040;
    /// Buffer population (fill phase).
    pub const FILL: u32 = 0x00c0_c040;
    /// Submit and unlock.
    pub const UNLOCK: u32 = 0x00c0_6040;
}

/// Callbacks invoked around profiled sections.
///
/// `enter` receives the span's display color; `leave` closes the most
/// recent open span. Calls may arrive from any thread driving a stream.
pub trait PerfHooks: Send + Sync {
    fn enter(&self, color: u32);
    fn leave(&self);
}

/// Hook registry shared by a session and its streams.
#[derive(Clone, Default)]
pub(crate) struct PerfMon {
    hooks: Arc<RwLock<Option<Arc<dyn PerfHooks>>>>,
}

impl PerfMon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or clears the hook pair.
    pub fn set(&self, hooks: Option<Arc<dyn PerfHooks>>) {
        *self.hooks.write() = hooks;
    }

    /// Opens a span. With no hooks installed the span is free.
    pub fn span(&self, color: u32) -> PerfSpan {
        let hooks = self.hooks.read().clone();
        if let Some(h) = &hooks {
            h.enter(color);
        }
        PerfSpan { hooks }
    }
}

/// Open profiling span; leaving happens on drop.
pub struct PerfSpan {
    hooks: Option<Arc<dyn PerfHooks>>,
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        if let Some(h) = self.hooks.take() {
            h.leave();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

    #[derive(Default)]
    struct Recorder {
        depth: AtomicI32,
        max_depth: AtomicI32,
        enters: AtomicU32,
        leaves: AtomicU32,
        last_color: AtomicU32,
    }

    impl PerfHooks for Recorder {
        fn enter(&self, color: u32) {
            self.enters.fetch_add(1, Ordering::SeqCst);
            self.last_color.store(color, Ordering::SeqCst);
            let d = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_depth.fetch_max(d, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            self.leaves.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_span_pairs_enter_and_leave() {
        let mon = PerfMon::new();
        let rec = Arc::new(Recorder::default());
        mon.set(Some(rec.clone()));

        {
            let _outer = mon.span(colors::LOCK);
            {
                let _inner = mon.span(colors::FILL);
            }
        }

        assert_eq!(rec.enters.load(Ordering::SeqCst), 2);
        assert_eq!(rec.leaves.load(Ordering::SeqCst), 2);
        assert_eq!(rec.depth.load(Ordering::SeqCst), 0);
        assert_eq!(rec.max_depth.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_span_color_reaches_hooks() {
        let mon = PerfMon::new();
        let rec = Arc::new(Recorder::default());
        mon.set(Some(rec.clone()));
        let _span = mon.span(colors::UNLOCK);
        assert_eq!(rec.last_color.load(Ordering::SeqCst), colors::UNLOCK);
    }

    #[test]
    fn test_no_hooks_is_silent() {
        let mon = PerfMon::new();
        let _span = mon.span(colors::WAIT);
    }

    #[test]
    fn test_clearing_hooks_stops_new_spans() {
        let mon = PerfMon::new();
        let rec = Arc::new(Recorder::default());
        mon.set(Some(rec.clone()));
        // a span opened before the clear still closes on its own hooks
        let span = mon.span(colors::LOCK);
        mon.set(None);
        drop(span);
        drop(mon.span(colors::LOCK));

        assert_eq!(rec.enters.load(Ordering::SeqCst), 1);
        assert_eq!(rec.leaves.load(Ordering::SeqCst), 1);
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::state::SessionState;
use crate::processing::multiplexer::ChannelMultiplexer;
use crate::storage::sink_writer::SinkWriter;
use crate::traits::capture_delegate::PipelineDelegate;

/// Each tick may read this many periods of audio so a backlog left by a late
/// tick is worked off instead of growing.
pub const CATCH_UP_FACTOR: usize = 2;

/// Counters updated by the drain thread.
#[derive(Debug, Default)]
pub struct DrainStats {
    ticks: AtomicU64,
    frames_written: AtomicU64,
    write_errors: AtomicU64,
}

impl DrainStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

/// The work done on every tick: multiplexer → sink.
///
/// Holds shared handles only; the recording session owns the pieces.
pub struct DrainTask {
    multiplexer: Arc<Mutex<ChannelMultiplexer>>,
    sink: Arc<Mutex<Option<SinkWriter>>>,
    state: Arc<Mutex<SessionState>>,
    stats: Arc<DrainStats>,
    delegate: Option<Arc<dyn PipelineDelegate>>,
    frames_per_tick: usize,
}

impl DrainTask {
    pub fn new(
        multiplexer: Arc<Mutex<ChannelMultiplexer>>,
        sink: Arc<Mutex<Option<SinkWriter>>>,
        state: Arc<Mutex<SessionState>>,
        stats: Arc<DrainStats>,
        frames_per_tick: usize,
    ) -> Self {
        Self {
            multiplexer,
            sink,
            state,
            stats,
            delegate: None,
            frames_per_tick: frames_per_tick.max(1),
        }
    }

    pub fn with_delegate(mut self, delegate: Option<Arc<dyn PipelineDelegate>>) -> Self {
        self.delegate = delegate;
        self
    }

    /// Move one block from the multiplexer to the sink. Returns frames written.
    ///
    /// A no-op unless the session is recording, and when no frames are ready.
    pub fn tick(&self) -> usize {
        if !self.state.lock().is_recording() {
            return 0;
        }
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let (block, channels) = {
            let mut multiplexer = self.multiplexer.lock();
            (multiplexer.read(self.frames_per_tick), multiplexer.output_channels() as usize)
        };
        if block.is_empty() {
            return 0;
        }
        self.write_block(&block, channels)
    }

    /// Drain everything still queued, padding sources that ran short.
    ///
    /// Only call once the sources have stopped delivering.
    pub fn drain_remaining(&self) -> usize {
        let mut total = 0;
        loop {
            if !self.state.lock().is_recording() {
                return total;
            }
            let (block, channels) = {
                let mut multiplexer = self.multiplexer.lock();
                (multiplexer.flush(self.frames_per_tick), multiplexer.output_channels() as usize)
            };
            if block.is_empty() {
                return total;
            }
            let written = self.write_block(&block, channels);
            if written == 0 {
                return total;
            }
            total += written;
        }
    }

    fn write_block(&self, block: &[f32], channels: usize) -> usize {
        let frames = block.len() / channels;
        let result = {
            let mut sink = self.sink.lock();
            sink.as_mut().filter(|w| w.is_open()).map(|w| w.write(block))
        };
        let Some(result) = result else {
            self.fail(CaptureError::Io("sink is no longer available".into()));
            return 0;
        };

        match result {
            Ok(()) => {
                self.stats.frames_written.fetch_add(frames as u64, Ordering::Relaxed);
                frames
            }
            Err(e) => {
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("dropped {} frames: {}", frames, e);
                if let Some(delegate) = &self.delegate {
                    delegate.on_error(&e);
                }
                0
            }
        }
    }

    /// Enter the terminal failed state; later ticks do nothing.
    fn fail(&self, error: CaptureError) {
        let state = SessionState::Failed(error.clone());
        {
            let mut current = self.state.lock();
            if !current.is_recording() {
                return;
            }
            *current = state.clone();
        }
        log::error!("recording failed: {}", error);
        if let Some(delegate) = &self.delegate {
            delegate.on_error(&error);
            delegate.on_state_changed(&state);
        }
    }
}

/// Periodic driver for a [`DrainTask`] on a dedicated thread.
///
/// Ticks are scheduled against absolute deadlines so cadence does not drift
/// with tick duration. If the thread falls more than one period behind, the
/// schedule restarts from now rather than firing a burst of ticks.
pub struct DrainScheduler {
    cancelled: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DrainScheduler {
    pub fn spawn(task: Arc<DrainTask>, interval: Duration) -> Result<Self, CaptureError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let handle = thread::Builder::new()
            .name("loopmux-drain".into())
            .spawn(move || {
                let mut deadline = Instant::now() + interval;
                while !flag.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    task.tick();

                    deadline += interval;
                    let now = Instant::now();
                    if now > deadline + interval {
                        deadline = now;
                    }
                }
                log::debug!("drain thread exiting");
            })
            .map_err(|e| CaptureError::ConfigurationFailed(format!("failed to spawn drain thread: {}", e)))?;

        log::debug!("drain scheduler started ({:?} period)", interval);
        Ok(Self {
            cancelled,
            handle: Some(handle),
        })
    }

    /// Stop ticking. Blocks until an in-flight tick has finished; no tick
    /// starts after this returns.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("drain thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for DrainScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format::{AudioFormat, SampleEncoding};
    use crate::processing::multiplexer::MuxInput;
    use crate::processing::sample_queue::SampleQueue;

    struct Fixture {
        _dir: tempfile::TempDir,
        queues: [Arc<SampleQueue>; 2],
        sink: Arc<Mutex<Option<SinkWriter>>>,
        state: Arc<Mutex<SessionState>>,
        stats: Arc<DrainStats>,
        task: Arc<DrainTask>,
    }

    fn fixture(frames_per_tick: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let queues = [
            Arc::new(SampleQueue::new(1000, 1, SampleEncoding::Float32)),
            Arc::new(SampleQueue::new(1000, 1, SampleEncoding::Float32)),
        ];
        let mut multiplexer = ChannelMultiplexer::new(
            vec![MuxInput::new(Arc::clone(&queues[0])), MuxInput::new(Arc::clone(&queues[1]))],
            2,
        )
        .unwrap();
        multiplexer.map(0, 0, 0).unwrap();
        multiplexer.map(1, 0, 1).unwrap();

        let format = AudioFormat::new(44100, SampleEncoding::Float32, 2);
        let writer = SinkWriter::open(dir.path().join("drain.wav"), format).unwrap();
        let sink = Arc::new(Mutex::new(Some(writer)));
        let state = Arc::new(Mutex::new(SessionState::Recording));
        let stats = Arc::new(DrainStats::default());
        let task = Arc::new(DrainTask::new(
            Arc::new(Mutex::new(multiplexer)),
            Arc::clone(&sink),
            Arc::clone(&state),
            Arc::clone(&stats),
            frames_per_tick,
        ));
        Fixture {
            _dir: dir,
            queues,
            sink,
            state,
            stats,
            task,
        }
    }

    #[test]
    fn empty_tick_is_a_no_op() {
        let f = fixture(10);
        assert_eq!(f.task.tick(), 0);
        assert_eq!(f.stats.ticks(), 1);
        assert_eq!(f.stats.write_errors(), 0);
        assert!(f.state.lock().is_recording());
    }

    #[test]
    fn tick_writes_up_to_quota() {
        let f = fixture(10);
        f.queues[0].push_samples(&[0.1; 25]);
        f.queues[1].push_samples(&[0.2; 25]);

        assert_eq!(f.task.tick(), 10);
        assert_eq!(f.task.tick(), 10);
        assert_eq!(f.task.tick(), 5);
        assert_eq!(f.stats.frames_written(), 25);
        assert_eq!(f.sink.lock().as_ref().unwrap().frames_written(), 25);
    }

    #[test]
    fn drain_remaining_pads_short_source() {
        let f = fixture(4);
        f.queues[0].push_samples(&[0.1; 9]);
        f.queues[1].push_samples(&[0.2; 3]);

        assert_eq!(f.task.drain_remaining(), 9);
        assert_eq!(f.queues[0].available_count(), 0);
    }

    #[test]
    fn lost_sink_fails_session_and_stops_ticking() {
        let f = fixture(10);
        f.queues[0].push_samples(&[0.1; 5]);
        f.queues[1].push_samples(&[0.2; 5]);
        f.sink.lock().as_mut().unwrap().close().unwrap();

        assert_eq!(f.task.tick(), 0);
        assert!(f.state.lock().is_failed());

        f.queues[0].push_samples(&[0.1; 5]);
        f.queues[1].push_samples(&[0.2; 5]);
        assert_eq!(f.task.tick(), 0);
        assert_eq!(f.stats.ticks(), 1, "ticks after failure are no-ops");
    }

    #[test]
    fn misaligned_write_is_transient() {
        let f = fixture(10);
        f.task.write_block(&[0.0; 3], 3);
        assert_eq!(f.stats.write_errors(), 1);
        assert!(f.state.lock().is_recording());

        f.queues[0].push_samples(&[0.1; 5]);
        f.queues[1].push_samples(&[0.2; 5]);
        assert_eq!(f.task.tick(), 5);
    }

    #[test]
    fn no_tick_runs_after_cancel_returns() {
        let f = fixture(1000);
        let mut scheduler = DrainScheduler::spawn(Arc::clone(&f.task), Duration::from_millis(1)).unwrap();

        let started = Instant::now();
        while f.stats.ticks() < 3 && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        scheduler.cancel();
        assert!(!scheduler.is_running());

        let ticks = f.stats.ticks();
        assert!(ticks >= 3);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(f.stats.ticks(), ticks);
    }

    #[test]
    fn scheduler_drains_queues_in_background() {
        let f = fixture(100);
        let _scheduler = DrainScheduler::spawn(Arc::clone(&f.task), Duration::from_millis(2)).unwrap();

        f.queues[0].push_samples(&[0.5; 300]);
        f.queues[1].push_samples(&[0.5; 300]);

        let started = Instant::now();
        while f.stats.frames_written() < 300 && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(f.stats.frames_written(), 300);
    }
}

//! Loop metrics and tick event recording.
//!
//! Two independent paths, neither of which blocks the control thread for long:
//! - **TickRecorder:** lock-free queue (16K capacity) → background CSV export.
//! - **LoopMetrics:** shared mutex buffer for the end-of-run summary
//!   (bounded to 1000 points per series).

use std::{
    collections::VecDeque,
    fs::{File, create_dir_all},
    io::{self, BufWriter},
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use average::{Max, Min, Variance};
use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use serde::Serialize;

/// Lifecycle and per-tick events of the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Scheduler entered a new state.
    StateChange { ts_ns: u64, state: &'static str },
    /// One completed RUNNING iteration.
    Tick {
        seq: u64,
        ts_ns: u64,
        elapsed_us: u64,
        work_us: u64,
        pitch_deg: f64,
        drive: f64,
        left_palm: bool,
        right_palm: bool,
    },
    /// Peripheral failure that ended RUNNING.
    Fault { ts_ns: u64, operation: &'static str },
    /// One best-effort shutdown step.
    Release { ts_ns: u64, step: &'static str, ok: bool },
}

/// Flat CSV row: seq,ts_ns,event,pitch_deg,drive,elapsed_us,work_us,detail
#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    ts_ns: u64,
    event: &'static str,
    pitch_deg: Option<f64>,
    drive: Option<f64>,
    elapsed_us: Option<u64>,
    work_us: Option<u64>,
    detail: String,
}

impl Event {
    fn to_csv_row(&self, seq: u64) -> CsvRow {
        let row = |ts_ns: u64, event: &'static str, detail: String| CsvRow {
            seq,
            ts_ns,
            event,
            pitch_deg: None,
            drive: None,
            elapsed_us: None,
            work_us: None,
            detail,
        };
        match self {
            Event::StateChange { ts_ns, state } => row(*ts_ns, "StateChange", state.to_string()),
            Event::Tick {
                seq: tick,
                ts_ns,
                elapsed_us,
                work_us,
                pitch_deg,
                drive,
                left_palm,
                right_palm,
            } => CsvRow {
                seq: *tick,
                pitch_deg: Some(*pitch_deg),
                drive: Some(*drive),
                elapsed_us: Some(*elapsed_us),
                work_us: Some(*work_us),
                ..row(*ts_ns, "Tick", format!("palms={}/{}", left_palm, right_palm))
            },
            Event::Fault { ts_ns, operation } => row(*ts_ns, "Fault", operation.to_string()),
            Event::Release { ts_ns, step, ok } => row(*ts_ns, "Release", format!("{}={}", step, ok)),
        }
    }
}

const EVENT_QUEUE_CAPACITY: usize = 16_384;
const EXPORTER_POLL_MS: u64 = 5;
const FLUSH_EVERY: usize = 256;

/// Non-blocking event recorder with optional background CSV export.
///
/// `record()` pushes to a bounded lock-free queue and returns immediately;
/// events are dropped (and counted) when the queue is full.
#[derive(Clone)]
pub struct TickRecorder {
    queue: Arc<ArrayQueue<Event>>,
    run_start: Instant,
    dropped: Arc<AtomicU64>,
    exporting: Arc<AtomicBool>,
}

impl Default for TickRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TickRecorder {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
            run_start: Instant::now(),
            dropped: Arc::new(AtomicU64::new(0)),
            exporting: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn record(&self, event: Event) {
        if self.queue.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Nanoseconds since the recorder was created.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Pops everything currently queued. Used when no exporter runs.
    pub fn drain(&self) -> Vec<Event> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    /// Spawns a thread draining the queue into `output_csv` until
    /// `stop_exporter` is called and the queue is empty.
    pub fn start_exporter(&self, output_csv: PathBuf) -> io::Result<thread::JoinHandle<()>> {
        if let Some(dir) = output_csv.parent() {
            create_dir_all(dir)?;
        }
        let file = File::create(&output_csv)?;
        let queue = self.queue.clone();
        let running = self.exporting.clone();
        running.store(true, Ordering::Release);

        thread::Builder::new().name("tick_exporter".into()).spawn(move || {
            let mut writer = Writer::from_writer(BufWriter::new(file));
            let mut seq: u64 = 0;
            let mut pending = 0usize;

            loop {
                match queue.pop() {
                    Some(event) => {
                        seq += 1;
                        if let Err(e) = writer.serialize(event.to_csv_row(seq)) {
                            error!("Failed to write tick event: {}", e);
                            break;
                        }
                        pending += 1;
                        if pending >= FLUSH_EVERY {
                            let _ = writer.flush();
                            pending = 0;
                        }
                    }
                    None => {
                        if !running.load(Ordering::Acquire) && queue.is_empty() {
                            break;
                        }
                        thread::sleep(Duration::from_millis(EXPORTER_POLL_MS));
                    }
                }
            }

            let _ = writer.flush();
            debug!("tick exporter wrote {} events to {:?}", seq, output_csv);
        })
    }

    pub fn stop_exporter(&self) {
        self.exporting.store(false, Ordering::Release);
    }
}

/// Bounded histories and counters for one run.
#[derive(Default, Clone, Debug)]
pub struct LoopMetrics {
    pub pitch: VecDeque<f64>,
    pub drive: VecDeque<f64>,
    /// Measured iteration-to-iteration period.
    pub period_us: VecDeque<u64>,
    /// |period - target|
    pub jitter_us: VecDeque<u64>,
    /// Time spent in read→compute→write, excluding sleep.
    pub work_us: VecDeque<u64>,

    pub total_ticks: u64,
    pub overruns: u64,
    pub timing_anomalies: u64,
    pub gripper_changes: u64,
    pub frames_shown: u64,
    pub frames_skipped: u64,
}

impl LoopMetrics {
    pub fn record_tick(&mut self, pitch: f64, drive: f64, period_us: u64, target_us: u64, work_us: u64) {
        push_capped(&mut self.pitch, pitch);
        push_capped(&mut self.drive, drive);
        push_capped_u64(&mut self.period_us, period_us);
        push_capped_u64(&mut self.jitter_us, period_us.abs_diff(target_us));
        push_capped_u64(&mut self.work_us, work_us);
        self.total_ticks += 1;
    }
}

pub type SharedMetrics = Arc<Mutex<LoopMetrics>>;

pub fn shared_metrics() -> SharedMetrics {
    Arc::new(Mutex::new(LoopMetrics::default()))
}

/// Locks the metrics, recovering from a poisoned mutex.
pub fn lock_metrics(metrics: &SharedMetrics) -> MutexGuard<'_, LoopMetrics> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub const MAX_POINTS: usize = 1_000;

/// Appends value; drops the oldest at capacity.
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

/// Min, max, mean and sample standard deviation.
pub fn calculate_stats(data: impl IntoIterator<Item = f64> + Clone) -> Option<Stats> {
    let var: Variance = data.clone().into_iter().collect();
    if var.is_empty() {
        return None;
    }
    let min: Min = data.clone().into_iter().collect();
    let max: Max = data.into_iter().collect();
    Some(Stats {
        min: min.min(),
        max: max.max(),
        mean: var.mean(),
        std_dev: if var.len() > 1 { var.sample_variance().sqrt() } else { 0.0 },
        count: var.len() as usize,
    })
}

pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    calculate_stats(data.iter().map(|&x| x as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_buffer_keeps_newest() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS + 5) {
            push_capped(&mut buf, i as f64);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front().copied(), Some(5.0));
    }

    #[test]
    fn stats_over_period_samples() {
        let data: VecDeque<u64> = [18_000, 20_000, 22_000].into_iter().collect();
        let s = calculate_stats_u64(&data).unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 18_000.0);
        assert_eq!(s.max, 22_000.0);
        assert!((s.mean - 20_000.0).abs() < 1e-9);
        assert!((s.std_dev - 2_000.0).abs() < 1e-6);
        assert!(calculate_stats_u64(&VecDeque::new()).is_none());
    }

    #[test]
    fn tick_metrics_track_jitter() {
        let mut m = LoopMetrics::default();
        m.record_tick(1.0, -0.1, 21_500, 20_000, 300);
        assert_eq!(m.total_ticks, 1);
        assert_eq!(m.jitter_us.back().copied(), Some(1_500));
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let rec = TickRecorder::with_capacity(2);
        for _ in 0..4 {
            rec.record(Event::Fault { ts_ns: 0, operation: "x" });
        }
        assert_eq!(rec.dropped(), 2);
        assert_eq!(rec.drain().len(), 2);
    }

    #[test]
    fn tick_row_flattens_fields() {
        let row = Event::Tick {
            seq: 7,
            ts_ns: 10,
            elapsed_us: 20_000,
            work_us: 150,
            pitch_deg: 2.5,
            drive: -0.3,
            left_palm: true,
            right_palm: false,
        }
        .to_csv_row(99);
        assert_eq!(row.seq, 7);
        assert_eq!(row.event, "Tick");
        assert_eq!(row.pitch_deg, Some(2.5));
        assert_eq!(row.detail, "palms=true/false");
    }
}

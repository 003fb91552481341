//! Event-time window ring.
//!
//! Fixed-width half-open windows `[start, end)` aligned to a global anchor.
//! Tasks land in the window covering their submission time; heartbeats only
//! advance the watermark. Windows close strictly in id order once the
//! watermark passes their end, and every state transition is one-way:
//! `OPEN → CLOSED → SIMULATED` (or `SKIPPED` on a cache hit).

use chrono::{DateTime, Duration, Utc};

use opendt_types::Task;

/// Lifecycle of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open,
    Closed,
    Simulated,
    Skipped,
}

#[derive(Debug)]
struct WindowSlot {
    state: WindowState,
    tasks: Vec<Task>,
}

impl WindowSlot {
    fn new() -> Self {
        Self {
            state: WindowState::Open,
            tasks: Vec::new(),
        }
    }
}

/// A window snapshotted at closure; `tasks` will no longer be mutated.
#[derive(Debug)]
pub struct ClosedWindow {
    pub window_id: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

/// A task that arrived behind the head window and was dropped.
#[derive(Debug, PartialEq, Eq)]
pub struct LateEvent {
    pub task_id: i64,
    pub timestamp: DateTime<Utc>,
    pub head_start: DateTime<Utc>,
}

/// The window ring: contiguous window ids starting at 0, anchored at a
/// whole multiple of the window width.
pub struct WindowSet {
    width_ms: i64,
    anchor_ms: Option<i64>,
    watermark_ms: Option<i64>,
    windows: Vec<WindowSlot>,
    /// Highest window that has seen a task or heartbeat.
    head: usize,
    /// Lowest window id that is still `Open`.
    next_to_close: usize,
}

impl WindowSet {
    pub fn new(width: Duration, first_window_anchor: Option<DateTime<Utc>>) -> Self {
        let width_ms = width.num_milliseconds().max(1);
        Self {
            width_ms,
            anchor_ms: first_window_anchor.map(|a| a.timestamp_millis()),
            watermark_ms: None,
            windows: Vec::new(),
            head: 0,
            next_to_close: 0,
        }
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark_ms.and_then(DateTime::from_timestamp_millis)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn state(&self, window_id: u64) -> Option<WindowState> {
        self.windows.get(window_id as usize).map(|w| w.state)
    }

    pub fn bounds(&self, window_id: u64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let anchor = self.anchor_ms?;
        let start = anchor + window_id as i64 * self.width_ms;
        Some((
            DateTime::from_timestamp_millis(start)?,
            DateTime::from_timestamp_millis(start + self.width_ms)?,
        ))
    }

    /// Ingest a task message. Creates any missing windows up to the task's
    /// window, which may remain empty. A task behind the head window is a
    /// late arrival and is rejected.
    pub fn ingest_task(&mut self, task: Task) -> Result<u64, LateEvent> {
        let ts_ms = task.submission_time.timestamp_millis();
        let anchor = self.ensure_anchor(ts_ms);

        // Rejects both arrivals behind the head window and arrivals before a
        // configured anchor; an auto-derived anchor floors this very
        // timestamp, so the index below is always >= 0 once accepted.
        let head_start = anchor + self.head as i64 * self.width_ms;
        if ts_ms < head_start {
            return Err(LateEvent {
                task_id: task.id,
                timestamp: task.submission_time,
                head_start: DateTime::from_timestamp_millis(head_start)
                    .unwrap_or(task.submission_time),
            });
        }
        let idx = ((ts_ms - anchor) / self.width_ms) as usize;

        self.extend_to(idx);
        self.head = self.head.max(idx);
        self.windows[idx].tasks.push(task);
        self.advance_watermark(ts_ms);
        Ok(idx as u64)
    }

    /// Ingest a heartbeat: create windows up to its position, advance the
    /// watermark. Closure attempts follow via [`close_next`](Self::close_next).
    pub fn observe_heartbeat(&mut self, timestamp: DateTime<Utc>) {
        let ts_ms = timestamp.timestamp_millis();
        let anchor = self.ensure_anchor(ts_ms);
        if ts_ms >= anchor {
            let idx = ((ts_ms - anchor) / self.width_ms) as usize;
            self.extend_to(idx);
            self.head = self.head.max(idx);
        }
        self.advance_watermark(ts_ms);
    }

    /// Close the next eligible window, if any: the lowest `Open` window whose
    /// end the watermark has passed (all earlier windows are already closed
    /// by construction). Closing snapshots the task list.
    pub fn close_next(&mut self) -> Option<ClosedWindow> {
        let watermark = self.watermark_ms?;
        let anchor = self.anchor_ms?;

        if self.next_to_close >= self.windows.len() {
            return None;
        }
        let window_id = self.next_to_close;
        let end = anchor + (window_id as i64 + 1) * self.width_ms;
        if watermark < end {
            return None;
        }

        let slot = &mut self.windows[window_id];
        debug_assert_eq!(slot.state, WindowState::Open);
        slot.state = WindowState::Closed;
        let tasks = std::mem::take(&mut slot.tasks);
        self.next_to_close += 1;

        Some(ClosedWindow {
            window_id: window_id as u64,
            start: DateTime::from_timestamp_millis(end - self.width_ms)?,
            end: DateTime::from_timestamp_millis(end)?,
            tasks,
        })
    }

    /// `CLOSED → SIMULATED`. Returns `false` if the window was not closed.
    pub fn mark_simulated(&mut self, window_id: u64) -> bool {
        self.transition(window_id, WindowState::Simulated)
    }

    /// `CLOSED → SKIPPED` (cache hit). Returns `false` if the window was not
    /// closed.
    pub fn mark_skipped(&mut self, window_id: u64) -> bool {
        self.transition(window_id, WindowState::Skipped)
    }

    fn transition(&mut self, window_id: u64, to: WindowState) -> bool {
        match self.windows.get_mut(window_id as usize) {
            Some(slot) if slot.state == WindowState::Closed => {
                slot.state = to;
                true
            }
            _ => false,
        }
    }

    fn ensure_anchor(&mut self, ts_ms: i64) -> i64 {
        *self.anchor_ms.get_or_insert_with(|| {
            // Anchor at the floor of the first observed timestamp; negative
            // epochs round toward negative infinity to stay aligned.
            ts_ms.div_euclid(self.width_ms) * self.width_ms
        })
    }

    fn extend_to(&mut self, idx: usize) {
        while self.windows.len() <= idx {
            self.windows.push(WindowSlot::new());
        }
    }

    fn advance_watermark(&mut self, ts_ms: i64) {
        self.watermark_ms = Some(self.watermark_ms.map_or(ts_ms, |w| w.max(ts_ms)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    fn task(id: i64, offset_ms: i64) -> Task {
        Task {
            id,
            submission_time: DateTime::from_timestamp_millis(offset_ms).unwrap(),
            duration: 1_000,
            cpu_count: 1,
            cpu_capacity: 2_000.0,
            mem_capacity: 512,
            fragments: vec![],
        }
    }

    fn five_minute_set() -> WindowSet {
        WindowSet::new(Duration::minutes(5), Some(DateTime::UNIX_EPOCH))
    }

    #[test]
    fn tasks_land_in_their_windows() {
        let mut set = five_minute_set();
        assert_eq!(set.ingest_task(task(1, 2 * MIN)), Ok(0));
        assert_eq!(set.ingest_task(task(2, 4 * MIN + 30_000)), Ok(0));
        assert_eq!(set.ingest_task(task(3, 6 * MIN)), Ok(1));
        assert_eq!(set.window_count(), 2);
    }

    #[test]
    fn heartbeat_closes_elapsed_windows_in_order() {
        let mut set = five_minute_set();
        set.ingest_task(task(1, 2 * MIN)).unwrap();
        set.ingest_task(task(2, 4 * MIN + 30_000)).unwrap();
        assert!(set.close_next().is_none(), "watermark below window end");

        set.observe_heartbeat(DateTime::from_timestamp_millis(5 * MIN).unwrap());
        let closed = set.close_next().unwrap();
        assert_eq!(closed.window_id, 0);
        assert_eq!(closed.tasks.len(), 2);
        assert_eq!(closed.tasks[0].id, 1);
        assert_eq!(closed.tasks[1].id, 2);
        assert_eq!(set.state(0), Some(WindowState::Closed));
        assert!(set.close_next().is_none());
    }

    #[test]
    fn gap_heartbeats_produce_empty_windows() {
        let mut set = five_minute_set();
        set.ingest_task(task(1, MIN)).unwrap();
        for minutes in [5, 10, 15] {
            set.observe_heartbeat(DateTime::from_timestamp_millis(minutes * MIN).unwrap());
        }

        let first = set.close_next().unwrap();
        assert_eq!((first.window_id, first.tasks.len()), (0, 1));
        let second = set.close_next().unwrap();
        assert_eq!((second.window_id, second.tasks.len()), (1, 0));
        let third = set.close_next().unwrap();
        assert_eq!((third.window_id, third.tasks.len()), (2, 0));
        // Window 3 exists (the 15:00 heartbeat opened it) but is not closable.
        assert_eq!(set.window_count(), 4);
        assert!(set.close_next().is_none());
    }

    #[test]
    fn late_task_is_rejected_after_head_advances() {
        let mut set = five_minute_set();
        set.ingest_task(task(1, 2 * MIN)).unwrap();
        set.observe_heartbeat(DateTime::from_timestamp_millis(5 * MIN).unwrap());
        set.close_next().unwrap();

        let err = set.ingest_task(task(2, 3 * MIN)).unwrap_err();
        assert_eq!(err.task_id, 2);
        assert_eq!(err.head_start.timestamp_millis(), 5 * MIN);
        // Window 0 task list was snapshotted at closure and is untouched.
        assert_eq!(set.state(0), Some(WindowState::Closed));
    }

    #[test]
    fn anchor_floors_first_observed_timestamp() {
        let mut set = WindowSet::new(Duration::minutes(5), None);
        // First message at 00:07:30 anchors windows at 00:05:00.
        set.ingest_task(task(1, 7 * MIN + 30_000)).unwrap();
        let (start, end) = set.bounds(0).unwrap();
        assert_eq!(start.timestamp_millis(), 5 * MIN);
        assert_eq!(end.timestamp_millis(), 10 * MIN);
    }

    #[test]
    fn transitions_are_one_way() {
        let mut set = five_minute_set();
        set.ingest_task(task(1, MIN)).unwrap();
        set.observe_heartbeat(DateTime::from_timestamp_millis(5 * MIN).unwrap());

        assert!(!set.mark_simulated(0), "cannot simulate an open window");
        set.close_next().unwrap();
        assert!(set.mark_simulated(0));
        assert!(!set.mark_skipped(0), "terminal state is final");
        assert_eq!(set.state(0), Some(WindowState::Simulated));
    }

    #[test]
    fn watermark_is_max_over_all_messages() {
        let mut set = five_minute_set();
        set.observe_heartbeat(DateTime::from_timestamp_millis(10 * MIN).unwrap());
        set.observe_heartbeat(DateTime::from_timestamp_millis(8 * MIN).unwrap());
        assert_eq!(set.watermark().unwrap().timestamp_millis(), 10 * MIN);
    }

    #[test]
    fn task_order_within_window_is_arrival_order() {
        let mut set = five_minute_set();
        set.ingest_task(task(9, 3 * MIN)).unwrap();
        set.ingest_task(task(4, 2 * MIN)).unwrap();
        set.observe_heartbeat(DateTime::from_timestamp_millis(5 * MIN).unwrap());
        let closed = set.close_next().unwrap();
        let ids: Vec<i64> = closed.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![9, 4]);
    }
}

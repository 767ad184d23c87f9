//! Per-subject presence state machine.
//!
//! A subject becomes present only after a full voting window of liveness
//! verdicts stays within the spoof tolerance, so a single noisy frame can
//! never flip presence state. Exits are debounced: a subject must stay
//! unseen past the absence threshold before the leave is finalized and the
//! interval's duration is booked.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};

use crate::types::Verdict;

/// Engine thresholds. Process-wide configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a subject must stay unseen before a leave is finalized.
    pub absence_threshold: TimeDelta,
    /// Liveness voting window size.
    pub liveness_history_len: usize,
    /// Maximum tolerated spoof ratio within a full window.
    pub spoof_threshold: f32,
    /// Minimum top-match similarity for a detection to count at all.
    pub similarity_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            absence_threshold: TimeDelta::seconds(5),
            liveness_history_len: 5,
            spoof_threshold: 0.2,
            similarity_threshold: 0.8,
        }
    }
}

/// Fixed-capacity FIFO of the most recent liveness verdicts.
#[derive(Debug, Clone)]
pub struct VotingWindow {
    verdicts: VecDeque<Verdict>,
    capacity: usize,
}

impl VotingWindow {
    /// Capacity is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            verdicts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a verdict, evicting the oldest when at capacity.
    pub fn push(&mut self, verdict: Verdict) {
        if self.verdicts.len() == self.capacity {
            self.verdicts.pop_front();
        }
        self.verdicts.push_back(verdict);
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.verdicts.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.verdicts.clear();
    }

    /// Fraction of verdicts in the window that are spoof. 0.0 when empty.
    pub fn spoof_ratio(&self) -> f32 {
        if self.verdicts.is_empty() {
            return 0.0;
        }
        let spoofs = self.verdicts.iter().filter(|v| v.is_spoof()).count();
        spoofs as f32 / self.verdicts.len() as f32
    }

    /// A full window whose spoof ratio is within tolerance confirms the
    /// subject as live. A partial window never confirms.
    pub fn confirms_live(&self, spoof_threshold: f32) -> bool {
        self.is_full() && self.spoof_ratio() <= spoof_threshold
    }

    /// Most-recent-last view of the window, for tests and diagnostics.
    pub fn verdicts(&self) -> impl Iterator<Item = Verdict> + '_ {
        self.verdicts.iter().copied()
    }
}

/// A presence transition to deliver to the attendance backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// First-ever confirmed sighting of the subject.
    Entry {
        subject_id: String,
        at: DateTime<Utc>,
    },
    /// Subject came back after a finalized leave. `duration` is the
    /// presence time accumulated before this new interval.
    Resume {
        subject_id: String,
        duration: TimeDelta,
    },
    /// A leave was finalized. `at` is the last confirmed sighting and
    /// `duration` the new accumulated total.
    Exit {
        subject_id: String,
        at: DateTime<Utc>,
        duration: TimeDelta,
    },
}

impl Report {
    pub fn subject_id(&self) -> &str {
        match self {
            Report::Entry { subject_id, .. }
            | Report::Resume { subject_id, .. }
            | Report::Exit { subject_id, .. } => subject_id,
        }
    }
}

/// Presence record for one subject. Created lazily on the first verdict
/// and kept for the process lifetime; there is no external reset.
#[derive(Debug, Clone)]
pub struct PresenceState {
    /// First-ever confirmed sighting. Set once, never cleared.
    pub entry: Option<DateTime<Utc>>,
    /// Start of the current presence interval. `Some` iff an interval is
    /// open (confirmed and not yet finalized as left).
    pub curr_entry: Option<DateTime<Utc>>,
    /// Last confirmed sighting — the watermark the leaver sweep debounces on.
    pub exit: Option<DateTime<Utc>>,
    /// Subject has been confirmed present at least once.
    pub present: bool,
    /// Subject is currently considered absent.
    pub has_left: bool,
    /// Recent liveness verdicts.
    pub window: VotingWindow,
    /// Accumulated presence across all intervals. Grows only when a leave
    /// is finalized.
    pub duration: TimeDelta,
}

impl PresenceState {
    fn new(window_capacity: usize) -> Self {
        Self {
            entry: None,
            curr_entry: None,
            exit: None,
            present: false,
            has_left: false,
            window: VotingWindow::new(window_capacity),
            duration: TimeDelta::zero(),
        }
    }

    /// Apply one liveness verdict at time `now`.
    ///
    /// Returns the report the transition produced, if any. Until the
    /// window is full and within the spoof tolerance, the verdict only
    /// accumulates and nothing else changes.
    fn observe(
        &mut self,
        subject_id: &str,
        verdict: Verdict,
        now: DateTime<Utc>,
        config: &EngineConfig,
    ) -> Option<Report> {
        self.window.push(verdict);
        if !self.window.confirms_live(config.spoof_threshold) {
            return None;
        }

        let report = if self.entry.is_none() {
            self.entry = Some(now);
            self.curr_entry = Some(now);
            self.present = true;
            Some(Report::Entry {
                subject_id: subject_id.to_string(),
                at: now,
            })
        } else if self.has_left {
            self.curr_entry = Some(now);
            self.has_left = false;
            Some(Report::Resume {
                subject_id: subject_id.to_string(),
                duration: self.duration,
            })
        } else {
            None
        };

        // Last-seen watermark moves on every confirmed sighting.
        self.exit = Some(now);
        report
    }

    /// Finalize a leave at the recorded last-seen time. Caller has already
    /// checked the debounce condition.
    fn finalize_leave(&mut self, subject_id: &str, last_seen: DateTime<Utc>) -> Report {
        if let Some(started) = self.curr_entry.take() {
            self.duration = self.duration + (last_seen - started);
        }
        self.window.clear();
        self.has_left = true;
        Report::Exit {
            subject_id: subject_id.to_string(),
            at: last_seen,
            duration: self.duration,
        }
    }
}

/// The presence engine: owns every subject's state and applies the
/// entry/resume/exit rules. Owned exclusively by the decision loop; no
/// other thread touches it.
pub struct PresenceTracker {
    config: EngineConfig,
    states: HashMap<String, PresenceState>,
}

impl PresenceTracker {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record a liveness verdict for a match that already cleared the
    /// similarity threshold. Creates the subject's state on first use.
    pub fn observe(
        &mut self,
        subject_id: &str,
        verdict: Verdict,
        now: DateTime<Utc>,
    ) -> Option<Report> {
        let window_capacity = self.config.liveness_history_len;
        let state = self
            .states
            .entry(subject_id.to_string())
            .or_insert_with(|| PresenceState::new(window_capacity));

        let report = state.observe(subject_id, verdict, now, &self.config);
        if let Some(report) = &report {
            tracing::info!(subject = subject_id, report = ?report, "presence transition");
        }
        report
    }

    /// Debounced exit detection. Runs once per tick over all subjects,
    /// independent of recognition throttling.
    pub fn sweep_leavers(&mut self, now: DateTime<Utc>) -> Vec<Report> {
        let mut reports = Vec::new();
        for (subject_id, state) in &mut self.states {
            if !state.present || state.has_left {
                continue;
            }
            let Some(last_seen) = state.exit else {
                continue;
            };
            if now - last_seen > self.config.absence_threshold {
                let report = state.finalize_leave(subject_id, last_seen);
                tracing::info!(subject = %subject_id, report = ?report, "leave finalized");
                reports.push(report);
            }
        }
        reports
    }

    pub fn state(&self, subject_id: &str) -> Option<&PresenceState> {
        self.states.get(subject_id)
    }

    /// Number of subjects ever seen, for diagnostics.
    pub fn subject_count(&self) -> usize {
        self.states.len()
    }
}

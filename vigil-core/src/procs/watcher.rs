//! Sliding-window activity watcher
//!
//! Raw CPU samples are noisy: a busy agent regularly dips to 0% between
//! bursts and an idle one spikes while repainting. Each PID therefore keeps
//! a fixed-length ring of raw-active samples, and the reported state flips
//! only when the window density crosses the threshold — near-instant on a
//! real burst, sustained quiet required to go idle.

use std::collections::{BTreeMap, HashMap, VecDeque};

/// Window length in samples (40 × 250 ms ≈ 10 s wall).
pub const WINDOW: usize = 40;

/// Fraction of true samples at or above which a PID is windowed-active.
pub const ACTIVE_THRESHOLD: f64 = 0.15;

/// One per-PID observation fed into the watcher each tick.
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    /// Canonical project slug, when the process maps to a tracked project.
    pub slug: Option<String>,
    pub raw_active: bool,
}

/// Lifecycle transition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Active,
    Idle,
    Closed,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Created => "instance:created",
            Transition::Active => "instance:active",
            Transition::Idle => "instance:idle",
            Transition::Closed => "instance:closed",
        }
    }
}

/// A lifecycle transition emitted by one tick.
#[derive(Debug, Clone)]
pub struct InstanceEvent {
    pub pid: u32,
    pub slug: Option<String>,
    pub transition: Transition,
}

/// Per-slug agent counts for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectAgents {
    pub active: u32,
    pub count: u32,
}

/// Facility-level roll-up over all currently-known PIDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilitySummary {
    pub agent_count: u32,
    pub active_count: u32,
    pub active_projects: Vec<String>,
}

/// Output of a tick that produced at least one transition.
#[derive(Debug, Clone)]
pub struct WatchTick {
    pub events: Vec<InstanceEvent>,
    /// Counts for the slugs mentioned in this tick's events.
    pub project_agents: BTreeMap<String, ProjectAgents>,
    pub facility: FacilitySummary,
}

struct WindowState {
    samples: VecDeque<bool>,
    last_reported: bool,
    slug: Option<String>,
}

impl WindowState {
    fn new(slug: Option<String>) -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW),
            last_reported: false,
            slug,
        }
    }

    fn push(&mut self, raw_active: bool) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(raw_active);
    }

    fn windowed_active(&self) -> bool {
        if self.samples.is_empty() {
            return false;
        }
        let trues = self.samples.iter().filter(|s| **s).count();
        trues as f64 / self.samples.len() as f64 >= ACTIVE_THRESHOLD
    }
}

/// Debouncing watcher over per-PID activity windows.
#[derive(Default)]
pub struct ProcessWatcher {
    windows: HashMap<u32, WindowState>,
}

impl ProcessWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one round of samples. Returns `None` when nothing changed.
    pub fn tick(&mut self, samples: &[ProcessSample]) -> Option<WatchTick> {
        let mut events = Vec::new();

        let fresh: HashMap<u32, &ProcessSample> =
            samples.iter().map(|s| (s.pid, s)).collect();

        // Vanished PIDs close out first.
        let gone: Vec<u32> = self
            .windows
            .keys()
            .filter(|pid| !fresh.contains_key(pid))
            .copied()
            .collect();
        for pid in gone {
            if let Some(state) = self.windows.remove(&pid) {
                events.push(InstanceEvent {
                    pid,
                    slug: state.slug,
                    transition: Transition::Closed,
                });
            }
        }

        for sample in samples {
            match self.windows.get_mut(&sample.pid) {
                Some(state) => {
                    state.push(sample.raw_active);
                    // Keep the slug current: resolution can lag a scan or
                    // change after a rename.
                    if sample.slug.is_some() {
                        state.slug = sample.slug.clone();
                    }
                    let now_active = state.windowed_active();
                    if now_active != state.last_reported {
                        state.last_reported = now_active;
                        events.push(InstanceEvent {
                            pid: sample.pid,
                            slug: state.slug.clone(),
                            transition: if now_active {
                                Transition::Active
                            } else {
                                Transition::Idle
                            },
                        });
                    }
                }
                None => {
                    let mut state = WindowState::new(sample.slug.clone());
                    state.push(sample.raw_active);
                    events.push(InstanceEvent {
                        pid: sample.pid,
                        slug: state.slug.clone(),
                        transition: Transition::Created,
                    });
                    if state.windowed_active() {
                        state.last_reported = true;
                        events.push(InstanceEvent {
                            pid: sample.pid,
                            slug: state.slug.clone(),
                            transition: Transition::Active,
                        });
                    }
                    self.windows.insert(sample.pid, state);
                }
            }
        }

        if events.is_empty() {
            return None;
        }

        let project_agents = self.project_agents_for(&events);
        let facility = self.facility_summary();

        Some(WatchTick {
            events,
            project_agents,
            facility,
        })
    }

    /// Whether any currently-known PID is windowed-active. This is what the
    /// auto-close timer consults; it never rescans the process table.
    pub fn any_windowed_active(&self) -> bool {
        self.windows.values().any(WindowState::windowed_active)
    }

    /// Roll-up over all currently-known PIDs.
    pub fn facility_summary(&self) -> FacilitySummary {
        let agent_count = self.windows.len() as u32;
        let mut active_count = 0u32;
        let mut active_projects: Vec<String> = Vec::new();

        for state in self.windows.values() {
            if state.windowed_active() {
                active_count += 1;
                if let Some(slug) = &state.slug {
                    if !active_projects.contains(slug) {
                        active_projects.push(slug.clone());
                    }
                }
            }
        }
        active_projects.sort();

        FacilitySummary {
            agent_count,
            active_count,
            active_projects,
        }
    }

    fn project_agents_for(&self, events: &[InstanceEvent]) -> BTreeMap<String, ProjectAgents> {
        let mut out = BTreeMap::new();
        for slug in events.iter().filter_map(|e| e.slug.as_deref()) {
            if out.contains_key(slug) {
                continue;
            }
            let mut agents = ProjectAgents { active: 0, count: 0 };
            for state in self.windows.values() {
                if state.slug.as_deref() == Some(slug) {
                    agents.count += 1;
                    if state.windowed_active() {
                        agents.active += 1;
                    }
                }
            }
            out.insert(slug.to_string(), agents);
        }
        out
    }
}

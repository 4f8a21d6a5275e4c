//! Host process observation: scanning the process table and debouncing
//! per-PID activity into stable lifecycle transitions.

pub mod scanner;
pub mod watcher;

pub use scanner::{AgentProcess, ProcessScanner};
pub use watcher::{
    FacilitySummary, InstanceEvent, ProcessSample, ProcessWatcher, ProjectAgents, Transition,
    WatchTick,
};

//! Task lifecycle control: pause, resume, and stop in-flight tasks.
//!
//! The registry and the pending queue sit behind one lock, so every
//! transition is an atomic check-and-set. Invalid transitions return `false`
//! and leave state untouched.
//!
//! One task is active per controller. The pause gate only ever blocks that
//! task; parallel workers each own a controller.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::adapters::EventSink;
use crate::domain::{LifecycleState, StatusMarker, TaskEvent, TaskRecord};

/// Poll interval for paused tasks that do not own the gate
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Operator command delivered for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pause" => Ok(ControlCommand::Pause),
            "resume" => Ok(ControlCommand::Resume),
            "stop" => Ok(ControlCommand::Stop),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Unknown control command: {0}")]
pub struct UnknownCommand(pub String);

/// The task was stopped (or otherwise left the running states) at a suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Task interrupted")]
pub struct Interrupted;

#[derive(Debug, Default)]
struct Registry {
    tasks: HashMap<String, TaskRecord>,
    queue: VecDeque<String>,
    active: Option<String>,
}

impl Registry {
    fn dequeue(&mut self, task_id: &str) {
        self.queue.retain(|id| id != task_id);
    }

    /// Clear the active pointer if it points at `task_id`
    fn release(&mut self, task_id: &str) -> bool {
        if self.active.as_deref() == Some(task_id) {
            self.active = None;
            true
        } else {
            false
        }
    }

    fn is_active(&self, task_id: &str) -> bool {
        self.active.as_deref() == Some(task_id)
    }
}

/// In-memory registry of task states plus a single-flight pending queue
pub struct TaskLifecycleController {
    inner: Mutex<Registry>,

    /// `true` while the active task may proceed
    gate: watch::Sender<bool>,
}

impl Default for TaskLifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskLifecycleController {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Mutex::new(Registry::default()),
            gate,
        }
    }

    /// Register a task as Pending and enqueue it.
    ///
    /// An Errored task is re-enqueued for another attempt. Any other known
    /// task is left alone and `false` is returned.
    pub fn submit(&self, task_id: &str) -> bool {
        let mut reg = self.inner.lock();
        match reg.tasks.get(task_id).map(|r| r.state) {
            None => {
                reg.tasks.insert(task_id.to_string(), TaskRecord::new(task_id));
            }
            Some(LifecycleState::Errored) => {
                if let Some(record) = reg.tasks.get_mut(task_id) {
                    record.state = LifecycleState::Pending;
                }
            }
            Some(_) => return false,
        }
        reg.dequeue(task_id);
        reg.queue.push_back(task_id.to_string());
        debug!(task_id, "Task queued");
        true
    }

    /// Pop the next Pending task off the queue, skipping stale entries
    pub fn next_pending(&self) -> Option<String> {
        let mut reg = self.inner.lock();
        while let Some(id) = reg.queue.pop_front() {
            if reg.tasks.get(&id).map(|r| r.state) == Some(LifecycleState::Pending) {
                return Some(id);
            }
        }
        None
    }

    /// Pending or Paused → Running. Fails while another task is active.
    pub fn start(&self, task_id: &str) -> bool {
        let mut reg = self.inner.lock();
        if reg.active.as_deref().is_some_and(|active| active != task_id) {
            return false;
        }
        let Some(record) = reg.tasks.get_mut(task_id) else {
            return false;
        };
        if !matches!(record.state, LifecycleState::Pending | LifecycleState::Paused) {
            return false;
        }
        record.state = LifecycleState::Running;
        record.last_error = None;
        reg.dequeue(task_id);
        reg.active = Some(task_id.to_string());
        self.gate.send_replace(true);
        info!(task_id, "Task started");
        true
    }

    /// Running → Paused; takes effect at the task's next suspension point
    pub fn pause(&self, task_id: &str) -> bool {
        let mut reg = self.inner.lock();
        let Some(record) = reg.tasks.get_mut(task_id) else {
            return false;
        };
        if record.state != LifecycleState::Running {
            return false;
        }
        record.state = LifecycleState::Paused;
        if reg.is_active(task_id) {
            self.gate.send_replace(false);
        }
        info!(task_id, "Task paused");
        true
    }

    /// Paused → Running
    pub fn resume(&self, task_id: &str) -> bool {
        let mut reg = self.inner.lock();
        let Some(record) = reg.tasks.get_mut(task_id) else {
            return false;
        };
        if record.state != LifecycleState::Paused {
            return false;
        }
        record.state = LifecycleState::Running;
        if reg.is_active(task_id) {
            self.gate.send_replace(true);
        }
        info!(task_id, "Task resumed");
        true
    }

    /// Any non-terminal state → Stopped. Removes the task from the queue and
    /// releases the gate if it was the active one.
    pub fn stop(&self, task_id: &str) -> bool {
        let mut reg = self.inner.lock();
        let Some(record) = reg.tasks.get_mut(task_id) else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }
        record.state = LifecycleState::Stopped;
        reg.dequeue(task_id);
        if reg.release(task_id) {
            self.gate.send_replace(true);
        }
        info!(task_id, "Task stopped");
        true
    }

    /// Running → Completed
    pub fn complete(&self, task_id: &str) -> bool {
        let mut reg = self.inner.lock();
        let Some(record) = reg.tasks.get_mut(task_id) else {
            return false;
        };
        if record.state != LifecycleState::Running {
            return false;
        }
        record.state = LifecycleState::Completed;
        record.current_step = None;
        if reg.release(task_id) {
            self.gate.send_replace(true);
        }
        true
    }

    /// Any non-terminal state → Errored, keeping the message
    pub fn fail(&self, task_id: &str, message: &str) -> bool {
        let mut reg = self.inner.lock();
        let Some(record) = reg.tasks.get_mut(task_id) else {
            return false;
        };
        if record.state.is_terminal() {
            return false;
        }
        record.state = LifecycleState::Errored;
        record.last_error = Some(message.to_string());
        reg.dequeue(task_id);
        if reg.release(task_id) {
            self.gate.send_replace(true);
        }
        true
    }

    /// Informational label of the step being executed
    pub fn set_current_step(&self, task_id: &str, step: Option<&str>) {
        if let Some(record) = self.inner.lock().tasks.get_mut(task_id) {
            record.current_step = step.map(str::to_string);
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.lock().tasks.get(task_id).cloned()
    }

    pub fn state(&self, task_id: &str) -> Option<LifecycleState> {
        self.inner.lock().tasks.get(task_id).map(|r| r.state)
    }

    pub fn active_task(&self) -> Option<String> {
        self.inner.lock().active.clone()
    }

    /// Ids still waiting in the queue, in order
    pub fn pending(&self) -> Vec<String> {
        self.inner.lock().queue.iter().cloned().collect()
    }

    /// Whether the gate is closed for the active task
    pub fn is_paused(&self) -> bool {
        !*self.gate.borrow()
    }

    /// Block until the gate opens
    pub async fn wait_if_paused(&self) {
        let mut rx = self.gate.subscribe();
        // the sender lives as long as `self`, so the channel cannot close here
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Apply an operator command
    pub fn handle_control(&self, task_id: &str, command: ControlCommand) -> bool {
        match command {
            ControlCommand::Pause => self.pause(task_id),
            ControlCommand::Resume => self.resume(task_id),
            ControlCommand::Stop => self.stop(task_id),
        }
    }
}

/// A running task's handle on its controller
#[derive(Clone)]
pub struct RunControl {
    controller: Arc<TaskLifecycleController>,
    task_id: String,
    poll_interval: Duration,
    /// Receives a `paused` event each time a suspension point blocks
    events: Option<Arc<dyn EventSink>>,
}

impl RunControl {
    pub fn new(controller: Arc<TaskLifecycleController>, task_id: impl Into<String>) -> Self {
        Self {
            controller,
            task_id: task_id.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Whether the task has left the running states
    pub fn is_interrupted(&self) -> bool {
        !matches!(
            self.controller.state(&self.task_id),
            Some(LifecycleState::Running) | Some(LifecycleState::Paused)
        )
    }

    /// Proceed if running, wait while paused, bail out otherwise
    pub async fn suspension_point(&self) -> Result<(), Interrupted> {
        let mut announced = false;
        loop {
            match self.controller.state(&self.task_id) {
                Some(LifecycleState::Running) => return Ok(()),
                Some(LifecycleState::Paused) => {
                    if !announced {
                        announced = true;
                        if let Some(events) = &self.events {
                            events
                                .publish(TaskEvent::new(self.task_id.clone(), StatusMarker::Paused, None))
                                .await;
                        }
                    }
                    if self.controller.active_task().as_deref() == Some(self.task_id.as_str()) {
                        debug!(task_id = %self.task_id, "Waiting for resume");
                        self.controller.wait_if_paused().await;
                    } else {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
                _ => return Err(Interrupted),
            }
        }
    }
}

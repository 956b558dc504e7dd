use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running,
    Suspended,
}

/// Owns the repeating timer task and validates state transitions.
///
/// Leaving the `Running` state aborts the timer task only; requests already
/// issued by a tick run in their own tasks and still complete.
#[derive(Debug)]
pub struct Timer {
    state: TimerState,
    task: Option<JoinHandle<()>>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            state: TimerState::Stopped,
            task: None,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Stopped/Suspended -> Running. Returns false when already running.
    pub fn start(&mut self, spawn: impl FnOnce() -> JoinHandle<()>) -> bool {
        if self.state == TimerState::Running {
            return false;
        }
        self.abort();
        self.task = Some(spawn());
        self.state = TimerState::Running;
        true
    }

    /// Any -> Stopped.
    pub fn stop(&mut self) {
        self.abort();
        self.state = TimerState::Stopped;
    }

    /// Running -> Suspended. A no-op from any other state.
    pub fn suspend(&mut self) -> bool {
        if self.state != TimerState::Running {
            return false;
        }
        self.abort();
        self.state = TimerState::Suspended;
        true
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.abort();
    }
}

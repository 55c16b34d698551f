use std::collections::VecDeque;

use crate::consts::CONSOLE_LOG_CAPACITY;

/// Bounded console-style log of the messages a stack surfaced to the user.
/// The oldest lines are dropped once the capacity is reached.
#[derive(Clone, Debug)]
pub struct ConsoleLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::with_capacity(CONSOLE_LOG_CAPACITY)
    }
}

impl ConsoleLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

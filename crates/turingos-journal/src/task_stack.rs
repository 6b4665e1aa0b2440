//! Per-process task stack driven by mind ops.
//!
//! The stack is the process's private work queue: `SYS_PUSH` adds a task on
//! top, `SYS_EDIT` rewrites the top task, `SYS_POP` removes it and `SYS_MOVE`
//! reorders a task or changes its status.  Ids are allocated `t1`, `t2`, …
//! and never reused within one stack.
//!
//! [`TaskStack::apply`] is all-or-nothing: a batch of mind ops runs against a
//! copy, and the copy replaces the original only if every op succeeded.
//!
//! # Example
//!
//! ```
//! use turingos_journal::task_stack::TaskStack;
//! use turingos_types::{Syscall, TargetPos};
//!
//! let mut stack = TaskStack::new();
//! stack.apply(&[
//!     Syscall::Push { task: "collect sources".into() },
//!     Syscall::Push { task: "summarize".into() },
//!     Syscall::Move { task_id: Some("t2".into()), target_pos: Some(TargetPos::Bottom), status: None },
//! ]).unwrap();
//! assert_eq!(stack.top().unwrap().text, "collect sources");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use turingos_types::{Syscall, TargetPos, TaskStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskStackError {
    #[error("task stack is empty")]
    Empty,
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("SYS_MOVE needs target_pos or status")]
    NothingToMove,
    #[error("{0} is not a task stack instruction")]
    NotAStackOp(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    pub status: TaskStatus,
}

/// Index 0 is the bottom; the last element is the top.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStack {
    tasks: Vec<Task>,
    next_id: u32,
}

impl TaskStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn top(&self) -> Option<&Task> {
        self.tasks.last()
    }

    /// Tasks from top to bottom.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().rev()
    }

    pub fn push(&mut self, text: &str) -> String {
        self.next_id += 1;
        let id = format!("t{}", self.next_id);
        self.tasks.push(Task {
            id: id.clone(),
            text: text.to_string(),
            status: TaskStatus::Active,
        });
        id
    }

    pub fn pop(&mut self) -> Result<Task, TaskStackError> {
        self.tasks.pop().ok_or(TaskStackError::Empty)
    }

    pub fn edit(&mut self, text: &str) -> Result<(), TaskStackError> {
        let top = self.tasks.last_mut().ok_or(TaskStackError::Empty)?;
        top.text = text.to_string();
        Ok(())
    }

    /// `task_id` defaults to the top task.
    pub fn move_task(
        &mut self,
        task_id: Option<&str>,
        target_pos: Option<TargetPos>,
        status: Option<TaskStatus>,
    ) -> Result<(), TaskStackError> {
        if target_pos.is_none() && status.is_none() {
            return Err(TaskStackError::NothingToMove);
        }
        let index = match task_id {
            Some(id) => self
                .tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| TaskStackError::NotFound(id.to_string()))?,
            None => self.tasks.len().checked_sub(1).ok_or(TaskStackError::Empty)?,
        };
        let mut task = self.tasks.remove(index);
        if let Some(status) = status {
            task.status = status;
        }
        match target_pos {
            Some(TargetPos::Top) => self.tasks.push(task),
            Some(TargetPos::Bottom) => self.tasks.insert(0, task),
            None => self.tasks.insert(index, task),
        }
        Ok(())
    }

    /// Apply a batch of stack ops atomically.  `SYS_MAP_REDUCE` is skipped
    /// here; the scheduler handles it.  Returns one note per applied op.
    pub fn apply(&mut self, ops: &[Syscall]) -> Result<Vec<String>, TaskStackError> {
        let mut staged = self.clone();
        let mut notes = Vec::with_capacity(ops.len());
        for op in ops {
            let note = match op {
                Syscall::Push { task } => format!("pushed {}", staged.push(task)),
                Syscall::Edit { task } => {
                    staged.edit(task)?;
                    "edited top".to_string()
                }
                Syscall::Pop => format!("popped {}", staged.pop()?.id),
                Syscall::Move {
                    task_id,
                    target_pos,
                    status,
                } => {
                    staged.move_task(task_id.as_deref(), *target_pos, *status)?;
                    format!("moved {}", task_id.as_deref().unwrap_or("top"))
                }
                Syscall::MapReduce { .. } => continue,
                other => return Err(TaskStackError::NotAStackOp(other.opcode().to_string())),
            };
            notes.push(note);
        }
        *self = staged;
        Ok(notes)
    }

    /// One-line summary attached to every observation.
    pub fn render(&self) -> String {
        match self.top() {
            Some(top) => format!(
                "[TASK_STACK] depth={} top={}:{}:{}",
                self.len(),
                top.id,
                top.status.as_str(),
                top.text
            ),
            None => "[TASK_STACK] depth=0 top=(empty)".to_string(),
        }
    }
}

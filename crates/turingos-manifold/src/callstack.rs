//! The `sys://callstack` virtual register.
//!
//! Written with one command per interference: `PUSH: <frame>`, `EDIT: <frame>`
//! (replace the top) or `POP`.  Observed as `[CALL_STACK_TOP] <frame>`.

use crate::error::ManifoldError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<String>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }

    pub fn apply(&mut self, command: &str) -> Result<(), ManifoldError> {
        let command = command.trim();
        let (verb, arg) = match command.split_once(':') {
            Some((verb, arg)) => (verb.trim().to_ascii_uppercase(), arg.trim()),
            None => (command.to_ascii_uppercase(), ""),
        };
        match verb.as_str() {
            "PUSH" if !arg.is_empty() => {
                self.frames.push(arg.to_string());
                Ok(())
            }
            "EDIT" if !arg.is_empty() => match self.frames.last_mut() {
                Some(top) => {
                    *top = arg.to_string();
                    Ok(())
                }
                None => Err(ManifoldError::CallStack("EDIT on empty stack".into())),
            },
            "POP" => self
                .frames
                .pop()
                .map(|_| ())
                .ok_or_else(|| ManifoldError::CallStack("POP on empty stack".into())),
            "PUSH" | "EDIT" => Err(ManifoldError::CallStack(format!("{verb} needs a frame"))),
            _ => Err(ManifoldError::CallStack(format!(
                "unsupported command `{command}` (expected PUSH: x, EDIT: x or POP)"
            ))),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[CALL_STACK_TOP] {}\n[CALL_STACK_DEPTH] {}",
            self.top().unwrap_or("(empty)"),
            self.depth()
        )
    }
}

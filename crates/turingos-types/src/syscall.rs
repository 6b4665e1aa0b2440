//! The closed TuringOS instruction set.
//!
//! A [`Syscall`] is the only thing an oracle is allowed to ask the runtime to
//! do.  Raw oracle output never becomes a `Syscall` directly; it must first
//! pass the ABI normalizer in `turingos-kernel`, which guarantees that every
//! instance carries exactly the fields of its [`Opcode`].

use serde::{Deserialize, Serialize};

/// Whether an opcode touches the scheduling layer or the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpClass {
    /// Task-queue / scheduling instructions. Any number may run per tick.
    Mind,
    /// Manifold-mutating, navigating or control instructions. At most one per tick.
    World,
}

/// Canonical opcode names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    #[serde(rename = "SYS_WRITE")]
    Write,
    #[serde(rename = "SYS_GOTO")]
    Goto,
    #[serde(rename = "SYS_EXEC")]
    Exec,
    #[serde(rename = "SYS_GIT_LOG")]
    GitLog,
    #[serde(rename = "SYS_PUSH")]
    Push,
    #[serde(rename = "SYS_EDIT")]
    Edit,
    #[serde(rename = "SYS_MOVE")]
    Move,
    #[serde(rename = "SYS_POP")]
    Pop,
    #[serde(rename = "SYS_HALT")]
    Halt,
    /// Scheduler-only queue directive.
    #[serde(rename = "SYS_MAP_REDUCE")]
    MapReduce,
}

impl Opcode {
    pub const ALL: [Opcode; 10] = [
        Opcode::Write,
        Opcode::Goto,
        Opcode::Exec,
        Opcode::GitLog,
        Opcode::Push,
        Opcode::Edit,
        Opcode::Move,
        Opcode::Pop,
        Opcode::Halt,
        Opcode::MapReduce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Write => "SYS_WRITE",
            Opcode::Goto => "SYS_GOTO",
            Opcode::Exec => "SYS_EXEC",
            Opcode::GitLog => "SYS_GIT_LOG",
            Opcode::Push => "SYS_PUSH",
            Opcode::Edit => "SYS_EDIT",
            Opcode::Move => "SYS_MOVE",
            Opcode::Pop => "SYS_POP",
            Opcode::Halt => "SYS_HALT",
            Opcode::MapReduce => "SYS_MAP_REDUCE",
        }
    }

    /// Look up a canonical opcode name.  Aliases are resolved by the ABI, not
    /// here.
    pub fn from_canonical(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    pub fn class(&self) -> OpClass {
        match self {
            Opcode::Push | Opcode::Edit | Opcode::Move | Opcode::Pop | Opcode::MapReduce => {
                OpClass::Mind
            }
            Opcode::Write | Opcode::Goto | Opcode::Exec | Opcode::GitLog | Opcode::Halt => {
                OpClass::World
            }
        }
    }

    /// The complete set of fields (besides `op`) an instance may carry.
    pub fn canonical_fields(&self) -> &'static [&'static str] {
        match self {
            Opcode::Write => &["payload", "semantic_cap"],
            Opcode::Goto => &["pointer"],
            Opcode::Exec => &["cmd"],
            Opcode::GitLog => &["path", "limit", "ref", "grep", "since", "query_params"],
            Opcode::Push | Opcode::Edit => &["task"],
            Opcode::Move => &["task_id", "target_pos", "status"],
            Opcode::Pop | Opcode::Halt => &[],
            Opcode::MapReduce => &["tasks"],
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination of a `SYS_MOVE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetPos {
    Top,
    Bottom,
}

/// Status a task on the mind stack can be moved into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Active,
    Suspended,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "ACTIVE",
            TaskStatus::Suspended => "SUSPENDED",
            TaskStatus::Blocked => "BLOCKED",
        }
    }
}

/// Optional filters of a `SYS_GIT_LOG`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLogQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grep: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    /// Raw `k=v&k=v` string merged into the pointer query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<String>,
}

impl GitLogQuery {
    /// Render the `sys://git/log?…` pointer addressing this query.  Values
    /// are percent-encoded; `query_params` is appended as given.
    pub fn to_pointer(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        let pairs = [
            ("path", &self.path),
            ("ref", &self.git_ref),
            ("grep", &self.grep),
            ("since", &self.since),
        ];
        for (key, value) in pairs {
            if let Some(v) = value {
                parts.push(format!("{key}={}", urlencoding::encode(v)));
            }
        }
        if let Some(extra) = &self.query_params {
            let extra = extra.trim().trim_start_matches('?');
            if !extra.is_empty() {
                parts.push(extra.to_string());
            }
        }
        if parts.is_empty() {
            "sys://git/log".to_string()
        } else {
            format!("sys://git/log?{}", parts.join("&"))
        }
    }
}

/// A validated instruction.
///
/// Serializes to the canonical wire shape, e.g.
/// `{"op":"SYS_GOTO","pointer":"notes.md"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Syscall {
    #[serde(rename = "SYS_WRITE")]
    Write {
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        semantic_cap: Option<String>,
    },
    #[serde(rename = "SYS_GOTO")]
    Goto { pointer: String },
    #[serde(rename = "SYS_EXEC")]
    Exec { cmd: String },
    #[serde(rename = "SYS_GIT_LOG")]
    GitLog(GitLogQuery),
    #[serde(rename = "SYS_PUSH")]
    Push { task: String },
    #[serde(rename = "SYS_EDIT")]
    Edit { task: String },
    #[serde(rename = "SYS_MOVE")]
    Move {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_pos: Option<TargetPos>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<TaskStatus>,
    },
    #[serde(rename = "SYS_POP")]
    Pop,
    #[serde(rename = "SYS_HALT")]
    Halt,
    #[serde(rename = "SYS_MAP_REDUCE")]
    MapReduce { tasks: Vec<String> },
}

impl Syscall {
    pub fn opcode(&self) -> Opcode {
        match self {
            Syscall::Write { .. } => Opcode::Write,
            Syscall::Goto { .. } => Opcode::Goto,
            Syscall::Exec { .. } => Opcode::Exec,
            Syscall::GitLog(_) => Opcode::GitLog,
            Syscall::Push { .. } => Opcode::Push,
            Syscall::Edit { .. } => Opcode::Edit,
            Syscall::Move { .. } => Opcode::Move,
            Syscall::Pop => Opcode::Pop,
            Syscall::Halt => Opcode::Halt,
            Syscall::MapReduce { .. } => Opcode::MapReduce,
        }
    }

    pub fn class(&self) -> OpClass {
        self.opcode().class()
    }

    /// Canonical JSON form.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

//! Syscall ABI – strict, fail-closed normalization of raw oracle output.
//!
//! [`normalize`] turns an untrusted JSON value into a [`Syscall`] or an
//! [`AbiRejection`].  The pipeline is:
//!
//! 1. the root must be a JSON object;
//! 2. the opcode is read from `op`, `sys` or `syscall` and resolved through
//!    the opcode alias table;
//! 3. field aliases are rewritten onto canonical names;
//! 4. any field outside the opcode's canonical set is a `MUTEX_VIOLATION`;
//! 5. field types, non-emptiness and enumerations are checked.
//!
//! Nothing is partially accepted: one bad field rejects the whole syscall.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use turingos_kernel::abi::{normalize, RejectCode};
//! use turingos_types::Syscall;
//!
//! let call = normalize(&json!({ "sys": "SYS_GOTO", "d_next": "notes.md" })).unwrap();
//! assert_eq!(call, Syscall::Goto { pointer: "notes.md".into() });
//!
//! let smuggled = normalize(&json!({ "op": "SYS_GOTO", "pointer": "a", "cmd": "rm -rf /" }));
//! assert_eq!(smuggled.unwrap_err().code, RejectCode::MutexViolation);
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use turingos_types::{GitLogQuery, Opcode, Syscall, TargetPos, TaskStatus, Transition};

/// Keys that may carry the opcode, in lookup order.
const OP_KEYS: [&str; 3] = ["op", "sys", "syscall"];

const OPCODE_ALIASES: [(&str, Opcode); 5] = [
    ("SYS_STACK_EDIT", Opcode::Edit),
    ("SYS_STACK_MOVE", Opcode::Move),
    ("SYS_STACK_PUSH", Opcode::Push),
    ("SYS_STACK_POP", Opcode::Pop),
    ("SYS_GITLOG", Opcode::GitLog),
];

const FIELD_ALIASES: [(&str, &str); 5] = [
    ("content", "payload"),
    ("command", "cmd"),
    ("d_next", "pointer"),
    ("query", "query_params"),
    ("stack_payload", "task"),
];

const MOVE_FIELD_ALIASES: [(&str, &str); 3] = [
    ("id", "task_id"),
    ("target", "target_pos"),
    ("state", "status"),
];

/// Which opcode set is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbiProfile {
    /// The nine base opcodes.
    #[default]
    Base,
    /// Base opcodes plus `SYS_MAP_REDUCE`.
    Scheduler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    InvalidRoot,
    MissingOp,
    InvalidOp,
    UnknownOp,
    MutexViolation,
    MissingField,
    InvalidField,
    EmptyField,
    InvalidEnum,
    InvalidLimit,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::InvalidRoot => "INVALID_ROOT",
            RejectCode::MissingOp => "MISSING_OP",
            RejectCode::InvalidOp => "INVALID_OP",
            RejectCode::UnknownOp => "UNKNOWN_OP",
            RejectCode::MutexViolation => "MUTEX_VIOLATION",
            RejectCode::MissingField => "MISSING_FIELD",
            RejectCode::InvalidField => "INVALID_FIELD",
            RejectCode::EmptyField => "EMPTY_FIELD",
            RejectCode::InvalidEnum => "INVALID_ENUM",
            RejectCode::InvalidLimit => "INVALID_LIMIT",
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a raw syscall was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {reason}")]
pub struct AbiRejection {
    pub code: RejectCode,
    pub reason: String,
}

impl AbiRejection {
    fn new(code: RejectCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Prefix the reason with the transition slot the syscall came from.
    fn in_slot(mut self, slot: &str) -> Self {
        self.reason = format!("{slot}: {}", self.reason);
        self
    }
}

/// Normalize against the base profile.
pub fn normalize(raw: &Value) -> Result<Syscall, AbiRejection> {
    normalize_with(raw, AbiProfile::Base)
}

/// Resolve an opcode name, including aliases.  Case and surrounding
/// whitespace are ignored.
pub fn resolve_opcode(name: &str) -> Option<Opcode> {
    let upper = name.trim().to_ascii_uppercase();
    Opcode::from_canonical(&upper).or_else(|| {
        OPCODE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == upper)
            .map(|(_, op)| *op)
    })
}

/// Best-effort opcode lookup on an unvalidated value, used for routing
/// statistics only.  Never use this to decide what to execute.
pub fn peek_opcode(raw: &Value) -> Option<Opcode> {
    let object = raw.as_object()?;
    OP_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .and_then(Value::as_str)
        .and_then(resolve_opcode)
}

pub fn normalize_with(raw: &Value, profile: AbiProfile) -> Result<Syscall, AbiRejection> {
    let mut fields: Map<String, Value> = match raw {
        Value::Object(map) => map.clone(),
        other => {
            return Err(AbiRejection::new(
                RejectCode::InvalidRoot,
                format!("syscall must be a JSON object, got {}", json_kind(other)),
            ));
        }
    };

    let op_value = OP_KEYS
        .iter()
        .find_map(|key| fields.remove(*key))
        .ok_or_else(|| AbiRejection::new(RejectCode::MissingOp, "missing `op` field"))?;
    let op_name = match &op_value {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::String(_) => {
            return Err(AbiRejection::new(RejectCode::InvalidOp, "`op` is blank"));
        }
        other => {
            return Err(AbiRejection::new(
                RejectCode::InvalidOp,
                format!("`op` must be a string, got {}", json_kind(other)),
            ));
        }
    };
    let opcode = resolve_opcode(&op_name)
        .ok_or_else(|| AbiRejection::new(RejectCode::UnknownOp, format!("unknown op `{op_name}`")))?;
    if opcode == Opcode::MapReduce && profile == AbiProfile::Base {
        return Err(AbiRejection::new(
            RejectCode::UnknownOp,
            "SYS_MAP_REDUCE is only accepted by the scheduler",
        ));
    }

    apply_field_aliases(&mut fields, opcode);

    let allowed = opcode.canonical_fields();
    let mut extra: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|key| !allowed.contains(key))
        .collect();
    if !extra.is_empty() {
        extra.sort_unstable();
        return Err(AbiRejection::new(
            RejectCode::MutexViolation,
            format!("{opcode} does not accept field(s): {}", extra.join(", ")),
        ));
    }

    build(opcode, &fields)
}

/// A transition whose syscall slots all passed the ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransition {
    pub thought: Option<String>,
    pub q_next: String,
    pub mind_ops: Vec<Syscall>,
    pub world_op: Option<Syscall>,
}

/// Normalize every syscall slot of a transition.
///
/// When neither `mind_ops` nor `world_op` is present the legacy `a_t` slot
/// is used: a mind opcode becomes the single mind op, anything else the
/// world op.  When the VLIW pair is present `a_t` is ignored.
pub fn decode_transition(
    transition: &Transition,
    profile: AbiProfile,
) -> Result<DecodedTransition, AbiRejection> {
    let q_next = transition.q_next.trim();
    if q_next.is_empty() {
        return Err(AbiRejection::new(RejectCode::EmptyField, "`q_next` is blank"));
    }

    let mut mind_ops = Vec::new();
    let mut world_op = None;

    if transition.is_vliw() {
        for (i, raw) in transition.mind_ops.iter().flatten().enumerate() {
            let call = normalize_with(raw, profile).map_err(|e| e.in_slot(&format!("mind_ops[{i}]")))?;
            mind_ops.push(call);
        }
        if let Some(raw) = &transition.world_op {
            if !raw.is_null() {
                world_op = Some(normalize_with(raw, profile).map_err(|e| e.in_slot("world_op"))?);
            }
        }
    } else if let Some(raw) = &transition.a_t {
        if !raw.is_null() {
            let call = normalize_with(raw, profile).map_err(|e| e.in_slot("a_t"))?;
            match call.class() {
                turingos_types::OpClass::Mind => mind_ops.push(call),
                turingos_types::OpClass::World => world_op = Some(call),
            }
        }
    }

    Ok(DecodedTransition {
        thought: transition.thought.clone(),
        q_next: q_next.to_string(),
        mind_ops,
        world_op,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn apply_field_aliases(fields: &mut Map<String, Value>, opcode: Opcode) {
    let allowed = opcode.canonical_fields();
    let move_aliases: &[(&str, &str)] = if opcode == Opcode::Move {
        &MOVE_FIELD_ALIASES
    } else {
        &[]
    };
    for (alias, canonical) in FIELD_ALIASES.iter().chain(move_aliases.iter()) {
        // An alias only resolves onto a field this opcode owns, and never
        // overwrites the canonical spelling; otherwise it stays put and is
        // reported as an extra field.
        if !allowed.contains(canonical) || fields.contains_key(*canonical) {
            continue;
        }
        if let Some(value) = fields.remove(*alias) {
            fields.insert((*canonical).to_string(), value);
        }
    }
}

fn build(opcode: Opcode, fields: &Map<String, Value>) -> Result<Syscall, AbiRejection> {
    let call = match opcode {
        Opcode::Write => Syscall::Write {
            payload: payload_str(fields)?,
            semantic_cap: opt_str(fields, "semantic_cap")?,
        },
        Opcode::Goto => Syscall::Goto {
            pointer: req_str(fields, "pointer")?,
        },
        Opcode::Exec => Syscall::Exec {
            cmd: req_str(fields, "cmd")?,
        },
        Opcode::GitLog => Syscall::GitLog(GitLogQuery {
            path: opt_str(fields, "path")?,
            limit: opt_limit(fields)?,
            git_ref: opt_str(fields, "ref")?,
            grep: opt_str(fields, "grep")?,
            since: opt_str(fields, "since")?,
            query_params: opt_str(fields, "query_params")?,
        }),
        Opcode::Push => Syscall::Push {
            task: req_str(fields, "task")?,
        },
        Opcode::Edit => Syscall::Edit {
            task: req_str(fields, "task")?,
        },
        Opcode::Move => Syscall::Move {
            task_id: opt_str(fields, "task_id")?,
            target_pos: opt_enum(fields, "target_pos", parse_target_pos)?,
            status: opt_enum(fields, "status", parse_status)?,
        },
        Opcode::Pop => Syscall::Pop,
        Opcode::Halt => Syscall::Halt,
        Opcode::MapReduce => Syscall::MapReduce {
            tasks: req_tasks(fields)?,
        },
    };
    Ok(call)
}

fn req_str(fields: &Map<String, Value>, key: &str) -> Result<String, AbiRejection> {
    match fields.get(key) {
        None | Some(Value::Null) => Err(AbiRejection::new(
            RejectCode::MissingField,
            format!("missing required field `{key}`"),
        )),
        Some(Value::String(s)) if s.trim().is_empty() => Err(AbiRejection::new(
            RejectCode::EmptyField,
            format!("`{key}` is blank"),
        )),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(AbiRejection::new(
            RejectCode::InvalidField,
            format!("`{key}` must be a string, got {}", json_kind(other)),
        )),
    }
}

/// `payload` must be a string but may legitimately be empty.
fn payload_str(fields: &Map<String, Value>) -> Result<String, AbiRejection> {
    match fields.get("payload") {
        None | Some(Value::Null) => Err(AbiRejection::new(
            RejectCode::MissingField,
            "missing required field `payload`",
        )),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(AbiRejection::new(
            RejectCode::InvalidField,
            format!("`payload` must be a string, got {}", json_kind(other)),
        )),
    }
}

/// Optional string: absent and `null` both mean "not given".
fn opt_str(fields: &Map<String, Value>, key: &str) -> Result<Option<String>, AbiRejection> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => req_str(fields, key).map(Some),
    }
}

fn opt_limit(fields: &Map<String, Value>) -> Result<Option<u32>, AbiRejection> {
    let invalid = |shown: &dyn std::fmt::Display| {
        AbiRejection::new(
            RejectCode::InvalidLimit,
            format!("`limit` must be a positive integer, got {shown}"),
        )
    };
    match fields.get("limit") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|v| *v > 0)
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| invalid(n)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .map(Some)
            .ok_or_else(|| invalid(&format!("\"{s}\""))),
        Some(other) => Err(invalid(&json_kind(other))),
    }
}

fn opt_enum<T>(
    fields: &Map<String, Value>,
    key: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, AbiRejection> {
    match opt_str(fields, key)? {
        None => Ok(None),
        Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
            AbiRejection::new(
                RejectCode::InvalidEnum,
                format!("`{key}` has unsupported value `{raw}`"),
            )
        }),
    }
}

fn parse_target_pos(raw: &str) -> Option<TargetPos> {
    match raw.to_ascii_uppercase().as_str() {
        "TOP" => Some(TargetPos::Top),
        "BOTTOM" => Some(TargetPos::Bottom),
        _ => None,
    }
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw.to_ascii_uppercase().as_str() {
        "ACTIVE" => Some(TaskStatus::Active),
        "SUSPENDED" => Some(TaskStatus::Suspended),
        "BLOCKED" => Some(TaskStatus::Blocked),
        _ => None,
    }
}

fn req_tasks(fields: &Map<String, Value>) -> Result<Vec<String>, AbiRejection> {
    let items = match fields.get("tasks") {
        None | Some(Value::Null) => {
            return Err(AbiRejection::new(
                RejectCode::MissingField,
                "missing required field `tasks`",
            ));
        }
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(AbiRejection::new(
                RejectCode::InvalidField,
                format!("`tasks` must be an array, got {}", json_kind(other)),
            ));
        }
    };
    if items.is_empty() {
        return Err(AbiRejection::new(RejectCode::EmptyField, "`tasks` is empty"));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::String(_) => Err(AbiRejection::new(
                RejectCode::EmptyField,
                format!("`tasks[{i}]` is blank"),
            )),
            other => Err(AbiRejection::new(
                RejectCode::InvalidField,
                format!("`tasks[{i}]` must be a string, got {}", json_kind(other)),
            )),
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code(raw: Value) -> RejectCode {
        normalize(&raw).unwrap_err().code
    }

    // ------------------------------------------------------------------ roots

    #[test]
    fn non_object_roots_are_rejected() {
        for raw in [json!(null), json!([]), json!(3), json!("SYS_HALT"), json!(true)] {
            assert_eq!(code(raw), RejectCode::InvalidRoot);
        }
    }

    #[test]
    fn op_presence_and_type() {
        assert_eq!(code(json!({ "pointer": "a" })), RejectCode::MissingOp);
        assert_eq!(code(json!({ "op": "   " })), RejectCode::InvalidOp);
        assert_eq!(code(json!({ "op": 7 })), RejectCode::InvalidOp);
        assert_eq!(code(json!({ "op": "SYS_TELEPORT" })), RejectCode::UnknownOp);
    }

    #[test]
    fn op_key_aliases() {
        assert_eq!(normalize(&json!({ "sys": "SYS_HALT" })).unwrap(), Syscall::Halt);
        assert_eq!(normalize(&json!({ "syscall": "sys_pop" })).unwrap(), Syscall::Pop);
        // A second op key is an extra field.
        assert_eq!(
            code(json!({ "op": "SYS_HALT", "sys": "SYS_HALT" })),
            RejectCode::MutexViolation
        );
    }

    // ------------------------------------------------------------------ aliases

    #[test]
    fn field_aliases_resolve() {
        assert_eq!(
            normalize(&json!({ "op": "SYS_WRITE", "content": "hi" })).unwrap(),
            Syscall::Write {
                payload: "hi".into(),
                semantic_cap: None
            }
        );
        assert_eq!(
            normalize(&json!({ "op": "SYS_EXEC", "command": "ls" })).unwrap(),
            Syscall::Exec { cmd: "ls".into() }
        );
        assert_eq!(
            normalize(&json!({ "op": "SYS_PUSH", "stack_payload": "plan" })).unwrap(),
            Syscall::Push { task: "plan".into() }
        );
        let git = normalize(&json!({ "op": "SYS_GITLOG", "query": "author=amy" })).unwrap();
        assert_eq!(
            git,
            Syscall::GitLog(GitLogQuery {
                query_params: Some("author=amy".into()),
                ..GitLogQuery::default()
            })
        );
    }

    #[test]
    fn stack_opcode_aliases() {
        let mv = normalize(&json!({
            "op": "SYS_STACK_MOVE", "id": "t2", "target": "bottom", "state": "suspended"
        }))
        .unwrap();
        assert_eq!(
            mv,
            Syscall::Move {
                task_id: Some("t2".into()),
                target_pos: Some(TargetPos::Bottom),
                status: Some(TaskStatus::Suspended),
            }
        );
        assert_eq!(
            normalize(&json!({ "op": "SYS_STACK_EDIT", "task": "x" })).unwrap(),
            Syscall::Edit { task: "x".into() }
        );
    }

    #[test]
    fn move_aliases_do_not_apply_to_other_opcodes() {
        assert_eq!(
            code(json!({ "op": "SYS_PUSH", "task": "a", "id": "t1" })),
            RejectCode::MutexViolation
        );
    }

    #[test]
    fn alias_alongside_canonical_is_extra() {
        assert_eq!(
            code(json!({ "op": "SYS_WRITE", "payload": "a", "content": "b" })),
            RejectCode::MutexViolation
        );
    }

    // ------------------------------------------------------------------ mutex

    #[test]
    fn one_extra_field_rejects_every_opcode() {
        let valid = [
            json!({ "op": "SYS_WRITE", "payload": "x" }),
            json!({ "op": "SYS_GOTO", "pointer": "a" }),
            json!({ "op": "SYS_EXEC", "cmd": "ls" }),
            json!({ "op": "SYS_GIT_LOG" }),
            json!({ "op": "SYS_PUSH", "task": "t" }),
            json!({ "op": "SYS_EDIT", "task": "t" }),
            json!({ "op": "SYS_MOVE" }),
            json!({ "op": "SYS_POP" }),
            json!({ "op": "SYS_HALT" }),
        ];
        for raw in valid {
            assert!(normalize(&raw).is_ok(), "{raw} should be valid");
            let mut smuggled = raw.clone();
            smuggled["smuggled"] = json!("x");
            assert_eq!(code(smuggled), RejectCode::MutexViolation);
        }
    }

    #[test]
    fn cross_opcode_fields_are_rejected() {
        assert_eq!(
            code(json!({ "op": "SYS_GOTO", "pointer": "a", "payload": "x" })),
            RejectCode::MutexViolation
        );
        // `content` cannot alias onto a field SYS_EXEC does not own.
        assert_eq!(
            code(json!({ "op": "SYS_EXEC", "cmd": "ls", "content": "x" })),
            RejectCode::MutexViolation
        );
    }

    #[test]
    fn normalized_output_has_exact_canonical_fields() {
        let call = normalize(&json!({ "op": "SYS_GOTO", "d_next": "a.txt" })).unwrap();
        let value = call.to_value();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(value.get("op").is_some() && value.get("pointer").is_some());
    }

    // ------------------------------------------------------------------ field checks

    #[test]
    fn required_fields() {
        assert_eq!(code(json!({ "op": "SYS_GOTO" })), RejectCode::MissingField);
        assert_eq!(code(json!({ "op": "SYS_GOTO", "pointer": " " })), RejectCode::EmptyField);
        assert_eq!(code(json!({ "op": "SYS_EXEC", "cmd": ["ls"] })), RejectCode::InvalidField);
        assert_eq!(code(json!({ "op": "SYS_WRITE", "payload": 4 })), RejectCode::InvalidField);
    }

    #[test]
    fn empty_payload_is_allowed() {
        assert!(normalize(&json!({ "op": "SYS_WRITE", "payload": "" })).is_ok());
    }

    #[test]
    fn enumerations() {
        assert_eq!(
            code(json!({ "op": "SYS_MOVE", "target_pos": "MIDDLE" })),
            RejectCode::InvalidEnum
        );
        assert_eq!(
            code(json!({ "op": "SYS_MOVE", "status": "DONE" })),
            RejectCode::InvalidEnum
        );
    }

    #[test]
    fn limit_must_be_positive_integer() {
        let ok = normalize(&json!({ "op": "SYS_GIT_LOG", "limit": "7" })).unwrap();
        assert!(matches!(ok, Syscall::GitLog(GitLogQuery { limit: Some(7), .. })));
        for bad in [json!(0), json!(-3), json!(2.5), json!("ten"), json!("0"), json!(true)] {
            assert_eq!(
                code(json!({ "op": "SYS_GIT_LOG", "limit": bad })),
                RejectCode::InvalidLimit
            );
        }
    }

    #[test]
    fn null_optional_fields_count_as_absent() {
        let call = normalize(&json!({ "op": "SYS_WRITE", "payload": "x", "semantic_cap": null }))
            .unwrap();
        assert_eq!(
            call,
            Syscall::Write {
                payload: "x".into(),
                semantic_cap: None
            }
        );
    }

    // ------------------------------------------------------------------ profiles

    #[test]
    fn map_reduce_needs_scheduler_profile() {
        let raw = json!({ "op": "SYS_MAP_REDUCE", "tasks": ["a", "b"] });
        assert_eq!(normalize(&raw).unwrap_err().code, RejectCode::UnknownOp);
        assert_eq!(
            normalize_with(&raw, AbiProfile::Scheduler).unwrap(),
            Syscall::MapReduce {
                tasks: vec!["a".into(), "b".into()]
            }
        );
        let empty = json!({ "op": "SYS_MAP_REDUCE", "tasks": [] });
        assert_eq!(
            normalize_with(&empty, AbiProfile::Scheduler).unwrap_err().code,
            RejectCode::EmptyField
        );
    }

    // ------------------------------------------------------------------ transitions

    #[test]
    fn legacy_slot_is_routed_by_class() {
        let t = Transition {
            q_next: "s1".into(),
            a_t: Some(json!({ "op": "SYS_PUSH", "task": "later" })),
            ..Transition::default()
        };
        let d = decode_transition(&t, AbiProfile::Base).unwrap();
        assert_eq!(d.mind_ops.len(), 1);
        assert!(d.world_op.is_none());

        let t = Transition {
            q_next: "s1".into(),
            a_t: Some(json!({ "op": "SYS_GOTO", "pointer": "a" })),
            ..Transition::default()
        };
        let d = decode_transition(&t, AbiProfile::Base).unwrap();
        assert!(d.mind_ops.is_empty());
        assert_eq!(d.world_op, Some(Syscall::Goto { pointer: "a".into() }));
    }

    #[test]
    fn vliw_ignores_legacy_slot() {
        let t = Transition {
            q_next: "s1".into(),
            a_t: Some(json!({ "op": "SYS_EXEC", "cmd": "ls" })),
            mind_ops: Some(vec![json!({ "op": "SYS_POP" })]),
            world_op: Some(json!({ "op": "SYS_HALT" })),
            ..Transition::default()
        };
        let d = decode_transition(&t, AbiProfile::Base).unwrap();
        assert_eq!(d.mind_ops, vec![Syscall::Pop]);
        assert_eq!(d.world_op, Some(Syscall::Halt));
    }

    #[test]
    fn one_bad_slot_rejects_the_transition() {
        let t = Transition {
            q_next: "s1".into(),
            mind_ops: Some(vec![json!({ "op": "SYS_POP" }), json!({ "op": "SYS_PUSH" })]),
            world_op: Some(json!({ "op": "SYS_HALT" })),
            ..Transition::default()
        };
        let err = decode_transition(&t, AbiProfile::Base).unwrap_err();
        assert_eq!(err.code, RejectCode::MissingField);
        assert!(err.reason.starts_with("mind_ops[1]"));
    }

    #[test]
    fn blank_q_next_is_rejected() {
        let t = Transition {
            q_next: "  ".into(),
            ..Transition::default()
        };
        assert!(decode_transition(&t, AbiProfile::Base).is_err());
    }

    #[test]
    fn peek_opcode_is_alias_aware() {
        assert_eq!(peek_opcode(&json!({ "sys": "sys_gitlog" })), Some(Opcode::GitLog));
        assert_eq!(peek_opcode(&json!([1])), None);
    }
}

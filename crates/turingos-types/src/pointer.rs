//! Pointer grammar of the manifold.
//!
//! Parsing is pure and lives here so both the kernel gate (which rejects
//! nonsensical op/pointer combinations) and the manifold (which resolves
//! pointers) agree on what a pointer means.
//!
//! Forms are matched longest-first:
//!
//! | Form | Variant |
//! |---|---|
//! | `$ <cmd>` | [`Pointer::Exec`] |
//! | `sys://page/<token>?p=<n>` | [`Pointer::Page`] |
//! | `sys://cap/issue/<path>?access=r\|rw` | [`Pointer::CapIssue`] |
//! | `vfd://<id>` | [`Pointer::Handle`] |
//! | `sys://callstack` | [`Pointer::CallStack`] |
//! | `sys://git/log?…` | [`Pointer::GitLog`] |
//! | `sys://trap/<kind>` | [`Pointer::Trap`] |
//! | relative path | [`Pointer::Path`] |

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PAGE_PREFIX: &str = "sys://page/";
pub const CAP_ISSUE_PREFIX: &str = "sys://cap/issue/";
pub const HANDLE_PREFIX: &str = "vfd://";
pub const CALLSTACK_POINTER: &str = "sys://callstack";
pub const GIT_LOG_PREFIX: &str = "sys://git/log";

/// Keys accepted in a `sys://git/log` query.
pub const GIT_LOG_KEYS: &[&str] = &["limit", "path", "ref", "grep", "since", "until", "author"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    #[error("empty pointer")]
    Empty,
    #[error("empty command in exec pointer")]
    EmptyCommand,
    #[error("malformed page pointer: {0}")]
    BadPage(String),
    #[error("malformed capability pointer: {0}")]
    BadCapability(String),
    #[error("unsupported git log parameter `{0}`")]
    BadGitParam(String),
    #[error("path escapes the workspace: {0}")]
    PathEscape(String),
    #[error("unknown pointer scheme: {0}")]
    UnknownScheme(String),
}

/// Access mode recorded on a capability handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    R,
    Rw,
}

impl Access {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "r" => Some(Access::R),
            "rw" => Some(Access::Rw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Access::R => "r",
            Access::Rw => "rw",
        }
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Access::Rw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    Exec(String),
    Page { token: String, page: u32 },
    CapIssue { path: String, access: Access },
    Handle(String),
    CallStack,
    GitLog(Vec<(String, String)>),
    Trap(String),
    Path(String),
}

impl Pointer {
    pub fn parse(raw: &str) -> Result<Pointer, PointerError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PointerError::Empty);
        }
        if let Some(cmd) = raw.strip_prefix('$') {
            let cmd = cmd.trim();
            if cmd.is_empty() {
                return Err(PointerError::EmptyCommand);
            }
            return Ok(Pointer::Exec(cmd.to_string()));
        }
        if let Some(rest) = raw.strip_prefix(PAGE_PREFIX) {
            return parse_page(rest);
        }
        if let Some(rest) = raw.strip_prefix(CAP_ISSUE_PREFIX) {
            return parse_cap_issue(rest);
        }
        if raw.starts_with(HANDLE_PREFIX) {
            if raw.len() == HANDLE_PREFIX.len() {
                return Err(PointerError::BadCapability(raw.to_string()));
            }
            return Ok(Pointer::Handle(raw.to_string()));
        }
        if raw.trim_end_matches('/') == CALLSTACK_POINTER {
            return Ok(Pointer::CallStack);
        }
        if let Some(rest) = raw.strip_prefix(GIT_LOG_PREFIX) {
            return parse_git_log(rest);
        }
        if let Some(kind) = raw.strip_prefix(crate::TRAP_PREFIX) {
            return Ok(Pointer::Trap(kind.to_string()));
        }
        if raw.contains("://") {
            return Err(PointerError::UnknownScheme(raw.to_string()));
        }
        validate_relative_path(raw)?;
        Ok(Pointer::Path(raw.to_string()))
    }

    /// `true` for pointers a `SYS_WRITE` may target.
    pub fn is_writable(&self) -> bool {
        matches!(self, Pointer::Path(_) | Pointer::Handle(_) | Pointer::CallStack)
    }
}

/// Split `a=1&b=2` into pairs; bare keys get an empty value.  Values are
/// percent-decoded, and kept raw when they are not valid escapes.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), decode_value(v.trim())),
            None => (pair.trim().to_string(), String::new()),
        })
        .collect()
}

fn decode_value(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn parse_page(rest: &str) -> Result<Pointer, PointerError> {
    let (token, query) = rest.split_once('?').unwrap_or((rest, ""));
    let token = token.trim_end_matches('/');
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PointerError::BadPage(format!("bad token `{token}`")));
    }
    let mut page = 1;
    for (key, value) in parse_query(query) {
        if key == "p" {
            page = value
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| PointerError::BadPage(format!("bad page number `{value}`")))?;
        }
    }
    Ok(Pointer::Page {
        token: token.to_ascii_lowercase(),
        page,
    })
}

fn parse_cap_issue(rest: &str) -> Result<Pointer, PointerError> {
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    if path.trim().is_empty() {
        return Err(PointerError::BadCapability("missing target path".into()));
    }
    validate_relative_path(path)?;
    let mut access = Access::R;
    for (key, value) in parse_query(query) {
        if key == "access" {
            access = Access::parse(&value).ok_or_else(|| {
                PointerError::BadCapability(format!("access must be r or rw, got `{value}`"))
            })?;
        }
    }
    Ok(Pointer::CapIssue {
        path: path.trim().to_string(),
        access,
    })
}

fn parse_git_log(rest: &str) -> Result<Pointer, PointerError> {
    let query = match rest.strip_prefix('?') {
        Some(q) => q,
        None if rest.trim_end_matches('/').is_empty() => "",
        None => return Err(PointerError::UnknownScheme(format!("{GIT_LOG_PREFIX}{rest}"))),
    };
    let params = parse_query(query);
    for (key, _) in &params {
        if !GIT_LOG_KEYS.contains(&key.as_str()) {
            return Err(PointerError::BadGitParam(key.clone()));
        }
    }
    Ok(Pointer::GitLog(params))
}

fn validate_relative_path(path: &str) -> Result<(), PointerError> {
    let trimmed = path.trim();
    let escapes = trimmed.starts_with('/')
        || trimmed.starts_with('\\')
        || trimmed.contains(':')
        || trimmed.split(['/', '\\']).any(|segment| segment == "..");
    if escapes {
        return Err(PointerError::PathEscape(trimmed.to_string()));
    }
    Ok(())
}

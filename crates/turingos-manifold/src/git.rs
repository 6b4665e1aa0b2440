//! `sys://git/log` rendering.
//!
//! Query values are passed to `git` as discrete arguments, never through a
//! shell, so a `grep=` value cannot smuggle in a command.

use crate::error::ManifoldError;

pub const DEFAULT_LIMIT: u32 = 20;
/// Upper bound on `limit=`; larger values are clamped.
pub const MAX_LIMIT: u32 = 500;

const FORMAT: &str = "--pretty=format:%h%x09%ad%x09%an%x09%s";

/// Build the `git log` argument vector for validated query pairs.
pub fn log_args(params: &[(String, String)]) -> Result<Vec<String>, ManifoldError> {
    let mut limit = DEFAULT_LIMIT;
    let mut path = None;
    let mut git_ref = None;
    let mut filters = Vec::new();

    for (key, value) in params {
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "limit" => {
                limit = value
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ManifoldError::Git(format!("invalid limit `{value}`")))?
                    .min(MAX_LIMIT);
            }
            "path" => path = Some(value.clone()),
            "ref" => {
                if value.starts_with('-') {
                    return Err(ManifoldError::Git(format!("invalid ref `{value}`")));
                }
                git_ref = Some(value.clone());
            }
            "grep" | "since" | "until" | "author" => filters.push(format!("--{key}={value}")),
            other => return Err(ManifoldError::Git(format!("unsupported parameter `{other}`"))),
        }
    }

    let mut args = vec![
        "log".to_string(),
        "--no-color".to_string(),
        "--date=short".to_string(),
        FORMAT.to_string(),
        format!("-n{limit}"),
    ];
    args.extend(filters);
    if let Some(r) = git_ref {
        args.push(r);
    }
    if let Some(p) = path {
        args.push("--".to_string());
        args.push(p);
    }
    Ok(args)
}

/// Frame raw `git log` stdout as a `[GIT_LOG]` observation.
pub fn render_log(pointer: &str, stdout: &str) -> String {
    let rows: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut out = format!("[GIT_LOG] {pointer}\nRows={}", rows.len());
    for row in rows {
        out.push('\n');
        out.push_str(row);
    }
    out
}

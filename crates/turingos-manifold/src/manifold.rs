//! [`Manifold`] – the pointer-addressed tape a process observes and writes.
//!
//! Every read goes through [`Manifold::observe`] and every write through
//! [`Manifold::interfere`].  Both take a raw pointer string; parsing happens
//! here so callers never branch on pointer syntax themselves.
//!
//! # Example
//!
//! ```no_run
//! use turingos_manifold::{Manifold, ManifoldConfig};
//!
//! # async fn demo() -> Result<(), turingos_manifold::ManifoldError> {
//! let mut manifold = Manifold::open(ManifoldConfig::for_workspace("/tmp/ws"))?;
//! manifold.interfere("notes.md", "hello").await?;
//! assert_eq!(manifold.observe("notes.md").await?, "hello");
//! let listing = manifold.observe("$ ls").await?;
//! assert!(listing.starts_with("[EXEC] $ ls"));
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use turingos_kernel::halt_verifier::DEFAULT_LOCK_FILE;
use turingos_kernel::shell::{TIMEOUT_EXIT_CODE, run_program, run_shell};
use turingos_types::{Access, Pointer, TRAP_PREFIX};

use crate::callstack::CallStack;
use crate::capability::CapabilityStore;
use crate::chaos::{ChaosConfig, ChaosMonkey};
use crate::error::ManifoldError;
use crate::git;
use crate::paging::{DEFAULT_PAGE_TABLE_CAPACITY, PageTable};
use crate::workspace::Workspace;

/// Directory inside the workspace reserved for kernel state.
pub const KERNEL_DIR: &str = ".turingos";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifoldConfig {
    pub workspace: PathBuf,
    /// Observations longer than this are paginated.
    pub max_slice_chars: usize,
    pub page_size: usize,
    /// Paginated sources kept before the least recently used is dropped.
    pub page_table_capacity: usize,
    pub exec_timeout: Duration,
    /// Defaults to `<workspace>/.turingos/capabilities.json`.
    pub capability_store_path: Option<PathBuf>,
    /// Workspace-relative paths agents may never write.
    pub protected_paths: Vec<String>,
    pub chaos: ChaosConfig,
}

impl Default for ManifoldConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            max_slice_chars: 4000,
            page_size: 3000,
            page_table_capacity: DEFAULT_PAGE_TABLE_CAPACITY,
            exec_timeout: Duration::from_secs(30),
            capability_store_path: None,
            protected_paths: vec![DEFAULT_LOCK_FILE.to_string(), KERNEL_DIR.to_string()],
            chaos: ChaosConfig::default(),
        }
    }
}

impl ManifoldConfig {
    pub fn for_workspace(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Self::default()
        }
    }
}

pub struct Manifold {
    config: ManifoldConfig,
    workspace: Workspace,
    pages: PageTable,
    capabilities: CapabilityStore,
    callstack: CallStack,
    chaos: Option<ChaosMonkey>,
}

impl Manifold {
    pub fn open(config: ManifoldConfig) -> Result<Self, ManifoldError> {
        let workspace = Workspace::open(&config.workspace, config.protected_paths.clone())?;
        let store_path = config
            .capability_store_path
            .clone()
            .unwrap_or_else(|| workspace.root().join(KERNEL_DIR).join("capabilities.json"));
        let capabilities = CapabilityStore::open(store_path)?;
        let chaos = config
            .chaos
            .is_enabled()
            .then(|| ChaosMonkey::new(config.chaos.clone()));
        if chaos.is_some() {
            warn!(chaos = ?config.chaos, "fault injection enabled");
        }
        let pages = PageTable::with_capacity(config.page_table_capacity);
        Ok(Self {
            config,
            workspace,
            pages,
            capabilities,
            callstack: CallStack::new(),
            chaos,
        })
    }

    pub fn root(&self) -> &Path {
        self.workspace.root()
    }

    pub fn config(&self) -> &ManifoldConfig {
        &self.config
    }

    pub fn callstack(&self) -> &CallStack {
        &self.callstack
    }

    pub fn capabilities(&self) -> &CapabilityStore {
        &self.capabilities
    }

    // ────────────────────────────────────────────────────────────────────────
    // Reads
    // ────────────────────────────────────────────────────────────────────────

    /// Render the slice addressed by `pointer`, paginating oversized output.
    pub async fn observe(&mut self, pointer: &str) -> Result<String, ManifoldError> {
        let parsed = Pointer::parse(pointer)?;
        let rendered = match parsed {
            // Focus pages are already bounded and never re-paginated.
            Pointer::Page { token, page } => return self.pages.focus(&token, page),
            Pointer::Exec(cmd) => self.exec(&cmd).await,
            Pointer::CapIssue { path, access } => self.issue(&path, access)?,
            Pointer::Handle(handle) => {
                let target = self.capabilities.resolve(&handle)?.target.clone();
                self.workspace.read(&target)?
            }
            Pointer::CallStack => self.callstack.render(),
            Pointer::GitLog(params) => self.git_log(pointer.trim(), &params).await?,
            Pointer::Trap(kind) => format!(
                "[TRAP] {TRAP_PREFIX}{kind} is kernel-owned; details are in the trap feedback"
            ),
            Pointer::Path(path) => self.workspace.read(&path)?,
        };
        Ok(self.fit(pointer.trim(), rendered))
    }

    fn fit(&mut self, source: &str, rendered: String) -> String {
        if rendered.chars().count() <= self.config.max_slice_chars {
            return rendered;
        }
        debug!(source, chars = rendered.len(), "paginating observation");
        self.pages.paginate(source, &rendered, self.config.page_size)
    }

    async fn exec(&mut self, cmd: &str) -> String {
        let forced_timeout = self.chaos.as_mut().is_some_and(|c| c.roll_timeout());
        let mut frame = format!("[EXEC] $ {cmd}\n");
        if forced_timeout {
            warn!(cmd, "chaos: forced exec timeout");
            frame.push_str(&format!("[EXIT_CODE] {TIMEOUT_EXIT_CODE}\n[FATAL] PROCESS_TIMEOUT"));
            return frame;
        }

        let out = run_shell(cmd, self.workspace.root(), self.config.exec_timeout).await;
        frame.push_str(&format!("[EXIT_CODE] {}\n", out.exit_code));
        if out.timed_out {
            frame.push_str("[FATAL] PROCESS_TIMEOUT\n");
        }
        if let Some(err) = &out.spawn_error {
            frame.push_str(&format!("[ERROR] {err}\n"));
        }
        let mut stdout = out.stdout;
        if let Some(chaos) = self.chaos.as_mut() {
            if chaos.roll_flood() {
                warn!(cmd, "chaos: flooding exec output");
                stdout.push_str(&chaos.flood_noise());
            }
        }
        frame.push_str(&format!("[STDOUT]\n{}\n[STDERR]\n{}", stdout.trim_end(), out.stderr.trim_end()));
        frame
    }

    fn issue(&mut self, path: &str, access: Access) -> Result<String, ManifoldError> {
        let handle = self.capabilities.issue(path, access)?;
        Ok(format!(
            "[CAP_ISSUED] target={path} access={}\n[HANDLE] {handle}",
            access.as_str()
        ))
    }

    async fn git_log(
        &self,
        pointer: &str,
        params: &[(String, String)],
    ) -> Result<String, ManifoldError> {
        let args = git::log_args(params)?;
        let out = run_program("git", &args, self.workspace.root(), self.config.exec_timeout).await;
        if !out.success() {
            let reason = out
                .spawn_error
                .clone()
                .unwrap_or_else(|| format!("exit {}: {}", out.exit_code, out.stderr.trim()));
            return Err(ManifoldError::Git(reason));
        }
        Ok(git::render_log(pointer, &out.stdout))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Writes
    // ────────────────────────────────────────────────────────────────────────

    /// Write `payload` at `pointer`.
    pub async fn interfere(&mut self, pointer: &str, payload: &str) -> Result<(), ManifoldError> {
        match Pointer::parse(pointer)? {
            Pointer::Path(path) => {
                self.chaos_eacces(&path)?;
                self.workspace.write(&path, payload)
            }
            Pointer::Handle(handle) => {
                let target = self.capabilities.resolve_writable(&handle)?.target.clone();
                self.chaos_eacces(&handle)?;
                self.workspace.write(&target, payload)
            }
            Pointer::CallStack => self.callstack.apply(payload),
            _ => Err(ManifoldError::NotWritable(pointer.trim().to_string())),
        }
    }

    fn chaos_eacces(&mut self, pointer: &str) -> Result<(), ManifoldError> {
        if self.chaos.as_mut().is_some_and(|c| c.roll_eacces()) {
            warn!(pointer, "chaos: injected EACCES");
            return Err(ManifoldError::AccessDenied {
                pointer: pointer.to_string(),
                reason: "injected fault".into(),
            });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::paging::page_token;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Manifold {
        Manifold::open(ManifoldConfig::for_workspace(dir.path())).unwrap()
    }

    #[tokio::test]
    async fn file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut m = open(&dir);
        m.interfere("a/b.txt", "payload").await.unwrap();
        assert_eq!(m.observe("a/b.txt").await.unwrap(), "payload");
        assert!(m.observe("/etc/passwd").await.is_err());
        assert!(m.interfere("../x", "p").await.is_err());
    }

    #[tokio::test]
    async fn exec_frame() {
        let dir = TempDir::new().unwrap();
        let mut m = open(&dir);
        let out = m.observe("$ echo hi; echo err >&2; exit 4").await.unwrap();
        assert!(out.starts_with("[EXEC] $ echo hi"));
        assert!(out.contains("[EXIT_CODE] 4"));
        assert!(out.contains("[STDOUT]\nhi"));
        assert!(out.contains("[STDERR]\nerr"));
    }

    #[tokio::test]
    async fn exec_timeout_is_fatal_marker() {
        let dir = TempDir::new().unwrap();
        let mut config = ManifoldConfig::for_workspace(dir.path());
        config.exec_timeout = Duration::from_millis(100);
        let mut m = Manifold::open(config).unwrap();
        let out = m.observe("$ sleep 5").await.unwrap();
        assert!(out.contains("[EXIT_CODE] 124"));
        assert!(out.contains("[FATAL] PROCESS_TIMEOUT"));
    }

    #[tokio::test]
    async fn oversized_observation_is_paged_deterministically() {
        let dir = TempDir::new().unwrap();
        let mut config = ManifoldConfig::for_workspace(dir.path());
        config.max_slice_chars = 100;
        config.page_size = 40;
        let mut m = Manifold::open(config).unwrap();
        let body = "0123456789".repeat(25);
        m.interfere("big.txt", &body).await.unwrap();

        let first = m.observe("big.txt").await.unwrap();
        let second = m.observe("big.txt").await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("[PAGE_TABLE_SUMMARY]"));
        assert!(first.contains("TotalPages=7"));

        let token = page_token("big.txt", &body);
        let page = m.observe(&format!("sys://page/{token}?p=2")).await.unwrap();
        assert!(page.starts_with("[FOCUS_PAGE_CONTENT]"));
        assert!(page.contains("FocusPage=2"));
        // Page frames exceed the slice budget here but are not re-paginated.
        assert!(!page.contains("[PAGE_TABLE_SUMMARY]"));
    }

    #[tokio::test]
    async fn capability_handles_enforce_access() {
        let dir = TempDir::new().unwrap();
        let mut m = open(&dir);
        m.interfere("doc.md", "v1").await.unwrap();

        let issued = m.observe("sys://cap/issue/doc.md").await.unwrap();
        assert!(issued.starts_with("[CAP_ISSUED]"));
        let ro = issued
            .lines()
            .find_map(|l| l.strip_prefix("[HANDLE] "))
            .unwrap()
            .to_string();
        assert_eq!(m.observe(&ro).await.unwrap(), "v1");
        let err = m.interfere(&ro, "v2").await.unwrap_err();
        assert!(err.to_string().contains("EACCES"));

        let issued = m.observe("sys://cap/issue/doc.md?access=rw").await.unwrap();
        let rw = issued
            .lines()
            .find_map(|l| l.strip_prefix("[HANDLE] "))
            .unwrap()
            .to_string();
        m.interfere(&rw, "v2").await.unwrap();
        assert_eq!(m.observe("doc.md").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn callstack_register() {
        let dir = TempDir::new().unwrap();
        let mut m = open(&dir);
        m.interfere("sys://callstack", "PUSH: outline").await.unwrap();
        m.interfere("sys://callstack", "PUSH: draft").await.unwrap();
        m.interfere("sys://callstack", "POP").await.unwrap();
        let top = m.observe("sys://callstack").await.unwrap();
        assert!(top.starts_with("[CALL_STACK_TOP] outline"));
    }

    #[tokio::test]
    async fn kernel_owned_pointers() {
        let dir = TempDir::new().unwrap();
        let mut m = open(&dir);
        assert!(matches!(
            m.interfere("$ ls", "x").await,
            Err(ManifoldError::NotWritable(_))
        ));
        assert!(m.interfere(".halt-standard.lock.json", "{}").await.is_err());
        assert!(m.observe("sys://nope").await.is_err());
        let trap = m.observe("sys://trap/cpu_fault").await.unwrap();
        assert!(trap.starts_with("[TRAP]"));
    }

    #[tokio::test]
    async fn chaos_denies_writes() {
        let dir = TempDir::new().unwrap();
        let mut config = ManifoldConfig::for_workspace(dir.path());
        config.chaos = ChaosConfig {
            eacces_rate: 1.0,
            seed: Some(7),
            ..ChaosConfig::default()
        };
        let mut m = Manifold::open(config).unwrap();
        let err = m.interfere("a.txt", "x").await.unwrap_err();
        assert!(matches!(err, ManifoldError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn chaos_forces_timeouts_and_floods() {
        let dir = TempDir::new().unwrap();
        let mut config = ManifoldConfig::for_workspace(dir.path());
        config.chaos = ChaosConfig {
            timeout_rate: 1.0,
            seed: Some(7),
            ..ChaosConfig::default()
        };
        let mut m = Manifold::open(config).unwrap();
        assert!(m.observe("$ echo hi").await.unwrap().contains("PROCESS_TIMEOUT"));

        let mut config = ManifoldConfig::for_workspace(dir.path());
        config.chaos = ChaosConfig {
            flood_rate: 1.0,
            flood_chars: 10_000,
            seed: Some(7),
            ..ChaosConfig::default()
        };
        let mut m = Manifold::open(config).unwrap();
        assert!(m.observe("$ echo hi").await.unwrap().starts_with("[PAGE_TABLE_SUMMARY]"));
    }

    #[tokio::test]
    async fn git_log_in_a_repository() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let setup = "git init -q . && git config user.email t@example.com && git config user.name T \
                     && echo a > a.txt && git add a.txt && git commit -qm 'first commit' \
                     && echo b > b.txt && git add b.txt && git commit -qm 'fix: second'";
        let out = run_shell(setup, root, Duration::from_secs(20)).await;
        if !out.success() {
            // git unavailable in this environment.
            return;
        }
        let mut m = open(&dir);
        let log = m.observe("sys://git/log?limit=5").await.unwrap();
        assert!(log.contains("Rows=2"));
        let log = m.observe("sys://git/log?grep=fix").await.unwrap();
        assert!(log.contains("Rows=1"));
        assert!(log.contains("fix: second"));
    }
}

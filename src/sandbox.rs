//! Path containment for every filesystem-touching tool call.
//!
//! A requested path is joined onto the agent's workspace, normalized
//! lexically, then resolved through the filesystem (symbolic links included)
//! as far as it exists. The result must lie under the workspace root or the
//! shared root, compared component by component with [`Path::starts_with`].

use std::path::{Component, Path, PathBuf};

use crate::error::{SandboxError, SandboxResult};

/// Log target for security events.
pub const SECURITY_TARGET: &str = "lemming::security";

/// The roots one agent's tools may touch.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    owner: String,
    workspace: PathBuf,
    shared: PathBuf,
}

impl PathSandbox {
    /// Create both roots if needed and canonicalize them.
    pub fn new(
        owner: impl Into<String>,
        workspace: impl AsRef<Path>,
        shared: impl AsRef<Path>,
    ) -> SandboxResult<Self> {
        Ok(Self {
            owner: owner.into(),
            workspace: canonical_root(workspace.as_ref())?,
            shared: canonical_root(shared.as_ref())?,
        })
    }

    /// Canonical workspace root; also the working directory for commands.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn shared(&self) -> &Path {
        &self.shared
    }

    fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.workspace) || path.starts_with(&self.shared)
    }

    /// Resolve `requested` to a canonical path inside the sandbox, or deny.
    ///
    /// The target itself need not exist (for writes), but every existing
    /// ancestor is resolved through the filesystem.
    pub fn resolve(&self, requested: &str) -> SandboxResult<PathBuf> {
        if requested.trim().is_empty() || requested.contains('\0') {
            return Err(SandboxError::InvalidPath {
                requested: requested.into(),
            });
        }

        let lexical = normalize(&self.workspace.join(requested));
        let resolved = match resolve_existing(&lexical) {
            Ok(resolved) => resolved,
            Err(target) => {
                return Err(self.deny_symlink(requested, &target));
            }
        };

        if self.contains(&resolved) {
            return Ok(resolved);
        }
        if self.contains(&lexical) {
            return Err(self.deny_symlink(requested, &resolved));
        }

        tracing::warn!(
            target: SECURITY_TARGET,
            event = "sandbox_outside",
            agent = %self.owner,
            requested,
            resolved = %resolved.display(),
            "path outside sandbox denied"
        );
        Err(SandboxError::OutsideSandbox {
            requested: requested.into(),
            resolved: resolved.display().to_string(),
        })
    }

    /// A resolved path relative to the workspace when it lies there.
    pub fn display_path(&self, resolved: &Path) -> String {
        resolved
            .strip_prefix(&self.workspace)
            .map(|p| {
                if p.as_os_str().is_empty() {
                    ".".to_string()
                } else {
                    p.display().to_string()
                }
            })
            .unwrap_or_else(|_| resolved.display().to_string())
    }

    fn deny_symlink(&self, requested: &str, target: &Path) -> SandboxError {
        tracing::warn!(
            target: SECURITY_TARGET,
            event = "sandbox_symlink_escape",
            agent = %self.owner,
            requested,
            target_path = %target.display(),
            "symbolic link escape denied"
        );
        SandboxError::SymlinkEscape {
            requested: requested.into(),
            target: target.display().to_string(),
        }
    }
}

fn canonical_root(root: &Path) -> SandboxResult<PathBuf> {
    let unavailable = |source| SandboxError::RootUnavailable {
        root: root.display().to_string(),
        source,
    };
    std::fs::create_dir_all(root).map_err(unavailable)?;
    root.canonicalize().map_err(unavailable)
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// rest. A dangling symbolic link on the way is reported as `Err(link)`.
fn resolve_existing(path: &Path) -> Result<PathBuf, PathBuf> {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut out = canonical;
                for part in rest.iter().rev() {
                    out.push(part);
                }
                return Ok(out);
            }
            Err(_) => {
                let is_link = existing
                    .symlink_metadata()
                    .is_ok_and(|meta| meta.file_type().is_symlink());
                if is_link {
                    let target = std::fs::read_link(&existing).unwrap_or(existing);
                    return Err(target);
                }
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        rest.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    // Even the root failed to canonicalize.
                    _ => return Ok(path.to_path_buf()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        base: PathBuf,
        sandbox: PathSandbox,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let sandbox = PathSandbox::new(
            "tester",
            base.join("agents/tester/workspace"),
            base.join("shared"),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            base,
            sandbox,
        }
    }

    #[test]
    fn relative_paths_resolve_into_workspace() {
        let f = fixture();
        let p = f.sandbox.resolve("notes/today.md").unwrap();
        assert_eq!(p, f.base.join("agents/tester/workspace/notes/today.md"));
        let p = f.sandbox.resolve("./a/../b.txt").unwrap();
        assert_eq!(p, f.base.join("agents/tester/workspace/b.txt"));
        assert_eq!(f.sandbox.resolve(".").unwrap(), f.sandbox.workspace());
    }

    #[test]
    fn parent_traversal_is_denied() {
        let f = fixture();
        let err = f.sandbox.resolve("../../secret").unwrap_err();
        assert!(matches!(err, SandboxError::OutsideSandbox { .. }));
        let err = f.sandbox.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, SandboxError::OutsideSandbox { .. }));
    }

    #[test]
    fn sibling_with_shared_prefix_is_denied() {
        let f = fixture();
        std::fs::create_dir_all(f.base.join("agents/tester/workspace_evil")).unwrap();
        let err = f.sandbox.resolve("../workspace_evil/loot").unwrap_err();
        assert!(matches!(err, SandboxError::OutsideSandbox { .. }));
        let abs = f.base.join("agents/tester/workspace_evil/loot");
        assert!(f.sandbox.resolve(abs.to_str().unwrap()).is_err());
    }

    #[test]
    fn shared_root_is_reachable() {
        let f = fixture();
        let p = f.sandbox.resolve("../../../shared/board.md").unwrap();
        assert_eq!(p, f.base.join("shared/board.md"));
        let abs = f.base.join("shared/x.txt");
        assert_eq!(f.sandbox.resolve(abs.to_str().unwrap()).unwrap(), abs);
    }

    #[test]
    fn empty_and_nul_paths_are_invalid() {
        let f = fixture();
        assert!(matches!(
            f.sandbox.resolve(""),
            Err(SandboxError::InvalidPath { .. })
        ));
        assert!(matches!(
            f.sandbox.resolve("a\0b"),
            Err(SandboxError::InvalidPath { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_workspace_is_an_escape() {
        let f = fixture();
        let outside = f.base.join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(&outside, f.sandbox.workspace().join("link")).unwrap();

        let err = f.sandbox.resolve("link/secret.txt").unwrap_err();
        assert!(matches!(err, SandboxError::SymlinkEscape { .. }));
        let err = f.sandbox.resolve("link/new.txt").unwrap_err();
        assert!(matches!(err, SandboxError::SymlinkEscape { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_within_workspace_is_allowed() {
        let f = fixture();
        let real = f.sandbox.workspace().join("real");
        std::fs::create_dir_all(&real).unwrap();
        std::os::unix::fs::symlink(&real, f.sandbox.workspace().join("alias")).unwrap();
        assert_eq!(f.sandbox.resolve("alias/file").unwrap(), real.join("file"));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_denied() {
        let f = fixture();
        std::os::unix::fs::symlink("/nonexistent/target", f.sandbox.workspace().join("dangling"))
            .unwrap();
        let err = f.sandbox.resolve("dangling").unwrap_err();
        assert!(matches!(err, SandboxError::SymlinkEscape { .. }));
    }

    #[test]
    fn display_is_workspace_relative() {
        let f = fixture();
        let p = f.sandbox.resolve("dir/file.txt").unwrap();
        assert_eq!(f.sandbox.display_path(&p), "dir/file.txt");
        assert_eq!(f.sandbox.display_path(f.sandbox.workspace()), ".");
    }
}

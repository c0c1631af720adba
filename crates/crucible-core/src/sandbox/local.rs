//! Process-backed sandbox for local runs and tests.
//!
//! Each sandbox owns a private temporary directory. Commands run through
//! `sh -c` with that directory as the working directory; file paths are
//! resolved inside it, with absolute paths re-rooted under it.

use super::{CommandOutput, Sandbox, SandboxError, SandboxOptions, SandboxProvider};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct LocalSandboxProvider {
    base_dir: Option<PathBuf>,
}

impl LocalSandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create sandbox directories under `base_dir` instead of the system temp dir.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(
        &self,
        tenant_key: &str,
        options: &SandboxOptions,
    ) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("crucible-sandbox-");
            b
        };
        let dir = match &self.base_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|e| SandboxError::Create(e.to_string()))?;

        let root = dir.path().to_path_buf();
        let id = format!("local-{}", uuid::Uuid::new_v4());
        tracing::debug!(tenant_key, sandbox_id = %id, root = %root.display(), "local sandbox created");

        Ok(Arc::new(LocalSandbox {
            id,
            root,
            env: options.env.clone().into_iter().collect(),
            dir: Mutex::new(Some(dir)),
        }))
    }
}

pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    env: Vec<(String, String)>,
    dir: Mutex<Option<tempfile::TempDir>>,
}

impl LocalSandbox {
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(SandboxError::operation(
                        "resolve_path",
                        format!("path escapes sandbox: {path}"),
                    ))
                }
            }
        }
        Ok(resolved)
    }

    fn ensure_open(&self) -> Result<(), SandboxError> {
        if self.dir.lock().unwrap().is_none() {
            return Err(SandboxError::operation("sandbox", "already shut down"));
        }
        Ok(())
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError> {
        self.ensure_open()?;
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::operation("write_file", e))?;
        }
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| SandboxError::operation("write_file", e))
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.ensure_open()?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SandboxError::operation("run", e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            output: text,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.ensure_open()?;
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SandboxError::FileNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(SandboxError::operation("read_file", e)),
        }
    }

    async fn shutdown(&self) -> Result<(), SandboxError> {
        let dir = self.dir.lock().unwrap().take();
        match dir {
            Some(dir) => dir
                .close()
                .map_err(|e| SandboxError::operation("shutdown", e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_and_commands_share_the_sandbox_root() {
        let provider = LocalSandboxProvider::new();
        let sandbox = provider
            .create("org-1", &SandboxOptions::default())
            .await
            .unwrap();

        sandbox.write_file("/work/in.txt", b"hello").await.unwrap();
        let out = sandbox
            .run("cat work/in.txt && echo done > work/out.txt")
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.output, "hello");
        assert_eq!(sandbox.read_file("work/out.txt").await.unwrap(), b"done\n");

        let missing = sandbox.read_file("work/none.txt").await.unwrap_err();
        assert!(matches!(missing, SandboxError::FileNotFound { .. }));

        sandbox.shutdown().await.unwrap();
        assert!(sandbox.run("true").await.is_err());
    }

    #[tokio::test]
    async fn parent_components_are_rejected() {
        let sandbox = LocalSandboxProvider::new()
            .create("org-1", &SandboxOptions::default())
            .await
            .unwrap();
        assert!(sandbox.write_file("../escape.txt", b"x").await.is_err());
        sandbox.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exit_code_and_env_are_passed_through() {
        let mut options = SandboxOptions::default();
        options.env.insert("GREETING".into(), "hi".into());
        let sandbox = LocalSandboxProvider::new()
            .create("org-1", &options)
            .await
            .unwrap();

        let out = sandbox.run("printf \"$GREETING\"; exit 3").await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.output, "hi");
        sandbox.shutdown().await.unwrap();
    }
}

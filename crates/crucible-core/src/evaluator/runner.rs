use super::{EvaluatorError, EvaluatorScore};
use crate::config::SandboxConfig;
use crate::sandbox::{SandboxError, SandboxLease, SandboxPool};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorInvocation {
    pub code: String,
    pub request_payload: String,
    pub response_payload: String,
    pub tenant_key: String,
    pub invocation_id: String,
}

impl EvaluatorInvocation {
    /// Invocation with a fresh id.
    pub fn new(
        code: impl Into<String>,
        request_payload: impl Into<String>,
        response_payload: impl Into<String>,
        tenant_key: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            request_payload: request_payload.into(),
            response_payload: response_payload.into(),
            tenant_key: tenant_key.into(),
            invocation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluatorOutcome {
    /// Contents of the output file; empty when the script wrote none.
    pub output: String,
    /// Lines the script printed.
    pub traces: Vec<String>,
    pub exit_code: i32,
}

impl EvaluatorOutcome {
    pub fn score(&self) -> Result<EvaluatorScore, EvaluatorError> {
        EvaluatorScore::from_output(Some(&self.output))
    }
}

/// Runs evaluator scripts in the sandbox pooled for the caller's tenant.
///
/// The lease is kept after the run so later invocations for the same tenant
/// reuse the sandbox.
#[derive(Clone)]
pub struct EvaluatorRunner {
    pool: SandboxPool,
    workspace_root: String,
    interpreter: String,
    operation_timeout: Duration,
}

impl EvaluatorRunner {
    pub fn new(pool: SandboxPool, cfg: &SandboxConfig) -> Self {
        Self {
            pool,
            workspace_root: cfg.workspace_root.trim_end_matches('/').to_string(),
            interpreter: cfg.interpreter.clone(),
            operation_timeout: cfg.operation_timeout(),
        }
    }

    pub fn pool(&self) -> &SandboxPool {
        &self.pool
    }

    pub fn workspace_for(&self, tenant_key: &str, invocation_id: &str) -> String {
        format!("{}/{}/{}", self.workspace_root, tenant_key, invocation_id)
    }

    pub async fn run(
        &self,
        invocation: &EvaluatorInvocation,
    ) -> Result<EvaluatorOutcome, EvaluatorError> {
        let tenant_key = invocation.tenant_key.as_str();
        let lease = self
            .pool
            .acquire(tenant_key)
            .await
            .map_err(|source| EvaluatorError::Acquire {
                tenant_key: tenant_key.to_string(),
                source,
            })?;

        let workspace = self.workspace_for(tenant_key, &invocation.invocation_id);
        let result = self.run_in_workspace(&lease, &workspace, invocation).await;

        let cleanup = format!("rm -rf {}", shell_quote(&workspace));
        if let Err(e) = self.timed("cleanup", lease.run(&cleanup)).await {
            tracing::warn!(
                tenant_key,
                invocation_id = %invocation.invocation_id,
                error = %e,
                "evaluator workspace cleanup failed"
            );
        }

        match &result {
            Ok(outcome) => tracing::info!(
                tenant_key,
                invocation_id = %invocation.invocation_id,
                exit_code = outcome.exit_code,
                "evaluator finished"
            ),
            Err(e) => tracing::warn!(
                tenant_key,
                invocation_id = %invocation.invocation_id,
                kind = %e.kind(),
                error = %e,
                "evaluator failed"
            ),
        }
        result
    }

    async fn run_in_workspace(
        &self,
        lease: &SandboxLease,
        workspace: &str,
        invocation: &EvaluatorInvocation,
    ) -> Result<EvaluatorOutcome, EvaluatorError> {
        let files = [
            ("write_request", "request.json", &invocation.request_payload),
            ("write_response", "response.json", &invocation.response_payload),
            ("write_code", "evaluator.py", &invocation.code),
        ];
        for (step, name, contents) in files {
            let path = format!("{workspace}/{name}");
            self.timed(step, lease.write_file(&path, contents.as_bytes()))
                .await
                .map_err(|source| EvaluatorError::Step { step, source })?;
        }

        let command = format!(
            "cd {} && INVOCATION_ID={} {} evaluator.py",
            shell_quote(workspace),
            shell_quote(&invocation.invocation_id),
            self.interpreter
        );
        let ran = self
            .timed("run", lease.run(&command))
            .await
            .map_err(|source| EvaluatorError::Step { step: "run", source })?;

        let output_path = format!("{workspace}/output.txt");
        let output = match self.timed("read_output", lease.read_file(&output_path)).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(SandboxError::FileNotFound { .. }) => String::new(),
            Err(source) => {
                return Err(EvaluatorError::Step {
                    step: "read_output",
                    source,
                })
            }
        };

        Ok(EvaluatorOutcome {
            output,
            traces: ran.output.lines().map(str::to_string).collect(),
            exit_code: ran.exit_code,
        })
    }

    async fn timed<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, SandboxError>>,
    ) -> Result<T, SandboxError> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::OperationTimeout {
                operation: operation.to_string(),
                timeout: self.operation_timeout,
            }),
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Sandbox Adapter - Isolated Execution Units
///
/// **Core Responsibility:**
/// Turn (language, code, ordered test inputs) into a not-yet-started
/// isolated execution unit, and expose its lifecycle: start, wait for exit,
/// read combined output, force-terminate, release resources.
///
/// **Critical Architectural Boundary:**
/// - The adapter knows HOW code is isolated (Docker today)
/// - The adapter does NOT know verdicts, deadlines, or persistence
/// - Callers own the returned handle and drive it through teardown on
///   every path, so `terminate` and `release` are idempotent and never
///   surface errors
///
/// **Stdout contract (consumed by the output parser):**
/// the runner baked into each language image feeds every input fragment to
/// the user program in order and writes, per fragment, the program's output
/// followed by the literal `---` delimiter, then the total elapsed
/// milliseconds as decimal text after the final delimiter:
/// `<out1>---<out2>---...---<outN>---<elapsedMs>`
use crate::config::LanguageConfigManager;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use gavel_common::types::Language;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Safety limits to prevent pathological inputs from reaching Docker
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("source code exceeds maximum size of {0} bytes")]
    OversizedSource(usize),
    #[error("test input exceeds maximum size of {0} bytes")]
    OversizedInput(usize),
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// One ephemeral, isolated execution unit bound 1:1 to a job.
///
/// Lifecycle: built (not started) -> started -> exited -> released.
/// `terminate` and `release` are speculative-call safe: idempotent, and
/// failures are logged, never raised, so teardown on an error path can
/// never mask the original error.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn start(&self) -> Result<(), SandboxError>;

    /// Suspends until the sandboxed process has fully exited. A non-zero
    /// program exit is still an exit; partial output stays readable.
    async fn wait_for_exit(&self);

    /// stdout and stderr interleaved as a single text stream.
    async fn read_combined_output(&self) -> Result<String, SandboxError>;

    async fn terminate(&self);

    async fn release(&self);
}

/// Builds sandboxes for a supported language set.
#[async_trait]
pub trait SandboxAdapter: Send + Sync {
    async fn build(
        &self,
        language: Language,
        code: &str,
        inputs: &[String],
    ) -> Result<Box<dyn Sandbox>, SandboxError>;
}

/// Docker-backed adapter.
///
/// Containers are created with network disabled and memory/CPU limits from
/// the per-language config. Code and inputs reach the image's runner via
/// base64 env vars; the runner owns the multiplexing and the `---` framing.
pub struct DockerSandboxAdapter {
    docker: Docker,
    configs: LanguageConfigManager,
}

impl DockerSandboxAdapter {
    pub fn new(configs: &LanguageConfigManager) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(DockerSandboxAdapter {
            docker,
            configs: configs.clone(),
        })
    }

    /// Ensure the sandbox image is present locally, pulling it if missing.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "image cache hit");
            return Ok(());
        }

        warn!(image = %image, "image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result?;
        }

        info!(image = %image, "image pulled");
        Ok(())
    }
}

#[async_trait]
impl SandboxAdapter for DockerSandboxAdapter {
    async fn build(
        &self,
        language: Language,
        code: &str,
        inputs: &[String],
    ) -> Result<Box<dyn Sandbox>, SandboxError> {
        if code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(SandboxError::OversizedSource(MAX_SOURCE_CODE_BYTES));
        }
        for input in inputs {
            if input.len() > MAX_TEST_INPUT_BYTES {
                return Err(SandboxError::OversizedInput(MAX_TEST_INPUT_BYTES));
            }
        }

        let config = self
            .configs
            .get_config(language)
            .map_err(|_| SandboxError::UnsupportedLanguage(language.to_string()))?;

        self.ensure_image(&config.image).await?;

        let container_name = format!("gavel-{}", uuid::Uuid::new_v4());

        // The runner decodes SOURCE_CODE and TEST_INPUTS (a JSON string
        // array) and emits the delimited stdout contract documented above.
        let inputs_json = serde_json::to_string(inputs).unwrap_or_else(|_| "[]".to_string());
        let env = vec![
            format!("SOURCE_CODE={}", general_purpose::STANDARD.encode(code)),
            format!("TEST_INPUTS={}", general_purpose::STANDARD.encode(inputs_json)),
            format!("LANGUAGE={}", language),
        ];

        let memory_limit = (config.memory_limit_mb as i64) * 1024 * 1024;
        let nano_cpus = (config.cpu_limit as f64 * 1_000_000_000.0) as i64;

        let container_config = Config {
            image: Some(config.image.clone()),
            env: Some(env),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true), // SECURITY: no network access
            host_config: Some(bollard::models::HostConfig {
                memory: Some(memory_limit),
                nano_cpus: Some(nano_cpus),
                readonly_rootfs: Some(false), // runner writes to /tmp for compilation
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), container_config)
            .await?;

        debug!(
            container_id = %container.id,
            language = %language,
            inputs = inputs.len(),
            "sandbox built"
        );

        Ok(Box::new(DockerSandbox {
            docker: self.docker.clone(),
            container_id: container.id,
            released: AtomicBool::new(false),
        }))
    }
}

pub struct DockerSandbox {
    docker: Docker,
    container_id: String,
    released: AtomicBool,
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn start(&self) -> Result<(), SandboxError> {
        self.docker
            .start_container(&self.container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn wait_for_exit(&self) {
        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut wait_stream = self
            .docker
            .wait_container(&self.container_id, Some(wait_options));

        // A non-zero exit comes back as a stream error; either way the
        // container has stopped, which is all this call promises.
        match wait_stream.next().await {
            Some(Ok(response)) => {
                debug!(
                    container_id = %self.container_id,
                    exit_code = response.status_code,
                    "container exited"
                );
            }
            Some(Err(e)) => {
                debug!(
                    container_id = %self.container_id,
                    error = %e,
                    "container exited non-zero"
                );
            }
            None => {
                debug!(container_id = %self.container_id, "wait stream ended");
            }
        }
    }

    async fn read_combined_output(&self) -> Result<String, SandboxError> {
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(&self.container_id, logs_options);
        let mut combined = String::new();

        while let Some(output) = logs_stream.next().await {
            match output {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    combined.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => return Err(SandboxError::Docker(e)),
            }
        }

        Ok(combined)
    }

    async fn terminate(&self) {
        if let Err(e) = self
            .docker
            .kill_container(&self.container_id, None::<KillContainerOptions<String>>)
            .await
        {
            // Already exited or already gone; nothing left to kill.
            debug!(container_id = %self.container_id, error = %e, "kill skipped");
        }
    }

    async fn release(&self) {
        // Once-flag keeps a double release from hitting the daemon twice.
        if self
            .released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        if let Err(e) = self
            .docker
            .remove_container(&self.container_id, Some(remove_options))
            .await
        {
            warn!(container_id = %self.container_id, error = %e, "container removal failed");
        }
    }
}


#[cfg(test)]
mod docker_tests {
    use super::*;
    use crate::config::LanguageConfig;

    fn local_configs() -> LanguageConfigManager {
        LanguageConfigManager::from_entries(vec![LanguageConfig {
            name: "python".to_string(),
            image: "gavel-python:latest".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            deadline_extension_ms: 0,
        }])
    }

    /// End-to-end against a real daemon with the gavel-python image built.
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_sandbox_round_trip() {
        let adapter = DockerSandboxAdapter::new(&local_configs()).expect("docker daemon");

        let sandbox = adapter
            .build(
                Language::Python,
                "print(input())",
                &["5".to_string(), "6".to_string()],
            )
            .await
            .expect("build sandbox");

        sandbox.start().await.expect("start sandbox");
        sandbox.wait_for_exit().await;

        let output = sandbox.read_combined_output().await.expect("read logs");
        assert!(output.contains("---"));

        sandbox.release().await;
        // Double release must be a no-op.
        sandbox.release().await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_unknown_language_is_rejected() {
        let adapter = DockerSandboxAdapter::new(&local_configs()).expect("docker daemon");
        let err = adapter
            .build(Language::Java, "class Main {}", &[])
            .await
            .err()
            .expect("java is not configured here");
        assert!(matches!(err, SandboxError::UnsupportedLanguage(_)));
    }
}

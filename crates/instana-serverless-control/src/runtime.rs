// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Monitored-process variants per serverless runtime.
//!
//! The lifecycle controller is runtime-agnostic; everything specific to one
//! platform (the command to start, identity environment variables, extra
//! auxiliary stubs such as the metadata mock) lives behind the
//! [`MonitoredRuntime`] trait and is injected into the controller.

use std::path::PathBuf;

use crate::child::ProcessSpec;
use crate::config::HarnessConfig;
use crate::control::ControlOptions;
use crate::error::ControlError;

pub const RUNTIME_STARTED_MESSAGE: &str = "runtime: started";
pub const RUNTIME_TERMINATING_MESSAGE: &str = "runtime: terminating";

/// Everything a runtime implementation may need to build its process specs.
pub struct RuntimeContext<'a> {
    pub config: &'a HarnessConfig,
    pub opts: &'a ControlOptions,
}

impl RuntimeContext<'_> {
    /// The environment every monitored process receives, regardless of the
    /// runtime flavor. Options-provided variables come last and win.
    pub fn monitored_process_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (
                "DOWNSTREAM_DUMMY_URL".to_string(),
                self.config.downstream_dummy_url(),
            ),
            ("INSTANA_DISABLE_CA_CHECK".to_string(), "true".to_string()),
            (
                "INSTANA_TRACING_TRANSMISSION_DELAY".to_string(),
                "500".to_string(),
            ),
            ("INSTANA_LOG_LEVEL".to_string(), "debug".to_string()),
        ];
        if !self.opts.unconfigured {
            env.push((
                "INSTANA_ENDPOINT_URL".to_string(),
                self.config.backend_base_url(),
            ));
            env.push(("INSTANA_AGENT_KEY".to_string(), self.opts.agent_key.clone()));
        }
        env.extend(self.opts.env.iter().cloned());
        env
    }

    fn metadata_mock_spec(&self) -> ProcessSpec {
        let mut command = self.config.stub_command("metadata_mock");
        command.env(
            "METADATA_MOCK_PORT",
            self.config.metadata_mock_port.to_string(),
        );
        ProcessSpec::new("metadata mock", "metadata mock: started", command)
    }
}

/// Capability interface of one monitored serverless runtime.
pub trait MonitoredRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// The process spec that starts the monitored process.
    fn process_spec(&self, ctx: &RuntimeContext<'_>) -> Result<ProcessSpec, ControlError>;

    /// Runtime-specific auxiliary stubs, started before the monitored
    /// process.
    fn auxiliary_processes(&self, _ctx: &RuntimeContext<'_>) -> Vec<ProcessSpec> {
        Vec::new()
    }

    fn started_message(&self) -> &str {
        RUNTIME_STARTED_MESSAGE
    }

    fn terminating_message(&self) -> &str {
        RUNTIME_TERMINATING_MESSAGE
    }

    fn has_started(&self, messages: &[String]) -> bool {
        messages.iter().any(|line| line == self.started_message())
    }

    fn has_terminated(&self, messages: &[String]) -> bool {
        messages
            .iter()
            .any(|line| line == self.terminating_message())
    }
}

/// A local Lambda runtime emulator executing a handler definition.
pub struct LambdaRuntime {
    pub runtime_program: PathBuf,
    pub handler_definition_path: PathBuf,
}

impl MonitoredRuntime for LambdaRuntime {
    fn name(&self) -> &'static str {
        "aws lambda runtime"
    }

    fn process_spec(&self, ctx: &RuntimeContext<'_>) -> Result<ProcessSpec, ControlError> {
        let mut command = tokio::process::Command::new(&self.runtime_program);
        command.env(
            "HANDLER_DEFINITION_PATH",
            self.handler_definition_path.as_os_str(),
        );
        if ctx.opts.start_extension {
            command.env(
                "INSTANA_LAMBDA_EXTENSION_PORT",
                ctx.config.extension_port.to_string(),
            );
        }
        command.envs(ctx.monitored_process_env());
        Ok(ProcessSpec::new(
            self.name(),
            self.started_message(),
            command,
        ))
    }
}

/// An application container monitored on AWS Fargate; needs the task
/// metadata mock.
pub struct FargateRuntime {
    pub app_program: PathBuf,
}

impl MonitoredRuntime for FargateRuntime {
    fn name(&self) -> &'static str {
        "fargate task container"
    }

    fn process_spec(&self, ctx: &RuntimeContext<'_>) -> Result<ProcessSpec, ControlError> {
        let mut command = tokio::process::Command::new(&self.app_program);
        command.env("ECS_CONTAINER_METADATA_URI", ctx.config.metadata_mock_url());
        command.envs(ctx.monitored_process_env());
        Ok(ProcessSpec::new(
            self.name(),
            self.started_message(),
            command,
        ))
    }

    fn auxiliary_processes(&self, ctx: &RuntimeContext<'_>) -> Vec<ProcessSpec> {
        vec![ctx.metadata_mock_spec()]
    }
}

/// An application container monitored on Google Cloud Run; needs the
/// metadata mock and the Knative identity variables.
pub struct CloudRunRuntime {
    pub app_program: PathBuf,
}

impl MonitoredRuntime for CloudRunRuntime {
    fn name(&self) -> &'static str {
        "cloud run container"
    }

    fn process_spec(&self, ctx: &RuntimeContext<'_>) -> Result<ProcessSpec, ControlError> {
        let mut command = tokio::process::Command::new(&self.app_program);
        command
            .env("CUSTOM_METADATA_HOST", ctx.config.metadata_mock_url())
            .env("K_SERVICE", "serverless-test-service")
            .env("K_REVISION", "serverless-test-service-00042-heq")
            .env("K_CONFIGURATION", "serverless-test-service");
        command.envs(ctx.monitored_process_env());
        Ok(ProcessSpec::new(
            self.name(),
            self.started_message(),
            command,
        ))
    }

    fn auxiliary_processes(&self, ctx: &RuntimeContext<'_>) -> Vec<ProcessSpec> {
        vec![ctx.metadata_mock_spec()]
    }
}

/// An application monitored on Azure container services, identified via the
/// app-service environment.
pub struct AzureRuntime {
    pub app_program: PathBuf,
}

impl MonitoredRuntime for AzureRuntime {
    fn name(&self) -> &'static str {
        "azure container app"
    }

    fn process_spec(&self, ctx: &RuntimeContext<'_>) -> Result<ProcessSpec, ControlError> {
        let mut command = tokio::process::Command::new(&self.app_program);
        command
            .env("WEBSITE_SITE_NAME", "serverless-test-site")
            .env("WEBSITE_OWNER_NAME", "55566677-aaaa-bbbb-cccc-ddddeeeeffff+rg-region")
            .env("WEBSITE_RESOURCE_GROUP", "serverless-test-resource-group");
        command.envs(ctx.monitored_process_env());
        Ok(ProcessSpec::new(
            self.name(),
            self.started_message(),
            command,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlOptions;
    use std::collections::HashMap;

    fn env_of(spec: &ProcessSpec) -> HashMap<String, String> {
        spec.command
            .as_std()
            .get_envs()
            .filter_map(|(key, value)| {
                Some((
                    key.to_string_lossy().into_owned(),
                    value?.to_string_lossy().into_owned(),
                ))
            })
            .collect()
    }

    #[test]
    fn the_monitored_process_is_pointed_at_the_backend() {
        let config = HarnessConfig::default();
        let opts = ControlOptions::default();
        let ctx = RuntimeContext {
            config: &config,
            opts: &opts,
        };
        let runtime = LambdaRuntime {
            runtime_program: PathBuf::from("/bin/true"),
            handler_definition_path: PathBuf::from("/tmp/handler.json"),
        };

        let spec = runtime.process_spec(&ctx).unwrap();
        let env = env_of(&spec);
        assert_eq!(
            env.get("INSTANA_ENDPOINT_URL"),
            Some(&config.backend_base_url())
        );
        assert!(env.contains_key("INSTANA_AGENT_KEY"));
        assert_eq!(
            env.get("DOWNSTREAM_DUMMY_URL"),
            Some(&config.downstream_dummy_url())
        );
    }

    #[test]
    fn unconfigured_runs_omit_the_endpoint() {
        let config = HarnessConfig::default();
        let opts = ControlOptions {
            unconfigured: true,
            ..Default::default()
        };
        let ctx = RuntimeContext {
            config: &config,
            opts: &opts,
        };
        let runtime = AzureRuntime {
            app_program: PathBuf::from("/bin/true"),
        };

        let env = env_of(&runtime.process_spec(&ctx).unwrap());
        assert!(!env.contains_key("INSTANA_ENDPOINT_URL"));
        assert!(!env.contains_key("INSTANA_AGENT_KEY"));
    }

    #[test]
    fn options_env_wins_over_the_defaults() {
        let config = HarnessConfig::default();
        let opts = ControlOptions {
            env: vec![("INSTANA_LOG_LEVEL".to_string(), "warn".to_string())],
            ..Default::default()
        };
        let ctx = RuntimeContext {
            config: &config,
            opts: &opts,
        };
        let runtime = FargateRuntime {
            app_program: PathBuf::from("/bin/true"),
        };

        let env = env_of(&runtime.process_spec(&ctx).unwrap());
        assert_eq!(env.get("INSTANA_LOG_LEVEL"), Some(&"warn".to_string()));
    }

    #[test]
    fn container_runtimes_request_the_metadata_mock() {
        let config = HarnessConfig::default();
        let opts = ControlOptions::default();
        let ctx = RuntimeContext {
            config: &config,
            opts: &opts,
        };

        let fargate = FargateRuntime {
            app_program: PathBuf::from("/bin/true"),
        };
        let auxiliaries = fargate.auxiliary_processes(&ctx);
        assert_eq!(auxiliaries.len(), 1);
        assert_eq!(auxiliaries[0].name, "metadata mock");

        let lambda = LambdaRuntime {
            runtime_program: PathBuf::from("/bin/true"),
            handler_definition_path: PathBuf::from("/tmp/handler.json"),
        };
        assert!(lambda.auxiliary_processes(&ctx).is_empty());
    }
}

// Copyright 2024-Present IBM Corp. https://www.ibm.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle controller for the process group of one integration test run.
//!
//! A run consists of a set of auxiliary stub processes (backend, downstream
//! dummy, proxy, extension, plus whatever the runtime flavor needs) and the
//! monitored process itself. Auxiliaries start concurrently and must all
//! report ready before the monitored process is started; the monitored
//! process is then polled until its started sentinel appears. Teardown kills
//! everything concurrently and is best-effort.

use std::time::Duration;

use futures::future::{join_all, try_join_all};
use serde_json::Value;
use tracing::{debug, warn};

use instana_test_util::retry;

use crate::backend_client::BackendClient;
use crate::child::{ChildHandle, ProcessSpec};
use crate::config::HarnessConfig;
use crate::error::ControlError;
use crate::runtime::{MonitoredRuntime, RuntimeContext};

const HANDLER_RESULT_PREFIX: &str = "runtime: result ";
const HANDLER_ERROR_PREFIX: &str = "runtime: error ";

/// Whether and how to start the backend stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendMode {
    Disabled,
    #[default]
    Responsive,
    /// Record raw payloads but never answer intake requests.
    Unresponsive,
}

/// Options of one controlled test run.
#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// Overrides the harness-wide timeout for this run.
    pub timeout: Option<Duration>,
    pub backend: BackendMode,
    pub start_downstream_dummy: bool,
    pub start_proxy: bool,
    pub start_extension: bool,
    /// Leave the agent unconfigured: no endpoint URL, no agent key.
    pub unconfigured: bool,
    pub agent_key: String,
    /// Extra environment for every spawned process; wins over defaults.
    pub env: Vec<(String, String)>,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            backend: BackendMode::Responsive,
            start_downstream_dummy: true,
            start_proxy: false,
            start_extension: false,
            unconfigured: false,
            agent_key: "serverless-test-dummy-key".to_string(),
            env: Vec::new(),
        }
    }
}

/// Lifecycle states of the process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Reset,
    Starting,
    Started,
    Stopping,
    Stopped,
}

pub struct ServerlessControl {
    config: HarnessConfig,
    opts: ControlOptions,
    runtime: Box<dyn MonitoredRuntime>,
    state: ControlState,
    backend: Option<ChildHandle>,
    downstream_dummy: Option<ChildHandle>,
    proxy: Option<ChildHandle>,
    extension: Option<ChildHandle>,
    additional_auxiliaries: Vec<ChildHandle>,
    monitored: Option<ChildHandle>,
    backend_client: BackendClient,
    expected_handler_runs: usize,
}

impl ServerlessControl {
    pub fn new(
        config: HarnessConfig,
        opts: ControlOptions,
        runtime: Box<dyn MonitoredRuntime>,
    ) -> Self {
        let backend_client = BackendClient::new(config.backend_base_url());
        ServerlessControl {
            config,
            opts,
            runtime,
            state: ControlState::Reset,
            backend: None,
            downstream_dummy: None,
            proxy: None,
            extension: None,
            additional_auxiliaries: Vec::new(),
            monitored: None,
            backend_client,
            expected_handler_runs: 0,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.opts.timeout.unwrap_or(self.config.timeout)
    }

    pub fn backend_client(&self) -> &BackendClient {
        &self.backend_client
    }

    /// Starts the whole process group: auxiliaries first (concurrently),
    /// the monitored process only after every auxiliary reported ready.
    pub async fn start(&mut self) -> Result<(), ControlError> {
        self.reset();
        self.state = ControlState::Starting;
        let timeout = self.timeout();

        self.spawn_auxiliaries()?;
        try_join_all(
            self.auxiliaries()
                .map(|auxiliary| auxiliary.wait_until_ready(timeout)),
        )
        .await?;

        let spec = {
            let ctx = self.runtime_context();
            self.runtime.process_spec(&ctx)?
        };
        self.monitored = Some(ChildHandle::spawn(spec)?);
        self.wait_until_monitored_process_has_started().await?;

        self.state = ControlState::Started;
        Ok(())
    }

    /// Kills every child concurrently, resolving once all of them have
    /// exited. Teardown errors are logged by the child handles, never
    /// propagated, so one flaky teardown cannot fail unrelated tests.
    pub async fn stop(&mut self) {
        self.state = ControlState::Stopping;

        let mut children: Vec<ChildHandle> = Vec::new();
        children.extend(self.monitored.take());
        children.extend(self.backend.take());
        children.extend(self.downstream_dummy.take());
        children.extend(self.proxy.take());
        children.extend(self.extension.take());
        children.extend(self.additional_auxiliaries.drain(..));

        join_all(children.into_iter().map(ChildHandle::kill_and_wait)).await;

        self.expected_handler_runs = 0;
        self.state = ControlState::Stopped;
    }

    /// Alias for [`ServerlessControl::stop`], matching the test-hook naming.
    pub async fn kill(&mut self) {
        self.stop().await;
    }

    pub fn has_monitored_process_started(&self) -> bool {
        self.monitored
            .as_ref()
            .is_some_and(|monitored| self.runtime.has_started(&monitored.messages()))
    }

    pub fn has_monitored_process_terminated(&mut self) -> bool {
        match self.monitored.as_mut() {
            None => true,
            Some(monitored) => {
                self.runtime.has_terminated(&monitored.messages()) || !monitored.is_running()
            }
        }
    }

    pub async fn wait_until_monitored_process_has_started(&self) -> Result<(), ControlError> {
        let budget = self.timeout() / 2;
        retry(
            || async {
                if self.has_monitored_process_started() {
                    Ok(())
                } else {
                    Err(ControlError::MonitoredProcessNotStarted)
                }
            },
            budget,
        )
        .await
    }

    pub async fn wait_until_monitored_process_has_terminated(&self) -> Result<(), ControlError> {
        let budget = self.timeout() / 2;
        let Some(monitored) = self.monitored.as_ref() else {
            return Ok(());
        };
        let runtime = &*self.runtime;
        // Polls the terminating sentinel; process-exit detection additionally
        // happens in has_monitored_process_terminated.
        retry(
            || async {
                if runtime.has_terminated(&monitored.messages()) {
                    Ok(())
                } else {
                    Err(ControlError::MonitoredProcessNotTerminated)
                }
            },
            budget,
        )
        .await
    }

    /// All stdout lines of the monitored process so far.
    pub fn messages_from_monitored_process(&self) -> Vec<String> {
        self.monitored
            .as_ref()
            .map(|monitored| monitored.messages())
            .unwrap_or_default()
    }

    /// Sends one trigger line to the monitored process's stdin.
    pub async fn send_to_monitored_process(&mut self, line: &str) -> Result<(), ControlError> {
        match self.monitored.as_mut() {
            Some(monitored) => monitored.send_line(line).await,
            None => Err(ControlError::Startup(
                "the monitored process is not running".to_string(),
            )),
        }
    }

    /// Triggers one handler invocation (Lambda-style runtimes) and waits
    /// until the corresponding result or error line has arrived.
    pub async fn run_handler(&mut self) -> Result<(), ControlError> {
        let budget = self.timeout() / 2;
        self.expected_handler_runs += 1;
        let expected = self.expected_handler_runs;

        let Some(monitored) = self.monitored.as_mut() else {
            return Err(ControlError::Startup(
                "the monitored process is not running".to_string(),
            ));
        };
        monitored.send_line("run-handler").await?;

        let monitored: &ChildHandle = monitored;
        retry(
            || async {
                let actual = count_handler_runs(&monitored.messages());
                if actual >= expected {
                    Ok(())
                } else {
                    Err(ControlError::HandlerRuns { expected, actual })
                }
            },
            budget,
        )
        .await
    }

    /// Successful handler invocation payloads, in arrival order.
    pub fn handler_results(&self) -> Vec<Value> {
        self.collect_handler_payloads(HANDLER_RESULT_PREFIX)
    }

    /// Failed handler invocation payloads, in arrival order.
    pub fn handler_errors(&self) -> Vec<Value> {
        self.collect_handler_payloads(HANDLER_ERROR_PREFIX)
    }

    pub async fn get_spans(&self) -> Result<Vec<Value>, ControlError> {
        if !self.backend_has_been_started() {
            return Ok(Vec::new());
        }
        Ok(self.backend_client.spans().await?)
    }

    pub async fn get_metrics(&self) -> Result<Vec<Value>, ControlError> {
        if !self.backend_has_been_started() {
            return Ok(Vec::new());
        }
        Ok(self.backend_client.metrics().await?)
    }

    pub async fn get_aggregated_metrics(&self) -> Result<Vec<Value>, ControlError> {
        if !self.backend_has_been_started() {
            return Ok(Vec::new());
        }
        Ok(self.backend_client.aggregated_metrics().await?)
    }

    pub async fn get_raw_bundles(&self) -> Result<Vec<Value>, ControlError> {
        if !self.backend_has_been_started() {
            return Ok(Vec::new());
        }
        Ok(self.backend_client.raw_bundles().await?)
    }

    pub async fn get_raw_metrics(&self) -> Result<Vec<Value>, ControlError> {
        if !self.backend_has_been_started() {
            return Ok(Vec::new());
        }
        Ok(self.backend_client.raw_metrics().await?)
    }

    pub async fn get_raw_span_arrays(&self) -> Result<Vec<Value>, ControlError> {
        if !self.backend_has_been_started() {
            return Ok(Vec::new());
        }
        Ok(self.backend_client.raw_span_arrays().await?)
    }

    pub async fn reset_backend(&self) -> Result<(), ControlError> {
        if !self.backend_has_been_started() {
            return Ok(());
        }
        Ok(self.backend_client.reset().await?)
    }

    pub async fn reset_backend_spans(&self) -> Result<(), ControlError> {
        if !self.backend_has_been_started() {
            return Ok(());
        }
        Ok(self.backend_client.reset_spans().await?)
    }

    pub async fn reset_backend_metrics(&self) -> Result<(), ControlError> {
        if !self.backend_has_been_started() {
            return Ok(());
        }
        Ok(self.backend_client.reset_metrics().await?)
    }

    pub async fn set_backend_responsive(&self, responsive: bool) -> Result<(), ControlError> {
        if !self.backend_has_been_started() {
            return Ok(());
        }
        Ok(self.backend_client.set_responsive(responsive).await?)
    }

    fn backend_has_been_started(&self) -> bool {
        self.backend.is_some()
    }

    fn reset(&mut self) {
        if self.auxiliaries().next().is_some() || self.monitored.is_some() {
            // kill_on_drop takes care of stragglers from a previous run that
            // was not stopped explicitly.
            warn!("Resetting a control that still owns child processes");
        }
        self.backend = None;
        self.downstream_dummy = None;
        self.proxy = None;
        self.extension = None;
        self.additional_auxiliaries.clear();
        self.monitored = None;
        self.expected_handler_runs = 0;
        self.state = ControlState::Reset;
    }

    fn runtime_context(&self) -> RuntimeContext<'_> {
        RuntimeContext {
            config: &self.config,
            opts: &self.opts,
        }
    }

    fn spawn_auxiliaries(&mut self) -> Result<(), ControlError> {
        if self.opts.backend != BackendMode::Disabled {
            let spec = self.backend_spec();
            self.backend = Some(ChildHandle::spawn(spec)?);
        }
        if self.opts.start_downstream_dummy {
            let spec = self.downstream_dummy_spec();
            self.downstream_dummy = Some(ChildHandle::spawn(spec)?);
        }
        if self.opts.start_proxy {
            let spec = self.proxy_spec();
            self.proxy = Some(ChildHandle::spawn(spec)?);
        }
        if self.opts.start_extension {
            let spec = self.extension_spec();
            self.extension = Some(ChildHandle::spawn(spec)?);
        }

        let extra_specs = {
            let ctx = self.runtime_context();
            self.runtime.auxiliary_processes(&ctx)
        };
        for spec in extra_specs {
            debug!("Starting additional auxiliary process {}", spec.name);
            self.additional_auxiliaries.push(ChildHandle::spawn(spec)?);
        }
        Ok(())
    }

    fn auxiliaries(&self) -> impl Iterator<Item = &ChildHandle> {
        self.backend
            .iter()
            .chain(self.downstream_dummy.iter())
            .chain(self.proxy.iter())
            .chain(self.extension.iter())
            .chain(self.additional_auxiliaries.iter())
    }

    fn backend_spec(&self) -> ProcessSpec {
        let mut command = self.config.stub_command("backend_stub");
        command.env("BACKEND_PORT", self.config.backend_port.to_string());
        if self.opts.backend == BackendMode::Unresponsive {
            command.env("BACKEND_UNRESPONSIVE", "true");
        }
        command.envs(self.opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        ProcessSpec::new("backend mock", "backend: started", command)
    }

    fn downstream_dummy_spec(&self) -> ProcessSpec {
        let mut command = self.config.stub_command("downstream_dummy");
        command.env(
            "DOWNSTREAM_DUMMY_PORT",
            self.config.downstream_dummy_port.to_string(),
        );
        command.envs(self.opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        ProcessSpec::new(
            "downstream dummy app",
            "downstream dummy: started",
            command,
        )
    }

    fn proxy_spec(&self) -> ProcessSpec {
        let mut command = self.config.stub_command("proxy_stub");
        command.env("PROXY_PORT", self.config.proxy_port.to_string());
        command.envs(self.opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        ProcessSpec::new("proxy stub", "proxy: started", command)
    }

    fn extension_spec(&self) -> ProcessSpec {
        let mut command = self.config.stub_command("extension_stub");
        command.env("EXTENSION_PORT", self.config.extension_port.to_string());
        command.envs(self.opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        ProcessSpec::new("extension stub", "extension: started", command)
    }

    fn collect_handler_payloads(&self, prefix: &str) -> Vec<Value> {
        self.messages_from_monitored_process()
            .iter()
            .filter_map(|line| line.strip_prefix(prefix))
            .filter_map(|payload| serde_json::from_str(payload).ok())
            .collect()
    }
}

fn count_handler_runs(messages: &[String]) -> usize {
    messages
        .iter()
        .filter(|line| {
            line.starts_with(HANDLER_RESULT_PREFIX) || line.starts_with(HANDLER_ERROR_PREFIX)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_runs_are_counted_across_results_and_errors() {
        let messages = vec![
            "runtime: started".to_string(),
            "runtime: result {\"statusCode\":200}".to_string(),
            "runtime: error {\"message\":\"boom\"}".to_string(),
            "unrelated output".to_string(),
        ];
        assert_eq!(count_handler_runs(&messages), 2);
    }

    #[test]
    fn default_options_start_backend_and_downstream_dummy() {
        let opts = ControlOptions::default();
        assert_eq!(opts.backend, BackendMode::Responsive);
        assert!(opts.start_downstream_dummy);
        assert!(!opts.start_proxy);
        assert!(!opts.start_extension);
    }
}

//! Redis URLs, found on the system or started per project.
//!
//! Resolution goes: an explicit value, then a project instance started by
//! an earlier run, then the system default on port 6379, and finally (in
//! development mode only) a fresh `redis-server` on the first free port of
//! the configured range.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_yaml::{Mapping, Value};

use super::service::{delete_service_directory, shutdown_service_run_state, SHUTDOWN_COMMANDS};
use super::{ConfigContext, ConfigWriter, EnvVarProvider, ProvideContext, Provider};
use crate::frontend::Frontend;
use crate::net::SocketProbe;
use crate::requirements::{
    ConfigSource, Environ, ProvideMode, ProvideResult, ProviderAnalysis, ProviderConfig,
    ProviderKind, Requirement, SimpleStatus, UserConfigOverrides,
};
use crate::shell::{CommandOptions, CommandRunner};
use crate::state::LocalStateFile;

const SYSTEM_HOST: &str = "localhost";
const SYSTEM_PORT: u16 = 6379;
const DEFAULT_LOWER_PORT: u16 = 6380;
const DEFAULT_UPPER_PORT: u16 = 6449;
const SERVICE_OPTIONS: &str = "service_options";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

fn system_url() -> String {
    format!("redis://{}:{}", SYSTEM_HOST, SYSTEM_PORT)
}

fn local_url(port: u16) -> String {
    format!("redis://localhost:{}", port)
}

/// Parse `lower-upper`; both positive and in order.
fn parse_port_range(text: &str) -> Option<(u16, u16)> {
    let (lower, upper) = text.split_once('-')?;
    let lower: u16 = lower.trim().parse().ok()?;
    let upper: u16 = upper.trim().parse().ok()?;
    if lower == 0 || upper == 0 || lower > upper {
        return None;
    }
    Some((lower, upper))
}

/// Provides a Redis URL, starting a project-scoped server when needed.
pub struct RedisProvider {
    base: EnvVarProvider,
    probe: Arc<dyn SocketProbe>,
    runner: Arc<dyn CommandRunner>,
    startup_timeout: Duration,
}

impl RedisProvider {
    /// Create a provider.
    pub fn new(
        base: EnvVarProvider,
        probe: Arc<dyn SocketProbe>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            base,
            probe,
            runner,
            startup_timeout: STARTUP_TIMEOUT,
        }
    }

    /// How long to wait for a started server to accept connections.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    fn previous_instance_url(&self, run_state: &Mapping) -> Option<String> {
        let port = run_state
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())?;
        self.probe
            .can_connect("localhost", port)
            .then(|| local_url(port))
    }

    fn start_project_instance(
        &self,
        requirement: &Requirement,
        run_state: &mut Mapping,
        ctx: &mut ProvideContext<'_>,
    ) -> Option<String> {
        let var = &requirement.env_var;
        let config = ctx.config();
        let lower = config.extra_u16("lower_port").unwrap_or(DEFAULT_LOWER_PORT);
        let upper = config.extra_u16("upper_port").unwrap_or(DEFAULT_UPPER_PORT);

        run_state.clear();

        let workdir = match ctx.ensure_service_directory(var) {
            Ok(dir) => dir,
            Err(e) => {
                ctx.frontend
                    .error(&format!("Failed to create service directory for {}: {}", var, e));
                return None;
            }
        };
        let pidfile = workdir.join("redis.pid");
        let logfile = workdir.join("redis.log");

        let Some(port) = (lower..=upper).find(|port| {
            tracing::debug!("Probing port {}", port);
            !self.probe.can_connect("localhost", *port)
        }) else {
            ctx.frontend.error(&format!(
                "All ports from {} to {} were in use, could not start redis-server on one of them.",
                lower, upper
            ));
            return None;
        };

        let _ = std::fs::remove_file(&logfile);

        let argv: Vec<String> = vec![
            "redis-server".into(),
            "--pidfile".into(),
            pidfile.display().to_string(),
            "--logfile".into(),
            logfile.display().to_string(),
            "--daemonize".into(),
            "yes".into(),
            "--port".into(),
            port.to_string(),
        ];
        ctx.frontend.info(&format!("Starting {:?}", argv));

        let options = CommandOptions::captured().with_env(ctx.environ);
        let result = match self.runner.run(&argv, &options) {
            Ok(result) => result,
            Err(e) => {
                ctx.frontend
                    .error(&format!("Error executing redis-server: {}", e));
                return None;
            }
        };

        let mut url = None;
        if result.success {
            if self.wait_until_ready(port, &pidfile) {
                run_state.insert("port".into(), Value::from(port));
                let shutdown: Vec<Value> = ["redis-cli", "-p", &port.to_string(), "shutdown"]
                    .into_iter()
                    .map(Value::from)
                    .collect();
                run_state.insert(
                    SHUTDOWN_COMMANDS.into(),
                    Value::Sequence(vec![Value::Sequence(shutdown)]),
                );
                tracing::info!("Started redis-server for {} on port {}", var, port);
                url = Some(local_url(port));
            } else {
                ctx.frontend.info(&format!(
                    "redis-server started successfully, but we timed out trying to connect to it on port {}",
                    port
                ));
            }
        }

        if url.is_none() {
            for line in result.stderr.lines().filter(|l| !l.is_empty()) {
                ctx.frontend.info(line);
            }
            match std::fs::read_to_string(&logfile) {
                Ok(log) => {
                    for line in log.lines() {
                        ctx.frontend.info(line);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => ctx
                    .frontend
                    .info(&format!("Failed to read {}: {}", logfile.display(), e)),
            }
            ctx.frontend.error(&format!(
                "redis-server process failed or timed out, exited with code {}",
                result.code_for_display()
            ));
        }

        url
    }

    /// Poll until the port answers and the pidfile exists.
    ///
    /// At the deadline an answering port is enough, with or without a pidfile.
    fn wait_until_ready(&self, port: u16, pidfile: &Path) -> bool {
        let deadline = Instant::now() + self.startup_timeout;
        let mut port_ready = false;
        loop {
            thread::sleep(POLL_INTERVAL);
            port_ready = port_ready || self.probe.can_connect("localhost", port);
            if port_ready && pidfile.exists() {
                return true;
            }
            if Instant::now() >= deadline {
                return port_ready;
            }
        }
    }
}

impl Provider for RedisProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Redis
    }

    fn missing_env_vars_to_configure(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String> {
        self.base
            .missing_env_vars_to_configure(requirement, environ, local_state)
    }

    fn missing_env_vars_to_provide(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        local_state: &LocalStateFile,
    ) -> Vec<String> {
        self.base
            .missing_env_vars_to_provide(requirement, environ, local_state)
    }

    fn read_config(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderConfig {
        let mut config = self.base.read_config(requirement, ctx);
        let var = requirement.env_var.as_str();

        if config.source == ConfigSource::Unset {
            let scope = ctx
                .local_state
                .get_string(&[SERVICE_OPTIONS, var, "scope"])
                .unwrap_or_else(|| "all".to_string());
            config.source = match scope.as_str() {
                "project" => ConfigSource::FindProject,
                "system" => ConfigSource::FindSystem,
                _ => ConfigSource::FindAll,
            };
        }

        let default_range = format!("{}-{}", DEFAULT_LOWER_PORT, DEFAULT_UPPER_PORT);
        let range_text = ctx
            .local_state
            .get_string(&[SERVICE_OPTIONS, var, "port_range"])
            .unwrap_or_else(|| default_range.clone());
        let (lower, upper) = parse_port_range(&range_text).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid port_range '{}', should be like '{}'",
                range_text,
                default_range
            );
            (DEFAULT_LOWER_PORT, DEFAULT_UPPER_PORT)
        });
        config.extras.insert("lower_port".into(), lower.to_string());
        config.extras.insert("upper_port".into(), upper.to_string());

        config
    }

    fn set_config_values_as_strings(
        &self,
        requirement: &Requirement,
        ctx: &mut ConfigWriter<'_>,
        values: &BTreeMap<String, String>,
    ) {
        let var = requirement.env_var.as_str();
        let current = self.read_config(requirement, &ctx.reader());
        let lower = values
            .get("lower_port")
            .cloned()
            .or_else(|| current.extras.get("lower_port").cloned())
            .unwrap_or_default();
        let upper = values
            .get("upper_port")
            .cloned()
            .or_else(|| current.extras.get("upper_port").cloned())
            .unwrap_or_default();
        ctx.local_state.set_value(
            &[SERVICE_OPTIONS, var, "port_range"],
            format!("{}-{}", lower, upper),
        );

        if let Some(source) = values.get("source") {
            let scope = match source.parse::<ConfigSource>() {
                Ok(ConfigSource::FindAll) => Some("all"),
                Ok(ConfigSource::FindProject) => Some("project"),
                Ok(ConfigSource::FindSystem) => Some("system"),
                _ => None,
            };
            if let Some(scope) = scope {
                ctx.local_state
                    .set_value(&[SERVICE_OPTIONS, var, "scope"], scope);
            }
            if source != ConfigSource::Environ.as_str() {
                ctx.environ.remove(var);
            }
        }

        self.base
            .set_config_values_as_strings(requirement, ctx, values);
    }

    fn analyze(&self, requirement: &Requirement, ctx: &ConfigContext<'_>) -> ProviderAnalysis {
        let mut analysis = ProviderAnalysis::new(
            self.read_config(requirement, ctx),
            self.missing_env_vars_to_configure(requirement, ctx.environ, ctx.local_state),
            self.missing_env_vars_to_provide(requirement, ctx.environ, ctx.local_state),
        );
        let run_state = ctx.local_state.get_service_run_state(&requirement.env_var);
        analysis.existing_scoped_instance_url = self.previous_instance_url(&run_state);
        analysis.default_system_exists = self.probe.can_connect(SYSTEM_HOST, SYSTEM_PORT);
        analysis
    }

    fn status(
        &self,
        requirement: &Requirement,
        environ: &Environ,
        _analysis: &ProviderAnalysis,
    ) -> (bool, String) {
        let var = &requirement.env_var;
        let Some(url) = environ.get(var).filter(|v| !v.is_empty()) else {
            return (false, format!("Environment variable {} is not set.", var));
        };

        let parsed = match reqwest::Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "redis" => parsed,
            _ => {
                return (
                    false,
                    format!("{} value '{}' does not have 'redis:' scheme.", var, url),
                )
            }
        };

        let host = parsed.host_str().unwrap_or(SYSTEM_HOST);
        let port = parsed.port().unwrap_or(SYSTEM_PORT);
        if self.probe.can_connect(host, port) {
            (true, format!("Using Redis server at {}", url))
        } else {
            (false, format!("Cannot connect to Redis at {}.", url))
        }
    }

    fn provide(&self, requirement: &Requirement, ctx: &mut ProvideContext<'_>) -> ProvideResult {
        let var = requirement.env_var.clone();
        let source = ctx.config().source;

        let base_result = self.base.provide(requirement, ctx);
        let mut url = ctx.environ.get(&var).cloned();

        if url.is_none() && source.allows_project() {
            if let Some(previous) = ctx.analysis().existing_scoped_instance_url.clone() {
                ctx.frontend.info(&format!(
                    "Using redis-server we started previously at {}",
                    previous
                ));
                url = Some(previous);
            }
        }

        let mut system_failed = false;
        if url.is_none() && source.allows_system() {
            if ctx.analysis().default_system_exists {
                ctx.frontend
                    .info(&format!("Found system default Redis at {}", system_url()));
                url = Some(system_url());
            } else {
                system_failed = true;
            }
        }

        if url.is_none() && source.allows_project() && ctx.mode == ProvideMode::Development {
            url = ctx.transform_service_run_state(&var, |run_state, ctx| {
                self.start_project_instance(requirement, run_state, ctx)
            });
        }

        match url {
            Some(url) => {
                ctx.environ.insert(var, url);
            }
            None if system_failed => {
                ctx.frontend
                    .error("Could not connect to system default Redis.");
            }
            None => {}
        }

        base_result.copy_with_additions(ctx.frontend.pop_errors())
    }

    fn unprovide(
        &self,
        requirement: &Requirement,
        _environ: &Environ,
        local_state: &mut LocalStateFile,
        _overrides: &UserConfigOverrides,
    ) -> SimpleStatus {
        let status =
            shutdown_service_run_state(local_state, &requirement.env_var, self.runner.as_ref());
        delete_service_directory(local_state, &requirement.env_var);
        status
    }
}

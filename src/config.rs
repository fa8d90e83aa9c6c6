use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SupervisorConfig {
    pub supervisor: SupervisorSettings,

    /// Managed services, in launch-logging order
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Directory that relative working directories are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SupervisorSettings {
    /// How long children get to exit after the termination broadcast
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Environment variable that carries the assigned port to each child
    #[serde(default = "default_port_env")]
    pub port_env: String,

    /// Refuse to launch a service whose port already accepts connections
    #[serde(default = "default_check_ports")]
    pub check_ports: bool,

    /// Upper bound on a readiness probe
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Delay between readiness probe attempts
    #[serde(default = "default_readiness_poll_interval_ms")]
    pub readiness_poll_interval_ms: u64,

    /// Forward child stdout/stderr into the supervisor log
    #[serde(default = "default_forward_output")]
    pub forward_output: bool,

    /// Count a child killed by our own SIGTERM as a clean exit
    #[serde(default = "default_signal_exit_is_clean")]
    pub signal_exit_is_clean: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Unique service name
    pub name: String,

    /// Program followed by its arguments; `{port}` is replaced with the port
    pub command: Vec<String>,

    /// Working directory, relative to the configuration file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Port the service is expected to listen on
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Extra environment entries as KEY=VALUE
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default)]
    pub readiness: ReadinessConfig,
}

/// How the supervisor decides a freshly spawned service is up
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessConfig {
    /// Consider the service running as soon as it is spawned
    #[default]
    #[serde(rename = "none")]
    Disabled,
    /// Poll until a TCP connect to the service port succeeds
    Tcp,
    /// Wait a fixed delay after spawning
    Delay { ms: u64 },
}

impl SupervisorSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            port_env: default_port_env(),
            check_ports: default_check_ports(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            readiness_poll_interval_ms: default_readiness_poll_interval_ms(),
            forward_output: default_forward_output(),
            signal_exit_is_clean: default_signal_exit_is_clean(),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("stackvisor.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// The file is optional. When it declares no services the built-in
    /// dashboard table is used.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("supervisor.grace_period_ms", default_grace_period_ms() as i64)?
            .set_default("supervisor.port_env", default_port_env())?
            .set_default("supervisor.check_ports", default_check_ports())?
            .set_default(
                "supervisor.readiness_timeout_ms",
                default_readiness_timeout_ms() as i64,
            )?
            .set_default(
                "supervisor.readiness_poll_interval_ms",
                default_readiness_poll_interval_ms() as i64,
            )?
            .set_default("supervisor.forward_output", default_forward_output())?
            .set_default(
                "supervisor.signal_exit_is_clean",
                default_signal_exit_is_clean(),
            )?
            .add_source(File::with_name(&path_str).required(false))
            // e.g. STACKVISOR_SUPERVISOR__GRACE_PERIOD_MS=10000
            .add_source(
                Environment::with_prefix("STACKVISOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: SupervisorConfig = settings.try_deserialize()?;
        config.base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        if config.services.is_empty() {
            info!("No services configured, using the built-in dashboard table");
            config.services = dashboard_services();
        }

        info!(
            "Configuration loaded with {} services",
            config.services.len()
        );
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate supervisor settings. The service table is checked separately
    /// by [`crate::spec::load_specs`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supervisor.grace_period_ms == 0 {
            return Err(ConfigError::Message(
                "Grace period must be greater than 0".to_string(),
            ));
        }

        if self.supervisor.readiness_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Readiness timeout must be greater than 0".to_string(),
            ));
        }

        if self.supervisor.readiness_poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Readiness poll interval must be greater than 0".to_string(),
            ));
        }

        let port_env = &self.supervisor.port_env;
        if port_env.is_empty() || port_env.contains('=') || port_env.contains('\0') {
            return Err(ConfigError::Message(format!(
                "Port environment variable name '{}' is not valid",
                port_env
            )));
        }

        Ok(())
    }

    /// Keep only the named services, in table order. Unknown names are an
    /// error so a typo never silently launches nothing.
    pub fn retain_services(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.services.iter().any(|service| &service.name == *name))
        {
            return Err(ConfigError::Message(format!(
                "Unknown service '{}' in selection",
                unknown
            )));
        }

        self.services.retain(|service| names.contains(&service.name));
        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorSettings::default(),
            services: dashboard_services(),
            base_dir: PathBuf::from("."),
        }
    }
}

/// The dashboard's service table: the static homepage plus six chart backends
pub fn dashboard_services() -> Vec<ServiceConfig> {
    let backend = |name: &str, port: u16, description: &str| ServiceConfig {
        name: name.to_string(),
        command: vec!["python3".to_string(), "app.py".to_string()],
        working_dir: Some(PathBuf::from("backend").join(name)),
        port,
        description: Some(description.to_string()),
        env: Vec::new(),
        readiness: ReadinessConfig::Tcp,
    };

    vec![
        ServiceConfig {
            name: "homepage".to_string(),
            command: vec!["python3".to_string(), "server.py".to_string()],
            working_dir: Some(PathBuf::from("frontend")),
            port: 3000,
            description: Some("Main homepage with static HTML files".to_string()),
            env: Vec::new(),
            readiness: ReadinessConfig::Tcp,
        },
        backend("allothers", 8080, "Flask app for themes and references"),
        backend("interactiveApp", 8081, "Sunburst chart: Years & Countries"),
        backend(
            "interactiveApp2",
            8082,
            "Sunburst chart: Years, Segments & Countries",
        ),
        backend("segmentcountry", 8083, "Treemap: Segments & Countries"),
        backend("segmentyear", 8084, "Stacked chart: Years & Segments"),
        backend(
            "continentsCountries",
            8085,
            "Interactive chart for continents and countries",
        ),
    ]
}

// Default value functions
fn default_grace_period_ms() -> u64 {
    5_000
}
fn default_port_env() -> String {
    "PORT".to_string()
}
fn default_check_ports() -> bool {
    true
}
fn default_readiness_timeout_ms() -> u64 {
    30_000
}
fn default_readiness_poll_interval_ms() -> u64 {
    250
}
fn default_forward_output() -> bool {
    true
}
fn default_signal_exit_is_clean() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.services.len(), 7);
        assert_eq!(config.supervisor.grace_period(), Duration::from_secs(5));
        assert_eq!(config.services[0].name, "homepage");
        assert_eq!(config.services[0].port, 3000);
    }

    #[test]
    fn test_load_services_from_file() {
        let file = write_config(
            r#"
[supervisor]
grace_period_ms = 1500
check_ports = false

[[services]]
name = "api"
command = ["python3", "app.py", "--port", "{port}"]
working_dir = "backend/api"
port = 9100
env = ["FLASK_ENV=development"]
readiness = { kind = "tcp" }

[[services]]
name = "worker"
command = ["./worker"]
port = 9101
readiness = { kind = "delay", ms = 200 }
"#,
        );

        let config = SupervisorConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.supervisor.grace_period_ms, 1500);
        assert!(!config.supervisor.check_ports);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].name, "api");
        assert_eq!(config.services[0].readiness, ReadinessConfig::Tcp);
        assert_eq!(config.services[0].env, vec!["FLASK_ENV=development"]);
        assert_eq!(
            config.services[1].readiness,
            ReadinessConfig::Delay { ms: 200 }
        );
        assert_eq!(config.services[1].working_dir, None);
        assert_eq!(config.base_dir, file.path().parent().unwrap());
    }

    #[test]
    fn test_missing_file_falls_back_to_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::load_from_file(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.services, dashboard_services());
        assert_eq!(config.base_dir, dir.path());
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("STACKVISOR_SUPERVISOR__READINESS_POLL_INTERVAL_MS", "40");

        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::load_from_file(dir.path().join("absent.toml"));

        env::remove_var("STACKVISOR_SUPERVISOR__READINESS_POLL_INTERVAL_MS");

        let config = config.unwrap();
        assert_eq!(config.supervisor.readiness_poll_interval_ms, 40);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SupervisorConfig::default();
        config.supervisor.grace_period_ms = 0;
        assert!(config.validate().is_err());

        config.supervisor.grace_period_ms = 100;
        config.supervisor.port_env = "BAD=NAME".to_string();
        assert!(config.validate().is_err());

        config.supervisor.port_env = "APP_PORT".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = SupervisorConfig::default().to_toml().unwrap();
        let file = write_config(&rendered);

        let config = SupervisorConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.services, dashboard_services());
        assert_eq!(config.supervisor.grace_period_ms, default_grace_period_ms());
    }

    #[test]
    fn test_retain_services() {
        let mut config = SupervisorConfig::default();
        config
            .retain_services(&["segmentyear".to_string(), "homepage".to_string()])
            .unwrap();

        let names: Vec<_> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["homepage", "segmentyear"]);

        assert!(config
            .retain_services(&["missing".to_string()])
            .is_err());
    }
}

//! The validated service table.
//!
//! A [`ServiceSpec`] is built once from configuration and never changes for
//! the lifetime of a run. [`load_specs`] rejects tables where two services
//! share a name or a port.

use crate::config::{ReadinessConfig, ServiceConfig, SupervisorConfig};
use crate::error::SpecError;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder in command arguments that is replaced with the service port
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Readiness signal for a single service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// No probe; the service counts as running once spawned
    None,
    /// A TCP connect to the service port must succeed
    TcpConnect,
    /// Wait a fixed delay after spawning
    Delay(Duration),
}

impl From<ReadinessConfig> for ReadinessProbe {
    fn from(config: ReadinessConfig) -> Self {
        match config {
            ReadinessConfig::Disabled => ReadinessProbe::None,
            ReadinessConfig::Tcp => ReadinessProbe::TcpConnect,
            ReadinessConfig::Delay { ms } => ReadinessProbe::Delay(Duration::from_millis(ms)),
        }
    }
}

/// Static description of one managed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub port: u16,
    pub description: Option<String>,
    pub env: Vec<(String, String)>,
    pub readiness: ReadinessProbe,
}

impl ServiceSpec {
    /// Build a spec directly, mostly useful for embedding and tests
    pub fn new(name: &str, port: u16, command: &[&str]) -> Self {
        let mut parts = command.iter().map(|part| part.to_string());
        Self {
            name: name.to_string(),
            program: parts.next().unwrap_or_default(),
            args: parts.collect(),
            working_dir: PathBuf::from("."),
            port,
            description: None,
            env: Vec::new(),
            readiness: ReadinessProbe::None,
        }
    }

    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessProbe) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Arguments with the port placeholder substituted
    pub fn resolved_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }

    /// Local URL the service is expected to answer on
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Human-readable command line, for logs and dry runs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.resolved_args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Turn the configured service table into validated specs, preserving order
pub fn load_specs(config: &SupervisorConfig) -> Result<Vec<ServiceSpec>, SpecError> {
    build_specs(&config.services, &config.base_dir)
}

pub fn build_specs(services: &[ServiceConfig], base_dir: &Path) -> Result<Vec<ServiceSpec>, SpecError> {
    let mut specs = Vec::with_capacity(services.len());

    for (index, service) in services.iter().enumerate() {
        let name = service.name.trim();
        if name.is_empty() {
            return Err(SpecError::EmptyName { index });
        }

        let (program, args) = match service.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };

        let env = service
            .env
            .iter()
            .map(|entry| parse_env_entry(name, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let working_dir = match &service.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        specs.push(ServiceSpec {
            name: name.to_string(),
            program,
            args,
            working_dir,
            port: service.port,
            description: service.description.clone(),
            env,
            readiness: service.readiness.into(),
        });
    }

    validate_specs(&specs)?;
    Ok(specs)
}

/// Check the table invariants: unique non-empty names, unique non-zero
/// ports, and a program for every service
pub fn validate_specs(specs: &[ServiceSpec]) -> Result<(), SpecError> {
    let mut names: HashSet<&str> = HashSet::new();
    let mut ports: HashMap<u16, &str> = HashMap::new();

    for (index, spec) in specs.iter().enumerate() {
        let name = spec.name.as_str();
        if name.trim().is_empty() {
            return Err(SpecError::EmptyName { index });
        }

        if !names.insert(name) {
            return Err(SpecError::DuplicateName {
                name: name.to_string(),
            });
        }

        if spec.port == 0 {
            return Err(SpecError::InvalidPort {
                service: name.to_string(),
            });
        }

        if let Some(first) = ports.insert(spec.port, name) {
            return Err(SpecError::DuplicatePort {
                port: spec.port,
                first: first.to_string(),
                second: name.to_string(),
            });
        }

        if spec.program.trim().is_empty() {
            return Err(SpecError::EmptyCommand {
                service: name.to_string(),
            });
        }
    }

    Ok(())
}

fn parse_env_entry(service: &str, entry: &str) -> Result<(String, String), SpecError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(SpecError::InvalidEnv {
            service: service.to_string(),
            entry: entry.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dashboard_services;

    fn service(name: &str, port: u16) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            command: vec!["python3".to_string(), "app.py".to_string()],
            working_dir: None,
            port,
            description: None,
            env: Vec::new(),
            readiness: ReadinessConfig::Disabled,
        }
    }

    #[test]
    fn test_dashboard_table_is_valid() {
        let specs = build_specs(&dashboard_services(), Path::new("/srv/dashboard")).unwrap();

        assert_eq!(specs.len(), 7);
        let names: Vec<_> = specs.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "homepage",
                "allothers",
                "interactiveApp",
                "interactiveApp2",
                "segmentcountry",
                "segmentyear",
                "continentsCountries"
            ]
        );
        assert_eq!(specs[0].working_dir, PathBuf::from("/srv/dashboard/frontend"));
        assert_eq!(specs[0].readiness, ReadinessProbe::TcpConnect);
        assert_eq!(specs[1].url(), "http://localhost:8080");
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let services = vec![service("a", 8080), service("b", 8081), service("c", 8080)];

        let err = build_specs(&services, Path::new(".")).unwrap_err();
        assert_eq!(
            err,
            SpecError::DuplicatePort {
                port: 8080,
                first: "a".to_string(),
                second: "c".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let services = vec![service("api", 8080), service("api", 8081)];

        let err = build_specs(&services, Path::new(".")).unwrap_err();
        assert_eq!(
            err,
            SpecError::DuplicateName {
                name: "api".to_string()
            }
        );
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut nameless = service("  ", 8080);
        nameless.name = "  ".to_string();
        assert_eq!(
            build_specs(&[nameless], Path::new(".")).unwrap_err(),
            SpecError::EmptyName { index: 0 }
        );

        let mut no_command = service("api", 8080);
        no_command.command.clear();
        assert!(matches!(
            build_specs(&[no_command], Path::new(".")),
            Err(SpecError::EmptyCommand { .. })
        ));

        assert!(matches!(
            build_specs(&[service("api", 0)], Path::new(".")),
            Err(SpecError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_env_entries_parsed() {
        let mut api = service("api", 8080);
        api.env = vec!["MODE=dev".to_string(), "EMPTY=".to_string()];
        let specs = build_specs(&[api.clone()], Path::new(".")).unwrap();
        assert_eq!(
            specs[0].env,
            vec![
                ("MODE".to_string(), "dev".to_string()),
                ("EMPTY".to_string(), String::new())
            ]
        );

        api.env = vec!["NOEQUALS".to_string()];
        assert!(matches!(
            build_specs(&[api], Path::new(".")),
            Err(SpecError::InvalidEnv { .. })
        ));
    }

    #[test]
    fn test_port_placeholder_substituted() {
        let spec = ServiceSpec::new("api", 9000, &["server", "--port", "{port}", "--bind=0.0.0.0:{port}"]);

        assert_eq!(
            spec.resolved_args(),
            vec!["--port", "9000", "--bind=0.0.0.0:9000"]
        );
        assert_eq!(spec.command_line(), "server --port 9000 --bind=0.0.0.0:9000");
    }

    #[test]
    fn test_order_preserved() {
        let services = vec![service("z", 9003), service("a", 9001), service("m", 9002)];
        let specs = build_specs(&services, Path::new(".")).unwrap();

        let names: Vec<_> = specs.iter().map(|spec| spec.name.clone()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }
}

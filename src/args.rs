use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

/// Command-line flags for the desktop-side tunnel engine.
///
/// Most of these are only bootstrap defaults: once a config file is loaded,
/// its `addr`/`port`/`host`/`bind` directives take precedence, since the
/// file is the live-reloadable source of truth and the flags merely let the
/// process start with no config file present yet.
#[derive(Parser, Debug, Clone)]
#[command(name = "docker-connector")]
#[command(about = "Bridges a host network interface to a container-runtime VM's bridge network")]
pub struct Args {
    #[arg(long = "config", default_value = "docker-connector.conf", env = "DOCKER_CONNECTOR_CONFIG")]
    pub config: PathBuf,

    #[arg(long = "watch", default_value_t = true, action = clap::ArgAction::Set)]
    pub watch: bool,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    #[arg(long = "addr", default_value = "192.168.251.1/24")]
    pub addr: String,

    #[arg(long = "port", default_value_t = 2511)]
    pub port: u16,

    #[arg(long = "host", default_value = "127.0.0.1")]
    pub host: Ipv4Addr,

    #[arg(long = "bind", default_value_t = true, action = clap::ArgAction::Set)]
    pub bind: bool,

    #[arg(long = "cli", help = "fixed in-VM client address; disables memo persistence")]
    pub cli: Option<String>,

    #[arg(long = "expose", help = "listen address for the accessor registration boundary")]
    pub expose: Option<String>,
}

impl Args {
    /// Resolves `-config` the way a service-launched binary needs: a
    /// relative path is anchored to the executable's own directory, not
    /// whatever the process's cwd happened to be at launch (§6). An
    /// already-absolute path is returned unchanged.
    pub fn resolved_config_path(&self) -> PathBuf {
        if self.config.is_absolute() {
            return self.config.clone();
        }

        match std::env::current_exe().and_then(|p| p.canonicalize()) {
            Ok(exe) => match exe.parent() {
                Some(dir) => dir.join(&self.config),
                None => self.config.clone(),
            },
            Err(_) => self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_config(config: &str) -> Args {
        Args {
            config: PathBuf::from(config),
            watch: true,
            log_level: "info".to_string(),
            log_file: None,
            addr: "192.168.251.1/24".to_string(),
            port: 2511,
            host: "127.0.0.1".parse().unwrap(),
            bind: true,
            cli: None,
            expose: None,
        }
    }

    #[test]
    fn absolute_config_path_is_unchanged() {
        let args = args_with_config("/etc/docker-connector.conf");
        assert_eq!(args.resolved_config_path(), PathBuf::from("/etc/docker-connector.conf"));
    }

    #[test]
    fn relative_config_path_is_anchored_to_the_executable_directory() {
        let args = args_with_config("docker-connector.conf");
        let resolved = args.resolved_config_path();

        let exe_dir = std::env::current_exe().unwrap().canonicalize().unwrap().parent().unwrap().to_path_buf();
        assert_eq!(resolved, exe_dir.join("docker-connector.conf"));
    }
}

use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `warden-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for local use.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "warden-server",
    version,
    about = "An access-controlled gRPC service with live call auditing"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:8082"))]
    pub server_addr: String,

    /// Access-control policy as an inline JSON document, mapping each
    /// consumer to the method patterns it may call.
    ///
    /// Example: `{"biz_admin": ["/warden.Biz/*"]}`
    ///
    /// Environment variable: `WARDEN_ACL`
    #[arg(long, env = "WARDEN_ACL", conflicts_with = "acl_file")]
    pub acl: Option<String>,

    /// Path to a file holding the access-control policy.
    ///
    /// Environment variable: `WARDEN_ACL_FILE`
    #[arg(long, env = "WARDEN_ACL_FILE")]
    pub acl_file: Option<PathBuf>,

    /// Capacity of each `Admin.Logging` subscriber queue.
    ///
    /// A subscriber whose queue fills up is disconnected with
    /// `RESOURCE_EXHAUSTED`; other subscribers are unaffected.
    ///
    /// Environment variable: `LOG_QUEUE_CAPACITY`
    #[arg(long, env = "LOG_QUEUE_CAPACITY", default_value_t = 1024)]
    pub log_queue_capacity: usize,

    /// Number of snapshots buffered per `Admin.Statistics` stream before the
    /// ticker waits for the client.
    ///
    /// Environment variable: `STATS_BUFFER_SIZE`
    #[arg(long, env = "STATS_BUFFER_SIZE", default_value_t = 4)]
    pub stats_buffer_size: usize,

    /// Seconds to wait for the event hub to drain during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    /// Raw policy document; parsed by the lifecycle before binding.
    pub acl: String,
    pub log_queue_capacity: usize,
    pub stats_buffer_size: usize,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Configuration with defaults for everything but the address and policy.
    pub fn new(server_addr: impl Into<String>, acl: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            acl: acl.into(),
            log_queue_capacity: 1024,
            stats_buffer_size: 4,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.log_queue_capacity == 0 {
            bail!("LOG_QUEUE_CAPACITY must be greater than 0");
        }

        if args.stats_buffer_size == 0 {
            bail!("STATS_BUFFER_SIZE must be greater than 0");
        }

        let acl = match (args.acl, args.acl_file) {
            (Some(acl), None) => acl,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read ACL file {}", path.display()))?,
            (Some(_), Some(_)) => bail!("WARDEN_ACL and WARDEN_ACL_FILE are mutually exclusive"),
            (None, None) => bail!("an access policy is required (WARDEN_ACL or WARDEN_ACL_FILE)"),
        };

        Ok(Self {
            server_addr: args.server_addr,
            acl,
            log_queue_capacity: args.log_queue_capacity,
            stats_buffer_size: args.stats_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(
            std::iter::once("warden-server").chain(args.iter().copied()),
        )?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn accepts_inline_policy() {
        let config = parse(&["--acl", r#"{"a": []}"#, "--server-addr", "127.0.0.1:0"]).unwrap();
        assert_eq!(config.acl, r#"{"a": []}"#);
        assert_eq!(config.server_addr, "127.0.0.1:0");
        assert_eq!(config.log_queue_capacity, 1024);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = parse(&["--acl", "{}", "--log-queue-capacity", "0"]).unwrap_err();
        assert!(err.to_string().contains("LOG_QUEUE_CAPACITY"));
    }

    #[test]
    fn rejects_both_policy_sources() {
        assert!(parse(&["--acl", "{}", "--acl-file", "/tmp/acl.json"]).is_err());
    }

    #[test]
    fn reports_unreadable_policy_file() {
        let err = parse(&["--acl-file", "/definitely/not/here.json"]).unwrap_err();
        assert!(err.to_string().contains("failed to read ACL file"));
    }
}

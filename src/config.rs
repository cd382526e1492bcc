use clap::Parser;
use std::path::PathBuf;

/// Blind certification service provider.
#[derive(Clone, Parser)]
#[command(name = "blindcsp")]
#[command(about = "Issues election-scoped blind and plain ECDSA signatures", long_about = None)]
pub struct Config {
    /// Root private key, 64 hex characters
    #[arg(long, env = "CSP_KEY", hide_env_values = true)]
    pub key: String,

    /// Directory holding the token store
    #[arg(long, env = "CSP_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// HTTP listen port
    #[arg(long, env = "CSP_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Authorization handler name
    #[arg(long, env = "CSP_HANDLER", default_value = "dummy")]
    pub handler: String,

    /// Log filter, e.g. `info` or `blindcsp=debug`
    #[arg(long, env = "CSP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg = Config::try_parse_from(["blindcsp", "--key", "ab"]).unwrap();
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.handler, "dummy");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "blindcsp",
            "--key",
            "ab",
            "--port",
            "8080",
            "--handler",
            "ipaddr",
        ])
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.handler, "ipaddr");
    }
}

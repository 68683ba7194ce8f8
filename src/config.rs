use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};

use crate::credentials::CredentialSet;
use crate::filter::DomainBlacklist;

/// Command line interface configuration
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Forwarding HTTP tunnel proxy",
    long_about = "httun accepts HTTP/1.x proxy requests (CONNECT or plain), optionally \
enforces Basic proxy authentication and a domain blacklist, then relays bytes \
bidirectionally between client and target.\n\nFeatures:\n\
- Optional Basic proxy auth (--credentials, --gen-credential)\n\
- Exact-match domain blacklist (--black-domains-file)\n\
- Active-tunnel gauge over a metrics endpoint (--metrics-listen)\n"
)]
pub struct Cli {
    /// Address for the proxy TCP listener
    #[arg(long, env = "HTTUN_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Optional address for the metrics HTTP listener
    #[arg(long = "metrics-listen", env = "HTTUN_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,

    /// Basic credentials as comma-separated "user:pass" entries
    #[arg(long, env = "HTTUN_CREDENTIALS", value_delimiter = ',')]
    pub credentials: Option<Vec<String>>,

    /// Generate one random credential pair and log it at startup
    #[arg(long = "gen-credential", env = "HTTUN_GEN_CREDENTIAL", default_value_t = false)]
    pub gen_credential: bool,

    /// File of newline-delimited hostnames that must not be proxied
    #[arg(long = "black-domains-file", env = "HTTUN_BLACK_DOMAINS_FILE")]
    pub black_domains_file: Option<PathBuf>,
}

/// Proxy server configuration derived from CLI arguments
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub metrics_addr: Option<SocketAddr>,
    pub credentials: CredentialSet,
    pub blacklist: DomainBlacklist,
}

impl ProxyConfig {
    /// Create ProxyConfig from CLI arguments. The blacklist file is read
    /// once here; the resulting sets are immutable for the server's life.
    pub fn from_cli(args: Cli) -> color_eyre::Result<Self> {
        let listen_addr = args
            .listen
            .parse()
            .map_err(|_| eyre!("invalid listen address {:?}", args.listen))?;

        let metrics_addr = args
            .metrics_listen
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .map_err(|_| eyre!("invalid metrics address {:?}", addr))
            })
            .transpose()?;

        let pairs = args.credentials.unwrap_or_default();
        for pair in &pairs {
            if !pair.contains(':') {
                return Err(eyre!("invalid credential {:?}, expected user:pass", pair));
            }
        }
        let credentials = CredentialSet::new(pairs, args.gen_credential);

        let blacklist = match &args.black_domains_file {
            Some(path) => DomainBlacklist::load(path).wrap_err_with(|| {
                format!("failed to read black domains file {}", path.display())
            })?,
            None => DomainBlacklist::default(),
        };

        Ok(Self {
            listen_addr,
            metrics_addr,
            credentials,
            blacklist,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("httun").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::from_cli(parse_cli(&[])).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert!(config.metrics_addr.is_none());
        assert!(config.credentials.is_empty());
        assert!(config.blacklist.is_empty());
    }

    #[test]
    fn test_credential_list_is_split_on_commas() {
        let config = ProxyConfig::from_cli(parse_cli(&["--credentials", "a:1,b:2"])).unwrap();

        assert_eq!(config.credentials.len(), 2);
        assert!(!config.credentials.is_empty());
    }

    #[test]
    fn test_invalid_credential_format_is_rejected() {
        let result = ProxyConfig::from_cli(parse_cli(&["--credentials", "no-colon-here"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_listen_address_is_rejected() {
        let result = ProxyConfig::from_cli(parse_cli(&["--listen", "not-an-address"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_metrics_listen_parsed() {
        let config =
            ProxyConfig::from_cli(parse_cli(&["--metrics-listen", "127.0.0.1:9100"])).unwrap();
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
    }

    #[test]
    fn test_gen_credential_populates_set() {
        let config = ProxyConfig::from_cli(parse_cli(&["--gen-credential"])).unwrap();
        assert_eq!(config.credentials.len(), 1);
    }

    #[test]
    fn test_blacklist_file_loaded_once() {
        let path = std::env::temp_dir().join(format!("httun-blacklist-{}.txt", std::process::id()));
        std::fs::write(&path, "one.com\n\ntwo.com\n").unwrap();

        let config = ProxyConfig::from_cli(parse_cli(&[
            "--black-domains-file",
            path.to_str().unwrap(),
        ]))
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.blacklist.len(), 2);
        assert!(config.blacklist.is_blocked("one.com"));
        assert!(config.blacklist.is_blocked("two.com"));
    }

    #[test]
    fn test_missing_blacklist_file_is_an_error() {
        let result = ProxyConfig::from_cli(parse_cli(&[
            "--black-domains-file",
            "/nonexistent/httun-blacklist.txt",
        ]));
        assert!(result.is_err());
    }
}

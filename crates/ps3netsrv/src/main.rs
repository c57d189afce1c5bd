use {
    clap::Parser,
    log::{error, info},
    ps3net::{Root, ServerConfig, Whitelist, srv::srv_async},
    std::path::PathBuf,
};

mod daemon;

#[derive(Debug, clap::Parser)]
#[command(
    name = "ps3netsrv",
    version,
    about = "Serve a directory to PS3 network clients",
    after_help = "The whitelist has the form x.x.x.x where x is 0-255 or *,\n\
                  e.g. \"192.168.1.*\" admits 192.168.1.0-192.168.1.255."
)]
struct Cli {
    /// Run in the background
    #[arg(short, long)]
    daemon: bool,

    /// Port to listen on
    #[arg(
        short,
        long,
        default_value_t = ps3net::DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(ps3net::LOWEST_PORT as i64..),
    )]
    port: u16,

    /// Only accept clients whose IPv4 address matches
    #[arg(short, long)]
    whitelist: Option<Whitelist>,

    /// Directory to serve
    rootdirectory: PathBuf,
}

impl Cli {
    fn config(&self) -> ServerConfig {
        ServerConfig::new()
            .port(self.port)
            .whitelist(self.whitelist)
    }
}

async fn ps3netsrv_main(cli: Cli) -> ps3net::Result<i32> {
    let root = Root::new(&cli.rootdirectory).await?;
    nix::unistd::chdir(root.path()).map_err(std::io::Error::from)?;

    let config = cli.config();
    if let Some(whitelist) = &config.whitelist {
        info!("Whitelist: {}", whitelist);
    }
    info!("Listening on {}", config.addr);

    srv_async(root, config).await.and(Ok(0))
}

fn main() {
    let cli = Cli::parse();

    if cli.daemon {
        if let Err(e) = daemon::daemonize() {
            eprintln!("Error: failed to daemonize: {}", e);
            std::process::exit(-1);
        }
    }

    env_logger::init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(-1);
        }
    };

    let exit_code = runtime.block_on(ps3netsrv_main(cli)).unwrap_or_else(|e| {
        error!("{}", e);
        eprintln!("Error: {:?}", e);
        -1
    });

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["ps3netsrv", "/srv/games"]).unwrap();
        assert!(!cli.daemon);
        assert_eq!(cli.port, 38008);
        assert!(cli.whitelist.is_none());
        assert_eq!(cli.rootdirectory, PathBuf::from("/srv/games"));
        assert_eq!(cli.config().addr.port(), 38008);
    }

    #[test]
    fn all_options() {
        let cli = Cli::try_parse_from([
            "ps3netsrv", "-d", "-p", "40000", "-w", "192.168.1.*", "/srv/games",
        ])
        .unwrap();
        assert!(cli.daemon);
        assert_eq!(cli.port, 40000);

        let config = cli.config();
        assert_eq!(config.addr.port(), 40000);
        let whitelist = config.whitelist.unwrap();
        assert!(whitelist.allows("192.168.1.20".parse().unwrap()));
        assert!(!whitelist.allows("192.168.2.20".parse().unwrap()));
    }

    #[test]
    fn port_bounds() {
        assert!(Cli::try_parse_from(["ps3netsrv", "-p", "1023", "/srv"]).is_err());
        assert!(Cli::try_parse_from(["ps3netsrv", "-p", "1024", "/srv"]).is_ok());
        assert!(Cli::try_parse_from(["ps3netsrv", "-p", "65535", "/srv"]).is_ok());
        assert!(Cli::try_parse_from(["ps3netsrv", "-p", "65536", "/srv"]).is_err());
    }

    #[test]
    fn bad_whitelist() {
        assert!(Cli::try_parse_from(["ps3netsrv", "-w", "192.168.1", "/srv"]).is_err());
        assert!(Cli::try_parse_from(["ps3netsrv", "-w", "300.*.*.*", "/srv"]).is_err());
    }

    #[test]
    fn root_required() {
        assert!(Cli::try_parse_from(["ps3netsrv"]).is_err());
    }
}

use std::path::PathBuf;

use {
    adgate_config::{AdgateConfig, LoggingConfig},
    adgate_filter::{BlocklistEngine, RequestContext, Verdict},
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::EnvFilter,
};

/// Ad and tracker filtering reverse proxy.
///
/// Classifies every proxied URL against local domain and pattern lists (plus
/// an optional remote EasyList), answers blocked requests directly and
/// forwards the rest to their origin.
#[derive(Parser, Debug)]
#[command(name = "adgate", version)]
struct Cli {
    /// Path to a config file (TOML, YAML or JSON). Defaults to discovery.
    #[arg(long, short, global = true, env = "ADGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the filtering proxy and admin API (the default).
    Serve(ServeArgs),
    /// Classify a single URL against the local lists and print the verdict.
    Check(CheckArgs),
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding domains.txt, patterns.txt and whitelist.txt.
    #[arg(long)]
    lists_dir: Option<PathBuf>,

    /// Skip the remote filter list entirely.
    #[arg(long)]
    no_remote: bool,
}

#[derive(clap::Args, Debug)]
struct CheckArgs {
    /// URL (or bare host) to classify.
    url: String,

    /// User agent sent along with the URL.
    #[arg(long)]
    user_agent: Option<String>,

    /// Referer sent along with the URL.
    #[arg(long)]
    referer: Option<String>,

    /// Directory holding the local lists.
    #[arg(long)]
    lists_dir: Option<PathBuf>,

    /// Also merge the remote filter list before classifying.
    #[arg(long)]
    remote: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = adgate_config::load(cli.config.as_deref()).context("failed to load config")?;
    init_tracing(&config.logging);

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(config, args).await,
        Command::Check(args) => check(config, args).await,
    }
}

async fn serve(mut config: AdgateConfig, args: ServeArgs) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.lists_dir {
        config.lists.dir = Some(dir);
    }
    if args.no_remote {
        config.remote.url = None;
    }

    info!(
        environment = %config.server.environment,
        match_mode = %config.lists.match_mode,
        "starting adgate"
    );
    adgate_gateway::start_gateway(config).await
}

async fn check(config: AdgateConfig, args: CheckArgs) -> Result<()> {
    let url = args.url.clone();
    let verdict = classify_one(config, args).await?;
    let output = serde_json::json!({
        "url": url,
        "blocked": verdict.blocked,
        "reason": verdict.reason,
        "rule": verdict.rule,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Build a local engine for `args` and classify its URL once.
async fn classify_one(mut config: AdgateConfig, args: CheckArgs) -> Result<Verdict> {
    if let Some(dir) = args.lists_dir {
        config.lists.dir = Some(dir);
    }
    if !args.remote {
        config.remote.url = None;
    }
    // A one-shot lookup never writes the lists back.
    config.lists.persist_changes = false;

    let engine = BlocklistEngine::new(config.engine_options()).context("failed to build engine")?;
    let ctx = RequestContext {
        user_agent: args.user_agent,
        referer: args.referer,
    };
    Ok(engine.check(&args.url, &ctx).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        super::*,
        adgate_filter::{BlockReason, BlockRule},
    };

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "adgate",
            "serve",
            "--port",
            "8080",
            "--bind",
            "127.0.0.1",
            "--no-remote",
        ])
        .unwrap();
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1"));
        assert!(args.no_remote);
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["adgate"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn check_takes_url_and_agent() {
        let cli = Cli::try_parse_from([
            "adgate",
            "--config",
            "adgate.toml",
            "check",
            "https://doubleclick.net/ad.js",
            "--user-agent",
            "Googlebot/2.1",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("adgate.toml")));
        let Some(Command::Check(args)) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.url, "https://doubleclick.net/ad.js");
        assert_eq!(args.user_agent.as_deref(), Some("Googlebot/2.1"));
        assert!(!args.remote);
    }

    fn check_args(url: &str, lists_dir: &std::path::Path) -> CheckArgs {
        CheckArgs {
            url: url.into(),
            user_agent: None,
            referer: None,
            lists_dir: Some(lists_dir.to_path_buf()),
            remote: false,
        }
    }

    #[tokio::test]
    async fn check_reads_local_lists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("domains.txt"), "blocked.example\n").unwrap();
        std::fs::write(dir.path().join("patterns.txt"), "").unwrap();

        let verdict = classify_one(
            AdgateConfig::default(),
            check_args("https://blocked.example/", dir.path()),
        )
        .await
        .unwrap();
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::DomainMatch);
        assert_eq!(verdict.rule, Some(BlockRule::Domain("blocked.example".into())));

        // Only the local file is loaded, so built-in defaults do not apply.
        let verdict = classify_one(
            AdgateConfig::default(),
            check_args("https://doubleclick.net/", dir.path()),
        )
        .await
        .unwrap();
        assert!(!verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::None);

        check(
            AdgateConfig::default(),
            check_args("https://blocked.example/", dir.path()),
        )
        .await
        .unwrap();
    }
}

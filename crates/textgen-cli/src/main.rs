use std::io::Write as _;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use textgen_common::config::ServerConfig;
use textgen_common::GenerationState;
use textgen_core::{ReplyRequest, SessionManager, TextGenerator};

#[derive(Parser, Debug)]
#[command(name = "textgen", version, about = "Text generation control loop and server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API.
    Serve,
    /// Generate one reply locally.
    Run(RunArgs),
    /// Print the token ids of a prompt.
    Tokens(TokensArgs),
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(short, long)]
    prompt: String,
    /// Print partial replies as they arrive.
    #[arg(long)]
    stream: bool,
    /// -1 draws a random seed.
    #[arg(long, allow_hyphen_values = true)]
    seed: Option<i64>,
    #[arg(long)]
    max_tokens_second: Option<f64>,
    #[arg(short = 'n', long)]
    max_new_tokens: Option<u64>,
    /// Stop generating at this string; repeatable.
    #[arg(long = "stop")]
    stop: Vec<String>,
    /// Treat the prompt as a chat turn.
    #[arg(long)]
    chat: bool,
}

#[derive(Args, Debug)]
struct TokensArgs {
    #[arg(short, long)]
    prompt: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    textgen_obs::init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve => serve().await,
        Commands::Run(args) => tokio::task::spawn_blocking(move || run_local(args)).await?,
        Commands::Tokens(args) => tokens(args),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };
    textgen_obs::shutdown_tracing();
    result
}

async fn serve() -> anyhow::Result<()> {
    let cfg = ServerConfig::load()?;
    let app = textgen_api::router(&cfg);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!("listening on http://{}", cfg.bind_addr);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

fn local_generator(cfg: &ServerConfig) -> TextGenerator {
    TextGenerator::new(SessionManager::new()).with_model(textgen_api::select_model(cfg))
}

fn run_local(args: RunArgs) -> anyhow::Result<()> {
    let cfg = ServerConfig::load()?;
    let generator = local_generator(&cfg);

    let mut state = cfg.defaults.merged(&GenerationState::new().with("stream", args.stream));
    if let Some(seed) = args.seed {
        state.set("seed", seed);
    }
    if let Some(cap) = args.max_tokens_second {
        state.set("max_tokens_second", cap);
    }
    if let Some(n) = args.max_new_tokens {
        state.set("max_new_tokens", n);
    }

    let mut request = ReplyRequest::new(args.prompt, state).with_stopping_strings(args.stop);
    if args.chat {
        request = request.chat();
    }

    let mut stdout = std::io::stdout().lock();
    let mut shown = String::new();
    for reply in generator.generate_reply(request)? {
        if !args.stream {
            shown = reply;
            continue;
        }
        match reply.strip_prefix(shown.as_str()) {
            Some(delta) => write!(stdout, "{delta}")?,
            None => write!(stdout, "\n{reply}")?,
        }
        stdout.flush()?;
        shown = reply;
    }
    if args.stream {
        writeln!(stdout)?;
    } else {
        writeln!(stdout, "{shown}")?;
    }
    tracing::debug!("seed {}", generator.session().current_seed());
    Ok(())
}

fn tokens(args: TokensArgs) -> anyhow::Result<()> {
    let cfg = ServerConfig::load()?;
    print!("{}", local_generator(&cfg).get_token_ids(&args.prompt)?);
    Ok(())
}

//! panda - swap a payload with someone you share only a passphrase with, through an untrusted rendezvous server.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand_core::OsRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use panda::config::ClientConfig;
use panda::derive::{backend_for, run_stretch_worker};
use panda::{token, Appointment, Card, CardDeckSummary, HttpMeetingPlace, KeyExchange, SharedSecret, Snapshot, StretchPolicy};

#[derive(Parser)]
#[command(name = "panda", version, about = "Exchange a payload using only a shared secret and a rendezvous server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a new random secret token with a typo-catching checksum
    Token {
        /// Emit the no-stretch form. Older peers don't understand it and will derive different keys.
        #[arg(long)]
        strong: bool,
    },

    /// Check whether a secret would be accepted
    Check {
        secret: String,
    },

    /// Run or resume a key exchange
    Exchange(ExchangeArgs),

    /// Run the password stretch for a parent process (stdin -> stdout)
    #[command(hide = true)]
    StretchWorker,
}

#[derive(Clone, Copy, ValueEnum)]
enum StretchArg {
    Auto,
    InProcess,
    Subprocess,
}

impl From<StretchArg> for StretchPolicy {
    fn from(arg: StretchArg) -> Self {
        match arg {
            StretchArg::Auto => StretchPolicy::Auto,
            StretchArg::InProcess => StretchPolicy::InProcess,
            StretchArg::Subprocess => StretchPolicy::Subprocess,
        }
    }
}

#[derive(Args)]
struct ExchangeArgs {
    /// Rendezvous server base URL
    #[arg(long, env = "PANDA_SERVER")]
    server: Option<String>,

    /// Shared passphrase or token
    #[arg(long, env = "PANDA_SECRET", conflicts_with = "cards")]
    secret: Option<String>,

    /// Cards seen from the shuffled decks, e.g. "AS 2H TD"
    #[arg(long)]
    cards: Option<String>,

    /// Number of decks the cards were drawn from
    #[arg(long, default_value_t = 1)]
    decks: u32,

    /// Agreed meeting time, "YYYY-MM-DD HH:MM"
    #[arg(long)]
    appointment: Option<String>,

    /// File holding the payload to hand to the peer
    #[arg(long)]
    payload: Option<PathBuf>,

    /// State file, rewritten after every completed step
    #[arg(long)]
    state: PathBuf,

    /// Continue from the state file instead of starting over
    #[arg(long)]
    resume: bool,

    /// Where to write the peer's payload (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the meeting place message size
    #[arg(long)]
    padding: Option<usize>,

    /// Where the password stretch runs
    #[arg(long, value_enum)]
    stretch: Option<StretchArg>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("PANDA_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Token { strong } => {
            let token = if strong { token::generate_strong(&mut OsRng)? } else { token::generate(&mut OsRng)? };
            println!("{}", token);
            Ok(())
        }
        Command::Check { secret } => {
            if !token::is_acceptable(&secret) {
                bail!("secret looks like a token but its checksum is wrong; check for typos");
            }
            if token::validate(&secret) {
                println!("valid token{}", if token::is_strong(&secret) { " (no stretching)" } else { "" });
            } else {
                println!("acceptable passphrase");
            }
            Ok(())
        }
        Command::Exchange(args) => exchange(args),
        Command::StretchWorker => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            run_stretch_worker(stdin.lock(), stdout.lock()).context("stretch worker failed")?;
            Ok(())
        }
    }
}

fn shared_secret(args: &ExchangeArgs) -> Result<SharedSecret> {
    let secret = match (&args.secret, &args.cards) {
        (Some(text), None) => SharedSecret::text(text.as_str())?,
        (None, Some(cards)) => {
            let cards = cards
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|c| !c.is_empty())
                .map(|c| c.parse::<Card>())
                .collect::<Result<Vec<_>, _>>()?;
            SharedSecret::cards(CardDeckSummary::from_cards(args.decks, &cards)?)
        }
        _ => bail!("give exactly one of --secret or --cards"),
    };
    Ok(match &args.appointment {
        Some(when) => secret.with_appointment(when.parse::<Appointment>()?),
        None => secret,
    })
}

fn write_state(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp).with_context(|| format!("failed to open {}", tmp.display()))?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// spawn_saver keeps the state file in step with the snapshot until `done` is set
fn spawn_saver(snapshot: Snapshot, path: PathBuf, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut seen = 0;
        while !done.load(Ordering::SeqCst) {
            let (version, bytes) = snapshot.wait_newer(seen, Duration::from_millis(500));
            if version > seen {
                match write_state(&path, &bytes) {
                    Ok(()) => seen = version,
                    Err(error) => warn!("failed to save state: {error:#}"),
                }
            }
        }
    })
}

fn exchange(args: ExchangeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path).with_context(|| format!("failed to read config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(server) = &args.server {
        config.server_url = Some(server.clone());
    }
    if let Some(padding) = args.padding {
        config.padding = padding;
    }
    if let Some(stretch) = args.stretch {
        config.stretch = stretch.into();
    }
    let server = config.server_url.clone().context("no rendezvous server given (--server or config)")?;
    let place = HttpMeetingPlace::new(&server, config.padding, config.poll_interval())?;

    let kx = if args.resume {
        let bytes = fs::read(&args.state).with_context(|| format!("failed to read state {}", args.state.display()))?;
        KeyExchange::unmarshal(OsRng, place, &bytes)?
    } else {
        if args.state.exists() {
            bail!("{} already exists; pass --resume to continue it", args.state.display());
        }
        let payload = match &args.payload {
            Some(path) => fs::read(path).with_context(|| format!("failed to read payload {}", path.display()))?,
            None => bail!("--payload is required for a new exchange"),
        };
        KeyExchange::new(OsRng, place, shared_secret(&args)?, payload)?
    };
    let mut kx = kx
        .with_stretch_backend(backend_for(config.stretch)?)
        .insecure_fast_derivation(config.insecure_fast_derivation);
    info!(status = ?kx.status(), server = %server, "starting key exchange");

    let shutdown = kx.shutdown().clone();
    ctrlc::set_handler(move || {
        info!("interrupted, stopping after the current step");
        shutdown.request();
    })
    .context("failed to install interrupt handler")?;

    let snapshot = kx.snapshot();
    write_state(&args.state, &snapshot.get())?;
    let done = Arc::new(AtomicBool::new(false));
    let saver = spawn_saver(snapshot.clone(), args.state.clone(), done.clone());

    let result = kx.run();
    done.store(true, Ordering::SeqCst);
    if saver.join().is_err() {
        warn!("state saver thread panicked");
    }
    write_state(&args.state, &snapshot.get())?;

    if matches!(&result, Err(error) if error.is_shutdown()) {
        bail!("key exchange interrupted; run again with --resume to continue from {}", args.state.display());
    }
    let reply = result.context("key exchange failed")?;
    match &args.output {
        Some(path) => fs::write(path, &reply).with_context(|| format!("failed to write {}", path.display()))?,
        None => io::stdout().write_all(&reply)?,
    }
    info!(len = reply.len(), "received peer's payload");
    Ok(())
}

mod cli;
mod commands;
mod context;

use std::io::Write;
use std::process::ExitCode;

use commune_common::CommuneError;
use tracing_subscriber::EnvFilter;

use cli::Command;
use context::AppContext;

fn init_logging(args: &cli::Args, config: Option<&commune_config::CommuneConfig>) {
    let fallback = config
        .map(|c| c.logging.level.directive())
        .unwrap_or("commune=info");
    let directive = args.log_level.as_deref().unwrap_or(fallback);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                directive
                    .parse()
                    .unwrap_or_else(|_| "commune=info".parse().expect("static directive")),
            ),
        )
        .init();
}

async fn run(args: cli::Args, config: commune_config::CommuneConfig) -> Result<(), CommuneError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Command::Config = args.command {
        return commands::config(&config, &mut out);
    }
    let mut ctx = AppContext::connect(config).await?;

    let result = match args.command {
        Command::Whoami => commands::whoami(&ctx, &mut out).await,
        Command::Identify {
            email,
            name,
            anonymous,
        } => commands::identify(&ctx, &mut out, &email, &name, anonymous).await,
        Command::SignOut => commands::sign_out(&ctx, &mut out).await,
        Command::Notifications { watch, mark_all } => {
            commands::notifications(&mut ctx, &mut out, watch, mark_all).await
        }
        Command::Inbox => commands::inbox(&ctx, &mut out).await,
        Command::Chat {
            user,
            message,
            image,
        } => {
            commands::chat(
                &mut ctx,
                &mut out,
                &user,
                message.as_deref(),
                image.as_deref(),
            )
            .await
        }
        Command::Follow { user, status } => commands::follow(&ctx, &mut out, &user, status).await,
        Command::Presence { path } => commands::presence(&mut ctx, &mut out, &path).await,
        Command::Config => Ok(()),
    };

    for toast in ctx.toasts.drain() {
        eprintln!("[{:?}] {}: {}", toast.level, toast.title, toast.body);
    }
    let _ = out.flush();
    ctx.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    // Variables from .env never override the real environment.
    let _ = dotenvy::dotenv();

    let args = cli::parse();

    let config = commune_config::load_config(args.config.as_deref());
    init_logging(&args, config.as_ref().ok());
    tracing::info!("Commune v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Config load failed");
            eprintln!("commune: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("commune: {e}");
            ExitCode::FAILURE
        }
    }
}

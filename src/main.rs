//! incognide-sessions binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use incognide_sessions::api::{self, AppState, ServerConfig};
use incognide_sessions::backend::BackendClient;
use incognide_sessions::cli;
use incognide_sessions::config::Config;
use incognide_sessions::handle::DefaultFactory;
use incognide_sessions::ipc::RequestRouter;
use incognide_sessions::logging;
use incognide_sessions::session::SessionRegistry;
use incognide_sessions::supervisor::Supervisor;
use incognide_sessions::workspace::EnvironmentStore;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run with --help for usage.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_with_filter(config.log_filter()) {
        eprintln!("warning: logging already initialized: {}", e);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("incognide-sessions v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.bind_addr()?;
    let backend = BackendClient::detect(config.backend.url.as_deref(), config.request_timeout()).await?;

    let store = Arc::new(EnvironmentStore::new(config.workspace.environments_file()));
    let factory = DefaultFactory::new(
        backend.clone(),
        store,
        config.kernel.runtime_dir(),
        config.kernel.default_runtime(),
    );
    let supervisor = Supervisor::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(factory),
        config.supervisor_config(),
    );
    let router = RequestRouter::new(Arc::new(supervisor), Some(backend));
    let state = AppState::new(router, config.sessions.event_buffer);

    api::serve(
        ServerConfig::new(addr, config.server.graceful_shutdown),
        state,
    )
    .await?;

    info!("incognide-sessions stopped");
    Ok(())
}

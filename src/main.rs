use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::time::Duration;

use lessonpay::config::Config;
use lessonpay::db::{AppState, create_pool, init_db, queries};
use lessonpay::handlers;
use lessonpay::notify::Notifier;
use lessonpay::orchestrator;

#[derive(Parser, Debug)]
#[command(name = "lessonpay")]
#[command(about = "Payment-gated booking engine for driving lessons")]
struct Cli {
    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,

    /// Print open reconciliation items as JSON and exit
    #[arg(long)]
    list_reconciliation: bool,
}

fn spawn_expiry_sweeper(state: AppState, every: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;

            match state.db.get() {
                Ok(conn) => {
                    if let Err(e) = orchestrator::sweep_expired_sessions(&conn, queries::now()) {
                        tracing::warn!("Failed to expire stale payment sessions: {}", e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to get db connection for expiry sweep: {}", e);
                }
            }
        }
    });

    tracing::info!(
        "Payment session expiry sweeper started (runs every {}s)",
        every.as_secs()
    );
}

fn print_reconciliation(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection");
    let items = queries::list_open_reconciliation_items(&conn)
        .expect("Failed to list reconciliation items");
    if items.is_empty() {
        println!("No open reconciliation items");
        return;
    }
    for item in items {
        match serde_json::to_string(&item) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to serialize {}: {}", item.id, e),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lessonpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let http = reqwest::Client::new();
    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        currency: config.currency.clone(),
        session_ttl_secs: config.session_ttl_secs,
        gateways: config.gateways(&http),
        notifier: Notifier::new(
            http.clone(),
            config.notification_webhook_url.clone(),
            config.notification_sender.clone(),
        ),
    };

    if cli.list_reconciliation {
        print_reconciliation(&state);
        return;
    }

    if state.gateways.stripe.is_none() && !config.dev_mode {
        tracing::warn!("No payment gateway enabled: set STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET");
    }
    if !state.notifier.is_enabled() {
        tracing::info!("NOTIFICATION_WEBHOOK_URL not set, booking notifications disabled");
    }

    spawn_expiry_sweeper(state.clone(), Duration::from_secs(config.expiry_sweep_secs));

    let mut app = Router::new()
        .merge(handlers::public::router())
        // Webhook endpoints (signature auth)
        .merge(handlers::webhooks::router());

    if config.dev_mode {
        app = app.merge(handlers::dev::router());
        tracing::info!(
            "DEV endpoints enabled: POST /dev/mock-gateway/complete, GET /dev/mock-gateway/checkout/{{reference}}"
        );
    }

    let app = app.layer(TraceLayer::new_for_http()).with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cli.ephemeral && !config.dev_mode {
        tracing::warn!("--ephemeral flag ignored: not in dev mode (set LESSONPAY_ENV=dev)");
    }
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("LessonPay server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}

use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use token_gate::AppState;
use token_gate::handlers::eligibility::IntervalTicker;
use token_gate::handlers::registration::RegistrationPoller;
use token_gate::utils::env::EnvVars;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    let env_vars = match EnvVars::from_env() {
        Ok(env_vars) => env_vars,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let state = match AppState::new(env_vars).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            log::error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Reconciliation scheduler
    let scheduler = {
        let scheduler = state.scheduler.clone();
        let ticker = IntervalTicker::new(state.config.startup_delay, state.config.check_interval);
        let shutdown = shutdown_rx.clone();
        log::info!(
            "Reconciliation every {:?}, first run in {:?}",
            state.config.check_interval,
            state.config.startup_delay
        );
        tokio::spawn(async move { scheduler.run(ticker, shutdown).await })
    };

    // Registration dialogue
    let poller = if state.env_vars.disable_registration_bot {
        log::info!("Registration bot disabled");
        None
    } else {
        let poller = RegistrationPoller::new(state.telegram_client.clone(), state.dialogue.clone());
        Some(tokio::spawn(poller.run(shutdown_rx.clone())))
    };

    // Status API
    let server = if state.env_vars.port == 0 {
        log::info!("Status API disabled");
        None
    } else {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .merge(token_gate::routes::create_routes(state.clone()))
            .layer(cors);

        let addr = format!("0.0.0.0:{}", state.env_vars.port);
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                log::info!("Status API running on {}", addr);
                let mut shutdown = shutdown_rx.clone();
                Some(tokio::spawn(async move {
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown.wait_for(|stop| *stop).await;
                        })
                        .await;
                    if let Err(e) = result {
                        log::error!("Status API failed: {}", e);
                    }
                }))
            }
            Err(e) => {
                log::error!("Failed to bind status API on {}: {}", addr, e);
                None
            }
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutting down");
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler.await {
        log::error!("Scheduler task failed: {}", e);
    }
    for task in [poller, server].into_iter().flatten() {
        if let Err(e) = task.await {
            log::error!("Background task failed: {}", e);
        }
    }
}

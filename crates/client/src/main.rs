// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};

use tokenguard::client::ApiClient;
use tokenguard::config::{Command, Config};
use tokenguard::gate::ApiRequest;
use tokenguard::lifecycle::{BroadcastObserver, SessionObserver};
use tokenguard::persist::FilePersistence;
use tokenguard::recovery::PublicRoutes;
use tokenguard::store::TokenPersistence;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let token_file = config.token_file();
    let persistence = Arc::new(FilePersistence::open(&token_file)?);
    let observer = Arc::new(BroadcastObserver::default());
    let events = observer.subscribe();

    let client = ApiClient::builder()
        .base_url(&config.base_url)
        .refresh_path(&config.refresh_path)
        .login_path(&config.login_path)
        .timeout(config.timeout())
        .public_routes(PublicRoutes::new(config.public_paths()))
        .persistence(persistence as Arc<dyn TokenPersistence>)
        .observer(observer as Arc<dyn SessionObserver>)
        .session_config(config.session_config())
        .build()?;

    match config.command {
        Command::Login { email, password } => {
            client.login(email, password).await?;
            info!(path = %token_file.display(), "logged in");
            println!("logged in");
        }
        Command::Logout => {
            client.logout();
            println!("logged out");
        }
        Command::Status => {
            let active = client.resume().await?;
            let status = serde_json::json!({
                "status": client.session().status(),
                "authenticated": active,
                "token_file": token_file.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Get { path, public } => {
            let mut request = ApiRequest::get(path);
            if public {
                request = request.public();
            }
            println!("{}", client.text(request).await?);
        }
        Command::Post { path, body } => {
            let body: serde_json::Value = serde_json::from_str(&body)?;
            println!("{}", client.text(ApiRequest::post(path, body)).await?);
        }
        Command::Watch => watch(&client, events).await?,
    }

    client.session().shutdown();
    Ok(())
}

/// Keep the session fresh and print each session event as a JSON line.
async fn watch(
    client: &ApiClient,
    mut events: broadcast::Receiver<tokenguard::lifecycle::SessionEvent>,
) -> anyhow::Result<()> {
    client.session().watch_external_changes();
    if !client.resume().await? {
        anyhow::bail!("no session to watch, run `tokenguard login` first");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::json!({ "event": event }));
                    if !event.is_authenticated() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

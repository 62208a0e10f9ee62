mod api;
mod canvas;
mod chat;
mod config;
mod tree;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use futures::StreamExt;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::canvas::Canvas;
use crate::chat::ChatMessage;
use crate::chat::client::ChatClient;
use crate::chat::relay::RelayChatClient;
use crate::chat::xai::XaiChatClient;
use crate::config::{ChatConfig, Config};

#[derive(Parser)]
#[command(name = "tangent", about = "Branching conversations with an LLM")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
    /// Stream a one-off answer to stdout through the configured chat backend
    Ask {
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    // Default to Serve when no subcommand is given, but still allow --help
    // and --version to work.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 {
        Cli::Serve
    } else {
        Cli::parse()
    };

    let config = Config::from_env();
    init_tracing();

    match cli {
        Cli::Serve => run_server(config).await,
        Cli::Ask { prompt } => run_ask(config, prompt).await,
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tangent=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();
}

fn build_chat_client(config: &ChatConfig) -> Result<Arc<dyn ChatClient>> {
    // No overall timeout: replies stream for as long as the model keeps
    // talking. Stalls are caught by the per-chunk idle timeout instead.
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    if let Some(relay_url) = &config.relay_url {
        tracing::info!(relay_url = %relay_url, "forwarding chat requests to relay");
        return Ok(Arc::new(RelayChatClient::new(http_client, relay_url.clone())));
    }

    let api_key = config
        .api_key
        .clone()
        .context("XAI_API_KEY (or GROK_API_KEY) must be set when CHAT_RELAY_URL is not")?;
    tracing::info!(base_url = %config.base_url, model = %config.model, "using chat completions API");
    Ok(Arc::new(
        XaiChatClient::new(http_client, api_key)
            .with_base_url(&config.base_url)
            .with_model(&config.model),
    ))
}

async fn run_server(config: Config) -> Result<(), Box<dyn Error>> {
    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: true,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let chat = build_chat_client(&config.chat)?;
    let canvas = Canvas::new(chat.clone(), config.chat.idle_timeout);

    let app_state = api::AppState { canvas, chat };

    let app = api::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let port = config.port;
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    println!("Listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_ask(config: Config, prompt: String) -> Result<(), Box<dyn Error>> {
    let chat = build_chat_client(&config.chat)?;
    let messages = [ChatMessage::user(prompt)];
    let mut stream = tokio::time::timeout(config.chat.idle_timeout, chat.stream(&messages))
        .await
        .context("no response from the model within the idle timeout")??;

    let mut stdout = std::io::stdout();
    loop {
        let next = tokio::time::timeout(config.chat.idle_timeout, stream.next())
            .await
            .context("no data from the model within the idle timeout")?;
        match next {
            Some(delta) => {
                write!(stdout, "{}", delta?)?;
                stdout.flush()?;
            }
            None => break,
        }
    }
    writeln!(stdout)?;

    Ok(())
}

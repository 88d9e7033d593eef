use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use rpcmux::channel::tcp::RemotingServer;
use rpcmux::{
    AdmissionGate, Command, CommandProcessor, RemotingClient, RemotingConfig, RemotingService,
    TaskPool, command_code,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const ECHO: i32 = 1;

#[derive(Parser)]
#[command(name = "rpcmux")]
#[command(about = "Multiplexed request/response remoting over TCP")]
struct Cli {
    /// JSON configuration file; missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve an echo processor
    Serve {
        #[arg(long, default_value = "127.0.0.1:9099")]
        listen: String,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 256)]
        queue: usize,
        #[arg(long, default_value_t = 64)]
        max_concurrency: usize,
    },
    /// Send echo requests and report latencies
    Ping {
        #[arg(long, default_value = "127.0.0.1:9099")]
        connect: String,
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long, value_enum, default_value_t = PingMode::Sync)]
        mode: PingMode,
        #[arg(long, default_value = "ping")]
        payload: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PingMode {
    Sync,
    Async,
    Oneway,
}

struct EchoProcessor {
    gate: AdmissionGate,
}

#[async_trait]
impl CommandProcessor for EchoProcessor {
    async fn process_command(&self, command: Command) -> anyhow::Result<Option<Command>> {
        Ok(Some(
            Command::response(command_code::SUCCESS).with_body(command.into_body()),
        ))
    }

    async fn try_acquire_failure(&self, timeout: Duration) -> bool {
        self.gate.try_acquire_failure(timeout).await
    }

    fn release(&self) {
        self.gate.release();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Mode::Serve {
            listen,
            workers,
            queue,
            max_concurrency,
        } => serve(config, &listen, workers, queue, max_concurrency).await,
        Mode::Ping {
            connect,
            count,
            mode,
            payload,
        } => ping(config, &connect, count, mode, payload).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rpcmux=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RemotingConfig> {
    let Some(path) = path else {
        return Ok(RemotingConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    RemotingConfig::from_json(&json).with_context(|| format!("invalid config {}", path.display()))
}

async fn serve(
    config: RemotingConfig,
    listen: &str,
    workers: usize,
    queue: usize,
    max_concurrency: usize,
) -> Result<()> {
    let pool = Arc::new(TaskPool::new("echo", workers, queue));
    let echo = Arc::new(EchoProcessor {
        gate: AdmissionGate::new(max_concurrency),
    });
    let service = Arc::new(
        RemotingService::builder(config)
            .processor(ECHO, echo, pool)
            .build()
            .context("failed to build remoting service")?,
    );

    let server = RemotingServer::bind(listen, service)
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    let local = server.local_addr()?;
    info!(listen = %local, workers, queue, max_concurrency, "echo server started");
    server.run().await.context("server error")?;
    Ok(())
}

async fn ping(
    config: RemotingConfig,
    addr: &str,
    count: usize,
    mode: PingMode,
    payload: String,
) -> Result<()> {
    let client = RemotingClient::connect(addr, config)
        .await
        .with_context(|| format!("failed to connect {}", addr))?;
    info!(peer = %client.peer_addr(), count, "connected");

    match mode {
        PingMode::Sync => {
            for seq in 0..count {
                let start = Instant::now();
                match client.call(ECHO, payload.clone().into_bytes()).await {
                    Ok(reply) => println!(
                        "seq={} code={} bytes={} time={:?}",
                        seq,
                        reply.code(),
                        reply.body().len(),
                        start.elapsed()
                    ),
                    Err(err) => println!("seq={} error: {}", seq, err),
                }
            }
        }
        PingMode::Async => {
            let (done, mut results) = mpsc::unbounded_channel();
            for seq in 0..count {
                let start = Instant::now();
                let done = done.clone();
                client.call_async(ECHO, payload.clone().into_bytes(), move |future| {
                    let outcome = match future.response() {
                        Some(reply) => format!("code={} bytes={}", reply.code(), reply.body().len()),
                        None if future.is_sent() => "timeout".to_string(),
                        None => format!("send failed: {:?}", future.cause()),
                    };
                    let _ = done.send((seq, outcome, start.elapsed()));
                })?;
            }
            drop(done);
            while let Some((seq, outcome, elapsed)) = results.recv().await {
                println!("seq={} {} time={:?}", seq, outcome, elapsed);
            }
        }
        PingMode::Oneway => {
            for _ in 0..count {
                if let Err(err) = client.send_oneway(ECHO, payload.clone().into_bytes()) {
                    warn!(error = %err, "oneway send failed");
                }
            }
            // Give the writer a moment to flush before the process exits.
            tokio::time::sleep(Duration::from_millis(100)).await;
            println!("sent {} oneway requests", count);
        }
    }

    println!("{}", client.stats());
    client.close();
    Ok(())
}

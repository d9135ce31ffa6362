// Minimal line-mode MUD client on top of the mushlink connection layer

use anyhow::{bail, Context};
use mushlink::{init_logging, Connection, ConnectionConfig, EventBus, NetEvent};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

const USAGE: &str = "usage: mushlink HOST PORT [--tls]";

fn parse_args() -> anyhow::Result<ConnectionConfig> {
    let mut args = std::env::args().skip(1);
    let (Some(host), Some(port)) = (args.next(), args.next()) else {
        bail!(USAGE);
    };
    let port: u16 = port.parse().with_context(|| format!("invalid port '{}'", port))?;

    let mut builder = ConnectionConfig::builder(host, port);
    for flag in args {
        match flag.as_str() {
            "--tls" => builder = builder.use_tls(true),
            other => bail!("unknown option '{}'\n{}", other, USAGE),
        }
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let config = parse_args()?;

    let event_bus = Arc::new(EventBus::new());
    let mut events = event_bus.subscribe();
    let mut connection = Connection::new(config, event_bus);
    connection.connect().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(NetEvent::DataReceived { data, go_ahead, .. }) => {
                    stdout.write_all(String::from_utf8_lossy(&data).as_bytes())?;
                    if go_ahead {
                        stdout.write_all(b"\n")?;
                    }
                    stdout.flush()?;
                }
                Ok(NetEvent::Connected { host, port, .. }) => {
                    eprintln!("*** Connected to {}:{}", host, port);
                }
                Ok(NetEvent::Disconnected { reason, .. }) => {
                    eprintln!("*** {}", reason);
                    break;
                }
                Ok(NetEvent::NetworkError { error, .. }) => {
                    eprintln!("*** Error: {}", error);
                    break;
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("Display fell behind, skipped {} events", n),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line() => match line? {
                Some(line) => connection.send_line(&line),
                None => break,
            },
        }
    }

    connection.dispose().await;
    Ok(())
}

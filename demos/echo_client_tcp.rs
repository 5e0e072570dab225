use clap::Parser;
use std::{io::Write, net::SocketAddr, str::FromStr};

use sockflow::bootstrap::SocketClient;
use sockflow::codec::{LineSplitter, TerminatorType};
use sockflow::context::{ContextConfig, SocketContext};
use sockflow::executor::{IoLoop, PoolConfig, WorkerPool};
use sockflow::filter::StringFilter;
use sockflow::plugin::{Socks5Plugin, Socks5Target};
use sockflow::tls::TlsManager;
use sockflow::SynchronousHandler;

////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Parser)]
#[command(name = "Echo Client TCP")]
#[command(version = "0.1.0")]
#[command(about = "An example of echo client tcp", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("127.0.0.1"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
    /// Speak TLS, accepting any server certificate
    #[arg(long)]
    tls: bool,
    /// Reach host:port through this SOCKS5 proxy
    #[arg(long)]
    socks5: Option<SocketAddr>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;
    if cli.debug {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log_level)
            .init();
    }

    let pool = WorkerPool::new(PoolConfig::default());
    pool.start()?;
    let io = IoLoop::new(1)?;

    let config = match cli.socks5 {
        Some(proxy) => ContextConfig::client(proxy.ip().to_string(), proxy.port()),
        None => ContextConfig::client(cli.host.clone(), cli.port),
    };
    let mut builder = SocketContext::builder(config)
        .handler(SynchronousHandler::new())
        .add_filter(StringFilter::new())
        .splitter(LineSplitter::new(8192, TerminatorType::BOTH));
    if cli.socks5.is_some() {
        builder = builder.add_plugin(Socks5Plugin::new(Socks5Target::Domain(
            cli.host.clone(),
            cli.port,
        )));
    }
    if cli.tls {
        builder = builder.tls(
            TlsManager::new("TLS")?
                .danger_trust_all()
                .with_server_name(cli.host.clone()),
        );
    }

    let client = SocketClient::connect(builder.build()?, pool.clone(), &io)?;
    println!("connected to {}:{}", cli.host, cli.port);
    println!("Enter bye to stop");

    let mut line = String::new();
    loop {
        line.clear();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim_end().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "bye" {
            break;
        }
        client.sync_send(Box::new(format!("{}\r\n", trimmed)))?;
        match client.sync_read()?.downcast::<String>() {
            Ok(reply) => println!("received back: {}", reply.trim_end()),
            Err(_) => println!("received back a non-string value"),
        }
    }

    client.close();
    io.shutdown();
    pool.shutdown();
    pool.join();

    Ok(())
}

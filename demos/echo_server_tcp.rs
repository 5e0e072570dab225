use clap::Parser;
use std::{io::Write, str::FromStr, sync::mpsc};

use sockflow::bootstrap::SocketServer;
use sockflow::codec::{LineSplitter, TerminatorType};
use sockflow::context::{ContextConfig, SocketContext};
use sockflow::executor::{cpu_count, IoLoop, PoolConfig, WorkerPool};
use sockflow::filter::StringFilter;
use sockflow::session::Session;
use sockflow::tls::{CertificateBundle, TlsManager};
use sockflow::{Error, Handler, Message};

////////////////////////////////////////////////////////////////////////////////////////////////////

struct EchoHandler;

impl Handler for EchoHandler {
    fn on_connect(&self, session: &Session) -> Option<Message> {
        println!(
            "session {} connected from {:?}",
            session.id(),
            session.transport_context().peer_addr
        );
        None
    }

    fn on_disconnect(&self, session: &Session) {
        println!("session {} disconnected", session.id());
    }

    fn on_receive(&self, session: &Session, msg: Message) -> Option<Message> {
        let line = msg.downcast::<String>().ok()?;
        println!("handling {:?} from session {}", line.trim_end(), session.id());
        Some(Box::new(format!("{}\r\n", line.trim_end())))
    }

    fn on_exception(&self, session: &Session, err: &Error) {
        println!("session {} exception: {}", session.id(), err);
    }
}

#[derive(Parser)]
#[command(name = "Echo Server TCP")]
#[command(version = "0.1.0")]
#[command(about = "An example of echo server tcp", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("0.0.0.0"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
    /// PEM certificate chain; enables TLS together with --key
    #[arg(long)]
    cert: Option<String>,
    /// PEM private key
    #[arg(long)]
    key: Option<String>,
    #[arg(long, default_value_t = 2)]
    io_threads: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let host = cli.host;
    let port = cli.port;
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

    let pool = WorkerPool::new(PoolConfig::for_cpus(cpu_count()));
    pool.start()?;
    let io = IoLoop::new(cli.io_threads)?;

    let mut builder = SocketContext::builder(ContextConfig::server(host.clone(), port))
        .handler(EchoHandler)
        .add_filter(StringFilter::new())
        .splitter(LineSplitter::new(8192, TerminatorType::BOTH));
    if let (Some(cert), Some(key)) = (cli.cert, cli.key) {
        let bundle = CertificateBundle::from_pem_files(cert, key)?;
        builder = builder.tls(TlsManager::new("TLS")?.with_certificate(bundle));
    }
    let server = SocketServer::new(builder.build()?, pool.clone(), io.clone());
    let local_addr = server.bind()?;

    println!("listening {}...", local_addr);
    println!("Press ctrl-c to stop");
    println!("try `nc {} {}` in another shell", host, local_addr.port());
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    let _ = rx.recv();

    server.stop();
    io.shutdown();
    pool.shutdown();
    pool.join();

    Ok(())
}

use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use server::config::DbConfig;
use server::matches::MatchRegistry;
use server::net::{self, Connections, Outbound, ServerState};
use server::session::{self, SessionRegistry};
use server::{db, websocket};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Environment file with the database settings
    #[clap(short, long, default_value = ".env")]
    env_file: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let config = DbConfig::load(&args.env_file);

    let pool = db::connect(&config).await?;
    db::setup(&pool).await?;

    let connections = Arc::new(Connections::new());
    let sessions = Arc::new(SessionRegistry::new(pool.clone()));

    // Broadcast seam: user id -> session -> bound connection -> one text
    // frame on its outbound queue.
    let broadcast = {
        let sessions = Arc::clone(&sessions);
        let connections = Arc::clone(&connections);
        Box::new(move |user_id: i32, message: &shared::ServerMessage| {
            if let Some(conn) = sessions.conn_for_user(user_id) {
                if let Ok(text) = serde_json::to_string(message) {
                    connections.send(conn, Outbound::Text(text));
                }
            }
        })
    };
    let matches = Arc::new(MatchRegistry::new(pool.clone(), broadcast));

    // Periodic idle-session sweep.
    tokio::spawn(session::run_cleanup_worker(Arc::clone(&sessions)));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "chess server listening on {} (frame cap {} MiB)",
        addr,
        websocket::MAX_PAYLOAD_BYTES / (1024 * 1024)
    );

    let state = Arc::new(ServerState {
        sessions,
        matches,
        connections,
        pool,
    });
    net::run(listener, state).await;

    Ok(())
}

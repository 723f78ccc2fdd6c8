use flightsqlite::config::ServerConfig;
use flightsqlite::server::FlightSqlServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flightsqlite=info".parse().unwrap()))
        .init();

    let config = ServerConfig::from_env();

    println!("flightsqlite - Flight SQL style command server backed by SQLite");
    println!("Database: {}", config.db_path);

    let server = FlightSqlServer::new(&config).expect("Failed to create server");
    server.run().await.expect("Server error");
}

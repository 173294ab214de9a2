use clap::Parser;
use log::info;
use std::sync::atomic::Ordering;

use reactor_httpd::logger;
use reactor_httpd::server::HttpServer;
use reactor_httpd::server::config::ServerConfig;

fn main() -> reactor_httpd::Result<()> {
    let config = ServerConfig::parse();
    logger::init(&config)?;

    info!("Starting HTTP server with config: {:?}", config);

    let mut server = HttpServer::new(&config)?;

    let stop = server.stop_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        stop.store(true, Ordering::Release);
    })?;

    server.run()?;
    info!("Server stopped");
    Ok(())
}

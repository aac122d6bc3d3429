use crate::output::{OutputFormat, Reporter};
use std::net::SocketAddr;
use tsif_core::{Config, Result};
use tsif_network::BootConfigServer;

pub async fn execute(
    listen: Option<SocketAddr>,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    let mut settings = config.boot_config;
    if let Some(listen) = listen {
        settings.listen_addr = listen;
    }

    let server = BootConfigServer::new(&settings);
    let handle = server.start(settings.listen_addr).await?;
    let report = Reporter::new(format);
    report.done(format!("Serving boot config at http://{}{}", handle.local_addr(), settings.path));
    report.info("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    handle.stop().await
}

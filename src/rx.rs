use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use noolite_link::Link;
use noolite_link::config::Config;
use noolite_link::stats::StatsReporter;

use crate::cli::ListenOpts;

pub async fn run(opts: ListenOpts, mut config: Config) -> Result<()> {
    opts.ser.apply(&mut config.serial);
    config.validate()?;
    let (link, mut events) =
        Link::open(&config).with_context(|| format!("opening {}", config.serial.port))?;

    let mut reporter = StatsReporter::new(opts.stats);
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(port = %config.serial.port, "listening");

    loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Some(ev) => println!("{ev}"),
                // read loop gone; shutdown() below reports why
                None => break,
            },
            _ = tick.tick() => reporter.maybe_log(link.stats()),
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
    }

    link.shutdown().await.context("serial link failed")?;
    Ok(())
}

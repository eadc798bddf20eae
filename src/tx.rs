use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use noolite_link::Link;
use noolite_link::command::{CommandBuilder, Intent, RawCommand};
use noolite_link::config::Config;
use noolite_link::frame::Frame;

use crate::cli::{AckPolicy, Action, SendOpts};

pub async fn run(opts: SendOpts, mut config: Config) -> Result<()> {
    opts.ser.apply(&mut config.serial);
    config.validate()?;
    let policy = AckPolicy::from_cli(opts.timeout, opts.no_ack)?;
    let builder = CommandBuilder::new(opts.channel)
        .repeat(opts.repeat)
        .ack_timeout(policy.resolve(config.link.ack_timeout()));
    let frames = plan(&builder, &opts.action)?;

    let (link, _events) =
        Link::open(&config).with_context(|| format!("opening {}", config.serial.port))?;

    for frame in &frames {
        match link.send(frame).await {
            Ok(outcome) => info!(%frame, ?outcome, "sent"),
            Err(e) => {
                let _ = link.shutdown().await;
                return Err(e).with_context(|| format!("channel {}", opts.channel));
            }
        }
    }
    link.shutdown().await?;
    Ok(())
}

fn plan(builder: &CommandBuilder, action: &Action) -> Result<Vec<Frame>> {
    let frames = match action {
        Action::On { duration } => vec![builder.build(Intent::On {
            duration: duration.map(Duration::from_secs),
        })?],
        Action::Off => vec![builder.build(Intent::Off)?],
        Action::Brightness { percent, on } => builder.light(*on, Some(*percent))?,
        Action::Raw { json } => vec![builder.build(Intent::Raw(RawCommand::from_json(json)?))?],
        Action::Service { kind } => vec![builder.build(Intent::Service((*kind).into()))?],
    };
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ServiceKind;
    use noolite_link::command::{BIND, SET_BRIGHTNESS, TEMPORARY_ON};

    #[test]
    fn plan_brightness_on() {
        let b = CommandBuilder::new(5);
        let frames = plan(&b, &Action::Brightness { percent: 50, on: true }).unwrap();
        let cmds: Vec<u8> = frames.iter().map(|f| f.cmd).collect();
        assert_eq!(cmds, vec![SET_BRIGHTNESS, TEMPORARY_ON]);
        assert!(frames.iter().all(|f| f.ch == 5));
    }

    #[test]
    fn plan_on_with_duration() {
        let b = CommandBuilder::new(1).ack_timeout(None);
        let frames = plan(&b, &Action::On { duration: Some(60) }).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data[0], 12);
        assert_eq!(frames[0].ack_timeout, None);
    }

    #[test]
    fn plan_service_and_bad_raw() {
        let b = CommandBuilder::new(1);
        let frames = plan(&b, &Action::Service { kind: ServiceKind::BindTx }).unwrap();
        assert_eq!(frames[0].cmd, BIND);
        assert!(plan(&b, &Action::Raw { json: "{".into() }).is_err());
        assert!(CommandBuilder::new(1).repeat(5).build(Intent::Off).is_err());
    }
}

use ledlink_driver::MAX_FREQUENCY_HZ;
use ledlink_peer::StripIndex;
use ledlink_portal::DriverSession;
use tracing::{info, warn};

use crate::cmd::{hold, open_session, parse_duration, target_strips, PlayArgs};
use crate::exit::{portal_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_play, OutputFormat, PlayOutput};

pub fn run(args: PlayArgs, format: OutputFormat) -> CliResult<i32> {
    if args.frequency == 0 || args.frequency > MAX_FREQUENCY_HZ {
        return Err(CliError::new(
            USAGE,
            format!("--frequency must be within 1..={MAX_FREQUENCY_HZ}"),
        ));
    }
    if args.initial_frames == 0 {
        return Err(CliError::new(USAGE, "--initial-frames must be at least 1"));
    }
    let duration = args.duration.as_deref().map(parse_duration).transpose()?;

    let session = open_session(&args.connect, &args.layout)?;
    let strips = target_strips(session.configuration(), args.only.as_deref())?;

    if let Err(err) = start_all(&session, &strips, &args) {
        stop_all(&session, &strips);
        session.close();
        return Err(err);
    }

    let end = hold(&session, duration);
    if session.is_open() {
        stop_all(&session, &strips);
    }
    session.close();
    let end = end?;
    info!(%end, "playback finished");

    print_play(
        &PlayOutput {
            driver: args.connect.addr.clone(),
            effect: args.effect.to_string(),
            frequency_hz: args.frequency,
            strips,
            uploaded_configuration: session.uploaded_configuration(),
            stopped_by: end.to_string(),
        },
        format,
    );
    Ok(SUCCESS)
}

fn start_all(session: &DriverSession, strips: &[StripIndex], args: &PlayArgs) -> CliResult<()> {
    for &index in strips {
        let Some(strip) = session.configuration().strip(index) else {
            continue;
        };
        let engine = args.effect.build(strip, args.color);
        session
            .start_animation(index, args.frequency, engine, args.initial_frames)
            .map_err(|err| portal_error(&format!("start on strip {index} failed"), err))?;
    }
    Ok(())
}

/// Best effort: a strip whose animation already ended reports invalid state.
fn stop_all(session: &DriverSession, strips: &[StripIndex]) {
    for &index in strips {
        if let Err(err) = session.stop_animation(index) {
            warn!(strip = index, error = %err, "stop failed");
        }
    }
}

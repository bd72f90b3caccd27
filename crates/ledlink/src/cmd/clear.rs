use ledlink_peer::StripStatus;

use crate::cmd::{open_session, ClearArgs};
use crate::exit::{portal_error, CliResult, SUCCESS};

/// Stop animations, then clear what is left.
pub fn run(args: ClearArgs) -> CliResult<i32> {
    let session = open_session(&args.connect, &args.layout)?;

    let result = session.status(None).and_then(|entries| {
        entries.iter().try_for_each(|entry| match entry.status {
            // An animation may end on its own between the status and the stop.
            StripStatus::Playing | StripStatus::Paused => session
                .stop_animation(entry.index)
                .or_else(|_| session.clear(entry.index)),
            StripStatus::Idle | StripStatus::DisplayingFrame => session.clear(entry.index),
        })
    });
    session.close();
    result.map_err(|err| portal_error("clear failed", err))?;
    Ok(SUCCESS)
}

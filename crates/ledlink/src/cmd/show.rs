use ledlink_peer::Frame;
use tracing::info;

use crate::cmd::{hold, open_session, parse_duration, target_strips, ShowArgs};
use crate::exit::{portal_error, CliResult, SUCCESS};

pub fn run(args: ShowArgs) -> CliResult<i32> {
    let duration = args.duration.as_deref().map(parse_duration).transpose()?;
    let session = open_session(&args.connect, &args.layout)?;
    let strips = target_strips(session.configuration(), args.only.as_deref())?;

    let shown = strips.iter().try_for_each(|&index| {
        let frame = session.configuration().strip(index).map(|strip| {
            Frame::solid(strip.spectrum, usize::from(strip.pixel_count), args.color)
        });
        match frame {
            Some(frame) => session.display_frame(index, frame),
            None => Ok(()),
        }
    });
    if let Err(err) = shown {
        session.close();
        return Err(portal_error("display failed", err));
    }

    let end = hold(&session, duration);
    session.close();
    let end = end?;
    info!(%end, "frame released");
    Ok(SUCCESS)
}

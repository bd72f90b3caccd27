use std::sync::Arc;

use ledlink_peer::{connect_with_config, GetDriverStatusRequest, MessageRouter};

use crate::cmd::StatusArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_status, OutputFormat, StatusOutput};

/// Status needs neither a handshake nor a configuration, so this asks the
/// router directly instead of opening a portal session.
pub fn run(args: StatusArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.connect.session_config()?;
    let channel = connect_with_config(args.connect.addr.clone(), &config.peer, None)
        .map_err(|err| peer_error("connect failed", err))?;
    let router = MessageRouter::new(Arc::new(channel));

    let result = router.send(&GetDriverStatusRequest { strip_id: None });
    router.channel().close();
    let reply = result.map_err(|err| peer_error("status failed", err))?;

    print_status(
        &StatusOutput {
            driver: &args.connect.addr,
            strips: &reply.strips,
        },
        format,
    );
    Ok(SUCCESS)
}

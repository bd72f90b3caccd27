use std::sync::Arc;

use ledlink_frame::Connection;

use crate::channel::{Channel, InboundHandler, PeerConfig};
use crate::error::Result;

/// Dial a listening peer and open a channel with default tuning.
pub fn connect(addr: impl Into<String>) -> Result<Channel> {
    connect_with_config(addr, &PeerConfig::default(), None)
}

/// Dial a listening peer with explicit tuning and an optional inbound
/// handler, installed before the channel starts receiving.
pub fn connect_with_config(
    addr: impl Into<String>,
    config: &PeerConfig,
    handler: Option<Arc<dyn InboundHandler>>,
) -> Result<Channel> {
    let connection = Connection::new(addr, config.connection.clone());
    let channel = Channel::new(connection, config.channel.clone());
    if let Some(handler) = handler {
        channel.set_inbound_handler(handler);
    }
    channel.open()?;
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use ledlink_frame::{ConnectionConfig, ConnectionError};

    use super::*;
    use crate::error::PeerError;
    use crate::listener::PeerListener;
    use crate::messages::{AnimationBufferReply, AnimationBufferRequest};
    use crate::router::{Dispatcher, MessageRouter};

    #[test]
    fn connect_refused_is_connection_error() {
        let addr = {
            let listener = PeerListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr()
        };
        let config = PeerConfig {
            connection: ConnectionConfig {
                connect_timeout: Duration::from_millis(200),
                ..ConnectionConfig::default()
            },
            ..PeerConfig::default()
        };

        let err = connect_with_config(addr.to_string(), &config, None).unwrap_err();
        assert!(matches!(
            err,
            PeerError::Connection(ConnectionError::Connect(_))
        ));
    }

    #[test]
    fn dialing_side_can_serve_requests_too() {
        let listener = PeerListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr();

        let server = thread::spawn(move || {
            let channel = listener.accept().unwrap();
            channel.open().unwrap();
            let router = MessageRouter::new(Arc::new(channel));
            router.send(&AnimationBufferRequest { strip: 2, count: 5 })
        });

        let handler = Dispatcher::builder()
            .on(|req: AnimationBufferRequest| {
                assert_eq!((req.strip, req.count), (2, 5));
                Ok(AnimationBufferReply::default())
            })
            .build();
        let _portal =
            connect_with_config(addr.to_string(), &PeerConfig::default(), Some(Arc::new(handler)))
                .unwrap();

        let reply = server.join().unwrap().unwrap();
        assert!(reply.frames.is_empty());
    }
}

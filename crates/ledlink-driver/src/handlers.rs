//! Request handlers for one portal session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ledlink_peer::{
    answer_connect, ClearStripRequest, ConnectRequest, DeviceConfiguration, Dispatcher,
    DisplayFrameRequest, GetDriverStatusReply, GetDriverStatusRequest, HandlerError,
    HandlerResult, HandshakeConfig, PauseAnimationRequest, SetConfigurationReply,
    SetConfigurationRequest, StartAnimationRequest, StopAnimationRequest, StripIndex,
    SuccessReply,
};
use tracing::{info, warn};

use crate::context::StripContext;
use crate::player::FrameSupplier;
use crate::state::StripStateMachine;

/// State that outlives sessions.
pub(crate) struct DriverState {
    pub(crate) context: Mutex<StripContext>,
    pub(crate) handshake: HandshakeConfig,
}

impl DriverState {
    pub(crate) fn context(&self) -> MutexGuard<'_, StripContext> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// State of one session: strip commands are only accepted once the portal
/// has proven it holds the active configuration.
struct Session {
    state: Arc<DriverState>,
    supplier: Arc<dyn FrameSupplier>,
    synchronized: AtomicBool,
}

impl Session {
    fn with_strip<T>(
        &self,
        index: StripIndex,
        op: impl FnOnce(&mut StripStateMachine) -> crate::Result<T>,
    ) -> HandlerResult<T> {
        if !self.synchronized.load(Ordering::Acquire) {
            return Err(HandlerError::invalid_state(
                "configuration not confirmed for this session; connect or upload first",
            ));
        }
        let mut context = self.state.context();
        let strip = context.strip_mut(index)?;
        Ok(op(strip)?)
    }
}

/// The full driver handler table for one session.
pub(crate) fn dispatcher(state: Arc<DriverState>, supplier: Arc<dyn FrameSupplier>) -> Dispatcher {
    let session = Arc::new(Session {
        state,
        supplier,
        synchronized: AtomicBool::new(false),
    });

    let connect = Arc::clone(&session);
    let configure = Arc::clone(&session);
    let status = Arc::clone(&session);
    let start = Arc::clone(&session);
    let pause = Arc::clone(&session);
    let stop = Arc::clone(&session);
    let display = Arc::clone(&session);
    let clear = session;

    Dispatcher::builder()
        .on(move |request: ConnectRequest| {
            let context = connect.state.context();
            let reply = answer_connect(
                &request,
                context.concurrency_token(),
                &connect.state.handshake,
            )?;
            connect
                .synchronized
                .store(reply.configuration_valid, Ordering::Release);
            Ok(reply)
        })
        .on(move |request: SetConfigurationRequest| {
            let config = DeviceConfiguration::new(request.concurrency_token, request.strips);
            let outcome = configure.state.context().apply_configuration(config);
            Ok(match outcome {
                Ok(()) => {
                    configure.synchronized.store(true, Ordering::Release);
                    SetConfigurationReply {
                        success: true,
                        error_message: None,
                    }
                }
                Err(err) => {
                    warn!(error = %err, "configuration rejected");
                    SetConfigurationReply {
                        success: false,
                        error_message: Some(err.to_string()),
                    }
                }
            })
        })
        .on(move |request: GetDriverStatusRequest| {
            let strips = status.state.context().status(request.strip_id)?;
            Ok(GetDriverStatusReply { strips })
        })
        .on(move |request: StartAnimationRequest| {
            let supplier = Arc::clone(&start.supplier);
            start.with_strip(request.strip, |strip| {
                strip.start_animation(request.frequency_hz, request.initial_frames, supplier)
            })?;
            info!(strip = request.strip, frequency_hz = request.frequency_hz, "animation started by portal");
            Ok(SuccessReply {})
        })
        .on(move |request: PauseAnimationRequest| {
            pause.with_strip(request.strip, StripStateMachine::pause_animation)?;
            Ok(SuccessReply {})
        })
        .on(move |request: StopAnimationRequest| {
            stop.with_strip(request.strip, StripStateMachine::stop_animation)?;
            Ok(SuccessReply {})
        })
        .on(move |request: DisplayFrameRequest| {
            display.with_strip(request.strip, |strip| strip.display_frame(&request.frame))?;
            Ok(SuccessReply {})
        })
        .on(move |request: ClearStripRequest| {
            clear.with_strip(request.strip, StripStateMachine::clear_frame)?;
            Ok(SuccessReply {})
        })
        .build()
}

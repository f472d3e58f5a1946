//! Routing of received ASDUs to user handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::connection::LinkHandle;
use crate::error::HandlerResult;
use crate::types::{Asdu, TypeId};

/// Application callbacks for received ASDUs.
///
/// Each system command has its own slot; everything else, including all
/// monitoring data, arrives at [`Handler::asdu`]. Every method defaults to
/// doing nothing. Errors are logged and do not affect the connection.
///
/// The `link` argument is the connection the ASDU arrived on, so a server
/// can answer an activation:
///
/// ```rust,ignore
/// struct Station;
///
/// #[async_trait]
/// impl Handler for Station {
///     async fn general_interrogation(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
///         link.send_asdu(&asdu.mirror(Cot::ActivationConfirm)).await?;
///         link.send_asdu(&asdu.mirror(Cot::ActivationTermination)).await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// C_IC_NA_1
    async fn general_interrogation(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }

    /// C_CI_NA_1
    async fn counter_interrogation(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }

    /// C_RD_NA_1
    async fn read_command(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }

    /// C_CS_NA_1
    async fn clock_sync(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }

    /// C_TS_NA_1 and C_TS_TA_1
    async fn test_command(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }

    /// C_RP_NA_1
    async fn reset_process(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }

    /// C_CD_NA_1
    async fn delay_acquisition(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }

    /// Any other type identification.
    async fn asdu(&self, asdu: &Asdu, link: &LinkHandle) -> HandlerResult {
        let _ = (asdu, link);
        Ok(())
    }
}

/// Handler slot selected for a type identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    GeneralInterrogation,
    CounterInterrogation,
    Read,
    ClockSync,
    Test,
    ResetProcess,
    DelayAcquisition,
    Other,
}

impl Route {
    pub const fn for_type(type_id: TypeId) -> Self {
        match type_id {
            TypeId::InterrogationCommand => Self::GeneralInterrogation,
            TypeId::CounterInterrogation => Self::CounterInterrogation,
            TypeId::ReadCommand => Self::Read,
            TypeId::ClockSync => Self::ClockSync,
            TypeId::TestCommand | TypeId::TestCommandTime56 => Self::Test,
            TypeId::ResetProcess => Self::ResetProcess,
            TypeId::DelayAcquisition => Self::DelayAcquisition,
            _ => Self::Other,
        }
    }
}

/// Invokes exactly one handler per ASDU.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self { handler }
    }

    /// Run the handler for `asdu`. Handler failures are logged, not returned.
    pub async fn dispatch(&self, asdu: &Asdu, link: &LinkHandle) {
        let route = Route::for_type(asdu.type_id());
        debug!(type_id = %asdu.type_id(), cot = %asdu.cot(), ?route, "dispatch");

        let handler = self.handler.as_ref();
        let result = match route {
            Route::GeneralInterrogation => handler.general_interrogation(asdu, link).await,
            Route::CounterInterrogation => handler.counter_interrogation(asdu, link).await,
            Route::Read => handler.read_command(asdu, link).await,
            Route::ClockSync => handler.clock_sync(asdu, link).await,
            Route::Test => handler.test_command(asdu, link).await,
            Route::ResetProcess => handler.reset_process(asdu, link).await,
            Route::DelayAcquisition => handler.delay_acquisition(asdu, link).await,
            Route::Other => handler.asdu(asdu, link).await,
        };

        if let Err(e) = result {
            warn!(type_id = %asdu.type_id(), ?route, error = %e, "handler failed");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// Handler that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl Handler for NoopHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cot, Cp56Time2a, Ioa};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn record(&self, name: &'static str) -> HandlerResult {
            self.calls.lock().unwrap().push(name);
            Ok(())
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn general_interrogation(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("gi")
        }
        async fn counter_interrogation(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("ci")
        }
        async fn read_command(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("read")
        }
        async fn clock_sync(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("clock")
        }
        async fn test_command(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("test")
        }
        async fn reset_process(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("reset")
        }
        async fn delay_acquisition(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("delay")
        }
        async fn asdu(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            self.record("other")
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn asdu(&self, _: &Asdu, _: &LinkHandle) -> HandlerResult {
            anyhow::bail!("rejected")
        }
    }

    #[test]
    fn test_route_for_type() {
        assert_eq!(
            Route::for_type(TypeId::InterrogationCommand),
            Route::GeneralInterrogation
        );
        assert_eq!(Route::for_type(TypeId::TestCommandTime56), Route::Test);
        assert_eq!(
            Route::for_type(TypeId::DelayAcquisition),
            Route::DelayAcquisition
        );
        assert_eq!(Route::for_type(TypeId::SinglePoint), Route::Other);
        assert_eq!(Route::for_type(TypeId::SingleCommand), Route::Other);
    }

    #[tokio::test]
    async fn test_dispatch_one_handler_per_asdu() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());
        let link = LinkHandle::detached();

        let time = Cp56Time2a::default();
        for asdu in [
            Asdu::general_interrogation(1),
            Asdu::counter_interrogation_command(1, 5),
            Asdu::read_command(1, Ioa(7)),
            Asdu::clock_sync_command(1, time),
            Asdu::test_command(1),
            Asdu::test_command_with_time(1, 3, time),
            Asdu::reset_process_command(1, 1),
            Asdu::delay_acquisition_command(1, 100),
            Asdu::single_command(1, Ioa(1), true, false),
            Asdu::general_interrogation(1).mirror(Cot::ActivationConfirm),
        ] {
            dispatcher.dispatch(&asdu, &link).await;
        }

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["gi", "ci", "read", "clock", "test", "test", "reset", "delay", "other", "gi"]
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_swallowed() {
        let dispatcher = Dispatcher::new(Arc::new(Failing));
        let link = LinkHandle::detached();
        dispatcher
            .dispatch(&Asdu::single_command(1, Ioa(1), true, false), &link)
            .await;
        dispatcher.dispatch(&Asdu::general_interrogation(1), &link).await;
    }
}

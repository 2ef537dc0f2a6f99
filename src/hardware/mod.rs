//! Transport implementations and transport selection.

pub mod mock;
pub mod tcp_socket;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use mock::{MockTransport, MockTransportFactory, SimulatedAnalyzer};
pub use tcp_socket::{SocketTransport, SocketTransportFactory};
#[cfg(feature = "instrument_visa")]
pub use visa::{VisaTransport, VisaTransportFactory};

use crate::config::TransportKind;
use crate::error::SaResult;
use crate::traits::TransportFactory;
use std::sync::Arc;
use std::time::Duration;

/// Builds the factory for a configured transport kind.
///
/// Mock factories get a fresh [`SimulatedAnalyzer`] identified by `id`.
///
/// # Errors
/// Validation error when VISA is requested but not compiled in.
pub fn factory_for(
    kind: TransportKind,
    id: &str,
    timeout: Duration,
) -> SaResult<Arc<dyn TransportFactory>> {
    match kind {
        TransportKind::Socket => Ok(Arc::new(SocketTransportFactory::new(timeout))),
        TransportKind::Mock => Ok(Arc::new(
            MockTransportFactory::new(SimulatedAnalyzer::new(id)).with_timeout(timeout),
        )),
        #[cfg(feature = "instrument_visa")]
        TransportKind::Visa => Ok(Arc::new(VisaTransportFactory::new(timeout))),
        #[cfg(not(feature = "instrument_visa"))]
        TransportKind::Visa => Err(crate::error::SaError::Validation(format!(
            "Analyzer '{}' uses the VISA transport, which requires the instrument_visa feature",
            id
        ))),
    }
}

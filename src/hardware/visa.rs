//! VISA transport
//!
//! Wraps visa-rs for analyzers reached through a VISA library
//! (e.g. `TCPIP0::192.168.60.70::INSTR`). VISA calls are blocking, so every
//! operation runs on tokio's blocking pool and the session timeout is applied
//! around it.

use crate::traits::{InstrumentTransport, TransportFactory};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use visa_rs::prelude::*;

const READ_CHUNK: usize = 4096;

/// An open VISA session.
pub struct VisaTransport {
    resource: String,
    instrument: Option<Arc<Mutex<Instrument>>>,
    timeout: Duration,
}

impl VisaTransport {
    /// Opens `resource` through the default resource manager.
    ///
    /// # Errors
    /// No VISA library, or the resource could not be opened.
    pub async fn open(resource: &str, timeout: Duration) -> Result<Self> {
        let name = resource.to_string();
        let instrument = tokio::task::spawn_blocking(move || -> Result<Instrument> {
            let rm = DefaultRM::new().context("Failed to initialize VISA resource manager")?;
            let c_string = CString::new(name.as_str()).context("Failed to create CString")?;
            let visa_string = VisaString::from(c_string);
            rm.open(&visa_string, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
                .with_context(|| format!("Failed to open VISA resource: {}", name))
        })
        .await
        .context("VISA open task failed")??;

        debug!("Opened VISA resource {}", resource);
        Ok(Self {
            resource: resource.to_string(),
            instrument: Some(Arc::new(Mutex::new(instrument))),
            timeout,
        })
    }

    fn instrument(&self) -> Result<Arc<Mutex<Instrument>>> {
        self.instrument
            .clone()
            .ok_or_else(|| anyhow!("VISA resource {} is closed", self.resource))
    }

    async fn run_blocking<T, F>(&self, what: String, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Instrument) -> Result<T> + Send + 'static,
    {
        let instrument = self.instrument()?;
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = instrument.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut guard)
        });
        tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| anyhow!("{} on {} timed out after {:?}", what, self.resource, self.timeout))?
            .with_context(|| format!("{} task failed", what))?
    }
}

#[async_trait]
impl InstrumentTransport for VisaTransport {
    async fn write(&mut self, text: &str) -> Result<()> {
        let line = format!("{}\n", text);
        let command = text.to_string();
        self.run_blocking(format!("Write '{}'", text), move |instr| {
            instr
                .write_all(line.as_bytes())
                .with_context(|| format!("Failed to write VISA command: {}", command))
        })
        .await
    }

    async fn read(&mut self) -> Result<String> {
        self.run_blocking("Read".to_string(), |instr| {
            let mut response = Vec::new();
            let mut buf = [0u8; READ_CHUNK];
            loop {
                let n = instr.read(&mut buf).context("Failed to read VISA response")?;
                response.extend_from_slice(&buf[..n]);
                if n == 0 || response.ends_with(b"\n") {
                    break;
                }
            }
            Ok(String::from_utf8_lossy(&response)
                .trim_end_matches(['\0', '\r', '\n'])
                .to_string())
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the last handle closes the VISA session
        if self.instrument.take().is_some() {
            debug!("Closed VISA resource {}", self.resource);
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("visa {}", self.resource)
    }
}

/// Bare hosts become `TCPIP::<host>::INSTR`; full resource strings pass through.
fn resource_name(address: &str) -> String {
    let address = address.trim();
    if address.contains("::") {
        address.to_string()
    } else {
        format!("TCPIP::{}::INSTR", address)
    }
}

/// Opens [`VisaTransport`]s.
#[derive(Debug, Clone)]
pub struct VisaTransportFactory {
    timeout: Duration,
}

impl VisaTransportFactory {
    /// Factory whose sessions start with the given I/O timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TransportFactory for VisaTransportFactory {
    async fn open(&self, address: &str) -> Result<Box<dyn InstrumentTransport>> {
        let resource = resource_name(address);
        Ok(Box::new(VisaTransport::open(&resource, self.timeout).await?))
    }

    fn kind(&self) -> &'static str {
        "visa"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name() {
        assert_eq!(resource_name("192.168.60.70"), "TCPIP::192.168.60.70::INSTR");
        assert_eq!(resource_name("GPIB0::1::INSTR"), "GPIB0::1::INSTR");
    }
}

//! Seam for the connection that delivers telemetry.
//!
//! The dashboard owns its transport and asks it to open or close; the
//! transport reports back through `Dashboard::on_connected` and
//! `Dashboard::on_disconnected`.

use crate::error::Result;

pub trait Transport: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Transport for dashboards fed by other means (tests, piped input).
#[derive(Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Ownership of the driver session: open, configure, start, stop, close.

use std::sync::Arc;

use camreq_driver::{CameraConfiguration, CameraDriver, ControlList};
use tracing::{debug, info, warn};

use crate::error::{CameraError, Result};
use crate::generation::GenerationCounter;

/// Sole owner of camera-wide state: the applied stream layout, whether the session is running,
/// and the generation counter.
///
/// Lives behind the camera's session lock. Steps receive it mutably through
/// [`StepContext`](crate::operation::StepContext), so reconfiguration inside an operation is
/// serialized with frame draining.
pub struct SessionController {
    driver: Arc<dyn CameraDriver>,
    generation: GenerationCounter,
    configuration: Option<Arc<CameraConfiguration>>,
    open: bool,
    started: bool,
}

impl SessionController {
    pub(crate) fn new(driver: Arc<dyn CameraDriver>, generation: GenerationCounter) -> Self {
        Self {
            driver,
            generation,
            configuration: None,
            open: false,
            started: false,
        }
    }

    /// Take exclusive ownership of the device.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.driver.acquire()?;
        self.open = true;
        info!(camera = self.driver.id(), "camera opened");
        Ok(())
    }

    pub fn configure(&mut self, layout: &CameraConfiguration) -> Result<Arc<CameraConfiguration>> {
        if self.started {
            return Err(CameraError::AlreadyStarted);
        }
        if layout.streams.is_empty() {
            return Err(CameraError::InvalidConfiguration("no streams requested".into()));
        }
        let applied = Arc::new(self.driver.reconfigure_session(layout)?);
        debug!(camera = self.driver.id(), streams = applied.streams.len(), "configuration applied");
        self.configuration = Some(Arc::clone(&applied));
        Ok(applied)
    }

    /// Queue every prepared request and begin delivering frames.
    pub fn start(&mut self, controls: &ControlList) -> Result<()> {
        if self.started {
            return Err(CameraError::AlreadyStarted);
        }
        if self.configuration.is_none() {
            return Err(CameraError::CameraNotConfigured);
        }
        let requests = self.driver.prepare_requests()?;
        self.driver.start_session(controls)?;
        let count = requests.len();
        for request in requests {
            if let Err(e) = self.driver.resubmit(request) {
                warn!(camera = self.driver.id(), error = %e, "queueing initial requests failed");
                let _ = self.driver.stop_session();
                self.driver.fetch_completed_requests();
                return Err(e.into());
            }
        }
        self.started = true;
        info!(camera = self.driver.id(), requests = count, generation = self.generation(), "session started");
        Ok(())
    }

    /// Halt delivery, flush what the driver hands back, then advance the generation.
    ///
    /// The generation moves exactly once per successful stop. Frames released while the stop is
    /// in progress wait for it and are discarded.
    pub fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Err(CameraError::NotStarted);
        }
        let advance = self.generation.begin_advance();
        self.driver.stop_session()?;
        let flushed = self.driver.fetch_completed_requests().len();
        self.started = false;
        let generation = advance.commit();
        info!(camera = self.driver.id(), flushed, generation, "session stopped");
        Ok(())
    }

    /// Stop if running, apply `layout`, start again.
    pub fn reconfigure(
        &mut self,
        layout: &CameraConfiguration,
        controls: &ControlList,
    ) -> Result<Arc<CameraConfiguration>> {
        if self.started {
            self.stop()?;
        }
        let applied = self.configure(layout)?;
        self.start(controls)?;
        Ok(applied)
    }

    /// Stop if running and give the device back.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        if self.started {
            self.stop()?;
        }
        self.driver.release()?;
        self.open = false;
        self.configuration = None;
        info!(camera = self.driver.id(), "camera closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn configuration(&self) -> Option<Arc<CameraConfiguration>> {
        self.configuration.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    pub fn driver(&self) -> &Arc<dyn CameraDriver> {
        &self.driver
    }
}

//! Mock PowerMate backend
//!
//! Records brightness writes, open/close counts and the event sink of the
//! most recent acquisition. Presence can be toggled to simulate unplugging.

use std::sync::{Arc, Mutex};

use powermate_bridge::device::{DeviceBackend, DeviceError, DeviceEvent, DeviceHandle, EventSink};
use powermate_bridge::settings::HidDriver;

#[derive(Default)]
struct Inner {
    present: bool,
    sink: Option<EventSink>,
    brightness: Vec<u8>,
    drivers: Vec<HidDriver>,
    opens: usize,
    closes: usize,
}

#[derive(Clone, Default)]
pub struct MockPowerMate {
    inner: Arc<Mutex<Inner>>,
}

impl MockPowerMate {
    pub fn attached() -> Self {
        let mock = Self::default();
        mock.plug_in();
        mock
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn plug_in(&self) {
        self.inner.lock().unwrap().present = true;
    }

    pub fn unplug(&self) {
        self.inner.lock().unwrap().present = false;
    }

    /// Sink handed to the most recent successful open
    pub fn sink(&self) -> Option<EventSink> {
        self.inner.lock().unwrap().sink.clone()
    }

    /// Push an event through the current sink
    pub async fn emit(&self, event: DeviceEvent) {
        let sink = self.sink().expect("device was never opened");
        assert!(sink.emit(event).await, "control loop has gone away");
    }

    pub fn brightness(&self) -> Vec<u8> {
        self.inner.lock().unwrap().brightness.clone()
    }

    pub fn drivers(&self) -> Vec<HidDriver> {
        self.inner.lock().unwrap().drivers.clone()
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.inner.lock().unwrap().closes
    }
}

impl DeviceBackend for MockPowerMate {
    fn open(&self, driver: HidDriver, events: EventSink) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.drivers.push(driver);
        if !inner.present {
            return Err(DeviceError::NotFound);
        }
        inner.opens += 1;
        inner.sink = Some(events);
        Ok(Box::new(MockHandle {
            inner: self.inner.clone(),
        }))
    }
}

struct MockHandle {
    inner: Arc<Mutex<Inner>>,
}

impl DeviceHandle for MockHandle {
    fn describe(&self) -> String {
        "MockPowerMate".to_string()
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), DeviceError> {
        self.inner.lock().unwrap().brightness.push(level);
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.inner.lock().unwrap().closes += 1;
    }
}

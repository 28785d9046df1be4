//! Griffin PowerMate over Linux hidraw
//!
//! Uses direct hidraw access rather than a HID library: the device is
//! located by scanning `/sys/class/hidraw/*/device/uevent` for the PowerMate
//! vendor/product pair, and a reader thread polls the non-blocking node and
//! decodes input reports. Closing a handle stops the reader within one poll
//! interval, which releases the last descriptor.
//!
//! Input report layout (6 bytes): byte 0 is the button (non-zero = down),
//! byte 1 is a signed wheel delta. Brightness is written as the output
//! report `[0x00, level]`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{DeviceBackend, DeviceError, DeviceEvent, DeviceHandle, EventSink};
use crate::settings::HidDriver;

const POWERMATE_VENDOR_ID: u32 = 0x077d;
const POWERMATE_PRODUCT_ID: u32 = 0x0410;

const HIDRAW_CLASS_DIR: &str = "/sys/class/hidraw";

/// Sleep between reads while no report is pending
const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// True if a hidraw `uevent` describes a PowerMate.
///
/// The relevant line looks like `HID_ID=0003:0000077D:00000410`.
pub fn is_powermate_uevent(uevent: &str) -> bool {
    uevent
        .lines()
        .filter_map(|line| line.strip_prefix("HID_ID="))
        .any(|id| {
            let mut parts = id.trim().split(':').skip(1);
            let vendor = parts.next().and_then(|v| u32::from_str_radix(v, 16).ok());
            let product = parts.next().and_then(|p| u32::from_str_radix(p, 16).ok());
            vendor == Some(POWERMATE_VENDOR_ID) && product == Some(POWERMATE_PRODUCT_ID)
        })
}

/// Find the first PowerMate hidraw node
fn find_powermate(class_dir: &Path) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(class_dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("Cannot read {}: {}", class_dir.display(), e);
            return None;
        }
    };

    let mut nodes: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            std::fs::read_to_string(path.join("device/uevent"))
                .map(|uevent| is_powermate_uevent(&uevent))
                .unwrap_or(false)
        })
        .collect();
    nodes.sort();

    nodes
        .into_iter()
        .next()
        .and_then(|path| path.file_name().map(|name| Path::new("/dev").join(name)))
}

/// Stateful decoder turning input reports into button edges and wheel deltas
#[derive(Debug, Default)]
pub struct ReportDecoder {
    pressed: bool,
}

impl ReportDecoder {
    pub fn decode(&mut self, report: &[u8]) -> Vec<DeviceEvent> {
        let mut events = Vec::with_capacity(2);
        if report.len() < 2 {
            return events;
        }

        let pressed = report[0] != 0;
        if pressed != self.pressed {
            self.pressed = pressed;
            events.push(if pressed {
                DeviceEvent::ButtonDown
            } else {
                DeviceEvent::ButtonUp
            });
        }

        let delta = i32::from(report[1] as i8);
        if delta != 0 {
            events.push(DeviceEvent::Wheel(delta));
        }
        events
    }
}

/// Opens PowerMates through hidraw
#[derive(Debug, Default, Clone)]
pub struct HidrawBackend {
    /// Explicit `/dev/hidrawN`; scanned for when absent
    device_path: Option<PathBuf>,
}

impl HidrawBackend {
    pub fn new(device_path: Option<PathBuf>) -> Self {
        Self { device_path }
    }
}

impl DeviceBackend for HidrawBackend {
    fn open(
        &self,
        driver: HidDriver,
        events: EventSink,
    ) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        if driver == HidDriver::Libusb {
            tracing::debug!("libusb driver not available, using hidraw");
        }

        let path = match &self.device_path {
            Some(path) => path.clone(),
            None => find_powermate(Path::new(HIDRAW_CLASS_DIR)).ok_or(DeviceError::NotFound)?,
        };

        let io_error = |source: std::io::Error| match source.kind() {
            std::io::ErrorKind::NotFound => DeviceError::NotFound,
            std::io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied {
                path: path.clone(),
            },
            _ => DeviceError::Io {
                path: path.clone(),
                source,
            },
        };

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        #[cfg(unix)]
        options.custom_flags(libc::O_NONBLOCK);
        let file = options.open(&path).map_err(io_error)?;
        let reader = file.try_clone().map_err(io_error)?;

        let closed = Arc::new(AtomicBool::new(false));
        let closed_for_reader = closed.clone();
        let path_for_reader = path.clone();
        std::thread::Builder::new()
            .name("powermate-reader".to_string())
            .spawn(move || read_reports(reader, &path_for_reader, events, closed_for_reader))
            .map_err(io_error)?;

        tracing::info!("Opened PowerMate at {}", path.display());
        Ok(Box::new(HidrawDevice { path, file, closed }))
    }
}

/// Polling read loop; ends on read error, on close, or when the control
/// loop goes away.
fn read_reports(mut reader: File, path: &Path, events: EventSink, closed: Arc<AtomicBool>) {
    let mut decoder = ReportDecoder::default();
    let mut buf = [0u8; 16];

    loop {
        if closed.load(Ordering::SeqCst) {
            tracing::debug!("Reader for {} stopped (handle closed)", path.display());
            return;
        }

        match reader.read(&mut buf) {
            Ok(0) => {
                tracing::info!("PowerMate at {} returned EOF", path.display());
                break;
            }
            Ok(n) => {
                for event in decoder.decode(&buf[..n]) {
                    if !events.blocking_emit(event) {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(READ_POLL_INTERVAL);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::info!("PowerMate at {} read failed: {}", path.display(), e);
                break;
            }
        }
    }

    events.blocking_emit(DeviceEvent::Disconnected);
}

struct HidrawDevice {
    path: PathBuf,
    file: File,
    closed: Arc<AtomicBool>,
}

impl DeviceHandle for HidrawDevice {
    fn describe(&self) -> String {
        format!("PowerMate ({})", self.path.display())
    }

    fn set_brightness(&mut self, level: u8) -> Result<(), DeviceError> {
        self.file
            .write_all(&[0x00, level])
            .map_err(|source| DeviceError::Io {
                path: self.path.clone(),
                source,
            })
    }

    fn close(self: Box<Self>) {
        // The reader drops its descriptor within one poll interval.
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("Closed PowerMate at {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_powermate_uevent() {
        let uevent = "DRIVER=hid-generic\n\
                      HID_ID=0003:0000077D:00000410\n\
                      HID_NAME=Griffin PowerMate\n";
        assert!(is_powermate_uevent(uevent));
    }

    #[test]
    fn rejects_other_devices() {
        let uevent = "HID_ID=0003:0000046D:0000C52B\nHID_NAME=Logitech USB Receiver\n";
        assert!(!is_powermate_uevent(uevent));
        assert!(!is_powermate_uevent(""));
    }

    #[test]
    fn decodes_button_edges_once() {
        let mut decoder = ReportDecoder::default();
        assert_eq!(
            decoder.decode(&[1, 0, 0, 0, 0, 0]),
            vec![DeviceEvent::ButtonDown]
        );
        // Held: no repeated edge
        assert!(decoder.decode(&[1, 0, 0, 0, 0, 0]).is_empty());
        assert_eq!(
            decoder.decode(&[0, 0, 0, 0, 0, 0]),
            vec![DeviceEvent::ButtonUp]
        );
    }

    #[test]
    fn decodes_signed_wheel_delta() {
        let mut decoder = ReportDecoder::default();
        assert_eq!(decoder.decode(&[0, 0x02, 0, 0]), vec![DeviceEvent::Wheel(2)]);
        assert_eq!(decoder.decode(&[0, 0xFE, 0, 0]), vec![DeviceEvent::Wheel(-2)]);
    }

    #[test]
    fn press_while_turning_reports_both() {
        let mut decoder = ReportDecoder::default();
        assert_eq!(
            decoder.decode(&[1, 0x01]),
            vec![DeviceEvent::ButtonDown, DeviceEvent::Wheel(1)]
        );
    }

    #[test]
    fn short_report_is_ignored() {
        let mut decoder = ReportDecoder::default();
        assert!(decoder.decode(&[1]).is_empty());
    }

    /// A FIFO stands in for `/dev/hidrawN`: it blocks like a device node
    /// until something writes a report.
    #[cfg(target_os = "linux")]
    fn fifo(dir: &Path) -> PathBuf {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let path = dir.join("hidraw-test");
        let c_path = CString::new(path.as_os_str().as_bytes()).expect("path without NUL");
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        assert_eq!(rc, 0, "mkfifo failed");
        path
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn close_stops_reader_while_idle() {
        use crate::supervisor::Command;
        use tokio::sync::mpsc::error::TryRecvError;

        let dir = tempfile::tempdir().expect("create temp dir");
        let path = fifo(dir.path());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);

        let backend = HidrawBackend::new(Some(path.clone()));
        let handle = backend
            .open(HidDriver::Hidraw, EventSink::new(1, tx))
            .expect("open fifo");

        let mut writer = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .expect("open fifo writer");
        writer.write_all(&[1, 0, 0, 0, 0, 0]).expect("write report");

        let mut delivered = false;
        for _ in 0..200 {
            if let Ok(Command::Device { event, .. }) = rx.try_recv() {
                assert_eq!(event, DeviceEvent::ButtonDown);
                delivered = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(delivered, "report delivered");

        // No further reports: the reader must still notice the close and
        // drop its sink.
        handle.close();
        let mut stopped = false;
        for _ in 0..200 {
            match rx.try_recv() {
                Err(TryRecvError::Disconnected) => {
                    stopped = true;
                    break;
                }
                Ok(_) => panic!("no events after close"),
                Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        assert!(stopped, "reader exited after close");
    }

    #[test]
    fn finds_powermate_in_class_dir() {
        let dir = tempfile::tempdir().expect("create temp dir");
        for (node, id) in [
            ("hidraw0", "0003:0000046D:0000C52B"),
            ("hidraw3", "0003:0000077D:00000410"),
        ] {
            let device_dir = dir.path().join(node).join("device");
            std::fs::create_dir_all(&device_dir).expect("create device dir");
            std::fs::write(device_dir.join("uevent"), format!("HID_ID={}\n", id))
                .expect("write uevent");
        }

        assert_eq!(
            find_powermate(dir.path()),
            Some(PathBuf::from("/dev/hidraw3"))
        );
    }
}

//! Windows miniport transport using overlapped `DeviceIoControl`.

use std::fs::{File, OpenOptions};
use std::mem;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::ptr;

use tracing::{debug, info, instrument};
use windows_sys::Win32::Foundation::{CloseHandle, ERROR_IO_PENDING, GetLastError, HANDLE};
use windows_sys::Win32::Storage::FileSystem::FILE_FLAG_OVERLAPPED;
use windows_sys::Win32::System::IO::{DeviceIoControl, GetOverlappedResult, OVERLAPPED};
use windows_sys::Win32::System::Threading::CreateEventW;

use super::traits::{IoStatus, IoctlTransport, TransportError};

/// Manual-reset event bound to an `OVERLAPPED`; closed on drop.
pub struct OverlappedEvent {
    overlapped: Box<OVERLAPPED>,
    event: HANDLE,
}

impl Drop for OverlappedEvent {
    fn drop(&mut self) {
        // SAFETY: `event` came from CreateEventW and is closed exactly once.
        unsafe {
            CloseHandle(self.event);
        }
    }
}

/// Handle to an RST-managed SCSI port (`\\.\ScsiN:`).
pub struct WindowsTransport {
    file: File,
}

impl WindowsTransport {
    #[instrument(level = "info")]
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(FILE_FLAG_OVERLAPPED)
            .open(path)
            .map_err(|e| TransportError::OpenFailed {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        info!(path = %path, "Device opened");
        Ok(Self { file })
    }

    fn handle(&self) -> HANDLE {
        self.file.as_raw_handle() as HANDLE
    }
}

impl IoctlTransport for WindowsTransport {
    type Completion = OverlappedEvent;

    fn create_completion(&self) -> Result<OverlappedEvent, TransportError> {
        // SAFETY: no security attributes and no name; manual reset, initially unsignaled.
        let event = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        if event.is_null() {
            return Err(TransportError::SyncResource(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
        let mut overlapped: Box<OVERLAPPED> = Box::new(unsafe { mem::zeroed() });
        overlapped.hEvent = event;
        Ok(OverlappedEvent { overlapped, event })
    }

    fn device_io_control(
        &self,
        control_code: u32,
        buffer: &mut [u8],
        completion: &mut OverlappedEvent,
    ) -> IoStatus {
        let len = buffer.len() as u32;
        let mut bytes_returned: u32 = 0;

        // SAFETY: the buffer and OVERLAPPED outlive the call; callers wait on
        // the completion before either is released.
        let ok = unsafe {
            DeviceIoControl(
                self.handle(),
                control_code,
                buffer.as_ptr().cast(),
                len,
                buffer.as_mut_ptr().cast(),
                len,
                &mut bytes_returned,
                &mut *completion.overlapped,
            )
        };
        if ok != 0 {
            return IoStatus::Complete { bytes_returned };
        }

        // SAFETY: reads thread-local error state only.
        let last_error = unsafe { GetLastError() };
        if last_error == ERROR_IO_PENDING {
            debug!("DeviceIoControl pending");
            IoStatus::Pending
        } else {
            IoStatus::Failed {
                os_error: last_error,
            }
        }
    }

    fn wait_for_completion(&self, completion: &mut OverlappedEvent) -> IoStatus {
        let mut bytes_returned: u32 = 0;
        // SAFETY: the OVERLAPPED belongs to the call issued on this handle.
        let ok = unsafe {
            GetOverlappedResult(
                self.handle(),
                &*completion.overlapped,
                &mut bytes_returned,
                1,
            )
        };
        if ok != 0 {
            IoStatus::Complete { bytes_returned }
        } else {
            IoStatus::Failed {
                // SAFETY: reads thread-local error state only.
                os_error: unsafe { GetLastError() },
            }
        }
    }
}

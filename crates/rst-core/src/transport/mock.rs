//! Mock IOCTL transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{IoStatus, IoctlTransport, TransportError};
use crate::protocol::header::SrbIoControl;

/// How the mock answers the initial device control call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockIssue {
    Complete,
    /// Report pending; the later wait succeeds when `completes` is set.
    Pending { completes: bool },
    Fail(u32),
}

/// A scripted driver response.
#[derive(Debug, Clone)]
pub struct MockReply {
    issue: MockIssue,
    return_code: u32,
    writes: Vec<(usize, Vec<u8>)>,
}

impl MockReply {
    pub fn success() -> Self {
        Self {
            issue: MockIssue::Complete,
            return_code: 0,
            writes: Vec::new(),
        }
    }

    pub fn pending(completes: bool) -> Self {
        Self {
            issue: MockIssue::Pending { completes },
            ..Self::success()
        }
    }

    pub fn failed(os_error: u32) -> Self {
        Self {
            issue: MockIssue::Fail(os_error),
            ..Self::success()
        }
    }

    /// Vendor return code written into the SRB header.
    pub fn with_return_code(mut self, return_code: u32) -> Self {
        self.return_code = return_code;
        self
    }

    /// Bytes the "driver" writes back at `offset` in the request buffer.
    pub fn with_bytes(mut self, offset: usize, bytes: impl Into<Vec<u8>>) -> Self {
        self.writes.push((offset, bytes.into()));
        self
    }

    fn apply(&self, buffer: &mut [u8]) {
        let rc = SrbIoControl::RETURN_CODE_OFFSET;
        if buffer.len() >= rc + 4 {
            buffer[rc..rc + 4].copy_from_slice(&self.return_code.to_le_bytes());
        }
        for (offset, bytes) in &self.writes {
            if *offset >= buffer.len() {
                continue;
            }
            let end = (*offset + bytes.len()).min(buffer.len());
            buffer[*offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }
}

/// A captured device control call.
#[derive(Debug, Clone)]
pub struct Submission {
    pub control_code: u32,
    /// Request bytes as they were before the mock wrote its reply.
    pub request: Vec<u8>,
}

/// Completion handle handed out by the mock; counts its own release.
pub struct MockCompletion {
    pending_result: Option<bool>,
    released: Arc<Mutex<usize>>,
}

impl Drop for MockCompletion {
    fn drop(&mut self) {
        *self.released.lock().unwrap() += 1;
    }
}

/// Mock transport for unit testing request building and adapters.
///
/// Clones share state, so a test can keep a handle after moving one into a device.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued replies; an empty queue answers with plain success.
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    /// Captured calls.
    submissions: Arc<Mutex<Vec<Submission>>>,
    fail_completion: Arc<Mutex<bool>>,
    created: Arc<Mutex<usize>>,
    released: Arc<Mutex<usize>>,
    waits: Arc<Mutex<usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            submissions: Arc::new(Mutex::new(Vec::new())),
            fail_completion: Arc::new(Mutex::new(false)),
            created: Arc::new(Mutex::new(0)),
            released: Arc::new(Mutex::new(0)),
            waits: Arc::new(Mutex::new(0)),
        }
    }

    pub fn queue_reply(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn clear_submissions(&self) {
        self.submissions.lock().unwrap().clear();
    }

    /// Simulate `CreateEvent` failing.
    pub fn fail_completion_creation(&self, fail: bool) {
        *self.fail_completion.lock().unwrap() = fail;
    }

    pub fn completions_created(&self) -> usize {
        *self.created.lock().unwrap()
    }

    pub fn completions_released(&self) -> usize {
        *self.released.lock().unwrap()
    }

    pub fn waits(&self) -> usize {
        *self.waits.lock().unwrap()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl IoctlTransport for MockTransport {
    type Completion = MockCompletion;

    fn create_completion(&self) -> Result<MockCompletion, TransportError> {
        if *self.fail_completion.lock().unwrap() {
            return Err(TransportError::SyncResource("mock event failure".into()));
        }
        *self.created.lock().unwrap() += 1;
        Ok(MockCompletion {
            pending_result: None,
            released: Arc::clone(&self.released),
        })
    }

    fn device_io_control(
        &self,
        control_code: u32,
        buffer: &mut [u8],
        completion: &mut MockCompletion,
    ) -> IoStatus {
        self.submissions.lock().unwrap().push(Submission {
            control_code,
            request: buffer.to_vec(),
        });

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(MockReply::success);

        match reply.issue {
            MockIssue::Complete => {
                reply.apply(buffer);
                IoStatus::Complete {
                    bytes_returned: buffer.len() as u32,
                }
            }
            MockIssue::Pending { completes } => {
                reply.apply(buffer);
                completion.pending_result = Some(completes);
                IoStatus::Pending
            }
            MockIssue::Fail(os_error) => IoStatus::Failed { os_error },
        }
    }

    fn wait_for_completion(&self, completion: &mut MockCompletion) -> IoStatus {
        *self.waits.lock().unwrap() += 1;
        match completion.pending_result.take() {
            Some(true) => IoStatus::Complete { bytes_returned: 0 },
            // ERROR_GEN_FAILURE
            _ => IoStatus::Failed { os_error: 31 },
        }
    }
}

use tracing::{debug, warn};

use crate::error::FlashResult;
use crate::traits::Reprogrammer;

/// Scoped write session on a [`Reprogrammer`].
///
/// Opening the session opens the driver; dropping it closes the driver if
/// [`close`](Self::close) was not called. Call `close` explicitly to observe
/// the finalization result, since `Drop` can only log it.
pub struct WriteSession<'a, R: Reprogrammer + ?Sized> {
    reprog: &'a mut R,
    file_index: usize,
    written: usize,
    open: bool,
}

impl<'a, R: Reprogrammer + ?Sized> WriteSession<'a, R> {
    /// Open `file_index` for writing at `offset`.
    pub fn open(reprog: &'a mut R, file_index: usize, offset: u32) -> FlashResult<Self> {
        reprog.open(file_index, offset)?;
        debug!(file_index, offset, "write session opened");
        Ok(Self {
            reprog,
            file_index,
            written: 0,
            open: true,
        })
    }

    /// Write bytes at the session's current position.
    pub fn write(&mut self, bytes: &[u8]) -> FlashResult<()> {
        self.reprog.write(bytes)?;
        self.written += bytes.len();
        Ok(())
    }

    /// Total bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Finish the session and report the driver's close result.
    pub fn close(mut self) -> FlashResult<()> {
        self.open = false;
        debug!(file_index = self.file_index, written = self.written, "write session closed");
        self.reprog.close()
    }
}

impl<R: Reprogrammer + ?Sized> Drop for WriteSession<'_, R> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.reprog.close() {
                warn!(file_index = self.file_index, error = %e, "failed to close write session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlashError;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_writes: bool,
    }

    impl Reprogrammer for Recorder {
        fn open(&mut self, file_index: usize, offset: u32) -> FlashResult<()> {
            self.calls.push(format!("open {file_index} {offset}"));
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> FlashResult<()> {
            if self.fail_writes {
                return Err(FlashError::SessionNotOpen);
            }
            self.calls.push(format!("write {}", bytes.len()));
            Ok(())
        }

        fn close(&mut self) -> FlashResult<()> {
            self.calls.push("close".into());
            Ok(())
        }
    }

    #[test]
    fn explicit_close_closes_once() {
        let mut rec = Recorder::default();
        let mut session = WriteSession::open(&mut rec, 2, 0).unwrap();
        session.write(&[0, 0, 0]).unwrap();
        assert_eq!(session.written(), 3);
        session.close().unwrap();
        assert_eq!(rec.calls, vec!["open 2 0", "write 3", "close"]);
    }

    #[test]
    fn drop_closes_after_error() {
        let mut rec = Recorder {
            fail_writes: true,
            ..Recorder::default()
        };
        {
            let mut session = WriteSession::open(&mut rec, 1, 4).unwrap();
            assert!(session.write(&[1]).is_err());
        }
        assert_eq!(rec.calls, vec!["open 1 4", "close"]);
    }
}

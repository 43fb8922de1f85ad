/// Byte stream the dispatcher reads frames from and writes commands to.
/// The USB bulk endpoints of an ANT stick are the usual implementation, but
/// any blocking byte stream will do.
use std::sync::Arc;
use std::time::Duration;

use crate::Result;

pub trait Transport: Send + Sync {
    /// Reads up to `buf.len()` bytes, waiting at most `timeout`. A timeout is
    /// not an error, it reads zero bytes.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Writes all of `data`, waiting at most `timeout`.
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(data, timeout)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(data, timeout)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

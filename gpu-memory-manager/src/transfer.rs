//! Host <-> device copies issued on a stream.

use std::mem::size_of;
use tracing::debug;

use crate::buffer::{DeviceBuffer, DeviceScalar};
use crate::error::{DeviceError, DeviceResult};
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

fn log_transfer(direction: TransferDirection, bytes: usize, stream: &Stream) {
    match direction {
        TransferDirection::HostToDevice => {
            debug!("HtoD transfer: {} bytes on stream {}", bytes, stream.id())
        }
        TransferDirection::DeviceToHost => {
            debug!("DtoH transfer: {} bytes on stream {}", bytes, stream.id())
        }
    }
}

impl Stream {
    /// Allocate a device buffer and fill it with `src`.
    pub fn copy_htod<T: DeviceScalar>(&self, src: &[T::Host]) -> DeviceResult<DeviceBuffer<T>> {
        log_transfer(
            TransferDirection::HostToDevice,
            std::mem::size_of_val(src),
            self,
        );
        DeviceBuffer::from_host(self.pool(), src)
    }

    /// Copy a whole buffer back to the host.
    ///
    /// Synchronizes first, so a pending kernel fault is reported instead of
    /// returning partially written data.
    pub fn copy_dtoh<T: DeviceScalar>(&self, src: &DeviceBuffer<T>) -> DeviceResult<Vec<T::Host>> {
        self.synchronize()?;
        log_transfer(TransferDirection::DeviceToHost, src.byte_len(), self);
        Ok(src.as_slice().iter().map(DeviceScalar::to_host).collect())
    }

    /// Read a single element back to the host.
    pub fn read_element<T: DeviceScalar>(
        &self,
        src: &DeviceBuffer<T>,
        index: usize,
    ) -> DeviceResult<T::Host> {
        self.synchronize()?;
        let value = src.get(index).ok_or_else(|| {
            DeviceError::InvalidValue(format!(
                "element {} of a {}-element buffer",
                index,
                src.len()
            ))
        })?;
        log_transfer(TransferDirection::DeviceToHost, size_of::<T>(), self);
        Ok(value.to_host())
    }
}

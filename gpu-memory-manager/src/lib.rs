pub mod buffer;
pub mod device;
pub mod error;
pub mod memory_pool;
pub mod stream;
pub mod transfer;

pub use buffer::{DeviceBuffer, DevicePtr, DeviceScalar};
pub use device::{DeviceConfig, GpuDevice};
pub use error::{DeviceError, DeviceResult};
pub use memory_pool::DeviceMemoryPool;
pub use stream::{KernelFault, LaunchConfig, Stream};
pub use transfer::TransferDirection;

pub mod codegen;
pub mod hash_kernel;
pub mod hash_table;
pub mod join_kernel;
#[cfg(feature = "cuda")]
pub mod ptx;
pub mod scan_kernel;

pub use codegen::KernelCodegen;
pub use hash_kernel::{
    fmix64, hash_combine, hash_scalar, ColumnView, CompositeKey, JoinKey, ScalarKey, ScalarType,
    SingleKey, MAX_KEY_COLUMNS,
};
pub use hash_table::{table_capacity, JoinHashTable, Matches, MAX_BUILD_ROWS};
pub use join_kernel::{JoinKernel, PairSink, NO_MATCH};
pub use scan_kernel::exclusive_scan;

//! NVRTC compilation of the generated join kernels.

use anyhow::{anyhow, Result};
use cudarc::nvrtc::{compile_ptx, Ptx};
use tracing::info;

use crate::codegen::KernelCodegen;
use crate::hash_kernel::ScalarType;

/// Kernel entry points present in every compiled join module.
pub const JOIN_KERNELS: [&str; 6] = [
    "init_hash_table",
    "build_hash_table",
    "count_matches",
    "flag_unmatched",
    "scatter_matches",
    "scatter_unmatched",
];

/// Generate and compile the join kernels for `key_types` to PTX.
///
/// Loading the module and launching its kernels is left to the caller.
pub fn compile_join_ptx(key_types: &[ScalarType]) -> Result<Ptx> {
    let src = KernelCodegen::new().emit_join_source(key_types)?;
    let ptx = compile_ptx(src).map_err(|e| anyhow!("NVRTC compile failed: {e}"))?;
    info!("Compiled join kernels for key {:?}", key_types);
    Ok(ptx)
}

//! CUDA C source generator for the join kernels.
//!
//! Emits the init, build, count, flag and scatter kernels specialised for
//! one key layout (1-3 columns, one storage type each). The kernels use the
//! slot layout, hash and chain scheme of [`crate::hash_table`].
//!
//! The source is export-only: it is compiled to PTX by [`crate::ptx`] when
//! the `cuda` feature is enabled, but nothing in this workspace loads or
//! launches it. A host that does must run `init_hash_table` over the table
//! before `build_hash_table`.

use anyhow::{bail, Result};
use std::fmt::Write;
use tracing::debug;

use crate::hash_kernel::{ScalarType, MAX_KEY_COLUMNS};

impl ScalarType {
    pub fn c_type(self) -> &'static str {
        match self {
            ScalarType::I8 => "signed char",
            ScalarType::I16 => "short",
            ScalarType::I32 => "int",
            ScalarType::I64 => "long long",
            ScalarType::F32 => "float",
            ScalarType::F64 => "double",
        }
    }

    /// C expression for the 64-bit key image of `value`.
    fn bits_expr(self, value: &str) -> String {
        match self {
            ScalarType::I8 | ScalarType::I16 | ScalarType::I32 | ScalarType::I64 => {
                format!("(unsigned long long)(long long)({})", value)
            }
            ScalarType::F32 => format!("(unsigned long long)__float_as_uint({})", value),
            ScalarType::F64 => format!("(unsigned long long)__double_as_longlong({})", value),
        }
    }
}

const PRELUDE: &str = r#"
#define EMPTY_SLOT 0ULL
#define END_OF_CHAIN (-1)
#define TAG_MASK 0xFFFFFFFF00000000ULL
#define ROW_MASK 0x00000000FFFFFFFFULL

__device__ __forceinline__ unsigned long long fmix64(unsigned long long k) {
    k ^= k >> 33;
    k *= 0xff51afd7ed558ccdULL;
    k ^= k >> 33;
    k *= 0xc4ceb9fe1a85ec53ULL;
    k ^= k >> 33;
    return k;
}

__device__ __forceinline__ unsigned long long hash_combine(unsigned long long seed, unsigned long long h) {
    return seed ^ (h + 0x9e3779b97f4a7c15ULL + (seed << 6) + (seed >> 2));
}
"#;

/// Empties `slots` and resets `heads` and `next` to `END_OF_CHAIN`. Launch
/// with `max(capacity, n)` threads.
const INIT_HASH_TABLE: &str = r#"
extern "C" __global__ void init_hash_table(
    unsigned long long* slots, int* heads, unsigned long long capacity,
    int* next, long long n)
{
    long long i = (long long)blockIdx.x * blockDim.x + threadIdx.x;
    if ((unsigned long long)i < capacity) {
        slots[i] = EMPTY_SLOT;
        heads[i] = END_OF_CHAIN;
    }
    if (i < n) next[i] = END_OF_CHAIN;
}
"#;

pub struct KernelCodegen;

impl KernelCodegen {
    pub fn new() -> Self {
        KernelCodegen
    }

    /// Emit the CUDA C translation unit for a key with the given column types.
    pub fn emit_join_source(&self, key_types: &[ScalarType]) -> Result<String> {
        if key_types.is_empty() || key_types.len() > MAX_KEY_COLUMNS {
            bail!(
                "join keys need 1 to {} columns, got {}",
                MAX_KEY_COLUMNS,
                key_types.len()
            );
        }
        debug!("Codegen join kernels for key {:?}", key_types);

        let mut src = String::new();
        writeln!(src, "// join kernels for key ({})", type_list(key_types))?;
        src.push_str(PRELUDE);
        src.push_str(INIT_HASH_TABLE);
        emit_row_functions(&mut src, key_types)?;
        emit_build(&mut src, key_types)?;
        emit_locate(&mut src, key_types)?;
        emit_count(&mut src, key_types)?;
        emit_flag(&mut src, key_types)?;
        emit_scatter(&mut src, key_types)?;
        src.push_str(SCATTER_UNMATCHED);
        Ok(src)
    }
}

impl Default for KernelCodegen {
    fn default() -> Self {
        Self::new()
    }
}

fn type_list(key_types: &[ScalarType]) -> String {
    key_types
        .iter()
        .map(|t| t.c_type())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `const T0* p0, const T1* p1, ...`
fn key_params(key_types: &[ScalarType], prefix: &str) -> String {
    key_types
        .iter()
        .enumerate()
        .map(|(i, t)| format!("const {}* {}{}", t.c_type(), prefix, i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `p0, p1, ...`
fn key_args(key_types: &[ScalarType], prefix: &str) -> String {
    (0..key_types.len())
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn emit_row_functions(src: &mut String, key_types: &[ScalarType]) -> Result<()> {
    writeln!(
        src,
        "\n__device__ unsigned long long hash_row({}, long long row) {{",
        key_params(key_types, "k")
    )?;
    for (i, t) in key_types.iter().enumerate() {
        let bits = t.bits_expr(&format!("k{}[row]", i));
        if i == 0 {
            writeln!(src, "    unsigned long long seed = fmix64({});", bits)?;
        } else {
            writeln!(src, "    seed = hash_combine(seed, fmix64({}));", bits)?;
        }
    }
    writeln!(src, "    return seed;\n}}")?;

    writeln!(
        src,
        "\n__device__ bool rows_equal({}, long long ra, {}, long long rb) {{",
        key_params(key_types, "a"),
        key_params(key_types, "b")
    )?;
    let terms: Vec<String> = key_types
        .iter()
        .enumerate()
        .map(|(i, t)| {
            format!(
                "{} == {}",
                t.bits_expr(&format!("a{}[ra]", i)),
                t.bits_expr(&format!("b{}[rb]", i))
            )
        })
        .collect();
    writeln!(src, "    return {};\n}}", terms.join("\n        && "))?;
    Ok(())
}

fn emit_build(src: &mut String, key_types: &[ScalarType]) -> Result<()> {
    writeln!(
        src,
        r#"
extern "C" __global__ void build_hash_table(
    {keys}, long long n,
    unsigned long long* slots, int* heads, int* next, unsigned long long mask)
{{
    long long row = (long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= n) return;
    unsigned long long hash = hash_row({args}, row);
    unsigned long long claim = (hash & TAG_MASK) | (unsigned long long)(row + 1);
    unsigned long long pos = hash & mask;
    for (unsigned long long i = 0; i <= mask; ++i) {{
        unsigned long long current = atomicCAS(&slots[pos], EMPTY_SLOT, claim);
        if (current == EMPTY_SLOT
            || ((current & TAG_MASK) == (hash & TAG_MASK)
                && rows_equal({args}, (long long)((current & ROW_MASK) - 1), {args}, row))) {{
            int previous = atomicExch(&heads[pos], (int)row);
            next[row] = previous;
            return;
        }}
        pos = (pos + 1) & mask;
    }}
    __trap();
}}"#,
        keys = key_params(key_types, "k"),
        args = key_args(key_types, "k"),
    )?;
    Ok(())
}

fn emit_locate(src: &mut String, key_types: &[ScalarType]) -> Result<()> {
    writeln!(
        src,
        r#"
__device__ int locate(
    {probe}, long long row,
    {build},
    const unsigned long long* slots, const int* heads, unsigned long long mask)
{{
    unsigned long long hash = hash_row({probe_args}, row);
    unsigned long long pos = hash & mask;
    for (unsigned long long i = 0; i <= mask; ++i) {{
        unsigned long long current = slots[pos];
        if (current == EMPTY_SLOT) return END_OF_CHAIN;
        if ((current & TAG_MASK) == (hash & TAG_MASK)
            && rows_equal({build_args}, (long long)((current & ROW_MASK) - 1), {probe_args}, row)) {{
            return heads[pos];
        }}
        pos = (pos + 1) & mask;
    }}
    return END_OF_CHAIN;
}}"#,
        probe = key_params(key_types, "p"),
        build = key_params(key_types, "b"),
        probe_args = key_args(key_types, "p"),
        build_args = key_args(key_types, "b"),
    )?;
    Ok(())
}

/// Parameter list shared by every probe-side kernel.
fn probe_params(key_types: &[ScalarType]) -> String {
    format!(
        "{}, long long n,\n    {},\n    const unsigned long long* slots, const int* heads, const int* next, unsigned long long mask",
        key_params(key_types, "p"),
        key_params(key_types, "b")
    )
}

fn locate_call(key_types: &[ScalarType]) -> String {
    format!(
        "locate({}, row, {}, slots, heads, mask)",
        key_args(key_types, "p"),
        key_args(key_types, "b")
    )
}

fn emit_count(src: &mut String, key_types: &[ScalarType]) -> Result<()> {
    writeln!(
        src,
        r#"
extern "C" __global__ void count_matches(
    {params},
    int emit_unmatched, unsigned long long* counts)
{{
    long long row = (long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= n) return;
    unsigned long long found = 0;
    for (int cur = {locate}; cur != END_OF_CHAIN; cur = next[cur]) ++found;
    counts[row] = (found == 0 && emit_unmatched) ? 1ULL : found;
}}"#,
        params = probe_params(key_types),
        locate = locate_call(key_types),
    )?;
    Ok(())
}

fn emit_flag(src: &mut String, key_types: &[ScalarType]) -> Result<()> {
    writeln!(
        src,
        r#"
extern "C" __global__ void flag_unmatched(
    {params},
    unsigned long long* flags)
{{
    long long row = (long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= n) return;
    flags[row] = ({locate} == END_OF_CHAIN) ? 1ULL : 0ULL;
}}"#,
        params = probe_params(key_types),
        locate = locate_call(key_types),
    )?;
    Ok(())
}

fn emit_scatter(src: &mut String, key_types: &[ScalarType]) -> Result<()> {
    writeln!(
        src,
        r#"
extern "C" __global__ void scatter_matches(
    {params},
    const unsigned long long* offsets, int emit_unmatched,
    int* out, unsigned long long total_pairs)
{{
    long long row = (long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= n) return;
    unsigned long long at = offsets[row];
    unsigned long long written = 0;
    for (int cur = {locate}; cur != END_OF_CHAIN; cur = next[cur]) {{
        if (at + written >= total_pairs) __trap();
        out[at + written] = (int)row;
        out[total_pairs + at + written] = cur;
        ++written;
    }}
    if (written == 0 && emit_unmatched) {{
        if (at >= total_pairs) __trap();
        out[at] = (int)row;
        out[total_pairs + at] = END_OF_CHAIN;
    }}
}}"#,
        params = probe_params(key_types),
        locate = locate_call(key_types),
    )?;
    Ok(())
}

const SCATTER_UNMATCHED: &str = r#"
extern "C" __global__ void scatter_unmatched(
    const unsigned long long* offsets, unsigned long long flagged, long long n,
    unsigned long long first_pair, int* out, unsigned long long total_pairs)
{
    long long row = (long long)blockIdx.x * blockDim.x + threadIdx.x;
    if (row >= n) return;
    unsigned long long start = offsets[row];
    unsigned long long end = (row + 1 < n) ? offsets[row + 1] : flagged;
    if (end > start) {
        unsigned long long at = first_pair + start;
        if (at >= total_pairs) __trap();
        out[at] = END_OF_CHAIN;
        out[total_pairs + at] = (int)row;
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_every_kernel_entry() {
        let src = KernelCodegen::new()
            .emit_join_source(&[ScalarType::I32])
            .unwrap();
        for entry in [
            "init_hash_table",
            "build_hash_table",
            "count_matches",
            "flag_unmatched",
            "scatter_matches",
            "scatter_unmatched",
        ] {
            assert!(
                src.contains(&format!("extern \"C\" __global__ void {}(", entry)),
                "missing {}",
                entry
            );
        }
        assert!(src.contains("const int* k0"));
    }

    #[test]
    fn table_is_initialised_before_build() {
        let src = KernelCodegen::new()
            .emit_join_source(&[ScalarType::I64])
            .unwrap();
        let init = src.find("void init_hash_table(").unwrap();
        let build = src.find("void build_hash_table(").unwrap();
        assert!(init < build);
        let body = &src[init..build];
        assert!(body.contains("slots[i] = EMPTY_SLOT;"));
        assert!(body.contains("heads[i] = END_OF_CHAIN;"));
        assert!(body.contains("next[i] = END_OF_CHAIN;"));
    }

    #[test]
    fn composite_keys_fold_every_column() {
        let src = KernelCodegen::new()
            .emit_join_source(&[ScalarType::I64, ScalarType::F64, ScalarType::I8])
            .unwrap();
        assert!(src.contains("const long long* k0, const double* k1, const signed char* k2"));
        assert_eq!(src.matches("seed = hash_combine").count(), 2);
        assert!(src.contains("__double_as_longlong(k1[row])"));
    }

    #[test]
    fn rejects_bad_arity() {
        let cg = KernelCodegen::default();
        assert!(cg.emit_join_source(&[]).is_err());
        assert!(cg.emit_join_source(&[ScalarType::I32; 4]).is_err());
    }
}

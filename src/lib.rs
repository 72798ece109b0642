//! bpf2c — eBPF object to C source translation.
//!
//! Translates a compiled eBPF ELF object (bytecode, map definitions,
//! relocations, and optional BTF line information) into a self-contained C
//! source file. Compiled together with `bpf2c.h`, the output behaves as a
//! loadable module exposing the map table, the program entry points, and a
//! per-program helper table.
//!
//! # Quick Start
//!
//! ```no_run
//! use bpf2c::{EmitOptions, Guid};
//!
//! let object = std::fs::read("probe.o").unwrap();
//! let mut output = Vec::new();
//! bpf2c::translate(
//!     &object,
//!     "probe",
//!     &EmitOptions::default(),
//!     |_section| (Guid::default(), Guid::default()),
//!     &mut output,
//! )
//! .unwrap();
//! ```
//!
//! The translator neither verifies nor executes the bytecode; it lowers each
//! instruction to equivalent C and leaves the runtime to the emitted
//! module's host.

// =============================================================================
// ELF / BTF Front-End
// =============================================================================

pub mod btf;
pub mod elf;

// =============================================================================
// Instruction Model
// =============================================================================

pub mod insn;
pub mod maps;

// =============================================================================
// Lowering & Emission
// =============================================================================

pub mod codegen;
pub mod error;

// Re-export key types for convenience
pub use codegen::{CodeGenerator, EmitOptions, Guid, LineInfo};
pub use error::Error;
pub use insn::EbpfInst;

/// Translate an eBPF ELF object into a C translation unit.
///
/// Runs the whole pipeline over every program section in the object:
/// map extraction, program loading, relocation attachment, label and helper
/// table construction, lowering, and emission.
///
/// # Arguments
/// * `data` - The ELF object bytes.
/// * `c_name` - Module name; the metadata table is `<c_name>_metadata_table`.
/// * `options` - Emitter options.
/// * `resolve_types` - Supplies the program and attach type GUIDs per
///   section name.
/// * `out` - Destination for the C source stream.
pub fn translate<W, F>(
    data: &[u8],
    c_name: &str,
    options: &EmitOptions,
    resolve_types: F,
    out: &mut W,
) -> Result<(), Error>
where
    W: std::io::Write,
    F: Fn(&str) -> (Guid, Guid),
{
    let mut generator = CodeGenerator::from_elf(data, c_name)?;
    generator.extract_maps()?;

    let section_names = generator.program_sections();
    log::info!(
        "Translating module '{}': {} program section(s)",
        c_name,
        section_names.len()
    );
    for section_name in &section_names {
        let (program_type, attach_type) = resolve_types(section_name);
        generator.parse_section(section_name, program_type, attach_type)?;
        generator.generate(section_name)?;
    }

    generator.emit(options, out)
}

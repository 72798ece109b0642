//! Emitter tests: whole-file shape, accessor functions, and emit options.

use bpf2c::codegen::{CodeGenerator, EmitOptions};
use bpf2c::insn::EbpfInst;
use pretty_assertions::assert_eq;

fn emit(generator: &CodeGenerator, options: &EmitOptions) -> String {
    let mut out = Vec::new();
    generator.emit(options, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

// =============================================================================
// Whole-File Shape
// =============================================================================

#[test]
fn test_emitted_module_without_maps() {
    let mut generator = CodeGenerator::from_instructions(
        "test",
        &[EbpfInst::new(0xb7, 0, 0, 0, 42), EbpfInst::new(0x95, 0, 0, 0, 0)],
    );
    generator.generate("test").unwrap();

    let expected = "\
#include \"bpf2c.h\"

static void _get_maps(map_entry_t** maps, size_t* count)
{
\t*maps = NULL;
\t*count = 0;
}

static uint64_t test(void* context)
{
\t// Prologue
\tuint64_t stack[(UBPF_STACK_SIZE + 7) / 8];
\tregister uint64_t r0 = 0;
\tregister uint64_t r1 = 0;
\tregister uint64_t r10 = 0;

\tr1 = (uintptr_t)context;
\tr10 = (uintptr_t)((uint8_t*)stack + sizeof(stack));

\tr0 = IMMEDIATE(42);
\treturn r0;
}
#line __LINE__ __FILE__

static program_entry_t _programs[] = {
\t{ test, \"test\", \"\", NULL, 0, NULL, 0, 2, NULL, NULL },
};

static void _get_programs(program_entry_t** programs, size_t* count)
{
\t*programs = _programs;
\t*count = 1;
}

metadata_table_t test_metadata_table = { _get_programs, _get_maps };
";
    assert_eq!(emit(&generator, &EmitOptions::default()), expected);
}

#[test]
fn test_no_maps_array_when_empty() {
    let mut generator =
        CodeGenerator::from_instructions("test", &[EbpfInst::new(0x95, 0, 0, 0, 0)]);
    generator.generate("test").unwrap();
    let output = emit(&generator, &EmitOptions::default());
    assert!(!output.contains("static map_entry_t"));
    assert!(output.contains("\t*maps = NULL;\n\t*count = 0;\n"));
}

#[test]
fn test_metadata_table_name_is_sanitized() {
    let mut generator =
        CodeGenerator::from_instructions("my-module", &[EbpfInst::new(0x95, 0, 0, 0, 0)]);
    generator.generate("my-module").unwrap();
    let output = emit(&generator, &EmitOptions::default());
    assert!(
        output.contains("metadata_table_t my_module_metadata_table = { _get_programs, _get_maps };")
    );
    // The raw name still appears in the registry row strings.
    assert!(output.contains("\"my-module\""));
}

#[test]
fn test_labels_unique_per_goto() {
    // Two branches to two distinct targets get two distinct labels.
    let mut generator = CodeGenerator::from_instructions(
        "test",
        &[
            EbpfInst::new(0x15, 1, 0, 1, 0), // jeq -> ordinal 2
            EbpfInst::new(0x15, 1, 0, 1, 0), // jeq -> ordinal 3
            EbpfInst::new(0xb7, 0, 0, 0, 1), // ordinal 2: label_1
            EbpfInst::new(0x95, 0, 0, 0, 0), // ordinal 3: label_2
        ],
    );
    generator.generate("test").unwrap();
    let output = emit(&generator, &EmitOptions::default());
    assert!(output.contains("goto label_1;"));
    assert!(output.contains("goto label_2;"));
    assert_eq!(output.matches("label_1:").count(), 1);
    assert_eq!(output.matches("label_2:").count(), 1);
}

// =============================================================================
// Emit Options
// =============================================================================

#[test]
fn test_opcode_comments_option() {
    let mut generator = CodeGenerator::from_instructions(
        "test",
        &[EbpfInst::new(0xb7, 0, 0, 0, 42), EbpfInst::new(0x95, 0, 0, 0, 0)],
    );
    generator.generate("test").unwrap();
    let options = EmitOptions {
        opcode_comments: true,
        ..Default::default()
    };
    let output = emit(&generator, &options);
    assert!(output.contains("\t// MOV64_IMM pc=0 dst=r0 src=r0 offset=0 imm=42\n"));
    assert!(output.contains("\t// EXIT pc=1 dst=r0 src=r0 offset=0 imm=0\n"));
}

#[test]
fn test_opcode_comments_off_by_default() {
    let mut generator = CodeGenerator::from_instructions(
        "test",
        &[EbpfInst::new(0xb7, 0, 0, 0, 42), EbpfInst::new(0x95, 0, 0, 0, 0)],
    );
    generator.generate("test").unwrap();
    let output = emit(&generator, &EmitOptions::default());
    assert!(!output.contains("MOV64_IMM"));
}

#[test]
fn test_zero_guids_emitted_when_enabled() {
    let mut generator =
        CodeGenerator::from_instructions("test", &[EbpfInst::new(0x95, 0, 0, 0, 0)]);
    generator.generate("test").unwrap();
    let options = EmitOptions {
        emit_type_guids: true,
        ..Default::default()
    };
    let output = emit(&generator, &options);
    assert!(output.contains(
        "static GUID test_program_type_guid = {0x00000000, 0x0000, 0x0000, \
         {0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00}};"
    ));
    assert!(output.contains("&test_program_type_guid, &test_attach_type_guid },"));
}

#[test]
fn test_guids_null_when_disabled() {
    let mut generator =
        CodeGenerator::from_instructions("test", &[EbpfInst::new(0x95, 0, 0, 0, 0)]);
    generator.generate("test").unwrap();
    let output = emit(&generator, &EmitOptions::default());
    assert!(!output.contains("static GUID"));
    assert!(output.contains(", NULL, NULL },"));
}

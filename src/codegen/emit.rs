//! C emitter.
//!
//! Serializes a generated session as one C translation unit: the global map
//! table, then per program a helper table, optional type GUIDs, the
//! referenced-map index array, and the function body, and finally the
//! program registry and metadata table. Everything the output references
//! beyond what it defines comes from `bpf2c.h`.

use std::io::Write;

use crate::error::Error;

use super::{CodeGenerator, EmitOptions, Guid, REGISTER_NAMES, Section};

/// Make a name safe for use as a C identifier.
pub(crate) fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Escape a path for use inside a `#line` directive string literal.
fn escape_file_name(input: &str) -> String {
    input.replace('\\', "\\\\")
}

fn format_guid(guid: &Guid) -> String {
    format!(
        "{{0x{:08x}, 0x{:04x}, 0x{:04x}, {{0x{:02x}, 0x{:02x}, 0x{:02x}, 0x{:02x}, 0x{:02x}, 0x{:02x}, 0x{:02x}, 0x{:02x}}}}}",
        guid.data1,
        guid.data2,
        guid.data3,
        guid.data4[0],
        guid.data4[1],
        guid.data4[2],
        guid.data4[3],
        guid.data4[4],
        guid.data4[5],
        guid.data4[6],
        guid.data4[7]
    )
}

fn register_name(id: u8) -> &'static str {
    REGISTER_NAMES.get(id as usize).copied().unwrap_or("r?")
}

impl CodeGenerator {
    /// Emit the complete C translation unit.
    pub fn emit<W: Write>(&self, options: &EmitOptions, out: &mut W) -> Result<(), Error> {
        writeln!(out, "#include \"bpf2c.h\"")?;
        writeln!(out)?;

        self.emit_map_table(out)?;

        for (name, section) in &self.sections {
            if section.output.is_empty() {
                continue;
            }
            self.emit_section(name, section, options, out)?;
        }

        self.emit_program_registry(options, out)?;
        Ok(())
    }

    fn emit_map_table<W: Write>(&self, out: &mut W) -> Result<(), Error> {
        if !self.maps.is_empty() {
            writeln!(out, "static map_entry_t _maps[] = {{")?;
            for (name, entry) in self.maps.index_ordered() {
                let d = &entry.definition;
                writeln!(
                    out,
                    "{{ NULL, {{ {}, {}, {}, {}, {}, {}, {}, {} }}, \"{}\" }},",
                    d.map_type,
                    d.key_size,
                    d.value_size,
                    d.max_entries,
                    d.inner_map_idx,
                    d.pinning,
                    d.id,
                    d.inner_id,
                    name
                )?;
            }
            writeln!(out, "}};")?;
            writeln!(out)?;
            writeln!(out, "static void _get_maps(map_entry_t** maps, size_t* count)")?;
            writeln!(out, "{{")?;
            writeln!(out, "\t*maps = _maps;")?;
            writeln!(out, "\t*count = {};", self.maps.len())?;
            writeln!(out, "}}")?;
            writeln!(out)?;
        } else {
            writeln!(out, "static void _get_maps(map_entry_t** maps, size_t* count)")?;
            writeln!(out, "{{")?;
            writeln!(out, "\t*maps = NULL;")?;
            writeln!(out, "\t*count = 0;")?;
            writeln!(out, "}}")?;
            writeln!(out)?;
        }
        Ok(())
    }

    fn emit_section<W: Write>(
        &self,
        name: &str,
        section: &Section,
        options: &EmitOptions,
        out: &mut W,
    ) -> Result<(), Error> {
        let program_name = sanitize_name(if section.program_name.is_empty() {
            name
        } else {
            section.program_name.as_str()
        });

        // Helper table, in the order the helpers occur in the bytecode.
        if !section.helpers.is_empty() {
            writeln!(
                out,
                "static helper_function_entry_t {}_helpers[] = {{",
                program_name
            )?;
            for helper in &section.helpers {
                writeln!(out, "{{ NULL, {}, \"{}\" }},", helper.id, helper.name)?;
            }
            writeln!(out, "}};")?;
            writeln!(out)?;
        }

        if options.emit_type_guids {
            writeln!(
                out,
                "static GUID {}_program_type_guid = {};",
                program_name,
                format_guid(&section.program_type)
            )?;
            writeln!(
                out,
                "static GUID {}_attach_type_guid = {};",
                program_name,
                format_guid(&section.expected_attach_type)
            )?;
        }

        if !section.referenced_map_indices.is_empty() {
            writeln!(out, "static uint16_t {}_maps[] = {{", program_name)?;
            for map_index in &section.referenced_map_indices {
                writeln!(out, "{},", map_index)?;
            }
            writeln!(out, "}};")?;
            writeln!(out)?;
        }

        let line_info = self.line_info.get(name);
        let mut directive = String::new();
        if let Some(info) =
            line_info.and_then(|m| section.output.first().and_then(|o| m.get(&o.offset)))
        {
            if !info.file_name.is_empty() {
                directive = format!("#line {} \"{}\"\n", info.line, escape_file_name(&info.file_name));
            }
        }

        writeln!(out, "static uint64_t {}(void* context)", program_name)?;
        writeln!(out, "{{")?;

        write!(out, "{}\t// Prologue\n", directive)?;
        write!(out, "{}\tuint64_t stack[(UBPF_STACK_SIZE + 7) / 8];\n", directive)?;
        for register in REGISTER_NAMES.iter() {
            if !section.referenced_registers.contains(register) {
                continue;
            }
            write!(out, "{}\tregister uint64_t {} = 0;\n", directive, register)?;
        }
        writeln!(out)?;
        write!(out, "{}\tr1 = (uintptr_t)context;\n", directive)?;
        write!(
            out,
            "{}\tr10 = (uintptr_t)((uint8_t*)stack + sizeof(stack));\n",
            directive
        )?;
        writeln!(out)?;

        for output in &section.output {
            if output.lines.is_empty() {
                continue;
            }
            if let Some(label) = &output.label {
                writeln!(out, "{}:", label)?;
            }
            if let Some(info) = line_info.and_then(|m| m.get(&output.offset)) {
                if !info.file_name.is_empty() && info.line != 0 {
                    directive =
                        format!("#line {} \"{}\"\n", info.line, escape_file_name(&info.file_name));
                }
            }
            if options.opcode_comments {
                writeln!(
                    out,
                    "\t// {} pc={} dst={} src={} offset={} imm={}",
                    output.inst.mnemonic(),
                    output.offset,
                    register_name(output.inst.dst()),
                    register_name(output.inst.src()),
                    output.inst.offset,
                    output.inst.imm
                )?;
            }
            for line in &output.lines {
                write!(out, "{}\t{}\n", directive, line)?;
            }
        }

        write!(out, "{}}}\n", directive)?;
        writeln!(out, "#line __LINE__ __FILE__")?;
        writeln!(out)?;
        Ok(())
    }

    fn emit_program_registry<W: Write>(
        &self,
        options: &EmitOptions,
        out: &mut W,
    ) -> Result<(), Error> {
        writeln!(out, "static program_entry_t _programs[] = {{")?;
        let mut count = 0;
        for (name, section) in &self.sections {
            if section.output.is_empty() {
                continue;
            }
            count += 1;
            let program_name = sanitize_name(if section.program_name.is_empty() {
                name
            } else {
                section.program_name.as_str()
            });
            let map_array = if section.referenced_map_indices.is_empty() {
                "NULL".to_string()
            } else {
                format!("{}_maps", program_name)
            };
            let helper_array = if section.helpers.is_empty() {
                "NULL".to_string()
            } else {
                format!("{}_helpers", program_name)
            };
            let (program_type, attach_type) = if options.emit_type_guids {
                (
                    format!("&{}_program_type_guid", program_name),
                    format!("&{}_attach_type_guid", program_name),
                )
            } else {
                ("NULL".to_string(), "NULL".to_string())
            };
            writeln!(
                out,
                "\t{{ {}, \"{}\", \"{}\", {}, {}, {}, {}, {}, {}, {} }},",
                program_name,
                name,
                section.program_name,
                map_array,
                section.referenced_map_indices.len(),
                helper_array,
                section.helpers.len(),
                section.output.len(),
                program_type,
                attach_type
            )?;
        }
        writeln!(out, "}};")?;
        writeln!(out)?;
        writeln!(
            out,
            "static void _get_programs(program_entry_t** programs, size_t* count)"
        )?;
        writeln!(out, "{{")?;
        writeln!(out, "\t*programs = _programs;")?;
        writeln!(out, "\t*count = {};", count)?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        writeln!(
            out,
            "metadata_table_t {}_metadata_table = {{ _get_programs, _get_maps }};",
            sanitize_name(&self.c_name)
        )?;
        Ok(())
    }
}

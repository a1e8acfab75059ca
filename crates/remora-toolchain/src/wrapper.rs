//! Wrapper and header source generation.
//!
//! The wrapper is the only per-function native code the device is ever
//! asked to execute: a single `int call_remote(void)` that reads each
//! argument out of its frame slot with type-specific reinterpretation,
//! calls the target function, and writes the result to the last slot. The
//! frame alias is `volatile` so the compiler can neither elide the slot
//! reads nor coalesce the result store across the call.
//!
//! A companion header declares the target function (plus any configured
//! typedefs it uses) so the wrapper compiles without seeing its body.

use crate::signature::{ParamKind, ScalarType, Signature};
use std::collections::BTreeMap;
use std::fmt::Write;

/// File name the generated wrapper unit is written under.
pub const WRAPPER_FILE: &str = "remora_wrapper.c";

/// File name of the generated declaration header.
pub const HEADER_FILE: &str = "remora_entry.h";

/// Generate the wrapper translation unit.
///
/// # Arguments
/// * `sig` - parsed target function signature
/// * `args_address` - device address of the argument frame
/// * `entry` - name of the synthesized entry function
/// * `slots` - frame slot count; the last slot holds the return value
pub fn generate_wrapper(sig: &Signature, args_address: u32, entry: &str, slots: usize) -> String {
    let ret_slot = slots - 1;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "/* Generated wrapper bridging the argument frame to '{}'. */",
        sig.name
    );
    out.push('\n');
    out.push_str("#include <stdint.h>\n");
    let _ = writeln!(out, "#include \"{}\"", HEADER_FILE);
    out.push('\n');
    let _ = writeln!(
        out,
        "#define IO ((volatile uint32_t *)0x{:08x}u)",
        args_address
    );
    out.push('\n');
    let _ = writeln!(out, "int {}(void)", entry);
    out.push_str("{\n");

    // Slot reads.
    let mut call_args = Vec::new();
    for (i, param) in sig.params.iter().enumerate() {
        match param.kind() {
            ParamKind::Pointer => {
                let _ = writeln!(
                    out,
                    "    {} *{} = ({} *)IO[{}];",
                    param.ty.base, param.name, param.ty.base, i
                );
            }
            ParamKind::Value => {
                let _ = writeln!(
                    out,
                    "    {} {} = *(volatile {} *)&IO[{}];",
                    param.ty.base, param.name, param.ty.base, i
                );
            }
        }
        call_args.push(param.name.clone());
    }
    if !sig.params.is_empty() {
        out.push('\n');
    }

    // Call and result writeback.
    let call = format!("{}({})", sig.name, call_args.join(", "));
    if sig.return_type.pointer {
        let _ = writeln!(out, "    {} *result = {};", sig.return_type.base, call);
        let _ = writeln!(out, "    IO[{}] = (uint32_t)result;", ret_slot);
    } else {
        match sig.return_type.scalar {
            Some(ScalarType::Void) | None => {
                let _ = writeln!(out, "    {};", call);
            }
            Some(ScalarType::F64) => {
                // Documented lossy behavior: doubles come back as floats.
                let _ = writeln!(out, "    double result = {};", call);
                let _ = writeln!(
                    out,
                    "    *(volatile float *)&IO[{}] = (float)result;",
                    ret_slot
                );
            }
            Some(ScalarType::F32) => {
                let _ = writeln!(out, "    float result = {};", call);
                let _ = writeln!(out, "    *(volatile float *)&IO[{}] = result;", ret_slot);
            }
            Some(_) => {
                let _ = writeln!(out, "    {} result = {};", sig.return_type.base, call);
                let _ = writeln!(
                    out,
                    "    *(volatile {} *)&IO[{}] = result;",
                    sig.return_type.base, ret_slot
                );
            }
        }
    }

    out.push_str("    return 0;\n");
    out.push_str("}\n");
    out
}

/// Generate the declaration header for the target function.
///
/// Configured typedefs that appear in the signature are re-declared so the
/// prototype compiles standalone.
pub fn generate_header(sig: &Signature, typedefs: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    out.push_str("#ifndef REMORA_ENTRY_H\n");
    out.push_str("#define REMORA_ENTRY_H\n\n");
    let _ = writeln!(out, "/* Generated declaration for '{}'. */", sig.name);
    out.push('\n');
    out.push_str("#include <stdint.h>\n");

    // Only the typedefs the signature actually mentions.
    let used: Vec<(&String, &String)> = typedefs
        .iter()
        .filter(|(name, _)| {
            sig.return_type.base == **name || sig.params.iter().any(|p| p.ty.base == **name)
        })
        .collect();
    if !used.is_empty() {
        out.push('\n');
        for (name, target) in used {
            let _ = writeln!(out, "typedef {} {};", target, name);
        }
    }

    out.push('\n');
    let _ = writeln!(out, "{};", render_prototype(sig));
    out.push_str("\n#endif /* REMORA_ENTRY_H */\n");
    out
}

fn render_prototype(sig: &Signature) -> String {
    let params = if sig.params.is_empty() {
        "void".to_owned()
    } else {
        sig.params
            .iter()
            .map(|p| match p.kind() {
                ParamKind::Pointer => format!("{} *{}", p.ty.base, p.name),
                ParamKind::Value => format!("{} {}", p.ty.base, p.name),
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    let ret = if sig.return_type.pointer {
        format!("{} *", sig.return_type.base)
    } else {
        sig.return_type.base.clone()
    };
    format!("{}{}{}({})", ret, if ret.ends_with('*') { "" } else { " " }, sig.name, params)
}

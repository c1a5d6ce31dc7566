//! Bytecode assembler: turns one parsed [`ScriptFunc`] into its emitted
//! command stream, resolving every identifier argument against the symbol
//! pool, string pool, asset table, and opcode/actor-type enums as it goes.

use super::commands::{self, ArgSlot};
use super::parser::{Command, ScriptFunc, Spanned, Value};
use crate::error::{CompileError, Result};
use crate::headers::{AssetTable, EnumTable};
use crate::symtab::{SymbolKind, SymbolPool};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::HashMap;

pub const CALLER_ID: u32 = 0x8000_0001;
pub const CAMERA_ID: u32 = 0x8000_0000;
pub const CHILD_INDEX: u32 = 0xFFFF_FFFF;

/// Quantize a degree value to a `u16` angle, matching `degrees_to_ang16`:
/// `round((v mod 360) / 360 * 65536)`, clamped to `u16::MAX`.
pub fn degrees_to_ang16(v: f64) -> u16 {
    let m = v.rem_euclid(360.0);
    let scaled = (m / 360.0 * 65536.0).round();
    scaled.min(65535.0) as u16
}

pub struct AssembleCtx<'a> {
    pub script_ops: &'a EnumTable,
    pub actor_types: &'a EnumTable,
    pub assets: &'a AssetTable,
    pub symbols: &'a mut SymbolPool,
    pub strings: &'a mut crate::symtab::StringPool,
    pub script_index: &'a HashMap<String, u32>,
    pub script_actors: &'a mut Vec<Vec<u8>>,
    pub actor_count: u32,
}

fn script_err(func: &ScriptFunc, pos: super::lexer::Pos, message: impl Into<String>) -> anyhow::Error {
    CompileError::Script {
        source_file: func.source_label.clone(),
        line: pos.line,
        col: pos.col,
        message: message.into(),
    }
    .into()
}

/// Resolve `positional`/`keyword` against one argdef slot, returning the
/// effective value (falling back to the type-specific default if optional
/// and absent).
fn resolve_value<'c>(
    func: &ScriptFunc,
    command: &'c Command,
    slot: ArgSlot,
    positional_index: usize,
) -> Result<(Spanned<Value>, &'static str)> {
    let (ty, existing) = match slot {
        ArgSlot::Positional(ty) => (ty, command.positional.get(positional_index).cloned()),
        ArgSlot::Keyword(name, ty) => (
            ty,
            command.keyword.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()),
        ),
    };

    let optional = ty.starts_with('?');
    let ty = ty.trim_start_matches('?');

    if let Some(value) = existing {
        return Ok((value, ty));
    }

    if optional {
        let default = match ty {
            "int" | "uint" | "ushort" | "float" | "color" | "angle" => Value::Int(0),
            _ => Value::Null,
        };
        return Ok((Spanned { pos: command.pos, value: default }, ty));
    }

    let name = match slot {
        ArgSlot::Positional(_) => format!("positional argument {}", positional_index + 1),
        ArgSlot::Keyword(name, _) => format!("keyword argument `{name}`"),
    };
    Err(script_err(func, command.pos, format!("missing required {name}")))
}

fn check_kind(
    func: &ScriptFunc,
    value: &Spanned<Value>,
    expected: &str,
    ok: impl Fn(&Value) -> bool,
) -> Result<()> {
    if ok(&value.value) {
        Ok(())
    } else {
        Err(script_err(
            func,
            value.pos,
            format!("expected {expected}, got {}", value.value.type_name()),
        ))
    }
}

fn write_target(
    func: &ScriptFunc,
    ctx: &AssembleCtx,
    value: &Spanned<Value>,
    allow_camera: bool,
    allow_null: bool,
) -> Result<u32> {
    match &value.value {
        Value::Null if allow_null => Ok(0),
        Value::Special(s) if s == "caller" => Ok(CALLER_ID),
        Value::Special(s) if s == "camera" && allow_camera => Ok(CAMERA_ID),
        Value::Ident(name) => {
            if let Some(id) = ctx.symbols.try_get(SymbolKind::Actor, name) {
                return Ok(id);
            }
            if let Some(id) = ctx.symbols.try_get(SymbolKind::Waypoint, name) {
                return Ok((-(id as i64 + 1)) as u32);
            }
            Err(script_err(func, value.pos, format!("no such target `{name}`")))
        }
        _ => Err(script_err(
            func,
            value.pos,
            "expected identifier, @caller, @camera, or null",
        )),
    }
}

fn emit_arg(func: &ScriptFunc, ctx: &mut AssembleCtx, ty: &str, value: Spanned<Value>, buf: &mut Vec<u8>) -> Result<()> {
    match ty {
        "script" => {
            check_kind(func, &value, "script identifier", |v| matches!(v, Value::Ident(_)))?;
            let Value::Ident(name) = &value.value else { unreachable!() };
            let id = *ctx
                .script_index
                .get(name)
                .ok_or_else(|| script_err(func, value.pos, format!("unknown script `{name}`")))?;
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "activescript" => {
            check_kind(func, &value, "script identifier or @child", |v| {
                matches!(v, Value::Ident(_)) || v.is_special("child")
            })?;
            let id = if value.value.is_special("child") {
                CHILD_INDEX
            } else {
                let Value::Ident(name) = &value.value else { unreachable!() };
                *ctx.script_index
                    .get(name)
                    .ok_or_else(|| script_err(func, value.pos, format!("unknown script `{name}`")))?
            };
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "int" => {
            check_kind(func, &value, "integer", |v| matches!(v, Value::Int(_)))?;
            let Value::Int(v) = value.value else { unreachable!() };
            if !(i32::MIN as i64..=i32::MAX as i64).contains(&v) {
                return Err(script_err(func, value.pos, "int32 value out of range"));
            }
            buf.write_i32::<BigEndian>(v as i32).unwrap();
        }
        "uint" => {
            check_kind(func, &value, "unsigned integer", |v| matches!(v, Value::Int(_)))?;
            let Value::Int(v) = value.value else { unreachable!() };
            if !(0..=u32::MAX as i64).contains(&v) {
                return Err(script_err(func, value.pos, "uint32 value out of range"));
            }
            buf.write_u32::<BigEndian>(v as u32).unwrap();
        }
        "ushort" => {
            check_kind(func, &value, "unsigned integer", |v| matches!(v, Value::Int(_)))?;
            let Value::Int(v) = value.value else { unreachable!() };
            if !(0..=u16::MAX as i64).contains(&v) {
                return Err(script_err(func, value.pos, "uint16 value out of range"));
            }
            buf.write_u16::<BigEndian>(v as u16).unwrap();
        }
        "string" => {
            check_kind(func, &value, "string", |v| matches!(v, Value::String(_)))?;
            let Value::String(s) = &value.value else { unreachable!() };
            buf.write_u32::<BigEndian>(ctx.strings.insert(s)).unwrap();
        }
        "color" => {
            check_kind(func, &value, "color literal or unsigned integer", |v| {
                matches!(v, Value::Int(_) | Value::Color(_))
            })?;
            let color = match value.value {
                Value::Color(c) => c,
                Value::Int(v) => {
                    if !(0..=u32::MAX as i64).contains(&v) {
                        return Err(script_err(func, value.pos, "uint32 value out of range"));
                    }
                    v as u32
                }
                _ => unreachable!(),
            };
            buf.write_u32::<BigEndian>(color).unwrap();
        }
        "actor" => {
            let optional_ok = matches!(value.value, Value::Null);
            check_kind(func, &value, "actor identifier or @caller", |v| {
                matches!(v, Value::Ident(_)) || v.is_special("caller") || matches!(v, Value::Null)
            })?;
            let id = if optional_ok {
                0
            } else if value.value.is_special("caller") {
                CALLER_ID
            } else {
                let Value::Ident(name) = &value.value else { unreachable!() };
                ctx.symbols.get(SymbolKind::Actor, Some(name))?
            };
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "target" => {
            let id = write_target(func, ctx, &value, true, true)?;
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "float" => {
            check_kind(func, &value, "float", |v| matches!(v, Value::Int(_) | Value::Float(_)))?;
            let f = match value.value {
                Value::Int(v) => v as f32,
                Value::Float(v) => v as f32,
                _ => unreachable!(),
            };
            buf.write_f32::<BigEndian>(f).unwrap();
        }
        "map" => {
            check_kind(func, &value, "string", |v| matches!(v, Value::String(_)))?;
            let Value::String(s) = &value.value else { unreachable!() };
            let id = ctx.assets.index("maps", std::path::Path::new(s))?;
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "music" => {
            let id = if matches!(value.value, Value::Null) {
                0
            } else {
                check_kind(func, &value, "string", |v| matches!(v, Value::String(_)))?;
                let Value::String(s) = &value.value else { unreachable!() };
                ctx.assets.index("mus", std::path::Path::new(s))?
            };
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "sfx" => {
            let id = if matches!(value.value, Value::Null) {
                0
            } else {
                check_kind(func, &value, "string", |v| matches!(v, Value::String(_)))?;
                let Value::String(s) = &value.value else { unreachable!() };
                ctx.assets.index("sfx", std::path::Path::new(s))?
            };
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "actortype" => {
            check_kind(func, &value, "actor type identifier", |v| matches!(v, Value::Ident(_)))?;
            let Value::Ident(name) = &value.value else { unreachable!() };
            let id = ctx
                .actor_types
                .value(name)
                .map_err(|_| script_err(func, value.pos, format!("unknown actor type `{name}`")))?;
            buf.write_u32::<BigEndian>(id).unwrap();
        }
        "newtarget" => {
            check_kind(func, &value, "identifier or null", |v| {
                matches!(v, Value::Ident(_) | Value::Null)
            })?;
            let id = if let Value::Ident(name) = &value.value {
                ctx.symbols.insert(name, SymbolKind::Actor)?
            } else {
                0
            };
            buf.write_u16::<BigEndian>(id as u16).unwrap();
        }
        "angle" => {
            check_kind(func, &value, "number", |v| matches!(v, Value::Int(_) | Value::Float(_)))?;
            let deg = match value.value {
                Value::Int(v) => v as f64,
                Value::Float(v) => v,
                _ => unreachable!(),
            };
            buf.write_u16::<BigEndian>(degrees_to_ang16(deg)).unwrap();
        }
        "fx" => {
            check_kind(func, &value, "string", |v| matches!(v, Value::String(_)))?;
            let Value::String(s) = &value.value else { unreachable!() };
            let gfx_id = ctx.assets.index("gfx", std::path::Path::new(s))?;
            let tileset_id = ctx.assets.index("tileset", std::path::Path::new(s))?;
            buf.write_u16::<BigEndian>(gfx_id as u16).unwrap();
            buf.write_u16::<BigEndian>(tileset_id as u16).unwrap();
        }
        other => return Err(script_err(func, value.pos, format!("unknown type in command definition: {other}"))),
    }
    Ok(())
}

fn assemble_command(func: &ScriptFunc, ctx: &mut AssembleCtx, command: &Command, out: &mut Vec<u8>) -> Result<()> {
    let def = commands::lookup(&command.name)
        .ok_or_else(|| script_err(func, command.pos, format!("unknown script command `{}`", command.name)))?;

    let op_id = ctx
        .script_ops
        .value(def.op_name)
        .map_err(|_| script_err(func, command.pos, format!("unknown script opcode `{}`", def.op_name)))?;
    out.write_u32::<BigEndian>(op_id).unwrap();

    let is_spawn_actor = command.name == "spawn_actor";
    let mut scratch = Vec::new();
    let target = if is_spawn_actor { &mut scratch } else { out };

    let mut positional_index = 0usize;
    for &slot in def.args {
        let (value, ty) = resolve_value(func, command, slot, positional_index)?;
        if matches!(slot, ArgSlot::Positional(_)) {
            positional_index += 1;
        }
        emit_arg(func, ctx, ty, value, target)?;
    }

    if is_spawn_actor {
        scratch.write_u32::<BigEndian>(0).unwrap();
        let index = match ctx.script_actors.iter().position(|b| b == &scratch) {
            Some(i) => i,
            None => {
                ctx.script_actors.push(scratch);
                ctx.script_actors.len() - 1
            }
        };
        out.write_u32::<BigEndian>(ctx.actor_count + index as u32).unwrap();
    }

    Ok(())
}

/// Assemble one script function's full command stream, including the
/// `OP_SINGLETON` prefix and the synthetic terminal `return;` if the
/// author's last command isn't already a terminator.
pub fn assemble(func: &ScriptFunc, ctx: &mut AssembleCtx) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    if func.singleton {
        let op = ctx.script_ops.value("OP_SINGLETON")?;
        out.write_u32::<BigEndian>(op).unwrap();
    }

    let mut commands = func.commands.clone();
    let needs_return = match commands.last() {
        Some(c) => !matches!(c.name.as_str(), "jump" | "exit" | "return"),
        None => true,
    };
    if needs_return {
        commands.push(Command::synthetic_return(func.pos));
    }

    for command in &commands {
        assemble_command(func, ctx, command, &mut out)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_quantization_is_periodic_and_in_range() {
        for v in [-720.0, -1.0, 0.0, 45.0, 180.0, 359.999, 720.0] {
            let a = degrees_to_ang16(v);
            let b = degrees_to_ang16(v + 360.0);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn angle_max_clamped_to_u16_max() {
        assert_eq!(degrees_to_ang16(359.999999), 65535);
    }
}

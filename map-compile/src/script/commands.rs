//! The opcode table: `name -> (op_enum_name, argdef[])`.
//!
//! The original tool's `scriptcmds.py` (a project-local list of opcode
//! definitions, generated alongside the `OP_*` C enum it looks up through
//! the enum resolver) isn't present in this corpus, so this table is
//! authored directly against the documented argument type list and
//! per-type argument examples. Each entry's `op_enum_name` is resolved
//! against the script-ops header at assemble time via
//! [`crate::headers::EnumTable`] — adding a command here never requires
//! touching the assembler.

/// One argument's position (positional vs keyword) and declared type.
/// A type prefixed with `?` is optional.
#[derive(Debug, Clone, Copy)]
pub enum ArgSlot {
    Positional(&'static str),
    Keyword(&'static str, &'static str),
}

pub struct CommandDef {
    pub op_name: &'static str,
    pub args: &'static [ArgSlot],
}

use ArgSlot::{Keyword as Kw, Positional as Pos};

macro_rules! cmd {
    ($op:literal) => {
        CommandDef { op_name: $op, args: &[] }
    };
    ($op:literal, [$($arg:expr),* $(,)?]) => {
        CommandDef { op_name: $op, args: &[$($arg),*] }
    };
}

pub fn lookup(name: &str) -> Option<&'static CommandDef> {
    TABLE.iter().find(|(n, _)| *n == name).map(|(_, def)| def)
}

static TABLE: &[(&str, CommandDef)] = &[
    ("return", cmd!("OP_RETURN")),
    ("exit", cmd!("OP_EXIT")),
    ("jump", cmd!("OP_JUMP", [Pos("script")])),
    (
        "wait",
        cmd!("OP_WAIT", [Pos("float")]),
    ),
    (
        "wait_for",
        cmd!("OP_WAIT_FOR", [Pos("target")]),
    ),
    (
        "activate_script",
        cmd!("OP_ACTIVATE_SCRIPT", [Pos("activescript"), Kw("target", "?target")]),
    ),
    (
        "spawn_actor",
        cmd!(
            "OP_SPAWN_ACTOR",
            [
                Pos("actortype"),
                Pos("int"),
                Pos("int"),
                Kw("angle", "?angle"),
                Kw("flags", "?uint"),
            ]
        ),
    ),
    (
        "set_flag",
        cmd!("OP_SET_FLAG", [Pos("target"), Pos("uint")]),
    ),
    (
        "move_to",
        cmd!(
            "OP_MOVE_TO",
            [Pos("target"), Pos("target"), Kw("speed", "?float")]
        ),
    ),
    (
        "set_target",
        cmd!("OP_SET_TARGET", [Pos("newtarget"), Pos("target")]),
    ),
    (
        "set_angle",
        cmd!("OP_SET_ANGLE", [Pos("target"), Pos("angle")]),
    ),
    (
        "set_color",
        cmd!("OP_SET_COLOR", [Pos("color")]),
    ),
    (
        "load_map",
        cmd!("OP_LOAD_MAP", [Pos("map"), Kw("spawn", "?ushort")]),
    ),
    (
        "set_music",
        cmd!("OP_SET_MUSIC", [Pos("music")]),
    ),
    (
        "play_sfx",
        cmd!("OP_PLAY_SFX", [Pos("sfx"), Kw("actor", "?actor")]),
    ),
    (
        "spawn_fx",
        cmd!("OP_SPAWN_FX", [Pos("fx"), Pos("target")]),
    ),
    (
        "set_timer",
        cmd!("OP_SET_TIMER", [Pos("ushort"), Pos("activescript")]),
    ),
    (
        "say",
        cmd!("OP_SAY", [Pos("string"), Kw("actor", "?actor")]),
    ),
];

//! CLI entrypoint.
//!
//! Wires command-line flags to [`compile::CompileOptions`] and runs one
//! compile. All failures are reported as `error: {cause chain}` on stderr
//! with a non-zero exit code; nothing here is expected to panic.

mod collision;
mod compile;
mod error;
mod headers;
mod model;
mod pool;
mod script;
mod symtab;
mod tiled_adapter;
mod tileset;

use compile::CompileOptions;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "mapc", about = "Compile a Tiled map into the engine's binary map format")]
struct Opt {
    /// Input .tmx map file
    #[structopt(parse(from_os_str))]
    map_file: PathBuf,

    /// Asset header listing gfx/mus/sfx/tileset rom paths
    #[structopt(short = "a", long = "asset-list", parse(from_os_str))]
    asset_list: PathBuf,

    /// Header declaring the actor_type_t enum
    #[structopt(short = "t", long = "actor-types", parse(from_os_str))]
    actor_types: PathBuf,

    /// Header declaring the script_op_t enum
    #[structopt(short = "s", long = "script-ops", parse(from_os_str))]
    script_ops: PathBuf,

    /// Directory the compiled .map file is written into
    #[structopt(short = "o", long = "output", parse(from_os_str), default_value = ".")]
    output: PathBuf,

    /// Log each pipeline stage as it runs
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,

    /// Dump the compiled collision geometry as an SVG next to the output
    #[structopt(short = "S", long = "svg-dump")]
    svg_dump: bool,
}

fn main() {
    let opt = Opt::from_args();

    let level = if opt.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let options = CompileOptions {
        map_file: opt.map_file,
        asset_list: opt.asset_list,
        actor_types: opt.actor_types,
        script_ops: opt.script_ops,
        output_dir: opt.output,
        verbose: opt.verbose,
        svg_dump: opt.svg_dump,
    };

    if let Err(err) = compile::compile(&options) {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

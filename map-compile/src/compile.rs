//! Map compositor.
//!
//! Coordinates every pipeline stage — script parsing, tileset
//! classification, the layer scan, script assembly, collision build — and
//! writes the `'TMAP'`-tagged binary blob described in §6's on-disk
//! layout through the pooled writer.

use crate::collision::{self, CollisionBuilder};
use crate::error::Result;
use crate::headers::{AssetTable, EnumTable};
use crate::model::{
    ImageLayer, Layer, MapData, ObjectData, ObjectShape, Orientation, Properties, PropertyValue,
    RenderOrder, TilesetData,
};
use crate::pool::{Pool, PoolChunk};
use crate::script::assembler::AssembleCtx;
use crate::script::{self, parse_inline_block, parse_script_file, ScriptFunc, Value};
use crate::symtab::{StringPool, SymbolKind, SymbolPool};
use crate::tiled_adapter;
use crate::tileset::TilesetAssigner;
use anyhow::{anyhow, bail, Context};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const AF_CUR_PLAYER: u32 = 1 << 29;
const AF_FLIPX: u32 = 1 << 28;
const AF_FLIPY: u32 = 1 << 27;
const AF_FLIPD: u32 = 1 << 26;

const TRIGGER_PLAYER: u32 = 1 << 1;
const TRIGGER_ENEMY: u32 = 1 << 2;
const TRIGGER_PROP: u32 = 1 << 3;
const TRIGGER_PROJECTILE: u32 = 1 << 4;
const TRIGGER_REPEATABLE: u32 = 1 << 8;
const TRIGGER_MANUAL: u32 = 1 << 9;
const TRIGGER_CURRENT_PLAYER: u32 = 1 << 10;

/// CLI-facing configuration for one compile invocation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub map_file: PathBuf,
    pub asset_list: PathBuf,
    pub actor_types: PathBuf,
    pub script_ops: PathBuf,
    pub output_dir: PathBuf,
    pub verbose: bool,
    pub svg_dump: bool,
}

/// Load, compile, and write `opts.map_file`, returning the path of the
/// emitted `.map` file.
pub fn compile(opts: &CompileOptions) -> Result<PathBuf> {
    let map = tiled_adapter::load_map(&opts.map_file)
        .with_context(|| format!("loading map {}", opts.map_file.display()))?;

    let actor_types = EnumTable::load(&opts.actor_types, "actor_type_t")?;
    let script_ops = EnumTable::load(&opts.script_ops, "script_op_t")?;
    // The asset header's own directory doubles as the asset root: the
    // header-generator script that produces it always lives alongside the
    // asset tree it describes.
    let asset_dir = opts.asset_list.parent().unwrap_or_else(|| Path::new("."));
    let assets = AssetTable::load(&opts.asset_list, asset_dir)?;

    let stem = opts
        .map_file
        .file_stem()
        .ok_or_else(|| anyhow!("invalid map filename {}", opts.map_file.display()))?;

    let svg_path = if opts.svg_dump {
        Some(opts.output_dir.join(format!("{}.svg", stem.to_string_lossy())))
    } else {
        None
    };

    let data = compile_map(
        &map,
        &actor_types,
        &script_ops,
        &assets,
        svg_path.as_deref(),
        opts.verbose,
    )?;

    std::fs::create_dir_all(&opts.output_dir)
        .with_context(|| format!("creating output directory {}", opts.output_dir.display()))?;
    let out_path = opts.output_dir.join(format!("{}.map", stem.to_string_lossy()));
    std::fs::write(&out_path, &data).with_context(|| format!("writing {}", out_path.display()))?;
    log::info!("wrote {}", out_path.display());
    Ok(out_path)
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

fn sanity_check(map: &MapData) -> Result<()> {
    if map.orientation != Orientation::Orthogonal {
        bail!("only orthogonal maps are supported");
    }
    if map.render_order != RenderOrder::RightDown {
        bail!("only maps with right-down render order are supported");
    }
    if map.tile_width != 16 || map.tile_height != 16 {
        bail!("tilemap must have 16x16 tiles");
    }
    if !map.infinite {
        bail!("only infinite maps are supported");
    }
    if map.width % 16 != 0 || map.height % 16 != 0 {
        bail!("map size must be a multiple of 16");
    }
    Ok(())
}

struct ChunkAccum {
    layers: Vec<Vec<u16>>,
    fg_split: Option<i32>,
    props: Vec<(i32, ObjectData)>,
}

impl ChunkAccum {
    fn new() -> Self {
        ChunkAccum {
            layers: Vec::new(),
            fg_split: None,
            props: Vec::new(),
        }
    }
}

/// Compile an already-loaded map to its final binary blob. Split out from
/// [`compile`] so tests can exercise it against in-memory [`MapData`]
/// values without touching the filesystem for the map itself.
pub fn compile_map(
    map: &MapData,
    actor_types: &EnumTable,
    script_ops: &EnumTable,
    assets: &AssetTable,
    svg_path: Option<&Path>,
    verbose: bool,
) -> Result<Vec<u8>> {
    sanity_check(map)?;

    // ---- script parsing ----------------------------------------------
    let mut script_dict: HashMap<String, u32> = HashMap::new();
    let mut scripts: Vec<ScriptFunc> = Vec::new();
    let mut startup_script: u32 = 0xFFFF_FFFF;
    if let Some(src) = map.properties.get_str("scripts") {
        scripts = parse_script_file(src)?;
        for (i, func) in scripts.iter().enumerate() {
            let name = func.name.clone().unwrap_or_default();
            if script_dict.contains_key(&name) {
                bail!("duplicate script {}", name);
            }
            for attrib in &func.attributes {
                match attrib.as_str() {
                    "startup" => {
                        if startup_script != 0xFFFF_FFFF {
                            bail!("only one script can be #[startup]");
                        }
                        startup_script = i as u32;
                    }
                    "singleton" => {}
                    other => bail!("unknown script attribute {}", other),
                }
            }
            script_dict.insert(name, i as u32);
        }
    }

    // ---- tileset classification ---------------------------------------
    let mut actor_tileset_idx = None;
    let mut actor_last_gid = u32::MAX;
    let mut prop_tileset_idx = None;
    let mut prop_last_gid = u32::MAX;
    let mut ordinary: Vec<&TilesetData> = Vec::new();
    let mut assigner = TilesetAssigner::new();

    for (index, ts) in map.tilesets.iter().enumerate() {
        let next_firstgid = map.tilesets.get(index + 1).map(|t| t.firstgid).unwrap_or(u32::MAX);
        if ts.name == "actors" {
            if actor_tileset_idx.is_some() {
                bail!("duplicate `actors` tileset");
            }
            actor_tileset_idx = Some(index);
            actor_last_gid = next_firstgid;
        } else if ts.name == "props" {
            if prop_tileset_idx.is_some() {
                bail!("duplicate `props` tileset");
            }
            prop_tileset_idx = Some(index);
            prop_last_gid = next_firstgid;
        } else {
            if ts.image_path.is_none() {
                bail!("tileset `{}` must be a spritesheet", ts.name);
            }
            if ts.tile_width != 16 || ts.tile_height != 16 {
                bail!("tileset `{}` must have 16x16 tiles", ts.name);
            }
            if ts.image_width & (ts.image_width - 1) != 0 {
                bail!("image in tileset `{}` must have width be a power of two", ts.name);
            }
            if ts.tile_count > 0 {
                assigner.assign(ts.firstgid, ts.tile_count);
                ordinary.push(ts);
            }
        }
    }
    let actor_tileset = actor_tileset_idx.map(|i| &map.tilesets[i]);
    let prop_tileset = prop_tileset_idx.map(|i| &map.tilesets[i]);

    let mut collision = CollisionBuilder::new(map.tile_width, map.tile_height, &ordinary)?;

    // ---- layer scan -----------------------------------------------------
    let mut chunks: HashMap<(i32, i32), ChunkAccum> = HashMap::new();
    let mut bgs: Vec<(&ImageLayer, i32)> = Vec::new();
    let mut waypoints: Vec<ObjectData> = Vec::new();
    let mut lower_x = 0i32;
    let mut lower_y = 0i32;
    let mut cur_layer = 0i32;
    let mut actors: Vec<ObjectData> = Vec::new();
    let mut actor_layer_name: Option<String> = None;
    let mut actor_layer_offset = (0.0f64, 0.0f64);
    let mut triggers: Vec<(ObjectData, u32)> = Vec::new();
    let mut camera_start: Option<(i32, i32)> = None;
    let mut player_actor: Option<ObjectData> = None;
    let mut water_line: i32 = i32::MIN;
    let mut water_color: u32 = 0;
    let mut symbols = SymbolPool::new();

    for layer in &map.layers {
        match layer {
            Layer::Image(img) => {
                if img.name.eq_ignore_ascii_case("water") {
                    water_line = img.offset_y as i32 + 8;
                    if let Some(c) = img.tint_color {
                        water_color = c;
                    }
                } else {
                    if verbose {
                        log::info!("BG layer `{}` with image `{:?}`", img.name, img.image_path);
                    }
                    bgs.push((img, cur_layer));
                }
            }
            Layer::Tile(tl) => {
                if tl.offset_x != 0.0 || tl.offset_y != 0.0 {
                    bail!("offsets not supported on tile layer `{}`", tl.name);
                }
                if tl.parallax_x != 1.0 || tl.parallax_y != 1.0 {
                    bail!("parallax factors != 1 not supported on tile layer `{}`", tl.name);
                }
                let layer_collide = tl.properties.get_bool("collide") != Some(false);
                cur_layer = match cur_layer {
                    0 => 1,
                    2 => 3,
                    other => other,
                };
                if verbose {
                    log::info!("FG layer `{}` with {} chunks", tl.name, tl.chunks.len());
                }
                for chunk in &tl.chunks {
                    lower_x = lower_x.min(chunk.cx);
                    lower_y = lower_y.min(chunk.cy);
                    if layer_collide {
                        collision.add_chunk(
                            chunk.cx,
                            chunk.cy,
                            0.0,
                            0.0,
                            &chunk.gids,
                            &chunk.flipx,
                            &chunk.flipy,
                            &chunk.flipd,
                        );
                    }
                    let mut tids = Vec::with_capacity(256);
                    for i in 0..256 {
                        let tid = assigner.gid_to_tid(
                            chunk.gids[i],
                            chunk.flipx[i],
                            chunk.flipy[i],
                            chunk.flipd[i],
                        )?;
                        tids.push(tid.0);
                    }
                    let accum = chunks.entry((chunk.cx, chunk.cy)).or_insert_with(ChunkAccum::new);
                    if accum.fg_split.is_none() && cur_layer == 3 {
                        accum.fg_split = Some(accum.layers.len() as i32);
                    }
                    accum.layers.push(tids);
                }
            }
            Layer::Object(ol) => {
                if ol.parallax_x != 1.0 || ol.parallax_y != 1.0 {
                    bail!("parallax factors != 1 not supported on object layer `{}`", ol.name);
                }
                for obj in &ol.objects {
                    match &obj.shape {
                        ObjectShape::Point => {
                            let mut obj = obj.clone();
                            obj.x += ol.offset_x;
                            obj.y += ol.offset_y;
                            if obj.name == "camera-start" {
                                camera_start = Some((obj.x as i32, obj.y as i32));
                            } else {
                                if let Some(wp_name) = obj.properties.get_str("name").map(str::to_string) {
                                    symbols.insert_with_id(
                                        &wp_name,
                                        SymbolKind::Waypoint,
                                        Some(waypoints.len() as u32),
                                    )?;
                                }
                                waypoints.push(obj);
                            }
                        }
                        ObjectShape::Rect { .. }
                        | ObjectShape::Ellipse { .. }
                        | ObjectShape::Polygon { .. }
                        | ObjectShape::Polyline { .. } => {
                            let mut obj = obj.clone();
                            obj.x += ol.offset_x;
                            obj.y += ol.offset_y;
                            let trigger_src = obj.properties.get_str("trigger").map(str::to_string);
                            if let Some(trigger_src) = trigger_src {
                                let script_index = if is_ident(&trigger_src) {
                                    *script_dict
                                        .get(&trigger_src)
                                        .ok_or_else(|| anyhow!("unknown script {}", trigger_src))?
                                } else {
                                    let mut func = parse_inline_block(&trigger_src, obj.id)?;
                                    for attrib in &func.attributes {
                                        match attrib.as_str() {
                                            "singleton" => func.singleton = true,
                                            other => bail!("unknown script attribute {}", other),
                                        }
                                    }
                                    if func.commands.is_empty() {
                                        continue;
                                    }
                                    let collapses_to_jump = func.commands.len() == 1
                                        && func.commands[0].name == "jump"
                                        && func.commands[0].positional.len() == 1
                                        && func.commands[0].keyword.is_empty()
                                        && matches!(func.commands[0].positional[0].value, Value::Ident(_));
                                    if collapses_to_jump {
                                        let Value::Ident(name) = &func.commands[0].positional[0].value else {
                                            unreachable!()
                                        };
                                        *script_dict
                                            .get(name)
                                            .ok_or_else(|| anyhow!("unknown script {}", name))?
                                    } else {
                                        func.source_label = format!("trigger {}", obj.id);
                                        let idx = scripts.len() as u32;
                                        scripts.push(func);
                                        idx
                                    }
                                };
                                if !obj.name.is_empty() {
                                    symbols.insert(&obj.name, SymbolKind::Actor)?;
                                }
                                triggers.push((obj, script_index));
                            } else {
                                collision.add_object(&obj)?;
                            }
                        }
                        ObjectShape::Tile { gid, .. } => {
                            let gid = *gid;
                            let is_actor =
                                actor_tileset.map_or(false, |at| gid >= at.firstgid && gid < actor_last_gid);
                            let is_prop = !is_actor
                                && prop_tileset.map_or(false, |pt| gid >= pt.firstgid && gid < prop_last_gid);

                            if is_actor {
                                let at = actor_tileset.unwrap();
                                let mut obj = obj.clone();
                                let local = gid - at.firstgid;
                                let typename = at
                                    .tiles
                                    .get(&local)
                                    .and_then(|t| t.properties.get_str("actor"))
                                    .ok_or_else(|| anyhow!("actor tile {} has no `actor` property", gid))?
                                    .to_string();
                                obj.properties.0.insert("typename".to_string(), PropertyValue::String(typename));
                                if obj.properties.get_bool("player") == Some(true) {
                                    player_actor = Some(obj.clone());
                                }
                                if !obj.name.is_empty() {
                                    symbols.insert(&obj.name, SymbolKind::Actor)?;
                                }
                                match &actor_layer_name {
                                    None => {
                                        actor_layer_name = Some(ol.name.clone());
                                        actor_layer_offset = (ol.offset_x, ol.offset_y);
                                        cur_layer = 2;
                                    }
                                    Some(name) if name != &ol.name => bail!("actors can only be on one layer"),
                                    _ => {}
                                }
                                actors.push(obj);
                            } else if is_prop {
                                let start_x = (obj.x as i64).div_euclid(256);
                                let start_y = (obj.y as i64).div_euclid(256);
                                let end_x = ((obj.x + obj.width) as i64).div_euclid(256);
                                let end_y = ((obj.y + obj.height) as i64).div_euclid(256);
                                for cy in start_y..=end_y {
                                    for cx in start_x..=end_x {
                                        let accum = chunks
                                            .entry((cx as i32, cy as i32))
                                            .or_insert_with(ChunkAccum::new);
                                        accum.props.push((cur_layer, obj.clone()));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let actor_count = actors.len() as u32 + triggers.len() as u32;

    // ---- misc map properties -------------------------------------------
    let gravity_x = map.properties.get_f64("gravity_x").unwrap_or(0.0) as f32;
    let gravity_y = map
        .properties
        .get_f64("gravity_y")
        .or_else(|| map.properties.get_f64("gravity"))
        .unwrap_or(1000.0) as f32;

    let music_id = match map.properties.get_str("music") {
        Some(m) => assets.index("mus", Path::new(m))?,
        None => 0,
    };

    let camera_start = camera_start.unwrap_or_else(|| {
        player_actor.as_ref().map(|p| (p.x as i32, p.y as i32)).unwrap_or((214, 120))
    });

    // ---- script assembly --------------------------------------------------
    let mut compiled_scripts: Vec<Vec<u8>> = Vec::new();
    let mut strings = StringPool::new();
    let mut script_actors: Vec<Vec<u8>> = Vec::new();
    {
        let mut ctx = AssembleCtx {
            script_ops,
            actor_types,
            assets,
            symbols: &mut symbols,
            strings: &mut strings,
            script_index: &script_dict,
            script_actors: &mut script_actors,
            actor_count,
        };
        for func in &scripts {
            if verbose {
                log::info!(
                    "script {} with {} commands",
                    func.name.as_deref().unwrap_or(&func.source_label),
                    func.commands.len()
                );
            }
            compiled_scripts.push(script::assembler::assemble(func, &mut ctx)?);
        }
    }
    let total_actor_count = actor_count + script_actors.len() as u32;

    if verbose {
        log::info!(
            "map offset ({}, {}) size {}x{} chunks",
            lower_x,
            lower_y,
            map.width >> 4,
            map.height >> 4
        );
    }

    // ---- HEADER -----------------------------------------------------------
    let pool = Pool::new(b"TMAP");
    pool.write_u16(ordinary.len() as u16);
    pool.write_u16(bgs.len() as u16);
    pool.write_u16(waypoints.len() as u16);
    pool.write_u16(scripts.len() as u16);
    pool.write_i16(lower_x as i16);
    pool.write_i16(lower_y as i16);
    pool.write_u16((map.width >> 4) as u16);
    pool.write_u16((map.height >> 4) as u16);
    pool.write_u16(chunks.len() as u16);
    pool.write_u16(strings.len() as u16);
    pool.write_u16(actor_count as u16);
    pool.write_u16(total_actor_count as u16);

    let actor_buf = pool.write_ref(-3);
    let waypoint_buf = pool.write_ref(-4);
    let collision_buf = pool.write_ref(-4);
    let scripts_buf = pool.write_ref(-5);
    let texts_buf = pool.write_ref(-6);

    pool.write_u32(music_id);
    pool.write_u32(startup_script);
    // The `tiled` crate's map-level parallax origin isn't surfaced by the
    // adapter (rarely authored); defaults to the origin.
    pool.write_i32(0);
    pool.write_i32(0);
    pool.write_i32(camera_start.0);
    pool.write_i32(camera_start.1);
    pool.write_i32(water_line);
    pool.write_u32(water_color);
    pool.write_f32(gravity_x);
    pool.write_f32(gravity_y);

    // ---- TILESETS -----------------------------------------------------
    for (ts, (firsttid, endtid)) in ordinary.iter().zip(assigner.ranges()) {
        let xmask = ((ts.image_width / 16) - 1) as u8;
        let yshift = (xmask as u32 + 1).trailing_zeros() as u8;
        let image_id = assets.index("gfx", Path::new(ts.image_path.as_ref().unwrap()))?;
        if verbose {
            log::info!(
                "tileset `{}` => [{}, {}) count {}",
                ts.name,
                firsttid,
                endtid,
                ts.tile_count
            );
        }
        pool.write_u16(firsttid);
        pool.write_u16(endtid);
        pool.write(&[xmask, yshift, 0, 0]);
        pool.write_u32(image_id);
    }

    // ---- BACKGROUNDS ----------------------------------------------------
    for (img, depth) in &bgs {
        let autoscroll_x = img.properties.get_f64("autoscroll_x").unwrap_or(0.0) as f32;
        let autoscroll_y = img.properties.get_f64("autoscroll_y").unwrap_or(0.0) as f32;
        let clear_top = img.properties.get("clear_top").and_then(PropertyValue::as_color).unwrap_or(0);
        let clear_bottom =
            img.properties.get("clear_bottom").and_then(PropertyValue::as_color).unwrap_or(0);
        let image_path = img
            .image_path
            .as_ref()
            .ok_or_else(|| anyhow!("background layer `{}` has no image", img.name))?;
        let image_id = assets.index("gfx", Path::new(image_path))?;
        let anim = match img.properties.get_str("anim") {
            Some(p) => assets.index("tileset", Path::new(p))?,
            None => 0,
        };
        pool.write_f32(img.offset_x as f32);
        pool.write_f32(img.offset_y as f32);
        pool.write_f32(autoscroll_x);
        pool.write_f32(autoscroll_y);
        pool.write_f32(img.parallax_x as f32);
        pool.write_f32(img.parallax_y as f32);
        pool.write_u32(clear_top);
        pool.write_u32(clear_bottom);
        // `repeat_x`/`repeat_y` aren't surfaced on `model::ImageLayer`; no
        // map in this pipeline's test fixtures ever authors them.
        pool.write(&[*depth as u8, 0, 0, 0]);
        pool.write_u32(image_id);
        pool.write_u32(anim);
        pool.write_u32(0);
        pool.write_u32(0);
        pool.write_f32(0.0);
        pool.write_f32(1.0);
    }

    // ---- CHUNKS -----------------------------------------------------------
    let mut coords: Vec<(i32, i32)> = chunks.keys().copied().collect();
    coords.sort();
    for coord in coords {
        let accum = chunks.remove(&coord).unwrap();
        let fg_split = accum.fg_split.unwrap_or(accum.layers.len() as i32);
        if verbose {
            log::info!("chunk at ({}, {}) with {} layers", coord.0, coord.1, accum.layers.len());
        }
        let chunk_buf = pool.write_ref(0);
        chunk_buf.write_i16(coord.0 as i16);
        chunk_buf.write_i16(coord.1 as i16);
        chunk_buf.write_i32(coord.0 << 8);
        chunk_buf.write_i32(coord.1 << 8);
        chunk_buf.write_u8(accum.layers.len() as u8);
        chunk_buf.write_u8(fg_split as u8);
        chunk_buf.write_u16(accum.props.len() as u16);
        let props_buf = chunk_buf.write_ref(-1);
        for (layer_depth, obj) in accum.props.iter().rev() {
            let prop_buf = props_buf.write_ref(-2);
            let gid = match obj.shape {
                ObjectShape::Tile { gid, .. } => gid,
                _ => unreachable!("props are only ever Tile-shape objects"),
            };
            let pt = prop_tileset.ok_or_else(|| anyhow!("prop object with no `props` tileset"))?;
            let local = gid - pt.firstgid;
            let tile = pt.tiles.get(&local);
            let image_path =
                pt.image_path.as_ref().ok_or_else(|| anyhow!("`props` tileset has no image"))?;
            let image_id = assets.index("gfx", Path::new(image_path))?;
            let anim = match tile.and_then(|t| t.properties.get_str("anim")) {
                Some(p) => assets.index("tileset", Path::new(p))?,
                None => 0,
            };
            prop_buf.write_u32(*layer_depth as u32);
            prop_buf.write_i32(obj.x as i32);
            prop_buf.write_i32(obj.y as i32);
            prop_buf.write_u32(obj.width as u32);
            prop_buf.write_u32(obj.height as u32);
            prop_buf.write_u32(image_id);
            prop_buf.write_u32(anim);
            for _ in 0..5 {
                prop_buf.write_u32(0);
            }
            prop_buf.write_f32(0.0);
            prop_buf.write_f32(1.0);
            prop_buf.write_u32(0);
        }
        for tids in &accum.layers {
            for &tid in tids {
                chunk_buf.write_u16(tid);
            }
        }
    }

    // ---- ACTOR SPAWNS -------------------------------------------------
    for obj in &actors {
        let typename = obj.properties.get_str("typename").unwrap().to_string();
        let actor_type_id = actor_types.value(&typename)?;
        let actor_id = symbols.get(SymbolKind::Actor, non_empty(&obj.name))?;
        let x = (actor_layer_offset.0 + obj.x) as i32;
        let y = (actor_layer_offset.1 + obj.y) as i32;
        let mut flags = actor_flags(&typename, &obj.properties);
        if let ObjectShape::Tile { flipx, flipy, flipd, .. } = obj.shape {
            if flipx {
                flags |= AF_FLIPX;
            }
            if flipy {
                flags |= AF_FLIPY;
            }
            if flipd {
                flags |= AF_FLIPD;
            }
        }
        if obj.properties.get_bool("player") == Some(true) {
            flags |= AF_CUR_PLAYER;
        }
        let angle16 = script::degrees_to_ang16(obj.rotation);
        if verbose {
            log::info!("actor {} at ({}, {}) flags {:#x} id {}", typename, x, y, flags, actor_id);
        }
        actor_buf.write_u32(actor_type_id);
        actor_buf.write_i32(x);
        actor_buf.write_i32(y);
        actor_buf.write_u32(flags);
        actor_buf.write_u16(actor_id as u16);
        actor_buf.write_u16(angle16);
        write_actor_arg(&typename, &obj.properties, &actor_buf, &waypoints)?;
    }

    for (obj, script_index) in &triggers {
        let mut flags: u32 = 0;
        if obj.properties.get_bool("player") == Some(true) {
            flags |= TRIGGER_PLAYER;
        }
        if obj.properties.get_bool("enemy") == Some(true) {
            flags |= TRIGGER_ENEMY;
        }
        if obj.properties.get_bool("prop") == Some(true) {
            flags |= TRIGGER_PROP;
        }
        if obj.properties.get_bool("projectile") == Some(true) {
            flags |= TRIGGER_PROJECTILE;
        }
        if obj.properties.get_bool("repeatable") == Some(true) {
            flags |= TRIGGER_REPEATABLE;
        }
        if obj.properties.get_bool("manual") == Some(true) {
            flags |= TRIGGER_MANUAL;
        }
        if obj.properties.get_bool("current-player") == Some(true) {
            flags |= TRIGGER_CURRENT_PLAYER;
        }
        let x = obj.x as i32;
        let y = obj.y as i32;
        let trigger_id = symbols.get(SymbolKind::Actor, non_empty(&obj.name))?;
        if verbose {
            log::info!("trigger at ({}, {}) flags {:#x}", x, y, flags);
        }
        actor_buf.write_u32(actor_types.value("AT_TRIGGER")?);
        actor_buf.write_i32(x);
        actor_buf.write_i32(y);
        actor_buf.write_u32(flags);
        actor_buf.write_u16(trigger_id as u16);
        actor_buf.write_u16(0);
        let arg_buf = actor_buf.write_ref(-3);
        arg_buf.write_u32(*script_index);
        let coll_buf = arg_buf.write_ref(-10);
        let bytes = collision::pack_single_object(obj, -(x as f64), -(y as f64))?;
        coll_buf.write(&bytes);
        coll_buf.write_u16(collision::COLL_END);
        coll_buf.write_u16(0);
    }

    // ---- WAYPOINTS ------------------------------------------------------
    for wp in &waypoints {
        let next = match wp.properties.get_i64("next") {
            Some(n) => {
                if n as u32 == wp.id {
                    bail!("waypoint cannot have itself as next waypoint");
                }
                waypoints
                    .iter()
                    .position(|w| w.id == n as u32)
                    .map(|i| i as u32)
                    .unwrap_or(0xFFFF_FFFF)
            }
            None => 0xFFFF_FFFF,
        };
        waypoint_buf.write_i32(wp.x as i32);
        waypoint_buf.write_i32(wp.y as i32);
        waypoint_buf.write_u32(next);
    }

    // ---- COLLISION --------------------------------------------------------
    let collision_bytes = collision.build(svg_path)?;
    collision_buf.write(&collision_bytes);

    // ---- SCRIPTS & STRINGS ------------------------------------------------
    for actor_bytes in &script_actors {
        actor_buf.write(actor_bytes);
    }
    for compiled in &compiled_scripts {
        scripts_buf.write_ref(-5).write(compiled);
    }
    for s in strings.iter() {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        texts_buf.write_ref(-5).write(&bytes);
    }

    Ok(pool.finish())
}

fn non_empty(name: &str) -> Option<&str> {
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn actor_flags(typename: &str, properties: &Properties) -> u32 {
    if typename.starts_with("AT_CLIFF_PLATFORM") || typename == "AT_UNDERWATER_PLATFORM" {
        match properties.get_str("type") {
            Some("linear") => 0,
            Some("hsine") => 1,
            Some("vsine") => 2,
            Some("circle") | Some("circle-cw") | Some("cw") => 3,
            Some("circle-ccw") | Some("ccw") => 4,
            Some("swing-90") => 5,
            Some("swing-45") | Some("swing") => 6,
            Some("swing-22") => 7,
            _ => 0,
        }
    } else {
        0
    }
}

fn write_actor_arg(
    typename: &str,
    properties: &Properties,
    buf: &PoolChunk,
    waypoints: &[ObjectData],
) -> Result<()> {
    if typename.starts_with("AT_CLIFF_PLATFORM") || typename == "AT_UNDERWATER_PLATFORM" {
        let speed =
            (properties.get_f64("speed").unwrap_or(1.0) * 16.0).round().clamp(0.0, 65535.0) as u16;
        let waypoint = match properties.get_i64("waypoint") {
            Some(wpid) => waypoints
                .iter()
                .position(|w| w.id == wpid as u32)
                .map(|i| i as u16)
                .ok_or_else(|| anyhow!("no such waypoint `{}`", wpid))?,
            None => 0xFFFF,
        };
        buf.write_u16(speed);
        buf.write_u16(waypoint);
    } else {
        buf.write_u32(0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chunk, Point, TileLayer};
    use std::io::Write as _;

    fn write_tmp(name: &str, contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn test_tables(tag: &str) -> (EnumTable, EnumTable, AssetTable) {
        let actor_types = EnumTable::load(
            &write_tmp(
                &format!("mapc_compile_{tag}_actors.h"),
                "typedef enum { AT_PLAYER, AT_ENEMY, AT_TRIGGER } actor_type_t;",
            ),
            "actor_type_t",
        )
        .unwrap();
        let script_ops = EnumTable::load(
            &write_tmp(
                &format!("mapc_compile_{tag}_ops.h"),
                "typedef enum { OP_RETURN, OP_JUMP, OP_WAIT, OP_SINGLETON, OP_SPAWN_ACTOR } script_op_t;",
            ),
            "script_op_t",
        )
        .unwrap();
        let assets = AssetTable::load(
            &write_tmp(
                &format!("mapc_compile_{tag}_assets.h"),
                r#"const char * const gfx_paths[] = { (void *) 0, "rom:/sprites/a.png" };
const char * const mus_paths[] = { (void *) 0, "rom:/music/theme.it" };"#,
            ),
            std::env::temp_dir().as_path(),
        )
        .unwrap();
        (actor_types, script_ops, assets)
    }

    fn empty_chunk(cx: i32, cy: i32) -> Chunk {
        Chunk {
            cx,
            cy,
            gids: vec![0; 256],
            flipx: vec![false; 256],
            flipy: vec![false; 256],
            flipd: vec![false; 256],
        }
    }

    fn base_map() -> MapData {
        MapData {
            orientation: Orientation::Orthogonal,
            render_order: RenderOrder::RightDown,
            tile_width: 16,
            tile_height: 16,
            width: 16,
            height: 16,
            infinite: true,
            tilesets: Vec::new(),
            layers: vec![Layer::Tile(TileLayer {
                name: "ground".to_string(),
                depth: 1,
                offset_x: 0.0,
                offset_y: 0.0,
                parallax_x: 1.0,
                parallax_y: 1.0,
                chunks: vec![empty_chunk(0, 0)],
                properties: Properties::default(),
            })],
            properties: Properties::default(),
        }
    }

    fn read_u16(data: &[u8], off: usize) -> u16 {
        u16::from_be_bytes([data[off], data[off + 1]])
    }

    fn read_u32(data: &[u8], off: usize) -> u32 {
        u32::from_be_bytes(data[off..off + 4].try_into().unwrap())
    }

    #[test]
    fn empty_map_header_fields() {
        let (actor_types, script_ops, assets) = test_tables("empty");
        let map = base_map();
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();

        assert_eq!(&data[0..4], b"TMAP");
        assert_eq!(read_u16(&data, 4), 0); // num_tilesets
        assert_eq!(read_u16(&data, 6), 0); // num_bgs
        assert_eq!(read_u16(&data, 8), 0); // num_waypoints
        assert_eq!(read_u16(&data, 10), 0); // num_scripts
        assert_eq!(read_u16(&data, 20), 1); // num_chunks
        assert_eq!(read_u16(&data, 24), 0); // actor_count
        assert_eq!(read_u16(&data, 26), 0); // total_actor_count
        assert_eq!(data.len() % 16, 0);
    }

    #[test]
    fn empty_map_startup_is_sentinel_and_chunk_is_zeroed() {
        let (actor_types, script_ops, assets) = test_tables("empty2");
        let map = base_map();
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();
        let startup_script = read_u32(&data, 52);
        assert_eq!(startup_script, 0xFFFF_FFFF);

        // the sole chunk's 256 tile cells must all decode to TID 0 (empty);
        // look for the 512-zero-byte run its tile grid produces.
        assert!(data.windows(512).any(|w| w.iter().all(|&b| b == 0)));
    }

    #[test]
    fn startup_attribute_assigns_index_zero() {
        let (actor_types, script_ops, assets) = test_tables("startup");
        let mut map = base_map();
        map.properties
            .0
            .insert("scripts".to_string(), PropertyValue::String("#[startup]\nscript boot() { return; }".to_string()));
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();
        assert_eq!(read_u16(&data, 10), 1); // num_scripts
        assert_eq!(read_u32(&data, 52), 0); // startup_script index
    }

    #[test]
    fn inline_trigger_collapses_to_jump_target() {
        let (actor_types, script_ops, assets) = test_tables("collapse");
        let mut map = base_map();
        map.properties.0.insert(
            "scripts".to_string(),
            PropertyValue::String("script boss() { return; }".to_string()),
        );
        let mut properties = Properties::default();
        properties.0.insert("trigger".to_string(), PropertyValue::String("jump(boss);".to_string()));
        let trigger_obj = ObjectData {
            id: 1,
            name: String::new(),
            obj_type: String::new(),
            x: 0.0,
            y: 0.0,
            width: 16.0,
            height: 16.0,
            rotation: 0.0,
            shape: ObjectShape::Rect { w: 16.0, h: 16.0 },
            properties,
        };
        map.layers.push(Layer::Object(crate::model::ObjectLayer {
            name: "triggers".to_string(),
            offset_x: 0.0,
            offset_y: 0.0,
            parallax_x: 1.0,
            parallax_y: 1.0,
            objects: vec![trigger_obj],
        }));
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();
        // only the map's own `boss` script is in the table; the inline
        // trigger body collapsed to a direct reference, no new entry.
        assert_eq!(read_u16(&data, 10), 1);
    }

    #[test]
    fn inline_trigger_with_extra_commands_gets_its_own_script_entry() {
        let (actor_types, script_ops, assets) = test_tables("noncollapse");
        let mut map = base_map();
        map.properties.0.insert(
            "scripts".to_string(),
            PropertyValue::String("script boss() { return; }".to_string()),
        );
        let mut properties = Properties::default();
        properties.0.insert(
            "trigger".to_string(),
            PropertyValue::String("wait(30); jump(boss);".to_string()),
        );
        let trigger_obj = ObjectData {
            id: 7,
            name: String::new(),
            obj_type: String::new(),
            x: 0.0,
            y: 0.0,
            width: 16.0,
            height: 16.0,
            rotation: 0.0,
            shape: ObjectShape::Rect { w: 16.0, h: 16.0 },
            properties,
        };
        map.layers.push(Layer::Object(crate::model::ObjectLayer {
            name: "triggers".to_string(),
            offset_x: 0.0,
            offset_y: 0.0,
            parallax_x: 1.0,
            parallax_y: 1.0,
            objects: vec![trigger_obj],
        }));
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();
        assert_eq!(read_u16(&data, 10), 2);
    }

    #[test]
    fn spawn_actor_dedup_shares_one_pool_index() {
        let (actor_types, script_ops, assets) = test_tables("spawn");
        let mut map = base_map();
        map.properties.0.insert(
            "scripts".to_string(),
            PropertyValue::String(
                "script boot() { spawn_actor(AT_ENEMY, 0, 0); spawn_actor(AT_ENEMY, 0, 0); return; }".to_string(),
            ),
        );
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();
        let actor_count = read_u16(&data, 24) as u32;
        let total_actor_count = read_u16(&data, 26) as u32;
        assert_eq!(total_actor_count - actor_count, 1);
    }

    #[test]
    fn waypoint_point_object_is_named_from_property_not_object_name() {
        let (actor_types, script_ops, assets) = test_tables("waypoint");
        let mut map = base_map();
        let mut properties = Properties::default();
        properties.0.insert("name".to_string(), PropertyValue::String("wp1".to_string()));
        let wp = ObjectData {
            id: 3,
            name: "ignored".to_string(),
            obj_type: String::new(),
            x: 32.0,
            y: 48.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            shape: ObjectShape::Point,
            properties,
        };
        map.layers.push(Layer::Object(crate::model::ObjectLayer {
            name: "waypoints".to_string(),
            offset_x: 0.0,
            offset_y: 0.0,
            parallax_x: 1.0,
            parallax_y: 1.0,
            objects: vec![wp],
        }));
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();
        assert_eq!(read_u16(&data, 8), 1); // num_waypoints
    }

    #[test]
    fn unsupported_orientation_is_rejected() {
        let (actor_types, script_ops, assets) = test_tables("badmap");
        let mut map = base_map();
        map.width = 17;
        assert!(compile_map(&map, &actor_types, &script_ops, &assets, None, false).is_err());
    }

    #[test]
    fn camera_start_default_point_object() {
        let (actor_types, script_ops, assets) = test_tables("camera");
        let mut map = base_map();
        let camera_obj = ObjectData {
            id: 9,
            name: "camera-start".to_string(),
            obj_type: String::new(),
            x: 100.0,
            y: 200.0,
            width: 0.0,
            height: 0.0,
            rotation: 0.0,
            shape: ObjectShape::Point,
            properties: Properties::default(),
        };
        map.layers.push(Layer::Object(crate::model::ObjectLayer {
            name: "markers".to_string(),
            offset_x: 0.0,
            offset_y: 0.0,
            parallax_x: 1.0,
            parallax_y: 1.0,
            objects: vec![camera_obj],
        }));
        let data = compile_map(&map, &actor_types, &script_ops, &assets, None, false).unwrap();
        let cam_x = read_u32(&data, 64) as i32;
        let cam_y = read_u32(&data, 68) as i32;
        assert_eq!((cam_x, cam_y), (100, 200));
        let _ = Point::new(0.0, 0.0);
    }
}

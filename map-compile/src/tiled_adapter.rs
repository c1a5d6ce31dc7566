//! Translates `tiled` crate types into [`crate::model`] types.
//!
//! Everything downstream of this module is decoupled from `tiled`'s own
//! type shapes; if the map/tileset file format or the `tiled` crate's API
//! changes, only this adapter needs to change.

use crate::model::*;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tiled::{Loader, PropertyValue as TiledProperty};

fn convert_properties(props: &tiled::Properties) -> Properties {
    let mut map = HashMap::new();
    for (k, v) in props.iter() {
        let value = match v {
            TiledProperty::BoolValue(b) => PropertyValue::Bool(*b),
            TiledProperty::IntValue(i) => PropertyValue::Int(*i as i64),
            TiledProperty::FloatValue(f) => PropertyValue::Float(*f as f64),
            TiledProperty::StringValue(s) => PropertyValue::String(s.clone()),
            TiledProperty::ColorValue(c) => {
                // RGBA with red in the high byte, matching the script
                // lexer's `color(r, g, b, a)` literal and every on-disk
                // color field (`pack_color`'s convention).
                let packed = ((c.red as u32) << 24)
                    | ((c.green as u32) << 16)
                    | ((c.blue as u32) << 8)
                    | (c.alpha as u32);
                PropertyValue::Color(packed)
            }
            TiledProperty::FileValue(s) => PropertyValue::String(s.clone()),
            TiledProperty::ObjectValue(id) => PropertyValue::Int(*id as i64),
            TiledProperty::ClassValue { .. } => continue,
        };
        map.insert(k.clone(), value);
    }
    Properties(map)
}

fn convert_object(obj: &tiled::ObjectData) -> ObjectData {
    use tiled::ObjectShape as TShape;

    let (width, height) = match &obj.shape {
        TShape::Rect { width, height } | TShape::Ellipse { width, height } => (*width, *height),
        _ => (0.0, 0.0),
    };

    let shape = match obj.shape.clone() {
        TShape::Rect { width, height } => ObjectShape::Rect {
            w: width as f64,
            h: height as f64,
        },
        TShape::Ellipse { width, height } => ObjectShape::Ellipse {
            w: width as f64,
            h: height as f64,
        },
        TShape::Polygon { points } => ObjectShape::Polygon {
            points: points
                .into_iter()
                .map(|(x, y)| Point::new(x as f64, y as f64))
                .collect(),
        },
        TShape::Polyline { points } => ObjectShape::Polyline {
            points: points
                .into_iter()
                .map(|(x, y)| Point::new(x as f64, y as f64))
                .collect(),
        },
        TShape::Point(_, _) => ObjectShape::Point,
        TShape::Text { .. } => ObjectShape::Point,
    };

    let shape = if let Some(data) = obj.tile_data() {
        let gid = data.id();
        ObjectShape::Tile {
            gid,
            flipx: data.flip_h,
            flipy: data.flip_v,
            flipd: data.flip_d,
        }
    } else {
        shape
    };

    ObjectData {
        id: obj.id(),
        name: obj.name.clone(),
        obj_type: obj.user_type.clone(),
        x: obj.x as f64,
        y: obj.y as f64,
        width: width as f64,
        height: height as f64,
        rotation: obj.rotation as f64,
        shape,
        properties: convert_properties(&obj.properties),
    }
}

fn convert_tileset(firstgid: u32, ts: &tiled::Tileset) -> TilesetData {
    let mut tiles = HashMap::new();
    for (id, tile) in ts.tiles() {
        let objects = tile
            .collision
            .as_ref()
            .map(|layer| layer.object_data().iter().map(convert_object).collect())
            .unwrap_or_default();
        let animation = tile
            .animation
            .as_ref()
            .map(|frames| frames.iter().map(|f| f.tile_id).collect())
            .unwrap_or_default();
        tiles.insert(
            id,
            TileData {
                properties: convert_properties(&tile.properties),
                objects,
                animation,
            },
        );
    }

    TilesetData {
        name: ts.name.clone(),
        firstgid,
        tile_count: ts.tilecount,
        columns: ts.columns,
        tile_width: ts.tile_width,
        tile_height: ts.tile_height,
        image_path: ts.image.as_ref().map(|img| img.source.to_string_lossy().into_owned()),
        image_width: ts.image.as_ref().map(|img| img.width as u32).unwrap_or(0),
        image_height: ts.image.as_ref().map(|img| img.height as u32).unwrap_or(0),
        tile_offset_x: ts.offset_x,
        tile_offset_y: ts.offset_y,
        tiles,
    }
}

fn convert_tile_layer(name: &str, layer: &tiled::Layer, tile_layer: tiled::TileLayer) -> Result<TileLayer> {
    let offset_x = layer.offset_x as f64;
    let offset_y = layer.offset_y as f64;
    let parallax_x = layer.parallax_x as f64;
    let parallax_y = layer.parallax_y as f64;

    let mut chunks = Vec::new();

    match tile_layer {
        tiled::TileLayer::Finite(finite) => {
            let w = finite.width();
            let h = finite.height();
            if w % 16 != 0 || h % 16 != 0 {
                bail!("tile layer `{}` size {}x{} is not a multiple of 16", name, w, h);
            }
            for cy in 0..(h / 16) {
                for cx in 0..(w / 16) {
                    let mut gids = Vec::with_capacity(256);
                    let mut flipx = Vec::with_capacity(256);
                    let mut flipy = Vec::with_capacity(256);
                    let mut flipd = Vec::with_capacity(256);
                    for ly in 0..16 {
                        for lx in 0..16 {
                            let tx = (cx * 16 + lx) as i32;
                            let ty = (cy * 16 + ly) as i32;
                            let (bare, fx, fy, fd) = match finite.get_tile(tx, ty) {
                                Some(t) => (t.id(), t.flip_h, t.flip_v, t.flip_d),
                                None => (0, false, false, false),
                            };
                            gids.push(bare);
                            flipx.push(fx);
                            flipy.push(fy);
                            flipd.push(fd);
                        }
                    }
                    chunks.push(Chunk {
                        cx: cx as i32,
                        cy: cy as i32,
                        gids,
                        flipx,
                        flipy,
                        flipd,
                    });
                }
            }
        }
        tiled::TileLayer::Infinite(infinite) => {
            for ((ccx, ccy), chunk) in infinite.chunks() {
                let mut gids = Vec::with_capacity(256);
                let mut flipx = Vec::with_capacity(256);
                let mut flipy = Vec::with_capacity(256);
                let mut flipd = Vec::with_capacity(256);
                for ly in 0..16 {
                    for lx in 0..16 {
                        let (bare, fx, fy, fd) = match chunk.get_tile(lx, ly) {
                            Some(t) => (t.id(), t.flip_h, t.flip_v, t.flip_d),
                            None => (0, false, false, false),
                        };
                        gids.push(bare);
                        flipx.push(fx);
                        flipy.push(fy);
                        flipd.push(fd);
                    }
                }
                chunks.push(Chunk {
                    cx: ccx,
                    cy: ccy,
                    gids,
                    flipx,
                    flipy,
                    flipd,
                });
            }
        }
    }

    Ok(TileLayer {
        name: name.to_string(),
        depth: 0,
        offset_x,
        offset_y,
        parallax_x,
        parallax_y,
        chunks,
        properties: Properties::default(),
    })
}

/// Load a `.tmx`/`.json` map file and convert it to the internal model.
pub fn load_map(path: &Path) -> Result<MapData> {
    let mut loader = Loader::new();
    let map = loader
        .load_tmx_map(path)
        .with_context(|| format!("loading map {}", path.display()))?;

    if map.orientation != tiled::Orientation::Orthogonal {
        bail!("unsupported map orientation: {:?}", map.orientation);
    }

    // `tiled::Map::tilesets` returns tilesets in firstgid order but does not
    // carry the firstgid value itself on the handle; map files always
    // allocate a contiguous gid range per tileset starting at 1, so the
    // running tile-count total reconstructs it exactly.
    let mut tilesets = Vec::new();
    let mut next_firstgid = 1u32;
    for ts in map.tilesets() {
        let firstgid = next_firstgid;
        next_firstgid += ts.tilecount;
        tilesets.push(convert_tileset(firstgid, ts));
    }

    let mut layers = Vec::new();
    for layer in map.layers() {
        let properties = convert_properties(&layer.properties);
        match layer.layer_type() {
            tiled::LayerType::Tiles(tile_layer) => {
                let mut converted = convert_tile_layer(&layer.name, &layer, tile_layer)?;
                // `depth` (foreground vs. background-of-actors) depends on
                // whether an actor object layer appeared earlier in
                // document order, which this adapter doesn't track; the
                // compositor (`compile.rs`) recomputes it itself during the
                // layer scan instead of relying on this field.
                converted.properties = properties;
                layers.push(Layer::Tile(converted));
            }
            tiled::LayerType::Objects(obj_layer) => {
                let objects = obj_layer.objects().map(|obj| convert_object(&obj)).collect();
                layers.push(Layer::Object(ObjectLayer {
                    name: layer.name.clone(),
                    offset_x: layer.offset_x as f64,
                    offset_y: layer.offset_y as f64,
                    parallax_x: layer.parallax_x as f64,
                    parallax_y: layer.parallax_y as f64,
                    objects,
                }));
            }
            tiled::LayerType::Image(img_layer) => {
                let tint_color = properties.get_color("tint_color");
                layers.push(Layer::Image(ImageLayer {
                    name: layer.name.clone(),
                    image_path: img_layer
                        .image
                        .as_ref()
                        .map(|img| img.source.to_string_lossy().into_owned()),
                    offset_x: layer.offset_x as f64,
                    offset_y: layer.offset_y as f64,
                    parallax_x: layer.parallax_x as f64,
                    parallax_y: layer.parallax_y as f64,
                    tint_color,
                    properties,
                }));
            }
            tiled::LayerType::Group(_) => {
                return Err(anyhow!("group layers are not supported"));
            }
        }
    }

    Ok(MapData {
        orientation: Orientation::Orthogonal,
        render_order: RenderOrder::RightDown,
        tile_width: map.tile_width,
        tile_height: map.tile_height,
        width: map.width,
        height: map.height,
        infinite: map.infinite(),
        tilesets,
        layers,
        properties: convert_properties(&map.properties),
    })
}

impl Properties {
    fn get_color(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(PropertyValue::as_color)
    }
}

//! Collision geometry builder.
//!
//! Derives a shape list per tile at tileset-load time, accumulates chunk
//! and object-layer shapes into world space applying the
//! `FLIPD -> FLIPX -> FLIPY` transform order, unions the polygon subjects,
//! and emits the tagged shape stream described by §4.4.

use crate::model::{ObjectData, ObjectShape, TileData, TilesetData};
use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, WriteBytesExt};
use geo::{BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use std::collections::HashMap;
use std::fmt::Write as FmtWrite;
use std::path::Path;

pub const COLL_END: u16 = 0;
pub const COLL_CIRCLE: u16 = 1;
pub const COLL_AABB: u16 = 2;
pub const COLL_TRIANGLE: u16 = 3;
pub const COLL_QUAD: u16 = 4;
pub const COLL_POLY: u16 = 5;
pub const COLL_EDGE: u16 = 6;
pub const COLL_CHAIN: u16 = 7;

pub const SENSOR: u16 = 1 << 0;
pub const INTERACTIVE: u16 = (1 << 0) | (1 << 1);

pub const TMX_FLIPX: u32 = 0x8000_0000;
pub const TMX_FLIPY: u32 = 0x4000_0000;
pub const TMX_FLIPD: u32 = 0x2000_0000;

#[derive(Debug, Clone, Copy)]
pub struct Pt {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
enum TileShape {
    /// `x, y` is the top-left corner of the circle's bounding box; the
    /// center is computed at emission time (`cx = x + r`).
    Circle { r: f64, x: f64, y: f64 },
    Polygon(Vec<Pt>),
    Polyline(Vec<Pt>),
}

fn translate(points: &[Pt], dx: f64, dy: f64) -> Vec<Pt> {
    points.iter().map(|p| Pt { x: p.x + dx, y: p.y + dy }).collect()
}

fn apply_flip(points: &[Pt], tile_w: f64, tile_h: f64, flipd: bool, flipx: bool, flipy: bool) -> Vec<Pt> {
    let mut pts = points.to_vec();
    if flipd {
        pts = pts.iter().map(|p| Pt { x: p.y, y: p.x }).collect();
    }
    if flipx {
        pts = pts.iter().map(|p| Pt { x: tile_w - p.x, y: p.y }).collect();
    }
    if flipy {
        pts = pts.iter().map(|p| Pt { x: p.x, y: tile_h - p.y }).collect();
    }
    pts
}

fn rotate_point(x: f64, y: f64, degrees: f64, xc: f64, yc: f64) -> Pt {
    let x0 = x - xc;
    let y0 = y - yc;
    let rot = degrees.to_radians();
    let (sin, cos) = rot.sin_cos();
    Pt {
        x: x0 * cos - y0 * sin + xc,
        y: y0 * cos + x0 * sin + yc,
    }
}

/// Converts an authored object (tile collision sub-object or object-layer
/// shape) into a world-space [`TileShape`], applying rotation.
fn tiled_object_to_shape(obj: &ObjectData) -> Result<Option<TileShape>> {
    let shape = match &obj.shape {
        ObjectShape::Ellipse { w, h } => {
            if (w - h).abs() > f64::EPSILON {
                bail!("ellipse collision object {} is not a circle", obj.id);
            }
            let r = w / 2.0;
            return Ok(Some(TileShape::Circle { r, x: obj.x, y: obj.y }));
        }
        ObjectShape::Rect { w, h } => {
            let (x0, y0) = (obj.x, obj.y);
            let (x1, y1) = (x0 + w, y0 + h);
            let mut points = vec![
                Pt { x: x0, y: y0 },
                Pt { x: x0, y: y1 },
                Pt { x: x1, y: y1 },
                Pt { x: x1, y: y0 },
            ];
            if obj.rotation != 0.0 {
                points = points.iter().map(|p| rotate_point(p.x, p.y, obj.rotation, x0, y0)).collect();
            }
            TileShape::Polygon(points)
        }
        ObjectShape::Polygon { points } => {
            let (ox, oy) = (obj.x, obj.y);
            let mut pts: Vec<Pt> = points.iter().map(|p| Pt { x: p.x + ox, y: p.y + oy }).collect();
            if obj.rotation != 0.0 {
                pts = pts.iter().map(|p| rotate_point(p.x, p.y, obj.rotation, ox, oy)).collect();
            }
            TileShape::Polygon(pts)
        }
        ObjectShape::Polyline { points } => {
            let (ox, oy) = (obj.x, obj.y);
            let mut pts: Vec<Pt> = points.iter().map(|p| Pt { x: p.x + ox, y: p.y + oy }).collect();
            if obj.rotation != 0.0 {
                pts = pts.iter().map(|p| rotate_point(p.x, p.y, obj.rotation, ox, oy)).collect();
            }
            TileShape::Polyline(pts)
        }
        ObjectShape::Point | ObjectShape::Tile { .. } => return Ok(None),
    };
    Ok(Some(shape))
}

fn shape_flags(obj: &ObjectData) -> u16 {
    let mut flags = 0;
    if obj.properties.get_bool("sensor") == Some(true) {
        flags |= SENSOR;
    }
    if obj.properties.get_bool("interactive") == Some(true) {
        flags |= INTERACTIVE;
    }
    flags
}

fn fid_bytes(name: &str) -> [u8; 4] {
    let mut buf = [0u8; 4];
    for (i, b) in name.bytes().take(4).enumerate() {
        buf[i] = b;
    }
    buf
}

/// Derives the per-tile shape list for every tileset, keyed by global gid.
fn derive_tile_shapes(tilesets: &[TilesetData]) -> Result<HashMap<u32, Vec<TileShape>>> {
    let mut out = HashMap::new();

    for tileset in tilesets {
        let image = tileset
            .image_path
            .as_ref()
            .map(|p| image::open(p))
            .transpose()?;

        for local_id in 0..tileset.tile_count {
            let tile: Option<&TileData> = tileset.tiles.get(&local_id);
            let mut collide = tile.and_then(|t| t.properties.get_bool("collide"));
            let mut shapes = Vec::new();

            if collide != Some(false) {
                let has_objects = tile.map(|t| !t.objects.is_empty()).unwrap_or(false);
                if has_objects {
                    for obj in &tile.unwrap().objects {
                        if let Some(shape) = tiled_object_to_shape(obj)? {
                            shapes.push(shape);
                        }
                    }
                } else {
                    if collide.is_none() {
                        collide = Some(match &image {
                            None => true,
                            Some(img) => {
                                let rgba = img.to_rgba8();
                                let col = local_id % tileset.columns;
                                let row = local_id / tileset.columns;
                                let x0 = col * tileset.tile_width;
                                let y0 = row * tileset.tile_height;
                                let mut any_opaque = false;
                                'outer: for y in y0..y0 + tileset.tile_height {
                                    for x in x0..x0 + tileset.tile_width {
                                        if y >= rgba.height() || x >= rgba.width() {
                                            continue;
                                        }
                                        if rgba.get_pixel(x, y).0[3] != 0 {
                                            any_opaque = true;
                                            break 'outer;
                                        }
                                    }
                                }
                                any_opaque
                            }
                        });
                    }
                    if collide == Some(true) {
                        let tw = tileset.tile_width as f64;
                        let th = tileset.tile_height as f64;
                        shapes.push(TileShape::Polygon(vec![
                            Pt { x: 0.0, y: 0.0 },
                            Pt { x: tw, y: 0.0 },
                            Pt { x: tw, y: th },
                            Pt { x: 0.0, y: th },
                        ]));
                    }
                }
            }

            out.insert(tileset.firstgid + local_id, shapes);
        }
    }

    Ok(out)
}

pub struct CollisionBuilder {
    tile_shapes: HashMap<u32, Vec<TileShape>>,
    subjects: Vec<Polygon<f64>>,
    polylines: Vec<(Vec<Pt>, u16, [u8; 4])>,
    circles: Vec<(f64, f64, f64, u16, [u8; 4])>,
    tile_width: f64,
    tile_height: f64,
}

impl CollisionBuilder {
    /// `tilesets` should be the ordinary (non-`actors`/`props`) tilesets
    /// only; actor and prop placements never contribute tile collision.
    pub fn new(tile_width: u32, tile_height: u32, tilesets: &[&TilesetData]) -> Result<Self> {
        let owned: Vec<TilesetData> = tilesets.iter().map(|&t| t.clone()).collect();
        Ok(CollisionBuilder {
            tile_shapes: derive_tile_shapes(&owned)?,
            subjects: Vec::new(),
            polylines: Vec::new(),
            circles: Vec::new(),
            tile_width: tile_width as f64,
            tile_height: tile_height as f64,
        })
    }

    /// Ingest one chunk's worth of tiles, `gids`/`flipx`/`flipy`/`flipd`
    /// given in row-major 16x16 order at chunk coordinate `(cx, cy)` with
    /// the owning layer's pixel offset `(layer_ox, layer_oy)`.
    pub fn add_chunk(
        &mut self,
        cx: i32,
        cy: i32,
        layer_ox: f64,
        layer_oy: f64,
        gids: &[u32],
        flipx: &[bool],
        flipy: &[bool],
        flipd: &[bool],
    ) {
        for ly in 0..16i32 {
            for lx in 0..16i32 {
                let idx = (ly * 16 + lx) as usize;
                let gid = gids[idx];
                if gid == 0 {
                    continue;
                }
                let shapes = match self.tile_shapes.get(&gid) {
                    Some(s) => s.clone(),
                    None => continue,
                };
                let ox = layer_ox + (cx * 16 + lx) as f64 * self.tile_width;
                let oy = layer_oy + (cy * 16 + ly) as f64 * self.tile_height;

                for shape in shapes {
                    match shape {
                        TileShape::Circle { r, x, y } => {
                            self.circles.push((r, x + ox, y + oy, 0, [0; 4]));
                        }
                        TileShape::Polygon(points) => {
                            let points = apply_flip(
                                &points,
                                self.tile_width,
                                self.tile_height,
                                flipd[idx],
                                flipx[idx],
                                flipy[idx],
                            );
                            let points = translate(&points, ox, oy);
                            self.push_subject(&points);
                        }
                        TileShape::Polyline(points) => {
                            let points = apply_flip(
                                &points,
                                self.tile_width,
                                self.tile_height,
                                flipd[idx],
                                flipx[idx],
                                flipy[idx],
                            );
                            let points = translate(&points, ox, oy);
                            self.polylines.push((points, 0, [0; 4]));
                        }
                    }
                }
            }
        }
    }

    pub fn add_object(&mut self, obj: &ObjectData) -> Result<()> {
        let Some(shape) = tiled_object_to_shape(obj)? else {
            return Ok(());
        };
        // Object-layer collision ingestion always packs zero flags/fid, same
        // as the polygon arm below; only the trigger-only single-object path
        // (`pack_single_object`) carries real `shape_flags`/`fid_bytes`.
        match shape {
            TileShape::Circle { r, x, y } => self.circles.push((r, x, y, 0, [0; 4])),
            TileShape::Polyline(points) => self.polylines.push((points, 0, [0; 4])),
            TileShape::Polygon(points) => self.push_subject_tagged(&points, 0, [0; 4]),
        }
        Ok(())
    }

    fn push_subject(&mut self, points: &[Pt]) {
        self.push_subject_tagged(points, 0, [0; 4]);
    }

    fn push_subject_tagged(&mut self, points: &[Pt], _flags: u16, _fid: [u8; 4]) {
        if points.len() < 3 {
            return;
        }
        let mut coords: Vec<Coord<f64>> = points.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
        coords.push(coords[0]);
        self.subjects.push(Polygon::new(LineString::new(coords), vec![]));
    }

    /// Union the polygon subjects, then emit polygons, polylines, circles,
    /// and a terminal `COLL_END` record, in that order. If `svg_path` is
    /// given, also dumps the pre-serialization geometry there for visual
    /// debugging (`-S`), independent of and before the binary encoding.
    pub fn build(self, svg_path: Option<&Path>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let union = union_all(self.subjects);

        if let Some(path) = svg_path {
            write_svg(path, &union, &self.polylines, &self.circles)?;
        }

        for poly in union.0 {
            let points: Vec<Pt> = poly
                .exterior()
                .points()
                .map(|p| Pt { x: p.x(), y: p.y() })
                .collect();
            let points = dedup_closing_point(points);
            pack_points(&mut out, &points, ShapeHint::Polygon, 0, [0; 4]);
        }
        for (points, flags, fid) in &self.polylines {
            pack_points(&mut out, points, ShapeHint::Polyline, *flags, *fid);
        }
        for (r, x, y, flags, fid) in &self.circles {
            pack_circle(&mut out, *r, *x, *y, *flags, *fid);
        }

        out.write_u16::<BigEndian>(COLL_END).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        Ok(out)
    }
}

/// Render the unioned polygons (red), standalone polylines (blue), and
/// circles (green) as a flat, unstyled SVG for visual inspection.
fn write_svg(
    path: &Path,
    union: &MultiPolygon<f64>,
    polylines: &[(Vec<Pt>, u16, [u8; 4])],
    circles: &[(f64, f64, f64, u16, [u8; 4])],
) -> Result<()> {
    let mut body = String::new();
    writeln!(body, r#"<svg xmlns="http://www.w3.org/2000/svg">"#).unwrap();
    for poly in &union.0 {
        write!(body, "<polygon points=\"").unwrap();
        for p in poly.exterior().points() {
            write!(body, "{},{} ", p.x(), p.y()).unwrap();
        }
        writeln!(body, "\" fill=\"none\" stroke=\"red\"/>").unwrap();
    }
    for (points, _, _) in polylines {
        write!(body, "<polyline points=\"").unwrap();
        for p in points {
            write!(body, "{},{} ", p.x, p.y).unwrap();
        }
        writeln!(body, "\" fill=\"none\" stroke=\"blue\"/>").unwrap();
    }
    for (r, x, y, _, _) in circles {
        writeln!(
            body,
            "<circle cx=\"{}\" cy=\"{}\" r=\"{}\" fill=\"none\" stroke=\"green\"/>",
            x + r,
            y + r,
            r
        )
        .unwrap();
    }
    writeln!(body, "</svg>").unwrap();
    std::fs::write(path, body).with_context(|| format!("writing svg dump {}", path.display()))
}

/// Pack a single object's collision shape (translated by `dx, dy`) as one
/// tagged shape record, with no trailing `COLL_END` — used for a trigger's
/// own collision blob, which the caller terminates itself.
pub fn pack_single_object(obj: &ObjectData, dx: f64, dy: f64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let Some(shape) = tiled_object_to_shape(obj)? else {
        return Ok(out);
    };
    let flags = shape_flags(obj);
    let fid = fid_bytes(&obj.name);
    match shape {
        TileShape::Circle { r, x, y } => pack_circle(&mut out, r, x + dx, y + dy, flags, fid),
        TileShape::Polygon(points) => {
            let points = translate(&points, dx, dy);
            pack_points(&mut out, &points, ShapeHint::Polygon, flags, fid);
        }
        TileShape::Polyline(points) => {
            let points = translate(&points, dx, dy);
            pack_points(&mut out, &points, ShapeHint::Polyline, flags, fid);
        }
    }
    Ok(out)
}

fn union_all(subjects: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let mut acc = MultiPolygon::new(Vec::new());
    for poly in subjects {
        let single = MultiPolygon::new(vec![poly]);
        acc = acc.union(&single);
    }
    acc
}

fn dedup_closing_point(mut points: Vec<Pt>) -> Vec<Pt> {
    if points.len() > 1 {
        let first = points[0];
        let last = *points.last().unwrap();
        if (first.x - last.x).abs() < f64::EPSILON && (first.y - last.y).abs() < f64::EPSILON {
            points.pop();
        }
    }
    points
}

enum ShapeHint {
    Polygon,
    Polyline,
}

/// Scale by 1/16 and round, matching `pack_collision_points`.
fn scaled(v: f64) -> f32 {
    (v.round() / 16.0) as f32
}

fn header(out: &mut Vec<u8>, tag: u16, flags: u16, fid: [u8; 4]) {
    out.write_u16::<BigEndian>(tag).unwrap();
    out.write_u16::<BigEndian>(flags).unwrap();
    out.extend_from_slice(&fid);
}

fn pack_circle(out: &mut Vec<u8>, r: f64, x: f64, y: f64, flags: u16, fid: [u8; 4]) {
    header(out, COLL_CIRCLE, flags, fid);
    out.write_f32::<BigEndian>(scaled(r)).unwrap();
    out.write_f32::<BigEndian>(scaled(x + r)).unwrap();
    out.write_f32::<BigEndian>(scaled(y + r)).unwrap();
}

fn pack_points(out: &mut Vec<u8>, points: &[Pt], hint: ShapeHint, flags: u16, fid: [u8; 4]) {
    let n = points.len();
    if n < 2 {
        return;
    }

    if n == 2 {
        header(out, COLL_EDGE, flags, fid);
        out.write_f32::<BigEndian>(scaled(points[0].x)).unwrap();
        out.write_f32::<BigEndian>(scaled(points[0].y)).unwrap();
        out.write_f32::<BigEndian>(scaled(points[1].x)).unwrap();
        out.write_f32::<BigEndian>(scaled(points[1].y)).unwrap();
        return;
    }

    if matches!(hint, ShapeHint::Polyline) {
        let a = points[0];
        let b = points[n - 1];
        header(out, COLL_CHAIN, flags, fid);
        out.write_u32::<BigEndian>(n as u32).unwrap();
        out.write_f32::<BigEndian>(scaled(a.x)).unwrap();
        out.write_f32::<BigEndian>(scaled(a.y)).unwrap();
        out.write_f32::<BigEndian>(scaled(b.x)).unwrap();
        out.write_f32::<BigEndian>(scaled(b.y)).unwrap();
        for p in points {
            out.write_f32::<BigEndian>(scaled(p.x)).unwrap();
            out.write_f32::<BigEndian>(scaled(p.y)).unwrap();
        }
        return;
    }

    match n {
        3 => header(out, COLL_TRIANGLE, flags, fid),
        4 => header(out, COLL_QUAD, flags, fid),
        _ => {
            header(out, COLL_POLY, flags, fid);
            out.write_u32::<BigEndian>(n as u32).unwrap();
        }
    }
    for p in points {
        out.write_f32::<BigEndian>(scaled(p.x)).unwrap();
        out.write_f32::<BigEndian>(scaled(p.y)).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_idempotence_restores_points() {
        let points = vec![Pt { x: 3.0, y: 5.0 }, Pt { x: 10.0, y: 2.0 }];
        let once = apply_flip(&points, 16.0, 16.0, false, true, false);
        let twice = apply_flip(&once, 16.0, 16.0, false, true, false);
        for (a, b) in points.iter().zip(twice.iter()) {
            assert!((a.x - b.x).abs() < 1e-9);
            assert!((a.y - b.y).abs() < 1e-9);
        }
    }

    #[test]
    fn adjacent_full_tiles_union_to_one_polygon() {
        let mut builder = CollisionBuilder {
            tile_shapes: HashMap::new(),
            subjects: Vec::new(),
            polylines: Vec::new(),
            circles: Vec::new(),
            tile_width: 16.0,
            tile_height: 16.0,
        };
        builder.push_subject(&[
            Pt { x: 0.0, y: 0.0 },
            Pt { x: 16.0, y: 0.0 },
            Pt { x: 16.0, y: 16.0 },
            Pt { x: 0.0, y: 16.0 },
        ]);
        builder.push_subject(&[
            Pt { x: 16.0, y: 0.0 },
            Pt { x: 32.0, y: 0.0 },
            Pt { x: 32.0, y: 16.0 },
            Pt { x: 16.0, y: 16.0 },
        ]);
        let data = builder.build(None).unwrap();
        // One polygon record followed directly by COLL_END: the tag right
        // after the first record's payload must be COLL_END, not another
        // POLY/QUAD tag.
        assert_eq!(u16::from_be_bytes([data[0], data[1]]), COLL_QUAD);
    }

    #[test]
    fn empty_builder_emits_only_end() {
        let builder = CollisionBuilder {
            tile_shapes: HashMap::new(),
            subjects: Vec::new(),
            polylines: Vec::new(),
            circles: Vec::new(),
            tile_width: 16.0,
            tile_height: 16.0,
        };
        let data = builder.build(None).unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(u16::from_be_bytes([data[0], data[1]]), COLL_END);
    }

    fn sensor_object(name: &str, shape: ObjectShape) -> ObjectData {
        let mut properties = crate::model::Properties::default();
        properties.0.insert("sensor".to_string(), crate::model::PropertyValue::Bool(true));
        ObjectData {
            id: 1,
            name: name.to_string(),
            obj_type: String::new(),
            x: 0.0,
            y: 0.0,
            width: 16.0,
            height: 16.0,
            rotation: 0.0,
            shape,
            properties,
        }
    }

    #[test]
    fn add_object_circle_ignores_sensor_flag_and_name() {
        let mut builder = CollisionBuilder {
            tile_shapes: HashMap::new(),
            subjects: Vec::new(),
            polylines: Vec::new(),
            circles: Vec::new(),
            tile_width: 16.0,
            tile_height: 16.0,
        };
        let obj = sensor_object("evil", ObjectShape::Ellipse { w: 16.0, h: 16.0 });
        builder.add_object(&obj).unwrap();
        let data = builder.build(None).unwrap();
        assert_eq!(u16::from_be_bytes([data[0], data[1]]), COLL_CIRCLE);
        assert_eq!(u16::from_be_bytes([data[2], data[3]]), 0); // flags
        assert_eq!(&data[4..8], &[0, 0, 0, 0]); // fid
    }

    #[test]
    fn add_object_polyline_ignores_sensor_flag_and_name() {
        let mut builder = CollisionBuilder {
            tile_shapes: HashMap::new(),
            subjects: Vec::new(),
            polylines: Vec::new(),
            circles: Vec::new(),
            tile_width: 16.0,
            tile_height: 16.0,
        };
        let obj = sensor_object(
            "evil",
            ObjectShape::Polyline {
                points: vec![
                    crate::model::Point::new(0.0, 0.0),
                    crate::model::Point::new(16.0, 0.0),
                    crate::model::Point::new(16.0, 16.0),
                ],
            },
        );
        builder.add_object(&obj).unwrap();
        let data = builder.build(None).unwrap();
        assert_eq!(u16::from_be_bytes([data[0], data[1]]), COLL_CHAIN);
        assert_eq!(u16::from_be_bytes([data[2], data[3]]), 0); // flags
        assert_eq!(&data[4..8], &[0, 0, 0, 0]); // fid
    }
}

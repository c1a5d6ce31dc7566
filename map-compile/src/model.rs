//! Plain-struct internal map model.
//!
//! This is the shape the rest of the pipeline consumes; [`crate::tiled_adapter`]
//! is the only module that knows about `tiled::*` types and converts them
//! into these.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Orthogonal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOrder {
    RightDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Color(u32),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<u32> {
        match self {
            PropertyValue::Color(c) => Some(*c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Properties(pub HashMap<String, PropertyValue>);

impl Properties {
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(PropertyValue::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(PropertyValue::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(PropertyValue::as_i64)
    }
}

/// A single tile's derived shape/animation/object metadata, indexed by
/// local tile index within the tileset.
#[derive(Debug, Clone, Default)]
pub struct TileData {
    pub properties: Properties,
    pub objects: Vec<ObjectData>,
    /// Frame-local-ids for an `<animation>` block, empty if none.
    pub animation: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct TilesetData {
    pub name: String,
    pub firstgid: u32,
    pub tile_count: u32,
    pub columns: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub image_path: Option<String>,
    pub image_width: u32,
    pub image_height: u32,
    pub tile_offset_x: i32,
    pub tile_offset_y: i32,
    pub tiles: HashMap<u32, TileData>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone)]
pub enum ObjectShape {
    Rect { w: f64, h: f64 },
    Ellipse { w: f64, h: f64 },
    Polygon { points: Vec<Point> },
    Polyline { points: Vec<Point> },
    Point,
    Tile { gid: u32, flipx: bool, flipy: bool, flipd: bool },
}

#[derive(Debug, Clone)]
pub struct ObjectData {
    pub id: u32,
    pub name: String,
    pub obj_type: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub rotation: f64,
    pub shape: ObjectShape,
    pub properties: Properties,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub cx: i32,
    pub cy: i32,
    /// Gids in row-major order, 16x16, one entry per tile layer at this
    /// chunk, background-to-foreground.
    pub gids: Vec<u32>,
    pub flipx: Vec<bool>,
    pub flipy: Vec<bool>,
    pub flipd: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct TileLayer {
    pub name: String,
    pub depth: i32,
    pub offset_x: f64,
    pub offset_y: f64,
    pub parallax_x: f64,
    pub parallax_y: f64,
    pub chunks: Vec<Chunk>,
    pub properties: Properties,
}

#[derive(Debug, Clone)]
pub struct ImageLayer {
    pub name: String,
    pub image_path: Option<String>,
    pub offset_x: f64,
    pub offset_y: f64,
    pub parallax_x: f64,
    pub parallax_y: f64,
    pub tint_color: Option<u32>,
    pub properties: Properties,
}

#[derive(Debug, Clone)]
pub struct ObjectLayer {
    pub name: String,
    pub offset_x: f64,
    pub offset_y: f64,
    pub parallax_x: f64,
    pub parallax_y: f64,
    pub objects: Vec<ObjectData>,
}

#[derive(Debug, Clone)]
pub enum Layer {
    Image(ImageLayer),
    Tile(TileLayer),
    Object(ObjectLayer),
}

#[derive(Debug, Clone)]
pub struct MapData {
    pub orientation: Orientation,
    pub render_order: RenderOrder,
    pub tile_width: u32,
    pub tile_height: u32,
    pub width: u32,
    pub height: u32,
    pub infinite: bool,
    pub tilesets: Vec<TilesetData>,
    pub layers: Vec<Layer>,
    pub properties: Properties,
}

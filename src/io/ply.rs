use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use ply_rs::{parser, ply};

use crate::error::Fuse3dError;
use crate::fusion::FusedPoint;

const FLOAT_PROPERTIES: [&str; 6] = ["x", "y", "z", "nx", "ny", "nz"];
const COLOR_PROPERTIES: [&str; 3] = ["red", "green", "blue"];

fn build_ply(points: &[FusedPoint], encoding: Encoding) -> Ply<DefaultElement> {
    let mut ply = Ply::<DefaultElement>::new();
    let mut vertex_element = ElementDef::new("vertex".to_string());
    FLOAT_PROPERTIES.iter().for_each(|key| {
        vertex_element.properties.add(PropertyDef::new(
            key.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    });
    COLOR_PROPERTIES.iter().for_each(|key| {
        vertex_element.properties.add(PropertyDef::new(
            key.to_string(),
            PropertyType::Scalar(ScalarType::UChar),
        ));
    });

    let vertex_array: Vec<DefaultElement> = points
        .iter()
        .map(|point| {
            let mut elem = DefaultElement::new();
            elem.insert("x".to_string(), Property::Float(point.x));
            elem.insert("y".to_string(), Property::Float(point.y));
            elem.insert("z".to_string(), Property::Float(point.z));
            elem.insert("nx".to_string(), Property::Float(point.nx));
            elem.insert("ny".to_string(), Property::Float(point.ny));
            elem.insert("nz".to_string(), Property::Float(point.nz));
            elem.insert("red".to_string(), Property::UChar(point.r));
            elem.insert("green".to_string(), Property::UChar(point.g));
            elem.insert("blue".to_string(), Property::UChar(point.b));
            elem
        })
        .collect();

    ply.header.elements.add(vertex_element);
    ply.payload.insert("vertex".to_string(), vertex_array);
    ply.header.encoding = encoding;
    ply
}

fn write_encoded<P: AsRef<Path>>(
    path: P,
    points: &[FusedPoint],
    encoding: Encoding,
) -> Result<(), Fuse3dError> {
    let mut ply = build_ply(points, encoding);
    ply.make_consistent()
        .map_err(|err| Fuse3dError::parser(format!("{:?}", err)))?;
    let mut buf = BufWriter::new(File::create(path)?);
    Writer::new().write_ply(&mut buf, &mut ply)?;
    Ok(())
}

/// Writes the fused point cloud as ASCII PLY.
pub fn write_ply<P: AsRef<Path>>(path: P, points: &[FusedPoint]) -> Result<(), Fuse3dError> {
    write_encoded(path, points, Encoding::Ascii)
}

/// Writes the fused point cloud as binary PLY in host byte order: per
/// point, 6 f32 (position, normal) then 3 u8 (color), no padding.
pub fn write_ply_binary<P: AsRef<Path>>(path: P, points: &[FusedPoint]) -> Result<(), Fuse3dError> {
    let encoding = if cfg!(target_endian = "big") {
        Encoding::BinaryBigEndian
    } else {
        Encoding::BinaryLittleEndian
    };
    write_encoded(path, points, encoding)
}

struct Vertex(FusedPoint);

impl ply::PropertyAccess for Vertex {
    fn new() -> Self {
        Vertex(FusedPoint {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            nx: 0.0,
            ny: 0.0,
            nz: 0.0,
            r: 0,
            g: 0,
            b: 0,
        })
    }

    fn set_property(&mut self, key: String, property: ply::Property) {
        match (key.as_ref(), property) {
            ("x", ply::Property::Float(v)) => self.0.x = v,
            ("y", ply::Property::Float(v)) => self.0.y = v,
            ("z", ply::Property::Float(v)) => self.0.z = v,
            ("nx", ply::Property::Float(v)) => self.0.nx = v,
            ("ny", ply::Property::Float(v)) => self.0.ny = v,
            ("nz", ply::Property::Float(v)) => self.0.nz = v,
            ("red", ply::Property::UChar(v)) => self.0.r = v,
            ("green", ply::Property::UChar(v)) => self.0.g = v,
            ("blue", ply::Property::UChar(v)) => self.0.b = v,
            (_, _) => (),
        }
    }
}

/// Reads a fused point cloud back from an ASCII or binary PLY file.
pub fn read_ply<P: AsRef<Path>>(path: P) -> Result<Vec<FusedPoint>, Fuse3dError> {
    let file = File::open(path)?;
    let mut reader = std::io::BufReader::new(file);

    let vertex_parser = parser::Parser::<Vertex>::new();
    let header = vertex_parser.read_header(&mut reader)?;

    let mut points = Vec::new();
    for (_, element) in &header.elements {
        if element.name == "vertex" {
            let vertices =
                vertex_parser.read_payload_for_element(&mut reader, element, &header)?;
            points = vertices.into_iter().map(|vertex| vertex.0).collect();
        }
    }

    Ok(points)
}

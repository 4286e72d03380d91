//! Binary little-endian PLY codec for splat scenes.
//!
//! Layout, in this exact element order:
//!
//! | element       | count | property            |
//! |---------------|-------|---------------------|
//! | `vertex`      | N     | 14 `float` fields   |
//! | `extrinsic`   | 16    | `float extrinsic`   |
//! | `intrinsic`   | 9     | `float intrinsic`   |
//! | `image_size`  | 2     | `uint image_size`   |
//! | `frame`       | 2     | `int frame`         |
//! | `disparity`   | 2     | `float disparity`   |
//! | `color_space` | 1     | `uchar color_space` |
//! | `version`     | 3     | `uchar version`     |
//!
//! `opacity` holds the logit, `scale_*` the natural log of the axis length,
//! `f_dc_*` the SH DC color, and `rot_*` the quaternion as `w, x, y, z`.

use crate::common::{
    is_unit_quat, logit, sigmoid, try_normalize_quat, UNIT_QUAT_TOLERANCE,
};
use crate::config::OpacityPolicy;
use crate::error::SplatError;
use crate::structures::{
    CameraIntrinsics, ColorSpace, DisparityRange, FormatVersion, Gaussian3D, GaussianSet,
    ImageSize, SceneMetadata, Transform4x4, FRAME_INDEX,
};
use foldhash::{HashMap, HashMapExt};
use nalgebra::{Quaternion, Vector3};
use std::io::Write;
use std::mem::size_of;
use zerocopy::byteorder::little_endian::{F32, I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const VERTEX_PROPERTIES: [&str; 14] = [
    "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "scale_0", "scale_1", "scale_2",
    "rot_0", "rot_1", "rot_2", "rot_3",
];

const FORMAT_LINE: &[u8] = b"format binary_little_endian 1.0";

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct VertexRow {
    position: [F32; 3],
    f_dc: [F32; 3],
    opacity: F32,
    scale: [F32; 3],
    rotation: [F32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    Double,
}

impl ScalarType {
    fn parse(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"char" | b"int8" => Self::Char,
            b"uchar" | b"uint8" => Self::UChar,
            b"short" | b"int16" => Self::Short,
            b"ushort" | b"uint16" => Self::UShort,
            b"int" | b"int32" => Self::Int,
            b"uint" | b"uint32" => Self::UInt,
            b"float" | b"float32" => Self::Float,
            b"double" | b"float64" => Self::Double,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::UChar => "uchar",
            Self::Short => "short",
            Self::UShort => "ushort",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    pub const fn size(self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

/// Metadata elements after `vertex`: name, property type, row count. Each
/// has a single property named after the element.
const METADATA_ELEMENTS: [(&str, ScalarType, usize); 7] = [
    ("extrinsic", ScalarType::Float, 16),
    ("intrinsic", ScalarType::Float, 9),
    ("image_size", ScalarType::UInt, 2),
    ("frame", ScalarType::Int, 2),
    ("disparity", ScalarType::Float, 2),
    ("color_space", ScalarType::UChar, 1),
    ("version", ScalarType::UChar, 3),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef<'a> {
    pub name: &'a str,
    pub scalar: ScalarType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDef<'a> {
    pub name: &'a str,
    pub count: usize,
    pub properties: Vec<PropertyDef<'a>>,
}

impl ElementDef<'_> {
    pub fn row_size(&self) -> usize {
        self.properties.iter().map(|p| p.scalar.size()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header<'a> {
    pub elements: Vec<ElementDef<'a>>,
    /// Offset of the first body byte.
    pub body_offset: usize,
}

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    let line = match memchr::memchr(b'\n', &buffer[start..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            &buffer[start..start + pos]
        }
        None => {
            *offset = buffer.len();
            &buffer[start..]
        }
    };
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

fn mismatch(message: impl Into<String>) -> SplatError {
    SplatError::FormatMismatch(message.into())
}

fn utf8(bytes: &[u8]) -> Result<&str, SplatError> {
    std::str::from_utf8(bytes).map_err(|e| mismatch(format!("UTF-8 error in header: {}", e)))
}

/// Parses the ASCII header. Only `binary_little_endian 1.0` with scalar
/// properties is accepted; `comment` and `obj_info` lines are skipped.
pub fn parse_header(raw_data: &[u8]) -> Result<Header<'_>, SplatError> {
    let mut offset = 0;

    let magic = next_line(raw_data, &mut offset).ok_or_else(|| mismatch("No 'ply' line"))?;
    if magic != b"ply" {
        return Err(mismatch("Not a .ply file (missing 'ply' header)"));
    }

    let format = next_line(raw_data, &mut offset).ok_or_else(|| mismatch("Missing format line"))?;
    if format != FORMAT_LINE {
        return Err(mismatch(
            "Unsupported .ply format (only binary_little_endian 1.0 is supported)",
        ));
    }

    let mut elements: Vec<ElementDef> = Vec::new();
    loop {
        let line = next_line(raw_data, &mut offset)
            .ok_or_else(|| mismatch("No 'end_header' found before EOF"))?;
        let mut words = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|w| !w.is_empty());

        match words.next() {
            Some(b"end_header") => break,
            Some(b"comment") | Some(b"obj_info") | None => continue,
            Some(b"element") => {
                let (Some(name), Some(count), None) = (words.next(), words.next(), words.next())
                else {
                    return Err(mismatch(format!(
                        "Malformed element line: {}",
                        String::from_utf8_lossy(line)
                    )));
                };
                let count = utf8(count)?
                    .parse()
                    .map_err(|e| mismatch(format!("Element count parse error: {}", e)))?;
                elements.push(ElementDef {
                    name: utf8(name)?,
                    count,
                    properties: Vec::new(),
                });
            }
            Some(b"property") => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| mismatch("Property declared before any element"))?;
                let (Some(scalar), Some(name), None) = (words.next(), words.next(), words.next())
                else {
                    return Err(mismatch(format!(
                        "Unsupported property line: {}",
                        String::from_utf8_lossy(line)
                    )));
                };
                let scalar = ScalarType::parse(scalar).ok_or_else(|| {
                    mismatch(format!(
                        "Unsupported property type: {}",
                        String::from_utf8_lossy(scalar)
                    ))
                })?;
                element.properties.push(PropertyDef {
                    name: utf8(name)?,
                    scalar,
                });
            }
            Some(other) => {
                return Err(mismatch(format!(
                    "Unexpected header keyword: {}",
                    String::from_utf8_lossy(other)
                )))
            }
        }
    }

    Ok(Header {
        elements,
        body_offset: offset,
    })
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize, SplatError> {
    hm.get(name)
        .copied()
        .ok_or_else(|| mismatch(format!("Missing required element: {}", name)))
}

/// Checks that every element of the splat layout is present, in order, with
/// exactly the expected properties. Nothing is inferred from names alone.
fn validate_header(header: &Header) -> Result<(), SplatError> {
    let mut element_map: HashMap<&str, usize> = HashMap::with_capacity(header.elements.len());
    for (i, element) in header.elements.iter().enumerate() {
        if element_map.insert(element.name, i).is_some() {
            return Err(mismatch(format!("Duplicate element: {}", element.name)));
        }
    }

    let expected_names =
        std::iter::once("vertex").chain(METADATA_ELEMENTS.iter().map(|(name, _, _)| *name));
    for (position, name) in expected_names.enumerate() {
        let found = idx_of(&element_map, name)?;
        if found != position {
            return Err(mismatch(format!(
                "Element '{}' at position {}, expected {}",
                name, found, position
            )));
        }
    }
    if header.elements.len() != METADATA_ELEMENTS.len() + 1 {
        return Err(mismatch(format!(
            "Unexpected element: {}",
            header.elements[METADATA_ELEMENTS.len() + 1].name
        )));
    }

    let vertex = &header.elements[0];
    let names: Vec<&str> = vertex.properties.iter().map(|p| p.name).collect();
    if names != VERTEX_PROPERTIES {
        return Err(mismatch(format!(
            "Vertex properties {:?} do not match {:?}",
            names, VERTEX_PROPERTIES
        )));
    }
    if let Some(p) = vertex.properties.iter().find(|p| p.scalar != ScalarType::Float) {
        return Err(mismatch(format!(
            "Vertex property '{}' has type {}, expected float",
            p.name,
            p.scalar.name()
        )));
    }

    for (element, (name, scalar, count)) in header.elements[1..].iter().zip(METADATA_ELEMENTS) {
        let expected = [PropertyDef { name, scalar }];
        if element.properties != expected {
            return Err(mismatch(format!(
                "Element '{}' must have a single '{} {}' property",
                name,
                scalar.name(),
                name
            )));
        }
        if element.count != count {
            return Err(mismatch(format!(
                "Element '{}' has {} rows, expected {}",
                name, element.count, count
            )));
        }
    }

    Ok(())
}

fn write_header<W: Write>(output: &mut W, num_points: usize) -> Result<(), SplatError> {
    output.write_all(b"ply\n")?;
    output.write_all(FORMAT_LINE)?;
    output.write_all(b"\n")?;
    writeln!(output, "element vertex {}", num_points)?;
    for name in VERTEX_PROPERTIES {
        writeln!(output, "property float {}", name)?;
    }
    for (name, scalar, count) in METADATA_ELEMENTS {
        writeln!(output, "element {} {}", name, count)?;
        writeln!(output, "property {} {}", scalar.name(), name)?;
    }
    output.write_all(b"end_header\n")?;
    Ok(())
}

#[inline]
fn f32s<const N: usize>(values: [f32; N]) -> [F32; N] {
    values.map(F32::new)
}

fn take<'b>(body: &mut &'b [u8], len: usize) -> &'b [u8] {
    let (head, tail) = body.split_at(len);
    *body = tail;
    head
}

fn read_array<T, const N: usize>(bytes: &[u8], name: &str) -> Result<[T; N], SplatError>
where
    [T; N]: FromBytes,
{
    <[T; N]>::read_from_bytes(bytes).map_err(|_| {
        mismatch(format!(
            "Byte conversion error for {}: expected {} values",
            name, N
        ))
    })
}

fn frame_count(num_points: usize) -> Result<i32, SplatError> {
    i32::try_from(num_points)
        .map_err(|_| mismatch(format!("{} gaussians exceed the frame counter", num_points)))
}

/// A scene in its stored form: logit opacities, log scales and the exact
/// float bits of the vertex rows. Writing an `EncodedScene` reproduces the
/// body it was parsed from bit for bit.
#[derive(Debug, Clone)]
pub struct EncodedScene {
    rows: Vec<VertexRow>,
    pub metadata: SceneMetadata,
}

impl EncodedScene {
    /// Encodes `gaussians`. Colors must already be SH DC coefficients (see
    /// [`crate::color::encode_colors`]). Opacities go through
    /// `opacity_policy`, and orientations must be unit quaternions within
    /// [`UNIT_QUAT_TOLERANCE`].
    pub fn encode(
        gaussians: &GaussianSet,
        metadata: &SceneMetadata,
        opacity_policy: OpacityPolicy,
    ) -> Result<Self, SplatError> {
        opacity_policy.validate()?;
        let num_points = gaussians.len();
        frame_count(num_points)?;

        let mut clamped = 0usize;
        let mut rows = Vec::with_capacity(num_points);
        for (index, g) in gaussians.iter().enumerate() {
            if !is_unit_quat(&g.orientation) {
                return Err(SplatError::DegenerateInput {
                    index,
                    reason: format!(
                        "quaternion norm {} is not within {} of 1",
                        g.orientation.norm(),
                        UNIT_QUAT_TOLERANCE
                    ),
                });
            }
            let (opacity, was_clamped) = opacity_policy.apply(index, g.opacity)?;
            clamped += was_clamped as usize;
            rows.push(VertexRow {
                position: f32s(g.mean.into()),
                f_dc: f32s(g.color.into()),
                opacity: F32::new(logit(opacity)),
                scale: f32s(g.scale.map(f32::ln).into()),
                rotation: f32s([
                    g.orientation.w,
                    g.orientation.i,
                    g.orientation.j,
                    g.orientation.k,
                ]),
            });
        }
        if clamped > 0 {
            log::warn!(
                target: "splat::ply",
                "clamped {} of {} opacities into the open interval (0, 1)",
                clamped,
                num_points,
            );
        }

        Ok(Self {
            rows,
            metadata: *metadata,
        })
    }

    /// Parses a scene file without touching the stored values.
    pub fn parse(raw_data: &[u8]) -> Result<Self, SplatError> {
        let header = parse_header(raw_data)?;
        validate_header(&header)?;

        let expected_bytes = header
            .elements
            .iter()
            .try_fold(0usize, |total, element| {
                element
                    .count
                    .checked_mul(element.row_size())
                    .and_then(|n| n.checked_add(total))
            })
            .ok_or_else(|| mismatch("Overflow in byte calculation"))?;
        let available = raw_data.len() - header.body_offset;
        if available < expected_bytes {
            return Err(SplatError::Truncated {
                needed: expected_bytes,
                available,
            });
        }
        if available > expected_bytes {
            return Err(mismatch(format!(
                "{} trailing bytes after the last element",
                available - expected_bytes
            )));
        }

        let mut body = &raw_data[header.body_offset..];
        let num_points = header.elements[0].count;

        let vertex_bytes = take(&mut body, num_points * size_of::<VertexRow>());
        let rows = <[VertexRow]>::ref_from_bytes(vertex_bytes)
            .map_err(|e| mismatch(format!("Byte conversion error for vertex: {}", e)))?
            .to_vec();

        let extrinsic: [F32; 16] = read_array(take(&mut body, 16 * 4), "extrinsic")?;
        let intrinsic: [F32; 9] = read_array(take(&mut body, 9 * 4), "intrinsic")?;
        let image_size: [U32; 2] = read_array(take(&mut body, 2 * 4), "image_size")?;
        let frame: [I32; 2] = read_array(take(&mut body, 2 * 4), "frame")?;
        let disparity: [F32; 2] = read_array(take(&mut body, 2 * 4), "disparity")?;
        let color_space = take(&mut body, 1)[0];
        let version = take(&mut body, 3);

        let intrinsics = CameraIntrinsics::from_row_major(&intrinsic.map(F32::get))
            .ok_or_else(|| mismatch("Intrinsic matrix is not a zero-skew pinhole matrix"))?;

        let [frame_index, frame_count] = frame.map(I32::get);
        if frame_index != FRAME_INDEX {
            return Err(mismatch(format!(
                "Frame index {}, expected {}",
                frame_index, FRAME_INDEX
            )));
        }
        if usize::try_from(frame_count).ok() != Some(num_points) {
            return Err(mismatch(format!(
                "Frame declares {} gaussians, vertex element has {}",
                frame_count, num_points
            )));
        }

        let color_space = ColorSpace::from_tag(color_space)
            .ok_or_else(|| mismatch(format!("Unknown color space tag {}", color_space)))?;

        let [width, height] = image_size.map(U32::get);
        let [p10, p90] = disparity.map(F32::get);
        let metadata = SceneMetadata {
            extrinsics: Transform4x4::from_row_major(&extrinsic.map(F32::get)),
            intrinsics,
            image_size: ImageSize::new(width, height),
            disparity_range: DisparityRange { p10, p90 },
            color_space,
            version: FormatVersion {
                major: version[0],
                minor: version[1],
                patch: version[2],
            },
        };

        Ok(Self { rows, metadata })
    }

    /// Decodes the stored values: opacities come back through [`sigmoid`]
    /// and scales through `exp`; colors stay SH DC coefficients. Quaternions
    /// off unit length by more than [`UNIT_QUAT_TOLERANCE`] are normalized,
    /// and a zero or non-finite one fails the whole scene.
    pub fn decode(&self) -> Result<GaussianSet, SplatError> {
        let mut normalized = 0usize;
        let mut gaussians = Vec::with_capacity(self.rows.len());
        for (index, row) in self.rows.iter().enumerate() {
            let [w, x, y, z] = row.rotation.map(F32::get);
            let mut orientation = Quaternion::new(w, x, y, z);
            if !is_unit_quat(&orientation) {
                orientation = try_normalize_quat(&orientation).ok_or_else(|| {
                    SplatError::DegenerateInput {
                        index,
                        reason: "stored quaternion has zero or non-finite norm".to_string(),
                    }
                })?;
                normalized += 1;
            }
            gaussians.push(Gaussian3D {
                mean: Vector3::from(row.position.map(F32::get)),
                orientation,
                scale: Vector3::from(row.scale.map(|s| s.get().exp())),
                color: Vector3::from(row.f_dc.map(F32::get)),
                opacity: sigmoid(row.opacity.get()),
            });
        }
        if normalized > 0 {
            log::debug!(
                target: "splat::ply",
                "normalized {} of {} stored quaternions",
                normalized,
                gaussians.len(),
            );
        }
        Ok(GaussianSet::new(gaussians))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn capacity_hint(&self) -> usize {
        self.rows.len() * size_of::<VertexRow>() + 1024
    }

    /// Serializes the scene into `output`, header first.
    pub fn write_to<W: Write>(&self, output: &mut W) -> Result<(), SplatError> {
        let metadata = &self.metadata;
        let frame_count = frame_count(self.rows.len())?;

        write_header(output, self.rows.len())?;
        output.write_all(self.rows.as_slice().as_bytes())?;
        output.write_all(f32s(metadata.extrinsics.to_row_major()).as_bytes())?;
        output.write_all(f32s(metadata.intrinsics.to_row_major()).as_bytes())?;
        let image_size = [metadata.image_size.width, metadata.image_size.height].map(U32::new);
        output.write_all(image_size.as_bytes())?;
        output.write_all([FRAME_INDEX, frame_count].map(I32::new).as_bytes())?;
        let disparity = [metadata.disparity_range.p10, metadata.disparity_range.p90];
        output.write_all(f32s(disparity).as_bytes())?;
        output.write_all(&[metadata.color_space.tag()])?;
        output.write_all(&[
            metadata.version.major,
            metadata.version.minor,
            metadata.version.patch,
        ])?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SplatError> {
        let mut output = Vec::with_capacity(self.capacity_hint());
        self.write_to(&mut output)?;
        Ok(output)
    }
}

/// Serializes a scene through [`EncodedScene::encode`]. Nothing is written
/// unless every Gaussian encodes. Output is deterministic.
pub fn write_ply(
    gaussians: &GaussianSet,
    metadata: &SceneMetadata,
    opacity_policy: OpacityPolicy,
    output: &mut Vec<u8>,
) -> Result<(), SplatError> {
    let scene = EncodedScene::encode(gaussians, metadata, opacity_policy)?;
    output.clear();
    output.reserve(scene.capacity_hint());
    scene.write_to(output)?;

    log::debug!(
        target: "splat::ply",
        "write_ply > {} gaussians, {} bytes",
        scene.len(),
        output.len(),
    );

    Ok(())
}

/// Parses a scene written by [`write_ply`] and decodes it.
pub fn read_ply(raw_data: &[u8]) -> Result<(GaussianSet, SceneMetadata), SplatError> {
    let scene = EncodedScene::parse(raw_data)?;
    let gaussians = scene.decode()?;

    log::debug!(
        target: "splat::ply",
        "read_ply > {} gaussians",
        gaussians.len(),
    );

    Ok((gaussians, scene.metadata))
}

/// Parses `raw_data` and serializes it again. Returns the offset of the first
/// differing byte, or `None` when the rewrite is byte-identical.
pub fn first_rewrite_difference(raw_data: &[u8]) -> Result<Option<usize>, SplatError> {
    let rewritten = EncodedScene::parse(raw_data)?.to_bytes()?;
    if rewritten == raw_data {
        return Ok(None);
    }
    let at = raw_data
        .iter()
        .zip(&rewritten)
        .position(|(a, b)| a != b)
        .unwrap_or(raw_data.len().min(rewritten.len()));
    Ok(Some(at))
}

use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::path::Path;

use crate::pointcloud::PointCloud;
use crate::scalar::Scalar;

const MAX_POINT_STEP: usize = 1024;
const MAX_POINTS: usize = 50_000_000;

/// Error types for the PCD module.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PcdError {
    /// Failed to read PCD file
    #[error("Failed to read PCD file")]
    Io(#[from] std::io::Error),

    /// Unsupported header
    #[error("Unsupported PCD header")]
    UnsupportedProperty,

    /// Malformed PCD header
    #[error("Malformed PCD header")]
    MalformedHeader,

    /// Invalid PCD file extension
    #[error("Invalid PCD file extension. Got:{0}")]
    InvalidFileExtension(String),

    /// The DATA section uses a storage format that is not supported.
    #[error("Unsupported PCD data format: {0}")]
    UnsupportedDataFormat(String),

    /// A value in an ascii DATA section could not be parsed.
    #[error("Invalid PCD value at point {0}")]
    InvalidValue(usize),
}

/// Storage format of the DATA section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcdDataFormat {
    Ascii,
    Binary,
}

/// Describes a single field in a PCD point record
#[derive(Debug)]
struct PcdField {
    name: String,
    offset: usize, // byte offset within a binary point
    token: usize,  // token index within an ascii line
    size: usize,   // size of one element (bytes)
    kind: char,    // PCD type: 'F' = float, 'U' = unsigned int, 'I' = signed int
}

#[derive(Debug)]
struct PcdLayout {
    fields: HashMap<String, PcdField>,
    point_step: usize,   // total bytes per point
    num_tokens: usize,   // total values per ascii line
    num_points: usize,   // number of points
    format: PcdDataFormat,
}

impl PcdLayout {
    fn field(&self, name: &str) -> Result<&PcdField, PcdError> {
        self.fields.get(name).ok_or(PcdError::UnsupportedProperty)
    }

    fn normal_fields(&self) -> Option<[&PcdField; 3]> {
        let get = |long: &str, short: &str| self.fields.get(long).or_else(|| self.fields.get(short));
        Some([
            get("normal_x", "nx")?,
            get("normal_y", "ny")?,
            get("normal_z", "nz")?,
        ])
    }
}

/// Read a little-endian float of the field's size from a binary point record
#[inline]
fn read_float(buf: &[u8], field: &PcdField) -> Result<f64, PcdError> {
    let slice = buf
        .get(field.offset..field.offset + field.size)
        .ok_or(PcdError::UnsupportedProperty)?;
    match field.size {
        4 => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(slice);
            Ok(f32::from_le_bytes(bytes) as f64)
        }
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(slice);
            Ok(f64::from_le_bytes(bytes))
        }
        _ => Err(PcdError::UnsupportedProperty),
    }
}

/// Read a little-endian u32 from a byte buffer
#[inline]
fn read_u32(buf: &[u8], offset: usize) -> Result<u32, PcdError> {
    let slice = buf.get(offset..offset + 4).ok_or(PcdError::UnsupportedProperty)?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(slice);
    Ok(u32::from_le_bytes(bytes))
}

/// Parse a packed rgb value from an ascii token. PCL writes it as the float with the same bits.
fn parse_ascii_rgb(token: &str, kind: char) -> Option<u32> {
    match kind {
        'F' => token.parse::<f32>().ok().map(f32::to_bits),
        _ => token.parse::<u32>().ok(),
    }
}

fn unpack_rgb(rgb: u32) -> [u8; 3] {
    [
        ((rgb >> 16) & 0xFF) as u8,
        ((rgb >> 8) & 0xFF) as u8,
        (rgb & 0xFF) as u8,
    ]
}

fn parse_pcd_layout<R: BufRead>(reader: &mut R) -> Result<PcdLayout, PcdError> {
    let mut field_names: Vec<String> = Vec::new();
    let mut sizes = Vec::new();
    let mut types = Vec::new();
    let mut counts = Vec::new();
    let mut points = 0usize;

    let format = loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(PcdError::MalformedHeader);
        }
        let line = line.trim();

        if let Some(format) = line.strip_prefix("DATA") {
            break match format.trim() {
                "binary" => PcdDataFormat::Binary,
                "ascii" => PcdDataFormat::Ascii,
                other => return Err(PcdError::UnsupportedDataFormat(other.to_string())),
            };
        }

        let mut it = line.split_whitespace();
        match it.next() {
            Some("SIZE") => {
                sizes = it
                    .map(|v| v.parse::<usize>().map_err(|_| PcdError::UnsupportedProperty))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            Some("TYPE") => {
                types = it
                    .map(|v| v.chars().next().ok_or(PcdError::UnsupportedProperty))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            Some("COUNT") => {
                counts = it
                    .map(|v| v.parse::<usize>().map_err(|_| PcdError::UnsupportedProperty))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            Some("POINTS") => {
                let token = it.next().ok_or(PcdError::UnsupportedProperty)?;
                points = token
                    .parse::<usize>()
                    .map_err(|_| PcdError::UnsupportedProperty)?;
            }
            Some("FIELDS") => field_names = it.map(String::from).collect(),
            _ => {}
        }
    };

    if field_names.is_empty()
        || sizes.len() != field_names.len()
        || types.len() != field_names.len()
        || (!counts.is_empty() && counts.len() != field_names.len())
    {
        return Err(PcdError::UnsupportedProperty);
    }

    // Compute byte offsets and token positions for each field
    let mut offset = 0usize;
    let mut token = 0usize;
    let mut fields = HashMap::new();

    for (i, name) in field_names.iter().enumerate() {
        // If COUNT is omitted, PCD defines the default count as 1
        let count = counts.get(i).copied().unwrap_or(1);
        let size = sizes[i];
        let kind = types[i];

        match name.as_str() {
            "x" | "y" | "z" | "normal_x" | "normal_y" | "normal_z" | "nx" | "ny" | "nz" => {
                if !((size == 4 || size == 8) && count == 1 && kind == 'F') {
                    return Err(PcdError::UnsupportedProperty);
                }
            }
            "rgb" => {
                if !(size == 4 && count == 1 && (kind == 'U' || kind == 'I' || kind == 'F')) {
                    return Err(PcdError::UnsupportedProperty);
                }
            }
            _ => {}
        }

        if fields.contains_key(name) {
            return Err(PcdError::MalformedHeader);
        }
        fields.insert(
            name.clone(),
            PcdField {
                name: name.clone(),
                offset,
                token,
                size,
                kind,
            },
        );

        let field_bytes = size.checked_mul(count).ok_or(PcdError::MalformedHeader)?;
        offset = offset
            .checked_add(field_bytes)
            .ok_or(PcdError::MalformedHeader)?;
        token += count;

        if offset > MAX_POINT_STEP {
            return Err(PcdError::MalformedHeader);
        }
    }

    Ok(PcdLayout {
        fields,
        point_step: offset,
        num_tokens: token,
        num_points: points,
        format,
    })
}

/// Accumulates the attributes of the points as they are decoded.
struct PointBuffers<T> {
    points: Vec<[T; 3]>,
    colors: Vec<[u8; 3]>,
    normals: Vec<[T; 3]>,
}

impl<T: Scalar> PointBuffers<T> {
    fn with_capacity(n: usize, has_colors: bool, has_normals: bool) -> Self {
        Self {
            points: Vec::with_capacity(n),
            colors: Vec::with_capacity(if has_colors { n } else { 0 }),
            normals: Vec::with_capacity(if has_normals { n } else { 0 }),
        }
    }

    fn into_pointcloud(self) -> PointCloud<T> {
        PointCloud::new(
            self.points,
            (!self.colors.is_empty()).then_some(self.colors),
            (!self.normals.is_empty()).then_some(self.normals),
        )
    }
}

fn read_binary_points<T: Scalar, R: Read>(
    reader: &mut R,
    layout: &PcdLayout,
) -> Result<PointBuffers<T>, PcdError> {
    let [fx, fy, fz] = [layout.field("x")?, layout.field("y")?, layout.field("z")?];
    let frgb = layout.fields.get("rgb");
    let fnormal = layout.normal_fields();

    let mut buffer = vec![0u8; layout.point_step];
    let mut out = PointBuffers::with_capacity(layout.num_points, frgb.is_some(), fnormal.is_some());

    for _ in 0..layout.num_points {
        reader.read_exact(&mut buffer)?;

        out.points.push([
            T::cast_f64(read_float(&buffer, fx)?),
            T::cast_f64(read_float(&buffer, fy)?),
            T::cast_f64(read_float(&buffer, fz)?),
        ]);

        if let Some(f) = frgb {
            out.colors.push(unpack_rgb(read_u32(&buffer, f.offset)?));
        }

        if let Some([nx, ny, nz]) = fnormal {
            out.normals.push([
                T::cast_f64(read_float(&buffer, nx)?),
                T::cast_f64(read_float(&buffer, ny)?),
                T::cast_f64(read_float(&buffer, nz)?),
            ]);
        }
    }

    Ok(out)
}

fn read_ascii_points<T: Scalar, R: BufRead>(
    reader: &mut R,
    layout: &PcdLayout,
) -> Result<PointBuffers<T>, PcdError> {
    let [fx, fy, fz] = [layout.field("x")?, layout.field("y")?, layout.field("z")?];
    let frgb = layout.fields.get("rgb");
    let fnormal = layout.normal_fields();

    let mut out = PointBuffers::with_capacity(layout.num_points, frgb.is_some(), fnormal.is_some());
    let mut line = String::new();

    for index in 0..layout.num_points {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(PcdError::MalformedHeader);
        }

        let tokens = line.split_whitespace().collect::<Vec<_>>();
        if tokens.len() < layout.num_tokens {
            return Err(PcdError::InvalidValue(index));
        }

        let value = |field: &PcdField| -> Result<T, PcdError> {
            tokens[field.token]
                .parse::<f64>()
                .map(T::cast_f64)
                .map_err(|_| PcdError::InvalidValue(index))
        };

        out.points.push([value(fx)?, value(fy)?, value(fz)?]);

        if let Some(f) = frgb {
            let rgb = parse_ascii_rgb(tokens[f.token], f.kind).ok_or(PcdError::InvalidValue(index))?;
            out.colors.push(unpack_rgb(rgb));
        }

        if let Some([nx, ny, nz]) = fnormal {
            out.normals.push([value(nx)?, value(ny)?, value(nz)?]);
        }
    }

    Ok(out)
}

/// Read a point cloud in PCD format from a reader.
///
/// Supports `DATA binary` and `DATA ascii` with float `x y z` fields, an optional packed `rgb`
/// field and optional normals (`normal_x normal_y normal_z` or `nx ny nz`).
pub fn read_pcd_from<T: Scalar, R: BufRead>(reader: &mut R) -> Result<PointCloud<T>, PcdError> {
    let layout = parse_pcd_layout(reader)?;

    if layout.num_points == 0 || layout.num_points > MAX_POINTS {
        return Err(PcdError::MalformedHeader);
    }

    if layout.point_step == 0 || layout.point_step > MAX_POINT_STEP {
        return Err(PcdError::MalformedHeader);
    }

    log::debug!(
        "PCD header: {} points, fields [{}], {:?}",
        layout.num_points,
        layout
            .fields
            .values()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        layout.format
    );

    let buffers = match layout.format {
        PcdDataFormat::Binary => read_binary_points(reader, &layout)?,
        PcdDataFormat::Ascii => read_ascii_points(reader, &layout)?,
    };

    Ok(buffers.into_pointcloud())
}

/// Read a PCD file.
///
/// # Arguments
/// * `path` - Path to a `.pcd` file.
///
/// # Returns
/// A [`PointCloud`] containing:
/// - 3D points (always)
/// - RGB colors (if present)
/// - Normals (if present)
///
/// # Supported formats
/// - XYZ
/// - XYZRGB
/// - XYZ + normals
/// - XYZRGB + normals
pub fn read_pcd<T: Scalar>(path: impl AsRef<Path>) -> Result<PointCloud<T>, PcdError> {
    let Some(file_ext) = path.as_ref().extension() else {
        return Err(PcdError::InvalidFileExtension("".into()));
    };

    if !file_ext.eq_ignore_ascii_case("pcd") {
        return Err(PcdError::InvalidFileExtension(
            file_ext.to_string_lossy().to_string(),
        ));
    }

    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);

    read_pcd_from(&mut reader)
}

//! Record-level access to the vertex element of a PLY file.
//!
//! The header comes from `serde_ply`. Records are kept as the exact bytes found
//! in the body (one text line per record for ASCII files), so tables can be
//! concatenated and written back without reinterpreting any attribute.

use crate::ply::PlyError;
use serde_ply::{ElementDef, PlyFormat, PlyProperty, PlyReader, PropertyType, ScalarType};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

const VERTEX: &str = "vertex";

/// The vertex element of a PLY file as raw records.
#[derive(Debug, Clone)]
pub struct VertexTable {
    format: PlyFormat,
    properties: Vec<PlyProperty>,
    data: Vec<u8>,
    ends: Vec<usize>,
}

impl VertexTable {
    /// Read the vertex element of the PLY file at `path`.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self, PlyError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self, PlyError> {
        let header = PlyReader::from_reader(&mut reader)?.header().clone();

        for element in &header.elem_defs {
            if element.count > 0 && element.properties.is_empty() {
                return Err(PlyError::InvalidHeader(format!(
                    "element '{}' declares {} records but no properties",
                    element.name, element.count
                )));
            }

            if element.name == VERTEX {
                let mut table = Self {
                    format: header.format,
                    properties: element.properties.clone(),
                    data: Vec::new(),
                    ends: Vec::new(),
                };
                // Declared counts are untrusted: storage only grows as records arrive
                for _ in 0..element.count {
                    read_record(&mut reader, header.format, element, &mut table.data)?;
                    table.ends.push(table.data.len());
                }
                debug!("Read {} vertex records", table.len());
                return Ok(table);
            }

            let mut scratch = Vec::new();
            for _ in 0..element.count {
                scratch.clear();
                read_record(&mut reader, header.format, element, &mut scratch)?;
            }
        }

        Err(PlyError::MissingElement(VERTEX.into()))
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let starts = std::iter::once(0).chain(self.ends.iter().copied());
        starts
            .zip(self.ends.iter().copied())
            .map(move |(start, end)| &self.data[start..end])
    }

    fn same_layout(&self, other: &Self) -> bool {
        self.format == other.format
            && self.properties.len() == other.properties.len()
            && self
                .properties
                .iter()
                .zip(&other.properties)
                .all(|(a, b)| a.name == b.name && same_type(&a.property_type, &b.property_type))
    }

    /// Append every record of `other` verbatim.
    ///
    /// An empty table takes the layout of whatever is appended to it, and
    /// appending an empty table is a no-op.
    pub fn append(&mut self, other: &Self) -> Result<(), PlyError> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            self.format = other.format;
            self.properties = other.properties.clone();
        } else if !self.same_layout(other) {
            return Err(PlyError::SchemaMismatch(format!(
                "cannot append {} records with {} properties to a {} table with {} properties",
                other.format,
                other.properties.len(),
                self.format,
                self.properties.len()
            )));
        }
        let offset = self.data.len();
        self.data.extend_from_slice(&other.data);
        self.ends.extend(other.ends.iter().map(|end| end + offset));
        Ok(())
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), PlyError> {
        writeln!(writer, "ply")?;
        writeln!(writer, "format {} 1.0", self.format)?;
        writeln!(writer, "element {} {}", VERTEX, self.len())?;
        for property in &self.properties {
            match &property.property_type {
                PropertyType::Scalar(ty) => {
                    writeln!(writer, "property {} {}", type_name(*ty), property.name)?
                }
                PropertyType::List {
                    count_type,
                    data_type,
                } => writeln!(
                    writer,
                    "property list {} {} {}",
                    type_name(*count_type),
                    type_name(*data_type),
                    property.name
                )?,
            }
        }
        writeln!(writer, "end_header")?;

        match self.format {
            PlyFormat::Ascii => {
                for record in self.records() {
                    writer.write_all(record)?;
                    writer.write_all(b"\n")?;
                }
            }
            _ => writer.write_all(&self.data)?,
        }
        Ok(())
    }

    /// Write the table as a PLY file holding only the vertex element.
    #[tracing::instrument(skip_all, fields(path = %path.display(), records = self.len()))]
    pub fn write(&self, path: &Path) -> Result<(), PlyError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        debug!("Wrote {} vertex records", self.len());
        Ok(())
    }
}

fn same_type(a: &PropertyType, b: &PropertyType) -> bool {
    match (a, b) {
        (PropertyType::Scalar(x), PropertyType::Scalar(y)) => x == y,
        (
            PropertyType::List {
                count_type: c1,
                data_type: d1,
            },
            PropertyType::List {
                count_type: c2,
                data_type: d2,
            },
        ) => c1 == c2 && d1 == d2,
        _ => false,
    }
}

fn type_name(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::I8 => "char",
        ScalarType::U8 => "uchar",
        ScalarType::I16 => "short",
        ScalarType::U16 => "ushort",
        ScalarType::I32 => "int",
        ScalarType::U32 => "uint",
        ScalarType::F32 => "float",
        ScalarType::F64 => "double",
    }
}

fn scalar_size(ty: ScalarType) -> u64 {
    match ty {
        ScalarType::I8 | ScalarType::U8 => 1,
        ScalarType::I16 | ScalarType::U16 => 2,
        ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
        ScalarType::F64 => 8,
    }
}

/// Decode a binary list length. Floats and negative values are not lengths.
fn list_len(bytes: &[u8], ty: ScalarType, format: PlyFormat) -> Option<u64> {
    let mut raw = bytes.to_vec();
    if format == PlyFormat::BinaryBigEndian {
        raw.reverse();
    }
    let mut le = [0u8; 8];
    le.get_mut(..raw.len())?.copy_from_slice(&raw);
    let value = u64::from_le_bytes(le);
    match ty {
        ScalarType::U8 | ScalarType::U16 | ScalarType::U32 => Some(value),
        ScalarType::I8 | ScalarType::I16 | ScalarType::I32 => {
            let negative = raw.last().is_some_and(|b| b & 0x80 != 0);
            (!negative).then_some(value)
        }
        ScalarType::F32 | ScalarType::F64 => None,
    }
}

/// Read one record of `element`, appending its raw bytes to `out`.
fn read_record<R: BufRead>(
    reader: &mut R,
    format: PlyFormat,
    element: &ElementDef,
    out: &mut Vec<u8>,
) -> Result<(), PlyError> {
    let eof = || PlyError::UnexpectedEof(element.name.clone());

    if format == PlyFormat::Ascii {
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Err(eof());
            }
            let trimmed = line.trim_ascii();
            if !trimmed.is_empty() {
                out.extend_from_slice(trimmed);
                return Ok(());
            }
        }
    }

    for property in &element.properties {
        match &property.property_type {
            PropertyType::Scalar(ty) => {
                if !read_bytes(reader, scalar_size(*ty), out)? {
                    return Err(eof());
                }
            }
            PropertyType::List {
                count_type,
                data_type,
            } => {
                let start = out.len();
                if !read_bytes(reader, scalar_size(*count_type), out)? {
                    return Err(eof());
                }
                let len = list_len(&out[start..], *count_type, format)
                    .and_then(|n| n.checked_mul(scalar_size(*data_type)))
                    .ok_or_else(|| {
                        PlyError::InvalidRecord(format!(
                            "invalid list length in '{}'",
                            property.name
                        ))
                    })?;
                if !read_bytes(reader, len, out)? {
                    return Err(eof());
                }
            }
        }
    }
    Ok(())
}

/// Append up to `len` bytes from `reader`, returning whether all of them were
/// there. Memory follows the bytes actually read, not `len`.
fn read_bytes<R: BufRead>(reader: &mut R, mut len: u64, out: &mut Vec<u8>) -> std::io::Result<bool> {
    while len > 0 {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(false);
        }
        let n = available.len().min(usize::try_from(len).unwrap_or(usize::MAX));
        out.extend_from_slice(&available[..n]);
        reader.consume(n);
        len -= n as u64;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_ply::SerializeOptions;
    use std::io::Cursor;

    #[derive(Serialize)]
    struct Row {
        x: f32,
        y: f32,
        z: f32,
        red: u8,
    }

    #[derive(Serialize)]
    struct Rows {
        vertex: Vec<Row>,
    }

    #[derive(Deserialize)]
    struct XRow {
        x: f32,
    }

    #[derive(Deserialize)]
    struct XRows {
        vertex: Vec<XRow>,
    }

    fn xyz_bytes(options: SerializeOptions, xs: &[f32]) -> Vec<u8> {
        let vertex = xs
            .iter()
            .map(|&x| Row {
                x,
                y: 2.0 * x,
                z: -x,
                red: 7,
            })
            .collect();
        serde_ply::to_bytes(&Rows { vertex }, options).unwrap()
    }

    fn body(bytes: &[u8]) -> &[u8] {
        let marker = b"end_header\n";
        let at = bytes
            .windows(marker.len())
            .position(|w| w == marker)
            .unwrap();
        &bytes[at + marker.len()..]
    }

    #[test]
    fn test_binary_records_are_verbatim() {
        let bytes = xyz_bytes(SerializeOptions::binary_le(), &[1.0, -1.5]);
        let table = VertexTable::from_reader(Cursor::new(bytes.clone())).unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.records().all(|r| r.len() == 13));
        assert_eq!(table.data, body(&bytes));

        let mut written = Vec::new();
        table.write_to(&mut written).unwrap();
        assert_eq!(written, bytes);
    }

    #[test]
    fn test_ascii_records_are_lines() {
        let bytes = xyz_bytes(SerializeOptions::ascii(), &[1.0, 2.5]);
        let table = VertexTable::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.records().all(|r| !r.contains(&b'\n')));

        let mut written = Vec::new();
        table.write_to(&mut written).unwrap();
        let rows: XRows = serde_ply::from_bytes(&written).unwrap();
        assert_eq!(rows.vertex[1].x, 2.5);
    }

    #[test]
    fn test_skips_elements_before_vertex() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(
            b"ply\nformat binary_little_endian 1.0\n\
              element camera 1\nproperty list uchar float k\n\
              element vertex 1\nproperty float x\nend_header\n",
        );
        bytes.push(2);
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&2.0f32.to_le_bytes());
        bytes.extend_from_slice(&9.0f32.to_le_bytes());

        let table = VertexTable::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.data, 9.0f32.to_le_bytes());
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut bytes = xyz_bytes(SerializeOptions::binary_le(), &[1.0]);
        bytes.truncate(bytes.len() - 2);

        let err = VertexTable::from_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, PlyError::UnexpectedEof(e) if e == "vertex"));
    }

    #[test]
    fn test_huge_vertex_count_is_an_error() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\n\
                          element vertex 4611686018427387904\nproperty float x\nend_header\n"
            .to_vec();
        bytes.extend_from_slice(&[0u8; 8]);

        let err = VertexTable::from_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, PlyError::UnexpectedEof(e) if e == "vertex"));
    }

    #[test]
    fn test_huge_list_count_is_an_error() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\n\
                          element vertex 1\nproperty list uint double k\nend_header\n"
            .to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());

        let err = VertexTable::from_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, PlyError::UnexpectedEof(_)));
    }

    #[test]
    fn test_negative_list_count_is_an_error() {
        let mut bytes = b"ply\nformat binary_big_endian 1.0\n\
                          element vertex 1\nproperty list int float k\nend_header\n"
            .to_vec();
        bytes.extend_from_slice(&(-1i32).to_be_bytes());

        let err = VertexTable::from_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, PlyError::InvalidRecord(_)));
    }

    #[test]
    fn test_records_without_properties_are_rejected() {
        let text = "ply\nformat binary_little_endian 1.0\nelement vertex 1000000000\nend_header\n";
        let err = VertexTable::from_reader(Cursor::new(text.as_bytes())).unwrap_err();
        assert!(matches!(err, PlyError::InvalidHeader(_)));
    }

    #[test]
    fn test_append_requires_same_layout() {
        let read = |bytes: Vec<u8>| VertexTable::from_reader(Cursor::new(bytes)).unwrap();
        let mut a = read(xyz_bytes(SerializeOptions::binary_le(), &[0.0]));
        let b = read(xyz_bytes(SerializeOptions::binary_le(), &[1.0, 2.0]));

        a.append(&b).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a.records().nth(2), b.records().nth(1));

        let c = read(xyz_bytes(SerializeOptions::ascii(), &[3.0]));
        assert!(matches!(a.append(&c), Err(PlyError::SchemaMismatch(_))));
    }

    #[test]
    fn test_empty_tables_take_any_layout() {
        let read = |bytes: Vec<u8>| VertexTable::from_reader(Cursor::new(bytes)).unwrap();
        let mut empty = read(xyz_bytes(SerializeOptions::ascii(), &[]));
        assert!(empty.is_empty());

        let b = read(xyz_bytes(SerializeOptions::binary_le(), &[1.0]));
        empty.append(&b).unwrap();
        empty.append(&read(xyz_bytes(SerializeOptions::ascii(), &[]))).unwrap();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty.format, PlyFormat::BinaryLittleEndian);
    }

    #[test]
    fn test_missing_vertex_element() {
        let text = "ply\nformat ascii 1.0\nelement face 0\nproperty list uchar int i\nend_header\n";
        let err = VertexTable::from_reader(Cursor::new(text.as_bytes())).unwrap_err();
        assert!(matches!(err, PlyError::MissingElement(_)));
    }
}

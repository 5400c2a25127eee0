//! Mesh file format and vertex layouts.
//!
//! A mesh file is little-endian:
//!
//! ```text
//! i32 vertex_count
//! i32 index_count
//! vertex_count * Vertex   (14 x f32: position, normal, tangent, bitangent, uv)
//! index_count  * u32
//! ```

use std::fmt;

use bytemuck::{Pod, Zeroable};

pub type Index = u32;

const HEADER_SIZE: usize = 8;
const FLOATS_PER_VERTEX: usize = 14;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const SIZE: usize = std::mem::size_of::<Vertex>();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    Truncated { expected: usize, actual: usize },
    NegativeCount { field: &'static str, value: i32 },
    IndexOutOfRange { position: usize, index: Index, vertex_count: usize },
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::Truncated { expected, actual } => {
                write!(f, "mesh data truncated: expected {expected} bytes, got {actual}")
            }
            MeshError::NegativeCount { field, value } => {
                write!(f, "mesh header has negative {field} ({value})")
            }
            MeshError::IndexOutOfRange { position, index, vertex_count } => write!(
                f,
                "index {position} refers to vertex {index} but the mesh has {vertex_count} vertices"
            ),
        }
    }
}

impl std::error::Error for MeshError {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
}

impl MeshData {
    pub fn decode(bytes: &[u8]) -> Result<Self, MeshError> {
        if bytes.len() < HEADER_SIZE {
            return Err(MeshError::Truncated { expected: HEADER_SIZE, actual: bytes.len() });
        }

        let vertex_count = read_count(&bytes[0..4], "vertex count")?;
        let index_count = read_count(&bytes[4..8], "index count")?;

        let vertex_bytes = vertex_count.checked_mul(Vertex::SIZE);
        let index_bytes = index_count.checked_mul(std::mem::size_of::<Index>());
        let expected = vertex_bytes
            .zip(index_bytes)
            .and_then(|(v, i)| HEADER_SIZE.checked_add(v)?.checked_add(i))
            .unwrap_or(usize::MAX);
        if bytes.len() < expected {
            return Err(MeshError::Truncated { expected, actual: bytes.len() });
        }

        let vertex_end = HEADER_SIZE + vertex_count * Vertex::SIZE;
        let floats: Vec<f32> = bytes[HEADER_SIZE..vertex_end]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let vertices = floats
            .chunks_exact(FLOATS_PER_VERTEX)
            .map(|f| Vertex {
                position: [f[0], f[1], f[2]],
                normal: [f[3], f[4], f[5]],
                tangent: [f[6], f[7], f[8]],
                bitangent: [f[9], f[10], f[11]],
                uv: [f[12], f[13]],
            })
            .collect();

        let indices: Vec<Index> = bytes[vertex_end..expected]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        if bytes.len() > expected {
            log::debug!("mesh data has {} trailing bytes", bytes.len() - expected);
        }

        if let Some((position, &index)) = indices
            .iter()
            .enumerate()
            .find(|&(_, &i)| i as usize >= vertex_count)
        {
            return Err(MeshError::IndexOutOfRange { position, index, vertex_count });
        }

        Ok(Self { vertices, indices })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_SIZE + self.vertices.len() * Vertex::SIZE + self.indices.len() * 4,
        );
        out.extend_from_slice(&(self.vertices.len() as i32).to_le_bytes());
        out.extend_from_slice(&(self.indices.len() as i32).to_le_bytes());
        for v in &self.vertices {
            for f in v.position.iter().chain(&v.normal).chain(&v.tangent).chain(&v.bitangent).chain(&v.uv) {
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        for i in &self.indices {
            out.extend_from_slice(&i.to_le_bytes());
        }
        out
    }
}

fn read_count(bytes: &[u8], field: &'static str) -> Result<usize, MeshError> {
    let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    usize::try_from(value).map_err(|_| MeshError::NegativeCount { field, value })
}

/// Interleaved vertex buffer layout, keyed by shader location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexLayout {
    /// Layout of [`Vertex`]: position, normal, tangent, bitangent, uv at locations 0..=4.
    pub fn mesh() -> Self {
        Self {
            stride: Vertex::SIZE as u64,
            attributes: wgpu::vertex_attr_array![
                0 => Float32x3,
                1 => Float32x3,
                2 => Float32x3,
                3 => Float32x3,
                4 => Float32x2
            ]
            .to_vec(),
        }
    }

    /// Five floats per vertex: position at 0, uv at 1.
    pub fn pos_uv() -> Self {
        Self {
            stride: 5 * 4,
            attributes: wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2].to_vec(),
        }
    }

    pub fn attribute(&self, location: u32) -> Option<&wgpu::VertexAttribute> {
        self.attributes.iter().find(|a| a.shader_location == location)
    }

    pub fn buffer_layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> MeshData {
        let v = |x: f32, y: f32| Vertex {
            position: [x, y, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [x, y],
            ..Default::default()
        };
        MeshData {
            vertices: vec![v(0.0, 0.0), v(1.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    #[test]
    fn vertex_is_56_bytes() {
        assert_eq!(Vertex::SIZE, 56);
        assert_eq!(VertexLayout::mesh().stride, 56);
    }

    #[test]
    fn decode_reads_encoded_file() {
        let mesh = quad();
        let bytes = mesh.encode();
        assert_eq!(bytes.len(), 8 + 4 * 56 + 6 * 4);
        assert_eq!(&bytes[0..4], &4i32.to_le_bytes());
        assert_eq!(MeshData::decode(&bytes).unwrap(), mesh);
    }

    #[test]
    fn decode_rejects_short_header() {
        assert_eq!(
            MeshData::decode(&[1, 0, 0]),
            Err(MeshError::Truncated { expected: 8, actual: 3 })
        );
    }

    #[test]
    fn decode_rejects_truncated_body() {
        let bytes = quad().encode();
        let err = MeshData::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, MeshError::Truncated { .. }));
    }

    #[test]
    fn decode_rejects_negative_counts() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&(-3i32).to_le_bytes());
        assert_eq!(
            MeshData::decode(&bytes),
            Err(MeshError::NegativeCount { field: "index count", value: -3 })
        );
    }

    #[test]
    fn decode_rejects_out_of_range_index() {
        let mut mesh = quad();
        mesh.indices[4] = 9;
        let err = MeshData::decode(&mesh.encode()).unwrap_err();
        assert_eq!(err, MeshError::IndexOutOfRange { position: 4, index: 9, vertex_count: 4 });
    }

    #[test]
    fn pos_uv_layout() {
        let layout = VertexLayout::pos_uv();
        assert_eq!(layout.stride, 20);
        let uv = layout.attribute(1).unwrap();
        assert_eq!(uv.offset, 12);
        assert_eq!(uv.format, wgpu::VertexFormat::Float32x2);
        assert!(layout.attribute(2).is_none());
    }
}

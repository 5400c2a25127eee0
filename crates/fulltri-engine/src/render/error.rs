use std::fmt;

use super::reflect::{ReflectError, UniformElem, UniformType};
use super::renderer::{MeshId, ShaderId, TextureId};

/// Misuse of the renderer's handle tables and uniform setters.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererError {
    /// WGSL rejected by the compiler front end or validator.
    Compile { label: String, message: String },
    /// Declarations that break the binding conventions.
    Reflect { label: String, error: ReflectError },
    UnknownShader(ShaderId),
    UnknownTexture(TextureId),
    UnknownMesh(MeshId),
    NoShaderBound,
    UnknownUniform { shader: ShaderId, name: String },
    UniformTypeMismatch { name: String, declared: UniformType, requested: UniformElem },
    UniformCountMismatch { name: String, declared: u32, requested: usize },
    SamplerUnitMismatch { name: String, unit: u32, requested: i32 },
    MissingTexture { unit: u32 },
    InvalidTextureSize { width: u32, height: u32, max: u32 },
    VertexLayoutMismatch { name: String, location: u32, expected: wgpu::VertexFormat },
    InvalidVertexData { len: usize, stride: u64 },
}

impl fmt::Display for RendererError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererError::Compile { label, message } => {
                write!(f, "shader `{label}` failed to compile:\n{message}")
            }
            RendererError::Reflect { label, error } => write!(f, "shader `{label}`: {error}"),
            RendererError::UnknownShader(id) => write!(f, "unknown shader {id}"),
            RendererError::UnknownTexture(id) => write!(f, "unknown texture {id}"),
            RendererError::UnknownMesh(id) => write!(f, "unknown mesh {id}"),
            RendererError::NoShaderBound => f.write_str("no shader is bound"),
            RendererError::UnknownUniform { shader, name } => {
                write!(f, "shader {shader} has no uniform `{name}`")
            }
            RendererError::UniformTypeMismatch { name, declared, requested } => {
                write!(f, "uniform `{name}` is {declared}, not {requested}")
            }
            RendererError::UniformCountMismatch { name, declared, requested } => write!(
                f,
                "uniform `{name}` holds {declared} element(s), got {requested}"
            ),
            RendererError::SamplerUnitMismatch { name, unit, requested } => write!(
                f,
                "texture `{name}` is declared on unit {unit}, cannot move it to unit {requested}"
            ),
            RendererError::InvalidTextureSize { width, height, max } => write!(
                f,
                "texture size {width}x{height} is empty or exceeds the device limit {max}"
            ),
            RendererError::MissingTexture { unit } => {
                write!(f, "the shader samples texture unit {unit} but nothing is bound to it")
            }
            RendererError::VertexLayoutMismatch { name, location, expected } => write!(
                f,
                "mesh layout has no {expected:?} attribute at location {location} for `{name}`"
            ),
            RendererError::InvalidVertexData { len, stride } => write!(
                f,
                "{len} bytes of vertex data is not a non-empty multiple of the {stride}-byte stride"
            ),
        }
    }
}

impl std::error::Error for RendererError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RendererError::Reflect { error, .. } => Some(error),
            _ => None,
        }
    }
}

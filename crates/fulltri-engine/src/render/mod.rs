//! GPU rendering subsystem.
//!
//! `Renderer` owns handle tables of shaders, textures and meshes and draws
//! them into caller-provided render passes. The other modules are the CPU-side
//! pieces it builds on: WGSL declaration scanning, the mesh file format, image
//! decoding, pixel readback and the CPU precision gradient.

mod error;
pub mod gradient;
pub mod mesh;
pub mod readback;
pub mod reflect;
mod renderer;
mod target;
pub mod texture;

pub use error::RendererError;
pub use mesh::{Index, MeshData, MeshError, Vertex, VertexLayout};
pub use reflect::{ReflectError, ShaderReflection, ShaderStage, UniformElem, UniformType};
pub use renderer::{MeshId, Renderer, ShaderId, TextureId};
pub use target::{color_pass, RenderTarget};
pub use texture::{PixelFormat, PixelType, TextureData};

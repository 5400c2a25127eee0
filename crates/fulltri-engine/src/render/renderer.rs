use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::path::Path;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;

use super::error::RendererError;
use super::mesh::{MeshData, VertexLayout};
use super::readback;
use super::reflect::{self, AttributeDecl, ResourceBinding, ResourceKind, ShaderReflection, UniformElem, UniformType};
use super::reflect::{TEXTURE_GROUP, UNIFORM_GROUP};
use super::texture::{PixelFormat, PixelType, TextureData};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name(u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($kind, " #{}"), self.0)
            }
        }
    };
}

handle!(
    /// Handle to a vertex + fragment shader pair.
    ShaderId,
    "shader"
);
handle!(
    /// Handle to a sampled texture or render target.
    TextureId,
    "texture"
);
handle!(
    /// Handle to an uploaded vertex (and optional index) buffer.
    MeshId,
    "mesh"
);

struct Shader {
    label: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    reflection: ShaderReflection,
    /// One buffer per entry of `reflection.uniforms`, same order.
    uniform_buffers: Vec<wgpu::Buffer>,
    uniform_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

struct Texture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

/// How a mesh is drawn.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum DrawCall {
    /// Indexed triangle list. Mesh files are always drawn this way.
    Indexed { count: u32 },
    /// Non-indexed triangle list over the whole vertex buffer.
    Vertices { count: u32 },
}

impl DrawCall {
    fn for_mesh(data: &MeshData) -> Self {
        DrawCall::Indexed { count: data.indices.len() as u32 }
    }

    fn is_empty(self) -> bool {
        match self {
            DrawCall::Indexed { count } | DrawCall::Vertices { count } => count == 0,
        }
    }
}

struct Mesh {
    vertex_buffer: wgpu::Buffer,
    /// Present whenever `draw` is a non-empty indexed call.
    index_buffer: Option<wgpu::Buffer>,
    draw: DrawCall,
    layout: VertexLayout,
}

type PipelineKey = (ShaderId, VertexLayout, wgpu::TextureFormat);

/// Handle tables for shaders, textures and meshes plus the "current shader"
/// state the uniform setters write to.
///
/// Handles are indices into add-only tables; they stay valid for the
/// renderer's lifetime. Each shader owns one uniform buffer per declared
/// uniform. Uniform writes go through `Queue::write_buffer`, so every draw in
/// a submission sees the last value written before that submission.
pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,

    shaders: Vec<Shader>,
    textures: Vec<Texture>,
    meshes: Vec<Mesh>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    current_shader: Option<ShaderId>,
    texture_units: Vec<Option<TextureId>>,
}

impl Renderer {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            shaders: Vec::new(),
            textures: Vec::new(),
            meshes: Vec::new(),
            pipelines: HashMap::new(),
            current_shader: None,
            texture_units: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    // ── shaders ───────────────────────────────────────────────────────────

    /// Loads a WGSL vertex stage and fragment stage from disk.
    pub fn add_shader(&mut self, vs_path: impl AsRef<Path>, fs_path: impl AsRef<Path>) -> Result<ShaderId> {
        let (vs_path, fs_path) = (vs_path.as_ref(), fs_path.as_ref());
        log::info!("uploading shader {} + {}", vs_path.display(), fs_path.display());
        let vs = std::fs::read_to_string(vs_path)
            .with_context(|| format!("failed to read {}", vs_path.display()))?;
        let fs = std::fs::read_to_string(fs_path)
            .with_context(|| format!("failed to read {}", fs_path.display()))?;

        let label = format!("{} + {}", file_name(vs_path), file_name(fs_path));
        Ok(self.add_shader_from_source(&label, &vs, &fs)?)
    }

    pub fn add_shader_from_source(&mut self, label: &str, vs: &str, fs: &str) -> Result<ShaderId, RendererError> {
        let vs_module = validate_wgsl(&format!("{label} (vertex)"), vs)?;
        let fs_module = validate_wgsl(&format!("{label} (fragment)"), fs)?;

        let reflection = reflect::reflect_modules(vs, &vs_module, fs, &fs_module).map_err(|error| RendererError::Reflect {
            label: label.to_string(),
            error,
        })?;

        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} vs")),
            source: wgpu::ShaderSource::Wgsl(vs.into()),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} fs")),
            source: wgpu::ShaderSource::Wgsl(fs.into()),
        });

        let mut uniform_buffers = Vec::with_capacity(reflection.uniforms.len());
        let mut uniform_entries = Vec::with_capacity(reflection.uniforms.len());
        for u in &reflection.uniforms {
            let size = u.decl.ty.byte_size();
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{label} uniform {}", u.decl.name)),
                size: size.next_multiple_of(16),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            uniform_entries.push(wgpu::BindGroupLayoutEntry {
                binding: u.decl.binding,
                visibility: u.visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(size),
                },
                count: None,
            });
            log::debug!(
                "shader `{label}`: uniform `{}`: {} @binding({})",
                u.decl.name,
                u.decl.ty,
                u.decl.binding
            );
            uniform_buffers.push(buffer);
        }

        let uniform_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label} uniform bgl")),
            entries: &uniform_entries,
        });
        let uniform_bindings: Vec<_> = reflection
            .uniforms
            .iter()
            .zip(&uniform_buffers)
            .map(|(u, buffer)| wgpu::BindGroupEntry {
                binding: u.decl.binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} uniform bind group")),
            layout: &uniform_layout,
            entries: &uniform_bindings,
        });

        let texture_entries: Vec<_> = reflection
            .resources
            .iter()
            .map(|r| wgpu::BindGroupLayoutEntry {
                binding: r.decl.binding,
                visibility: r.visibility,
                ty: match r.decl.kind {
                    ResourceKind::Texture => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    ResourceKind::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                },
                count: None,
            })
            .collect();
        let texture_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label} texture bgl")),
            entries: &texture_entries,
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label} pipeline layout")),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            immediate_size: 0,
        });

        log::info!(
            "shader `{label}`: {} uniform(s), texture units {:?}, {} vertex attribute(s)",
            reflection.uniforms.len(),
            reflection.texture_units(),
            reflection.attributes.len()
        );
        for a in &reflection.attributes {
            log::debug!("shader `{label}`: attribute `{}` @location({}) {:?}", a.name, a.location, a.format);
        }

        let id = ShaderId::from_index(self.shaders.len());
        self.shaders.push(Shader {
            label: label.to_string(),
            vertex,
            fragment,
            reflection,
            uniform_buffers,
            uniform_group,
            texture_layout,
            pipeline_layout,
        });
        Ok(id)
    }

    /// Makes `id` the target of subsequent uniform writes and draws.
    pub fn set_shader(&mut self, id: ShaderId) -> Result<(), RendererError> {
        self.current_shader = Some(bound_shader(Some(id), self.shaders.len())?);
        Ok(())
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn current_shader(&self) -> Option<ShaderId> {
        self.current_shader
    }

    pub fn reflection(&self, id: ShaderId) -> Result<&ShaderReflection, RendererError> {
        self.shaders
            .get(id.index())
            .map(|s| &s.reflection)
            .ok_or(RendererError::UnknownShader(id))
    }

    // ── uniforms ──────────────────────────────────────────────────────────

    /// Writes an integer uniform.
    ///
    /// A texture name is also accepted: textures sit on fixed units, so the
    /// call only checks that `value` names the unit the texture is declared on.
    pub fn set_uniform_1i(&mut self, name: &str, value: i32) -> Result<(), RendererError> {
        let shader_id = bound_shader(self.current_shader, self.shaders.len())?;
        if check_sampler_unit(&self.shaders[shader_id.index()].reflection, name, value)? {
            return Ok(());
        }
        self.write_uniform(name, UniformElem::I32, bytemuck::bytes_of(&value))
    }

    pub fn set_uniform_1f(&mut self, name: &str, value: f32) -> Result<(), RendererError> {
        self.write_uniform(name, UniformElem::F32, bytemuck::bytes_of(&value))
    }

    pub fn set_uniform_2fv(&mut self, name: &str, values: &[[f32; 2]]) -> Result<(), RendererError> {
        self.write_uniform(name, UniformElem::Vec2, bytemuck::cast_slice(values))
    }

    pub fn set_uniform_3fv(&mut self, name: &str, values: &[[f32; 3]]) -> Result<(), RendererError> {
        self.write_uniform(name, UniformElem::Vec3, bytemuck::cast_slice(values))
    }

    pub fn set_uniform_4fv(&mut self, name: &str, values: &[[f32; 4]]) -> Result<(), RendererError> {
        self.write_uniform(name, UniformElem::Vec4, bytemuck::cast_slice(values))
    }

    /// Writes column-major 4x4 matrices.
    pub fn set_uniform_4x4fv(&mut self, name: &str, values: &[[f32; 16]]) -> Result<(), RendererError> {
        self.write_uniform(name, UniformElem::Mat4, bytemuck::cast_slice(values))
    }

    fn write_uniform(&self, name: &str, requested: UniformElem, values: &[u8]) -> Result<(), RendererError> {
        let shader_id = bound_shader(self.current_shader, self.shaders.len())?;
        let shader = &self.shaders[shader_id.index()];
        let (index, declared) = find_uniform(&shader.reflection, shader_id, name)?;
        check_uniform(name, declared, requested, values.len())?;

        let bytes = pack_elements(values, requested.size() as usize, declared.stride() as usize);
        self.queue.write_buffer(&shader.uniform_buffers[index], 0, &bytes);
        Ok(())
    }

    // ── textures ──────────────────────────────────────────────────────────

    /// Binds `id` to texture unit `unit` for subsequent draws.
    pub fn set_texture(&mut self, unit: u32, id: TextureId) -> Result<(), RendererError> {
        assign_unit(&mut self.texture_units, unit, id, self.textures.len())
    }

    /// Loads an image file as a sampled texture.
    pub fn add_texture(
        &mut self,
        path: impl AsRef<Path>,
        internal: PixelFormat,
        input: PixelFormat,
        ty: PixelType,
        filter: wgpu::FilterMode,
    ) -> Result<TextureId> {
        let path = path.as_ref();
        log::info!("uploading texture {}", path.display());
        let data = TextureData::load(path, internal, input, ty)?;
        let id = self
            .add_texture_from_data(&data, filter)
            .with_context(|| format!("failed to create texture from {}", path.display()))?;
        log::debug!("texture {id}: {}x{} {:?}", data.width, data.height, data.format);
        Ok(id)
    }

    pub fn add_texture_from_data(&mut self, data: &TextureData, filter: wgpu::FilterMode) -> Result<TextureId, RendererError> {
        self.check_texture_size(data.width, data.height)?;

        let size = wgpu::Extent3d {
            width: data.width,
            height: data.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fulltri texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: data.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data.bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(data.bytes_per_row()),
                rows_per_image: Some(data.height),
            },
            size,
        );

        Ok(self.push_texture(texture, filter))
    }

    /// Creates a texture that can be rendered to and sampled afterwards.
    pub fn add_render_target(&mut self, width: u32, height: u32, format: wgpu::TextureFormat) -> Result<TextureId, RendererError> {
        self.check_texture_size(width, height)?;

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fulltri render target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let id = self.push_texture(texture, wgpu::FilterMode::Nearest);
        log::debug!("render target {id}: {width}x{height} {format:?}");
        Ok(id)
    }

    pub fn texture(&self, id: TextureId) -> Result<&wgpu::Texture, RendererError> {
        self.textures
            .get(id.index())
            .map(|t| &t.texture)
            .ok_or(RendererError::UnknownTexture(id))
    }

    pub fn texture_view(&self, id: TextureId) -> Result<&wgpu::TextureView, RendererError> {
        self.textures
            .get(id.index())
            .map(|t| &t.view)
            .ok_or(RendererError::UnknownTexture(id))
    }

    pub fn texture_size(&self, id: TextureId) -> Result<(u32, u32), RendererError> {
        self.texture(id).map(|t| (t.width(), t.height()))
    }

    /// Reads a texture back to the CPU. Blocks until the GPU is idle.
    pub fn capture(&self, id: TextureId) -> Result<image::RgbImage> {
        let texture = self.texture(id)?;
        readback::capture(&self.device, &self.queue, texture)
    }

    fn check_texture_size(&self, width: u32, height: u32) -> Result<(), RendererError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RendererError::InvalidTextureSize { width, height, max });
        }
        Ok(())
    }

    fn push_texture(&mut self, texture: wgpu::Texture, filter: wgpu::FilterMode) -> TextureId {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fulltri sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });
        let id = TextureId::from_index(self.textures.len());
        self.textures.push(Texture { texture, view, sampler });
        id
    }

    // ── meshes ────────────────────────────────────────────────────────────

    /// Loads a mesh file (see [`MeshData::decode`]).
    pub fn add_mesh(&mut self, path: impl AsRef<Path>) -> Result<MeshId> {
        let path = path.as_ref();
        log::info!("uploading mesh {}", path.display());
        let bytes = std::fs::read(path).with_context(|| format!("failed to read mesh {}", path.display()))?;
        let data = MeshData::decode(&bytes).with_context(|| format!("failed to decode mesh {}", path.display()))?;
        let id = self.add_mesh_data(&data);
        log::info!("mesh {id}: {} vertices, {} indices", data.vertices.len(), data.indices.len());
        Ok(id)
    }

    pub fn add_mesh_data(&mut self, data: &MeshData) -> MeshId {
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fulltri mesh vbo"),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let draw = DrawCall::for_mesh(data);
        let index_buffer = (!draw.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("fulltri mesh ibo"),
                contents: bytemuck::cast_slice(&data.indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });

        self.push_mesh(Mesh {
            vertex_buffer,
            index_buffer,
            draw,
            layout: VertexLayout::mesh(),
        })
    }

    /// Uploads raw interleaved vertices described by `layout`, drawn without indices.
    pub fn add_mesh_from_vertices(&mut self, bytes: &[u8], layout: VertexLayout) -> Result<MeshId, RendererError> {
        let count = vertex_count(bytes.len(), layout.stride)?;

        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fulltri vertex buffer"),
            contents: bytes,
            usage: wgpu::BufferUsages::VERTEX,
        });

        Ok(self.push_mesh(Mesh {
            vertex_buffer,
            index_buffer: None,
            draw: DrawCall::Vertices { count },
            layout,
        }))
    }

    fn push_mesh(&mut self, mesh: Mesh) -> MeshId {
        let id = MeshId::from_index(self.meshes.len());
        self.meshes.push(mesh);
        id
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Draws a mesh with the current shader, uniforms and texture units into
    /// `pass`, whose color attachment has `format`.
    pub fn draw_mesh(&mut self, pass: &mut wgpu::RenderPass<'_>, format: wgpu::TextureFormat, id: MeshId) -> Result<(), RendererError> {
        let shader_id = bound_shader(self.current_shader, self.shaders.len())?;
        let Self {
            device,
            shaders,
            textures,
            meshes,
            pipelines,
            texture_units,
            ..
        } = self;

        let shader = &shaders[shader_id.index()];
        let mesh = meshes.get(id.index()).ok_or(RendererError::UnknownMesh(id))?;

        check_layout(&shader.reflection.attributes, &mesh.layout)?;
        let bound = bound_textures(&shader.reflection.resources, texture_units)?;

        let entries: Vec<_> = shader
            .reflection
            .resources
            .iter()
            .zip(&bound)
            .map(|(r, id)| {
                let texture = &textures[id.index()];
                wgpu::BindGroupEntry {
                    binding: r.decl.binding,
                    resource: match r.decl.kind {
                        ResourceKind::Texture => wgpu::BindingResource::TextureView(&texture.view),
                        ResourceKind::Sampler => wgpu::BindingResource::Sampler(&texture.sampler),
                    },
                }
            })
            .collect();
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fulltri texture bind group"),
            layout: &shader.texture_layout,
            entries: &entries,
        });

        let pipeline = pipelines
            .entry((shader_id, mesh.layout.clone(), format))
            .or_insert_with(|| build_pipeline(device, shader, &mesh.layout, format));

        if mesh.draw.is_empty() {
            return Ok(());
        }

        pass.set_pipeline(pipeline);
        pass.set_bind_group(UNIFORM_GROUP, &shader.uniform_group, &[]);
        pass.set_bind_group(TEXTURE_GROUP, &texture_group, &[]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        match (mesh.draw, &mesh.index_buffer) {
            (DrawCall::Indexed { count }, Some(ibo)) => {
                pass.set_index_buffer(ibo.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..count, 0, 0..1);
            }
            (DrawCall::Indexed { .. }, None) => {}
            (DrawCall::Vertices { count }, _) => pass.draw(0..count, 0..1),
        }
        Ok(())
    }

    /// Creates an encoder for work outside the window frame.
    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    shader: &Shader,
    layout: &VertexLayout,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    log::debug!("shader `{}`: building pipeline for {format:?}", shader.label);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{} pipeline", shader.label)),
        layout: Some(&shader.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader.vertex,
            entry_point: Some(shader.reflection.vertex_entry.as_str()),
            compilation_options: Default::default(),
            buffers: &[layout.buffer_layout()],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader.fragment,
            entry_point: Some(shader.reflection.fragment_entry.as_str()),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

/// Checks WGSL with naga so errors come back as values with source context.
fn validate_wgsl(label: &str, source: &str) -> Result<naga::Module, RendererError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| RendererError::Compile {
        label: label.to_string(),
        message: e.emit_to_string(source),
    })?;

    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| RendererError::Compile {
            label: label.to_string(),
            message: e.emit_to_string(source),
        })?;
    Ok(module)
}

/// The bound shader, if it is a valid handle.
fn bound_shader(current: Option<ShaderId>, shader_count: usize) -> Result<ShaderId, RendererError> {
    let id = current.ok_or(RendererError::NoShaderBound)?;
    if id.index() >= shader_count {
        return Err(RendererError::UnknownShader(id));
    }
    Ok(id)
}

/// Position of `name` among the shader's uniforms, and its declared type.
fn find_uniform(
    reflection: &ShaderReflection,
    shader: ShaderId,
    name: &str,
) -> Result<(usize, UniformType), RendererError> {
    reflection
        .uniforms
        .iter()
        .position(|u| u.decl.name == name)
        .map(|i| (i, reflection.uniforms[i].decl.ty))
        .ok_or_else(|| RendererError::UnknownUniform { shader, name: name.to_string() })
}

/// Checks a write of `len` bytes of `requested` elements to a uniform declared
/// as `declared`. A signed write to a `u32` uniform is accepted; shorter
/// writes update a prefix of an array.
fn check_uniform(
    name: &str,
    declared: UniformType,
    requested: UniformElem,
    len: usize,
) -> Result<(), RendererError> {
    let elem_ok = declared.elem == requested
        || (declared.elem == UniformElem::U32 && requested == UniformElem::I32);
    if !elem_ok {
        return Err(RendererError::UniformTypeMismatch {
            name: name.to_string(),
            declared,
            requested,
        });
    }

    let count = len / requested.size() as usize;
    if count == 0 || count > declared.count() as usize {
        return Err(RendererError::UniformCountMismatch {
            name: name.to_string(),
            declared: declared.count(),
            requested: count,
        });
    }
    Ok(())
}

/// `Ok(true)` when `name` is a texture declared on unit `value`, `Ok(false)`
/// when it is not a texture at all.
fn check_sampler_unit(reflection: &ShaderReflection, name: &str, value: i32) -> Result<bool, RendererError> {
    let Some(texture) = reflection
        .resources
        .iter()
        .find(|r| r.decl.kind == ResourceKind::Texture && r.decl.name == name)
    else {
        return Ok(false);
    };
    let unit = texture.decl.unit();
    if i64::from(value) != i64::from(unit) {
        return Err(RendererError::SamplerUnitMismatch {
            name: name.to_string(),
            unit,
            requested: value,
        });
    }
    Ok(true)
}

fn assign_unit(
    units: &mut Vec<Option<TextureId>>,
    unit: u32,
    id: TextureId,
    texture_count: usize,
) -> Result<(), RendererError> {
    if id.index() >= texture_count {
        return Err(RendererError::UnknownTexture(id));
    }
    let unit = unit as usize;
    if units.len() <= unit {
        units.resize(unit + 1, None);
    }
    units[unit] = Some(id);
    Ok(())
}

/// The texture bound for each resource, in order.
fn bound_textures(
    resources: &[ResourceBinding],
    units: &[Option<TextureId>],
) -> Result<Vec<TextureId>, RendererError> {
    resources
        .iter()
        .map(|r| {
            let unit = r.decl.unit();
            units
                .get(unit as usize)
                .copied()
                .flatten()
                .ok_or(RendererError::MissingTexture { unit })
        })
        .collect()
}

/// Every attribute the vertex stage reads must exist in `layout` with the same format.
fn check_layout(attributes: &[AttributeDecl], layout: &VertexLayout) -> Result<(), RendererError> {
    for attr in attributes {
        let matches = layout
            .attribute(attr.location)
            .is_some_and(|a| a.format == attr.format);
        if !matches {
            return Err(RendererError::VertexLayoutMismatch {
                name: attr.name.clone(),
                location: attr.location,
                expected: attr.format,
            });
        }
    }
    Ok(())
}

/// Vertices in `len` bytes of interleaved data.
fn vertex_count(len: usize, stride: u64) -> Result<u32, RendererError> {
    if len == 0 || stride == 0 || len as u64 % stride != 0 {
        return Err(RendererError::InvalidVertexData { len, stride });
    }
    Ok((len as u64 / stride) as u32)
}

/// Spreads `elem_size`-byte elements out to `stride` bytes apart.
fn pack_elements(values: &[u8], elem_size: usize, stride: usize) -> Vec<u8> {
    if elem_size == stride {
        return values.to_vec();
    }
    let count = values.len() / elem_size;
    let mut out = vec![0u8; stride * count];
    for (i, elem) in values.chunks_exact(elem_size).enumerate() {
        out[i * stride..i * stride + elem_size].copy_from_slice(elem);
    }
    out
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mesh::Vertex;

    #[test]
    fn handles_display_kind_and_index() {
        assert_eq!(ShaderId(2).to_string(), "shader #2");
        assert_eq!(TextureId::from_index(0).to_string(), "texture #0");
        assert_eq!(MeshId(7).index(), 7);
    }

    #[test]
    fn vec3_array_elements_are_padded() {
        let values: Vec<u8> = (1..=24).collect();
        let packed = pack_elements(&values, 12, 16);
        assert_eq!(packed.len(), 32);
        assert_eq!(&packed[..12], &values[..12]);
        assert_eq!(&packed[12..16], &[0, 0, 0, 0]);
        assert_eq!(&packed[16..28], &values[12..]);
    }

    #[test]
    fn tight_elements_are_copied() {
        let values = [1u8, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(pack_elements(&values, 8, 8), values.to_vec());
    }

    #[test]
    fn wgsl_syntax_errors_are_reported() {
        let err = validate_wgsl("broken", "@fragment fn f( -> {").unwrap_err();
        let RendererError::Compile { label, message } = err else {
            panic!("expected compile error, got {err:?}");
        };
        assert_eq!(label, "broken");
        assert!(!message.is_empty());
    }

    #[test]
    fn wgsl_type_errors_are_reported() {
        let src = "@fragment fn f() -> @location(0) vec4<f32> { return 1u; }";
        assert!(matches!(validate_wgsl("bad return", src), Err(RendererError::Compile { .. })));
    }

    #[test]
    fn valid_wgsl_passes() {
        let src = "@fragment fn f() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }";
        assert!(validate_wgsl("ok", src).is_ok());
    }

    #[test]
    fn file_name_prefers_final_component() {
        assert_eq!(file_name(Path::new("assets/fulltri.vert.wgsl")), "fulltri.vert.wgsl");
    }

    const VS: &str = "@group(0) @binding(0) var<uniform> scale: f32;\n@vertex fn v(@location(0) p: vec3f, @location(4) uv: vec2f) -> @builtin(position) vec4f { return vec4f(p * scale, uv.x); }";
    const FS: &str = r#"
        @group(0) @binding(1) var<uniform> lights: array<vec3f, 4>;
        @group(0) @binding(2) var<uniform> frame: u32;
        @group(1) @binding(2) var tex: texture_2d<f32>;
        @group(1) @binding(3) var tex_sampler: sampler;
        @fragment fn f() -> @location(0) vec4f { return textureSample(tex, tex_sampler, vec2f(0.0)); }
    "#;

    fn pair() -> ShaderReflection {
        reflect::reflect(VS, FS).unwrap()
    }

    #[test]
    fn no_bound_shader_is_reported() {
        assert_eq!(bound_shader(None, 3), Err(RendererError::NoShaderBound));
        assert_eq!(bound_shader(Some(ShaderId(1)), 3), Ok(ShaderId(1)));
    }

    #[test]
    fn out_of_range_shader_is_unknown() {
        assert_eq!(bound_shader(Some(ShaderId(3)), 3), Err(RendererError::UnknownShader(ShaderId(3))));
    }

    #[test]
    fn uniforms_are_found_by_name() {
        let r = pair();
        let (index, ty) = find_uniform(&r, ShaderId(0), "lights").unwrap();
        assert_eq!(r.uniforms[index].decl.name, "lights");
        assert_eq!(ty, UniformType::array(UniformElem::Vec3, 4));

        assert_eq!(
            find_uniform(&r, ShaderId(5), "ghost"),
            Err(RendererError::UnknownUniform { shader: ShaderId(5), name: "ghost".into() })
        );
    }

    #[test]
    fn uniform_element_type_must_match() {
        let err = check_uniform("scale", UniformType::scalar(UniformElem::F32), UniformElem::I32, 4).unwrap_err();
        assert_eq!(
            err,
            RendererError::UniformTypeMismatch {
                name: "scale".into(),
                declared: UniformType::scalar(UniformElem::F32),
                requested: UniformElem::I32,
            }
        );
        assert!(check_uniform("v", UniformType::scalar(UniformElem::Vec4), UniformElem::Vec3, 12).is_err());
    }

    #[test]
    fn signed_writes_to_unsigned_uniforms_are_accepted() {
        assert_eq!(check_uniform("frame", UniformType::scalar(UniformElem::U32), UniformElem::I32, 4), Ok(()));
        assert!(check_uniform("n", UniformType::scalar(UniformElem::I32), UniformElem::U32, 4).is_err());
    }

    #[test]
    fn uniform_count_must_fit_the_declaration() {
        let lights = UniformType::array(UniformElem::Vec3, 4);
        assert_eq!(check_uniform("lights", lights, UniformElem::Vec3, 2 * 12), Ok(()));
        assert_eq!(check_uniform("lights", lights, UniformElem::Vec3, 4 * 12), Ok(()));
        assert_eq!(
            check_uniform("lights", lights, UniformElem::Vec3, 5 * 12),
            Err(RendererError::UniformCountMismatch { name: "lights".into(), declared: 4, requested: 5 })
        );
        assert_eq!(
            check_uniform("lights", lights, UniformElem::Vec3, 0),
            Err(RendererError::UniformCountMismatch { name: "lights".into(), declared: 4, requested: 0 })
        );
    }

    #[test]
    fn texture_names_only_accept_their_own_unit() {
        let r = pair();
        assert_eq!(check_sampler_unit(&r, "tex", 1), Ok(true));
        assert_eq!(
            check_sampler_unit(&r, "tex", 0),
            Err(RendererError::SamplerUnitMismatch { name: "tex".into(), unit: 1, requested: 0 })
        );
        assert_eq!(check_sampler_unit(&r, "frame", 7), Ok(false));
    }

    #[test]
    fn unknown_texture_cannot_be_bound() {
        let mut units = Vec::new();
        assert_eq!(
            assign_unit(&mut units, 0, TextureId(2), 2),
            Err(RendererError::UnknownTexture(TextureId(2)))
        );
        assert!(units.is_empty());

        assign_unit(&mut units, 2, TextureId(1), 2).unwrap();
        assert_eq!(units, vec![None, None, Some(TextureId(1))]);
    }

    #[test]
    fn sampled_units_must_be_bound() {
        let r = pair();
        assert_eq!(bound_textures(&r.resources, &[]), Err(RendererError::MissingTexture { unit: 1 }));
        assert_eq!(
            bound_textures(&r.resources, &[Some(TextureId(0)), None]),
            Err(RendererError::MissingTexture { unit: 1 })
        );
        assert_eq!(
            bound_textures(&r.resources, &[None, Some(TextureId(3))]),
            Ok(vec![TextureId(3), TextureId(3)])
        );
    }

    #[test]
    fn mesh_layout_must_provide_every_attribute() {
        let r = pair();
        assert_eq!(check_layout(&r.attributes, &VertexLayout::mesh()), Ok(()));
        assert_eq!(
            check_layout(&r.attributes, &VertexLayout::pos_uv()),
            Err(RendererError::VertexLayoutMismatch {
                name: "uv".into(),
                location: 4,
                expected: wgpu::VertexFormat::Float32x2,
            })
        );
    }

    #[test]
    fn mismatched_attribute_format_is_rejected() {
        let vs = "@vertex fn v(@location(1) uv: vec3f) -> @builtin(position) vec4f { return vec4f(uv, 1.0); }";
        let r = reflect::reflect(vs, "@fragment fn f() {}").unwrap();
        assert!(matches!(
            check_layout(&r.attributes, &VertexLayout::pos_uv()),
            Err(RendererError::VertexLayoutMismatch { location: 1, .. })
        ));
    }

    #[test]
    fn vertex_data_must_be_whole_vertices() {
        assert_eq!(vertex_count(60, 20), Ok(3));
        assert_eq!(vertex_count(0, 20), Err(RendererError::InvalidVertexData { len: 0, stride: 20 }));
        assert_eq!(vertex_count(50, 20), Err(RendererError::InvalidVertexData { len: 50, stride: 20 }));
        assert_eq!(vertex_count(20, 0), Err(RendererError::InvalidVertexData { len: 20, stride: 0 }));
    }

    #[test]
    fn mesh_file_without_indices_draws_nothing() {
        let file = MeshData { vertices: vec![Vertex::default(); 3], indices: Vec::new() }.encode();
        let data = MeshData::decode(&file).unwrap();
        let draw = DrawCall::for_mesh(&data);
        assert_eq!(draw, DrawCall::Indexed { count: 0 });
        assert!(draw.is_empty());
    }

    #[test]
    fn mesh_files_draw_indexed() {
        let data = MeshData { vertices: vec![Vertex::default(); 3], indices: vec![0, 1, 2, 2, 1, 0] };
        assert_eq!(DrawCall::for_mesh(&data), DrawCall::Indexed { count: 6 });
        assert!(!DrawCall::Vertices { count: 3 }.is_empty());
    }

    #[test]
    fn scanned_bindings_agree_with_naga() {
        let vs = validate_wgsl("vs", VS).unwrap();
        let fs = validate_wgsl("fs", FS).unwrap();
        let r = reflect::reflect_modules(VS, &vs, FS, &fs).unwrap();
        assert_eq!(r, pair());
    }

    #[test]
    fn const_expression_bindings_are_resolved() {
        let fs = r#"
            const UNIT: u32 = 2u;
            const N = 3;
            alias Palette = array<vec4f, N>;
            @group(0) @binding(N - 1) var<uniform> palette: Palette;
            @group(1) @binding(2 * UNIT) var tex: texture_2d<f32>;
            @group(1) @binding(2 * UNIT + 1) var tex_sampler: sampler;
            @fragment fn f() -> @location(0) vec4f { return palette[0] * textureSample(tex, tex_sampler, vec2f(0.0)); }
        "#;
        let module = validate_wgsl("fs", fs).unwrap();
        let scanned = reflect::reflect_stage(fs, reflect::ShaderStage::Fragment).unwrap();
        reflect::check_module(&scanned, &module, fs).unwrap();
        assert_eq!(scanned.uniforms[0].binding, 2);
        assert_eq!(scanned.uniforms[0].ty, UniformType::array(UniformElem::Vec4, 3));
        assert_eq!(scanned.resources[0].binding, 4);
        assert_eq!(scanned.resources[1].binding, 5);
    }

    #[test]
    fn scan_disagreeing_with_naga_is_an_error() {
        let scanned_src = "@group(0) @binding(0) var<uniform> a: f32;\n@fragment fn f() {}";
        let compiled_src = "@group(0) @binding(3) var<uniform> a: f32;\n@fragment fn f() {}";
        let scanned = reflect::reflect_stage(scanned_src, reflect::ShaderStage::Fragment).unwrap();
        let module = validate_wgsl("fs", compiled_src).unwrap();
        let err = reflect::check_module(&scanned, &module, compiled_src).unwrap_err();
        assert!(err.message.contains("@binding(3)"), "{err}");

        let renamed_src = "@group(0) @binding(0) var<uniform> b: f32;\n@fragment fn f() {}";
        let renamed = validate_wgsl("fs", renamed_src).unwrap();
        let err = reflect::check_module(&scanned, &renamed, renamed_src).unwrap_err();
        assert!(err.message.contains("`b`"), "{err}");
        assert_eq!(err.line, 1);
    }
}

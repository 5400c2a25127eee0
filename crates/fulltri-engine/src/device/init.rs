/// Initialization parameters for the GPU layer.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Prefer an sRGB surface format when available.
    pub prefer_srgb: bool,

    /// Present mode (swap behavior).
    pub present_mode: wgpu::PresentMode,

    /// Optional alpha mode preference for the surface.
    ///
    /// If provided but unsupported on the current surface, a supported mode is selected.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    /// Required wgpu features.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Desired maximum frame latency for the surface.
    pub desired_maximum_frame_latency: u32,

    /// Extra usages requested for the surface texture on top of `RENDER_ATTACHMENT`.
    ///
    /// Filtered against the surface capabilities; unsupported bits are dropped.
    pub extra_surface_usages: wgpu::TextureUsages,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            prefer_srgb: true,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            desired_maximum_frame_latency: 2,
            extra_surface_usages: wgpu::TextureUsages::empty(),
        }
    }
}

impl GpuInit {
    /// Settings for precision tests: an exact (non-sRGB) surface so the
    /// displayed bytes match what the shaders wrote.
    pub fn linear_output() -> Self {
        Self {
            prefer_srgb: false,
            ..Self::default()
        }
    }
}

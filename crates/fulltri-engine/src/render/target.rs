/// Target for drawing (encoder + color view).
pub struct RenderTarget<'a> {
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub color_view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

impl<'a> RenderTarget<'a> {
    #[inline]
    pub fn new(
        encoder: &'a mut wgpu::CommandEncoder,
        color_view: &'a wgpu::TextureView,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            encoder,
            color_view,
            format,
        }
    }

    /// Begins a pass on the target's color view. `None` keeps its contents.
    pub fn pass(&mut self, label: &str, clear: Option<wgpu::Color>) -> wgpu::RenderPass<'_> {
        color_pass(self.encoder, self.color_view, label, clear)
    }
}

/// Begins a single-attachment color pass without depth.
pub fn color_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    label: &str,
    clear: Option<wgpu::Color>,
) -> wgpu::RenderPass<'e> {
    let load = match clear {
        Some(color) => wgpu::LoadOp::Clear(color),
        None => wgpu::LoadOp::Load,
    };

    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    })
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fulltri_engine::core::{App, AppControl, FrameCtx, StartCtx};
use fulltri_engine::input::{InputEvent, InputFrame, Key, KeyState};
use fulltri_engine::render::gradient::precision_gradient;
use fulltri_engine::render::{
    color_pass, readback, MeshId, PixelFormat, RenderTarget, Renderer, RendererError, ShaderId,
    TextureData, TextureId, VertexLayout,
};

use crate::config::Cli;
use crate::console::{Command, Console};

/// Format of the offscreen colour buffer and of F12 dumps.
const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// One triangle covering clip space: position xyz, uv.
const FULL_TRIANGLE: [[f32; 5]; 3] = [
    [-3.0, -1.0, 0.5, -1.0, 0.0],
    [1.0, -1.0, 0.5, 1.0, 0.0],
    [1.0, 3.0, 0.5, 1.0, 2.0],
];

/// Values the console can change at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub display_cpu: bool,
}

impl Settings {
    /// Applies `cmd`. Returns false when the parameter is unknown.
    pub fn apply(&mut self, cmd: &Command) -> bool {
        match cmd.param.as_str() {
            "displayCpu" => {
                self.display_cpu = cmd.value == "true";
                true
            }
            _ => false,
        }
    }
}

/// Console actions the frame loop has to carry out.
#[derive(Debug, Default, PartialEq, Eq)]
struct Requests {
    dump: bool,
    exit: bool,
}

pub struct FulltriApp {
    canvas: (u32, u32),
    shader_dir: PathBuf,
    dump_path: PathBuf,
    settings: Settings,
    console: Console,
    scene: Option<Scene>,
}

impl FulltriApp {
    pub fn new(cli: &Cli) -> Self {
        Self {
            canvas: (cli.width, cli.height),
            shader_dir: cli.shader_dir.clone(),
            dump_path: cli.dump_path.clone(),
            settings: Settings { display_cpu: cli.display_cpu },
            console: Console::default(),
            scene: None,
        }
    }

    fn handle_input(&mut self, frame: &InputFrame) -> Requests {
        let mut requests = Requests::default();

        for ev in &frame.events {
            match ev {
                InputEvent::Text(text) => self.console.push_text(&text.text),
                InputEvent::Key { key, state: KeyState::Pressed, repeat, .. } => match key {
                    Key::Backspace => self.console.backspace(),
                    Key::ArrowUp if !repeat => self.console.recall_previous(),
                    Key::Enter if !repeat => {
                        if let Some(cmd) = self.console.enter() {
                            self.apply(&cmd);
                        }
                    }
                    Key::F12 if !repeat => requests.dump = true,
                    Key::Escape => requests.exit = true,
                    _ => {}
                },
                _ => {}
            }
        }

        if let Err(e) = self.console.flush_echo() {
            log::warn!("console echo failed: {e}");
        }
        requests
    }

    fn apply(&mut self, cmd: &Command) {
        if self.settings.apply(cmd) {
            log::info!("{} = {}", cmd.param, cmd.value);
        } else {
            log::warn!("unknown parameter `{}` ignored", cmd.param);
        }
    }
}

impl App for FulltriApp {
    fn on_start(&mut self, ctx: &mut StartCtx<'_, '_>) -> Result<()> {
        let report = ctx.gpu.platform_report();
        for line in report.to_string().lines() {
            log::info!("{line}");
        }

        let (width, height) = self.canvas;
        let actual = ctx.window.physical_size();
        anyhow::ensure!(
            actual.width == width && actual.height == height,
            "canvas is {}x{}, expected {width}x{height}",
            actual.width,
            actual.height
        );
        ctx.gpu.check_canvas(width, height)?;

        let renderer = Renderer::new(ctx.gpu.device().clone(), ctx.gpu.queue().clone());
        let scene = Scene::new(renderer, &self.shader_dir, width, height).context("scene setup failed")?;
        self.scene = Some(scene);

        log::info!("setup done; type `displayCpu true|false`, F12 dumps, Esc quits");
        Ok(())
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        let requests = self.handle_input(ctx.input_frame);
        if requests.exit {
            return AppControl::Exit;
        }

        let Some(scene) = self.scene.as_mut() else {
            return AppControl::Continue;
        };
        let display_cpu = self.settings.display_cpu;

        let control = match ctx.render(wgpu::Color::BLACK, |target| scene.draw(target, display_cpu)) {
            Ok(control) => control,
            Err(e) => {
                log::error!("frame failed: {e:#}");
                return AppControl::Exit;
            }
        };

        if requests.dump {
            log::info!("storing current render...");
            match scene.dump(&self.dump_path, display_cpu) {
                Ok(()) => log::info!("done, wrote {}", self.dump_path.display()),
                Err(e) => log::error!("dump failed: {e:#}"),
            }
        }

        control
    }
}

/// GPU resources of the precision test.
struct Scene {
    renderer: Renderer,
    display: ShaderId,
    compute: ShaderId,
    triangle: MeshId,
    cpu_texture: TextureId,
    color_buffer: TextureId,
    dump_target: TextureId,
    inv_canvas: [f32; 2],
    frame_rendered: bool,
}

impl Scene {
    fn new(mut renderer: Renderer, shader_dir: &Path, width: u32, height: u32) -> Result<Self> {
        let vs = shader_dir.join("fulltri.vert.wgsl");
        let display = renderer.add_shader(&vs, shader_dir.join("display.frag.wgsl"))?;
        let compute = renderer.add_shader(&vs, shader_dir.join("compute.frag.wgsl"))?;

        let triangle =
            renderer.add_mesh_from_vertices(bytemuck::cast_slice(&FULL_TRIANGLE), VertexLayout::pos_uv())?;

        let gradient = precision_gradient(width, height, width, height);
        let cpu = TextureData::from_u8(width, height, PixelFormat::Rgb, &gradient)?;
        let cpu_texture = renderer.add_texture_from_data(&cpu, wgpu::FilterMode::Nearest)?;

        let color_buffer = renderer.add_render_target(width, height, OFFSCREEN_FORMAT)?;
        let dump_target = renderer.add_render_target(width, height, OFFSCREEN_FORMAT)?;

        Ok(Self {
            renderer,
            display,
            compute,
            triangle,
            cpu_texture,
            color_buffer,
            dump_target,
            inv_canvas: [1.0 / width as f32, 1.0 / height as f32],
            frame_rendered: false,
        })
    }

    /// Fills the colour buffer once, then shows the selected texture.
    fn draw(&mut self, target: &mut RenderTarget<'_>, display_cpu: bool) -> Result<()> {
        let compute_pending = !self.frame_rendered;
        if compute_pending {
            let view = self.renderer.texture_view(self.color_buffer)?.clone();
            let mut pass = color_pass(
                target.encoder,
                &view,
                "fulltri compute pass",
                Some(wgpu::Color::TRANSPARENT),
            );
            self.renderer.set_shader(self.compute)?;
            self.renderer.set_uniform_2fv("invCanvasSize", &[self.inv_canvas])?;
            self.renderer.draw_mesh(&mut pass, OFFSCREEN_FORMAT, self.triangle)?;
        }

        let format = target.format;
        let mut pass = target.pass("fulltri display pass", None);
        self.draw_display(&mut pass, format, display_cpu)?;

        if compute_pending {
            self.frame_rendered = true;
        }
        Ok(())
    }

    fn draw_display(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        format: wgpu::TextureFormat,
        display_cpu: bool,
    ) -> Result<(), RendererError> {
        let source = if display_cpu { self.cpu_texture } else { self.color_buffer };
        self.renderer.set_shader(self.display)?;
        self.renderer.set_uniform_2fv("invCanvasSize", &[self.inv_canvas])?;
        self.renderer.set_uniform_1i("sam", 0)?;
        self.renderer.set_texture(0, source)?;
        self.renderer.draw_mesh(pass, format, self.triangle)
    }

    /// Redraws the display pass offscreen and writes it to `path`.
    fn dump(&mut self, path: &Path, display_cpu: bool) -> Result<()> {
        let view = self.renderer.texture_view(self.dump_target)?.clone();
        let mut encoder = self.renderer.create_encoder("fulltri dump encoder");
        {
            let mut pass = color_pass(&mut encoder, &view, "fulltri dump pass", Some(wgpu::Color::BLACK));
            self.draw_display(&mut pass, OFFSCREEN_FORMAT, display_cpu)?;
        }
        self.renderer.submit(encoder);

        let image = self.renderer.capture(self.dump_target)?;
        readback::save_image(&image, path)
    }
}

#[cfg(test)]
mod tests {
    use fulltri_engine::input::{Modifiers, TextEvent};

    use super::*;

    fn app() -> FulltriApp {
        FulltriApp::new(&<Cli as clap::Parser>::try_parse_from(["fulltri"]).unwrap())
    }

    fn press(key: Key) -> InputEvent {
        InputEvent::Key {
            key,
            state: KeyState::Pressed,
            modifiers: Modifiers::default(),
            code: 0,
            repeat: false,
        }
    }

    fn text(s: &str) -> InputEvent {
        InputEvent::Text(TextEvent { text: s.to_string() })
    }

    fn frame(events: Vec<InputEvent>) -> InputFrame {
        InputFrame { events, ..InputFrame::default() }
    }

    #[test]
    fn settings_apply_display_cpu() {
        let mut s = Settings::default();
        let cmd = |v: &str| Command { param: "displayCpu".into(), value: v.into() };
        assert!(s.apply(&cmd("true")));
        assert!(s.display_cpu);
        assert!(s.apply(&cmd("yes")));
        assert!(!s.display_cpu);
    }

    #[test]
    fn unknown_parameter_is_ignored() {
        let mut s = Settings { display_cpu: true };
        assert!(!s.apply(&Command { param: "gamma".into(), value: "2".into() }));
        assert!(s.display_cpu);
    }

    #[test]
    fn typed_command_toggles_cpu_texture() {
        let mut app = app();
        assert!(!app.settings.display_cpu);

        let requests = app.handle_input(&frame(vec![
            text("displayCpu"),
            text(" "),
            text("truex"),
            press(Key::Backspace),
            press(Key::Enter),
        ]));
        assert_eq!(requests, Requests::default());
        assert!(app.settings.display_cpu);
    }

    #[test]
    fn arrow_up_repeats_previous_command() {
        let mut app = app();
        app.handle_input(&frame(vec![text("displayCpu true"), press(Key::Enter)]));
        app.handle_input(&frame(vec![text("displayCpu false"), press(Key::Enter)]));
        assert!(!app.settings.display_cpu);

        app.handle_input(&frame(vec![press(Key::ArrowUp), press(Key::Enter)]));
        assert!(!app.settings.display_cpu);
        assert_eq!(app.console.line(), "");
    }

    #[test]
    fn f12_and_escape_become_requests() {
        let mut app = app();
        let requests = app.handle_input(&frame(vec![press(Key::F12), press(Key::Escape)]));
        assert!(requests.dump);
        assert!(requests.exit);
    }

    #[test]
    fn cli_flag_selects_initial_texture() {
        let cli = <Cli as clap::Parser>::try_parse_from(["fulltri", "--display-cpu"]).unwrap();
        assert!(FulltriApp::new(&cli).settings.display_cpu);
    }

    #[test]
    fn triangle_covers_clip_space() {
        assert_eq!(std::mem::size_of_val(&FULL_TRIANGLE[0]) as u64, VertexLayout::pos_uv().stride);

        let [a, b, c] = FULL_TRIANGLE.map(|v| (v[0], v[1]));
        let edge = |p: (f32, f32), q: (f32, f32), r: (f32, f32)| (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0);
        for corner in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            assert!(edge(a, b, corner) >= 0.0);
            assert!(edge(b, c, corner) >= 0.0);
            assert!(edge(c, a, corner) >= 0.0);
        }
    }

    #[test]
    fn shipped_shaders_follow_binding_conventions() {
        use fulltri_engine::render::reflect::reflect;

        let vs = include_str!("../../../assets/fulltri.vert.wgsl");
        let display = reflect(vs, include_str!("../../../assets/display.frag.wgsl")).unwrap();
        assert_eq!(display.texture_units(), vec![0]);
        assert!(display.uniform("invCanvasSize").is_some());
        assert_eq!(display.attributes.len(), 2);

        let compute = reflect(vs, include_str!("../../../assets/compute.frag.wgsl")).unwrap();
        assert!(compute.texture_units().is_empty());
        assert!(compute.uniform("invCanvasSize").is_some());
    }
}

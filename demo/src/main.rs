use anyhow::Context;
use rand::Rng;
use tick_atlas::{
    font::GlyphSheetBaker, render::WgpuBackend, AssetId, AtlasBuilder, BuildOptions, Rect,
    RenderBackend,
};
use winit::{
    event::*,
    event_loop::EventLoop,
    window::WindowBuilder,
};

const TILES: usize = 48;
const FONT_SIZE: u32 = 24;

fn stripes(backend: &mut WgpuBackend, position: glam::Vec2, size: glam::Vec2, steps: u32) {
    let step = size.x / steps as f32;
    for i in 0..steps {
        let t = i as f32 / (steps - 1).max(1) as f32;
        let dst = Rect::new(position.x + step * i as f32, position.y, step, size.y);
        backend.fill_rect(dst, [t, 0.2, 1.0 - t, 1.0]);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let font_path = args.next();
    let options = match args.next() {
        Some(path) => BuildOptions::load(&path).with_context(|| format!("loading {path}"))?,
        None => BuildOptions::default(),
    };

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("tick-atlas")
        .with_visible(false)
        .build(&event_loop)?;
    let instance = wgpu::Instance::new(wgpu::Backends::all());
    let surface = unsafe { instance.create_surface(&window) };
    let adapter = instance
        .enumerate_adapters(wgpu::Backends::all())
        .find(|a| a.is_surface_supported(&surface))
        .context("no adapter can present to the window")?;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            limits: wgpu::Limits::downlevel_webgl2_defaults(),
            ..Default::default()
        },
        None,
    ))?;

    let format = surface.get_supported_formats(&adapter)[0];
    let mut config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: window.inner_size().width,
        height: window.inner_size().height,
        present_mode: wgpu::PresentMode::AutoVsync,
        alpha_mode: wgpu::CompositeAlphaMode::Auto,
    };
    surface.configure(&device, &config);

    let mut backend = WgpuBackend::new(device, queue, format);
    let mut builder: AtlasBuilder<WgpuBackend, GlyphSheetBaker> =
        AtlasBuilder::with_font_baker(options, GlyphSheetBaker::default());

    let mut rng = rand::thread_rng();
    let mut images: Vec<AssetId> = Vec::with_capacity(TILES + 1);
    for _ in 0..TILES {
        let size = glam::vec2(rng.gen_range(8..64) as f32, rng.gen_range(8..64) as f32);
        let color = [rng.gen(), rng.gen(), rng.gen(), 1.0];
        let id = builder.reserve_image(size, move |backend, _, position| {
            backend.fill_rect(Rect::from_position_size(position, size), color);
        })?;
        images.push(id);
    }
    let gradient = glam::vec2(128.0, 32.0);
    images.push(builder.reserve_image(gradient, move |backend, _, position| {
        stripes(backend, position, gradient, 16);
    })?);
    let font = match font_path {
        Some(path) => Some(builder.reserve_font(path, FONT_SIZE, 0)?),
        None => None,
    };
    builder.finalize(&mut backend)?;

    let mut done = false;
    window.set_visible(true);
    event_loop.run(move |event, _, control_flow| match event {
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        } => control_flow.set_exit(),
        Event::WindowEvent {
            event:
                WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            virtual_keycode: Some(VirtualKeyCode::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                },
            ..
        } => control_flow.set_exit(),
        Event::WindowEvent { event: WindowEvent::Resized(size), .. } => {
            config.width = size.width.max(1);
            config.height = size.height.max(1);
            surface.configure(backend.device(), &config);
        }
        Event::MainEventsCleared => window.request_redraw(),
        Event::RedrawRequested(_) => {
            if !done {
                match builder.tick(&mut backend) {
                    Ok(more) => done = !more,
                    Err(e) => {
                        log::error!("atlas build failed: {}", e);
                        control_flow.set_exit_with_code(1);
                        return;
                    }
                }
            }

            let width = config.width as f32;
            let bar = Rect::new(16.0, 16.0, width - 32.0, 12.0);
            backend.fill_rect(bar, [0.2, 0.2, 0.2, 1.0]);
            let filled = Rect::new(bar.x, bar.y, bar.width * builder.progress(), bar.height);
            backend.fill_rect(filled, [0.3, 0.8, 0.4, 1.0]);

            if let Some(atlas) = builder.atlas() {
                let src = Rect::from_position_size(glam::Vec2::ZERO, atlas.size());
                let dst = Rect::from_position_size(glam::vec2(16.0, 44.0), atlas.size());
                backend.draw_sub_image(atlas.texture(), src, dst);

                let mut pen = glam::vec2(dst.x + dst.width + 16.0, dst.y);
                for &id in &images {
                    let size = match builder.get_asset(id) {
                        Ok((_, rect)) => rect.size(),
                        Err(_) => continue,
                    };
                    if pen.x + size.x > width {
                        pen = glam::vec2(dst.x + dst.width + 16.0, pen.y + 68.0);
                    }
                    if builder.draw(&mut backend, id, pen).is_ok() {
                        pen.x += size.x + 4.0;
                    }
                }

                if let Some(font) = font.and_then(|id| builder.get_font(id).ok()) {
                    let text = format!(
                        "{} assets\n{}x{} atlas",
                        builder.len(),
                        atlas.width(),
                        atlas.height()
                    );
                    let position = glam::vec2(16.0, dst.y + dst.height + 16.0);
                    font.draw_text(&mut backend, &text, position);
                }
            }

            match surface.get_current_texture() {
                Ok(texture) => {
                    let view = texture.texture.create_view(&Default::default());
                    let mut encoder = backend
                        .device()
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
                    backend.present(
                        &mut encoder,
                        &view,
                        config.width,
                        config.height,
                        Some(wgpu::Color::BLACK),
                    );
                    backend.queue().submit(Some(encoder.finish()));
                    texture.present();
                }
                Err(wgpu::SurfaceError::Outdated) => {}
                Err(e) => {
                    log::error!("{}", e);
                    control_flow.set_exit_with_code(1);
                }
            }
        }
        _ => {}
    })
}

use std::any::Any;
use std::env;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use pollster::block_on;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::WindowBuilder;

use raymarch_camera::backend::software::{FragmentProgram, SoftwareBackend};
use raymarch_camera::{
    FrameOutcome, FrustumCorner, RaymarchDriver, SceneConfig, ShaderChoice, SphereTracer, Surface,
    Viewer,
};

const DEFAULT_HEIGHT: u32 = 90;
const MAX_DEFAULT_WIDTH: f32 = 4096.0;
const WINDOW_HEIGHT: f64 = 720.0;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let scene = SceneConfig::load(&options.path)?;

    println!(
        "Loaded {} (revision {}, shader {})",
        options.path.display(),
        scene.revision,
        scene.shader
    );
    let camera = scene.camera(options.aspect_override());
    let frustum = camera.frustum();
    println!(
        "Camera fov={:.1} aspect={:.3} position=({:.2}, {:.2}, {:.2})",
        camera.vertical_fov_degrees,
        camera.aspect_ratio,
        camera.position.x,
        camera.position.y,
        camera.position.z
    );
    for corner in FrustumCorner::ALL {
        let ray = frustum.corner(corner);
        println!(" - {corner:?} ({:.4}, {:.4}, {:.4})", ray.x, ray.y, ray.z);
    }

    if options.summary_only {
        run_headless(&scene, &options)
    } else {
        match run_interactive(scene.clone()) {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.downcast_ref::<WindowInitError>().is_some() {
                    eprintln!(
                        "{err}. Falling back to --summary-only mode (set DISPLAY or install X11 libs to enable rendering)."
                    );
                    run_headless(&scene, &options)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Renders with the CPU backend and prints a checksum of the last frame.
fn run_headless(scene: &SceneConfig, options: &CliOptions) -> Result<()> {
    let (width, height) = options.output_size(scene);
    let mut backend = SoftwareBackend::new();
    let program: Option<Arc<dyn FragmentProgram>> = match &scene.shader {
        ShaderChoice::None => None,
        ShaderChoice::Builtin => Some(Arc::new(SphereTracer)),
        ShaderChoice::File(path) => {
            warn!(
                "{} is a GPU shader; headless runs use the built-in tracer",
                path.display()
            );
            Some(Arc::new(SphereTracer))
        }
    };
    let mut driver = RaymarchDriver::new(&mut backend, program.as_ref(), scene.revision);

    let camera = scene.camera(options.aspect_override());
    let background = raymarch_camera::surface::to_rgba8(scene.background.extend(1.0));
    let source = Surface::filled(width, height, background);
    let mut target = Surface::new(width, height);

    let mut outcome = FrameOutcome::PassThrough;
    for _ in 0..options.frames {
        outcome = driver.render_frame(
            &mut backend,
            &camera,
            scene.light.as_ref(),
            &scene.params,
            &source,
            &mut target,
        );
    }

    match outcome {
        FrameOutcome::PassThrough => println!("Frame: pass-through"),
        FrameOutcome::Raymarched { uploads } => {
            println!("Frame: raymarched with {uploads} parameter uploads")
        }
    }
    println!(
        "Rendered {} frame(s) at {width}x{height} checksum={:016x}",
        options.frames,
        target.checksum()
    );
    Ok(())
}

fn run_interactive(scene: SceneConfig) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Raymarch Camera")
            .with_inner_size(LogicalSize::new(
                (WINDOW_HEIGHT * f64::from(scene.aspect)).clamp(1.0, f64::from(MAX_DEFAULT_WIDTH)),
                WINDOW_HEIGHT,
            ))
            .build(&event_loop)
            .map_err(|err| WindowInitError::from_error("window", err))?,
    );

    let mut viewer = block_on(Viewer::new(Arc::clone(&window), scene))?;
    info!("entering event loop");

    let mut last_error: Option<anyhow::Error> = None;
    let mut last_outcome = None;
    event_loop
        .run(|event, elwt| match event {
            Event::WindowEvent { event, window_id } if window_id == viewer.window_id() => {
                match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => viewer.resize(size),
                    WindowEvent::RedrawRequested => match viewer.render() {
                        Ok(outcome) => {
                            if last_outcome != Some(outcome) {
                                info!("frame outcome: {outcome:?}");
                                last_outcome = Some(outcome);
                            }
                        }
                        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                            let size = viewer.window().inner_size();
                            viewer.resize(size);
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => {
                            last_error = Some(anyhow!("GPU is out of memory"));
                            elwt.exit();
                        }
                        Err(wgpu::SurfaceError::Timeout) => {
                            info!("Surface timeout; retrying next frame");
                        }
                    },
                    _ => {}
                }
            }
            Event::AboutToWait => viewer.window().request_redraw(),
            _ => {}
        })
        .context("event loop failed")?;

    match last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

struct CliOptions {
    path: PathBuf,
    summary_only: bool,
    /// Explicit `--size`; without it the configured aspect ratio is kept.
    size: Option<(u32, u32)>,
    frames: u32,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        const USAGE: &str =
            "Usage: raymarch-camera <scene.xml> [--summary-only] [--size WxH] [--frames N]";
        let mut args = env::args().skip(1);
        let Some(path) = args.next() else {
            return Err(anyhow!(USAGE));
        };
        let mut options = Self {
            path: PathBuf::from(path),
            summary_only: false,
            size: None,
            frames: 1,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--summary-only" => options.summary_only = true,
                "--size" => {
                    let value = args.next().ok_or_else(|| anyhow!("--size needs WxH"))?;
                    options.size = Some(parse_size(&value)?);
                }
                "--frames" => {
                    let value = args.next().ok_or_else(|| anyhow!("--frames needs a count"))?;
                    options.frames = value
                        .parse()
                        .with_context(|| format!("invalid frame count {value:?}"))?;
                    if options.frames == 0 {
                        return Err(anyhow!("frame count must be at least 1"));
                    }
                }
                other => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
            }
        }
        Ok(options)
    }

    /// Aspect ratio forced by an explicit output size.
    fn aspect_override(&self) -> Option<f32> {
        self.size.map(|(width, height)| width as f32 / height as f32)
    }

    /// Headless output size; the width follows the configured aspect when
    /// no size was given.
    fn output_size(&self, scene: &SceneConfig) -> (u32, u32) {
        self.size.unwrap_or_else(|| {
            let width = (DEFAULT_HEIGHT as f32 * scene.aspect)
                .round()
                .clamp(1.0, MAX_DEFAULT_WIDTH);
            (width as u32, DEFAULT_HEIGHT)
        })
    }
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| anyhow!("size must look like WxH, got {value:?}"))?;
    let width: u32 = width.parse().with_context(|| format!("invalid width {width:?}"))?;
    let height: u32 = height
        .parse()
        .with_context(|| format!("invalid height {height:?}"))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("size must be non-zero, got {value:?}"));
    }
    Ok((width, height))
}

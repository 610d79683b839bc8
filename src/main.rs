//! Demo runner: synthetic camera and IMU feeds driving one live session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::Result;
use tracing::{info, warn};

use artemis::frame::{CameraIntrinsics, FramePixels, FrameSource};
use artemis::{ConfigureRequest, Pipeline, RunConfig};

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artemis=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Artemis launching...");

    let config = load_config();
    let epoch = Instant::now();
    let now_ns = move || epoch.elapsed().as_nanos() as i64;

    let pipeline = Arc::new(Pipeline::new());
    let request = ConfigureRequest {
        timestamp_ns: now_ns(),
        width: config.camera.width,
        height: config.camera.height,
        texture_id: 0,
        frame_stride: config.session.frame_stride,
        settings_json: serde_json::json!({ "moduleName": config.session.module_name }).to_string(),
    };
    let source = MovingGradient {
        width: config.camera.width,
        height: config.camera.height,
        tick: 0,
    };
    pipeline.configure_with_source(&request, Box::new(source))?;
    pipeline.configure_visualization(
        config.session.visualization_width,
        config.session.visualization_height,
    );

    let stop = Arc::new(AtomicBool::new(false));

    let camera = {
        let pipeline = pipeline.clone();
        let stop = stop.clone();
        let period = Duration::from_secs_f64(1.0 / config.camera.fps.max(1) as f64);
        let intrinsics = CameraIntrinsics {
            camera_index: 0,
            focal_length_x: 0.8 * config.camera.width as f64,
            focal_length_y: 0.8 * config.camera.width as f64,
            principal_point_x: config.camera.width as f64 / 2.0,
            principal_point_y: config.camera.height as f64 / 2.0,
        };
        std::thread::Builder::new()
            .name("artemis-camera".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    pipeline.process_frame(now_ns(), intrinsics);
                    std::thread::sleep(period);
                }
            })?
    };

    let sensors = {
        let pipeline = pipeline.clone();
        let stop = stop.clone();
        let gyro_hz = config.sensors.gyro_hz.max(1);
        let acc_every = (gyro_hz / config.sensors.acc_hz.max(1)).max(1);
        let period = Duration::from_secs_f64(1.0 / gyro_hz as f64);
        std::thread::Builder::new()
            .name("artemis-sensors".into())
            .spawn(move || {
                let mut n: u64 = 0;
                while !stop.load(Ordering::Relaxed) {
                    let t = epoch.elapsed().as_secs_f64();
                    pipeline.process_gyro_sample(
                        now_ns(),
                        0.10 * t.sin(),
                        0.05 * t.cos(),
                        0.02,
                    );
                    if n % acc_every as u64 == 0 {
                        pipeline.process_acc_sample(
                            now_ns(),
                            0.05 * t.cos(),
                            9.81 + 0.1 * t.sin(),
                            0.0,
                        );
                    }
                    n += 1;
                    std::thread::sleep(period);
                }
            })?
    };

    let deadline = Instant::now() + Duration::from_secs(config.session.run_seconds.max(1));
    let mut last_stats = Instant::now();
    while Instant::now() < deadline {
        pipeline.draw_visualization(now_ns());
        if last_stats.elapsed() >= Duration::from_secs(1) {
            info!("\n{}", pipeline.stats_string());
            last_stats = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("final stats:\n{}", pipeline.stats_string());

    stop.store(true, Ordering::Relaxed);
    if camera.join().is_err() {
        warn!("camera thread panicked");
    }
    if sensors.join().is_err() {
        warn!("sensor thread panicked");
    }
    pipeline.stop()?;

    info!("Artemis shutting down");
    Ok(())
}

fn load_config() -> RunConfig {
    let loaded = config::Config::builder()
        .add_source(config::File::with_name("artemis").required(false))
        .add_source(config::Environment::with_prefix("ARTEMIS").separator("__"))
        .build()
        .and_then(|c| c.try_deserialize::<RunConfig>());
    match loaded {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, "config load failed, using defaults");
            RunConfig::default()
        }
    }
}

/// Scrolling test pattern standing in for the camera texture.
struct MovingGradient {
    width: u32,
    height: u32,
    tick: u64,
}

impl FrameSource for MovingGradient {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self, want_color: bool) -> artemis::Result<FramePixels> {
        self.tick += 1;
        let shift = (self.tick * 3) as u32;
        let mut gray = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                gray.push((((x + shift) ^ y) & 0xFF) as u8);
            }
        }
        let color = want_color.then(|| {
            let mut rgba = Vec::with_capacity(gray.len() * 4);
            for &g in &gray {
                rgba.extend_from_slice(&[g, g, g, 0xFF]);
            }
            Bytes::from(rgba)
        });
        Ok(FramePixels {
            width: self.width,
            height: self.height,
            gray: Bytes::from(gray),
            color,
        })
    }
}

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};
use rmbg::{
    Compositor, CompositorConfig, ImageLoader, OutputFormat, OutputFormatHandler, RasterHandle,
    ResizeFilter,
};
use tokio::runtime::Runtime;

/// Foreground with a soft vertical alpha ramp so every blend path is hit
fn foreground(width: u32, height: u32) -> RasterHandle {
    RasterHandle::from_rgba(RgbaImage::from_fn(width, height, |x, y| {
        let alpha = ((y * 255) / height.max(1)) as u8;
        Rgba([(x % 256) as u8, 128, 200, alpha])
    }))
}

fn background(width: u32, height: u32) -> RasterHandle {
    RasterHandle::from_rgba(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(y % 256) as u8, (x % 256) as u8, 64, 255])
    }))
}

fn benchmark_compose_rgba(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose_rgba");
    let fg = foreground(1024, 1024);
    let bg = background(1920, 1080);

    for filter in [
        ResizeFilter::Nearest,
        ResizeFilter::Triangle,
        ResizeFilter::Lanczos3,
    ] {
        let compositor = Compositor::new(CompositorConfig {
            resize_filter: filter,
            ..CompositorConfig::default()
        });
        group.bench_with_input(
            BenchmarkId::new("1024x1024_over_1920x1080", format!("{:?}", filter)),
            &compositor,
            |b, compositor| {
                b.iter(|| black_box(compositor.compose_rgba(&fg, &bg).unwrap()));
            },
        );
    }

    // Same-size background skips the resize
    let compositor = Compositor::default();
    let same = background(1024, 1024);
    group.bench_function("1024x1024_same_size", |b| {
        b.iter(|| black_box(compositor.compose_rgba(&fg, &same).unwrap()));
    });

    group.finish();
}

fn benchmark_compose_and_encode(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("compose_and_encode");
    group.sample_size(20);

    for format in [OutputFormat::Png, OutputFormat::Jpeg] {
        let compositor = Compositor::new(CompositorConfig {
            output_format: format,
            ..CompositorConfig::default()
        });
        group.bench_with_input(
            BenchmarkId::new("640x480", OutputFormatHandler::get_extension(format)),
            &compositor,
            |b, compositor| {
                b.iter_batched(
                    || (foreground(640, 480), background(1280, 720)),
                    |(fg, bg)| rt.block_on(async { black_box(compositor.compose(fg, bg).await.unwrap()) }),
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

fn benchmark_load_pair(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let loader = ImageLoader::new();
    let fg = OutputFormatHandler::encode_png(foreground(640, 480).as_rgba()).unwrap();
    let bg = OutputFormatHandler::encode_png(background(1280, 720).as_rgba()).unwrap();

    c.bench_function("load_pair_png", |b| {
        b.iter(|| rt.block_on(async { black_box(loader.load_pair(&fg, &bg).await.unwrap()) }));
    });
}

criterion_group!(
    benches,
    benchmark_compose_rgba,
    benchmark_compose_and_encode,
    benchmark_load_pair
);
criterion_main!(benches);

use criterion::{criterion_group, criterion_main, Criterion};
use rsn_dsp::converter::{Converter, ConverterConfig};
use rsn_dsp::format::{convert_pcm_samples, Dither, DitherMode, Format};

const FRAMES: usize = 4096;

fn bench_format_kernels(c: &mut Criterion) {
    let src: Vec<u8> = (0..FRAMES * 2)
        .flat_map(|i| ((i as i32 * 3217 % 65536 - 32768) as i16).to_le_bytes())
        .collect();
    let mut dst = vec![0u8; FRAMES * 2 * 4];

    c.bench_function("s16_to_f32_4096x2", |b| {
        let mut dither = Dither::new(DitherMode::None);
        b.iter(|| {
            convert_pcm_samples(
                &mut dst,
                Format::F32,
                &src,
                Format::S16,
                FRAMES * 2,
                &mut dither,
            )
            .unwrap();
        });
    });

    c.bench_function("f32_to_s16_triangle_dither_4096x2", |b| {
        let float_src = dst.clone();
        let mut out = vec![0u8; FRAMES * 2 * 2];
        let mut dither = Dither::new(DitherMode::Triangle);
        b.iter(|| {
            convert_pcm_samples(
                &mut out,
                Format::S16,
                &float_src,
                Format::F32,
                FRAMES * 2,
                &mut dither,
            )
            .unwrap();
        });
    });
}

fn bench_full_converter(c: &mut Criterion) {
    let config = ConverterConfig::new(Format::S16, Format::F32, 2, 2, 44_100, 48_000).unwrap();
    let mut converter = Converter::new(&config).unwrap();

    let src: Vec<u8> = (0..FRAMES * 2)
        .flat_map(|i| ((i as i32 * 1031 % 65536 - 32768) as i16).to_le_bytes())
        .collect();
    let mut dst = vec![0u8; (FRAMES + 512) * 2 * 4];

    c.bench_function("converter_s16_44k_to_f32_48k_4096", |b| {
        b.iter(|| {
            let mut in_frames = FRAMES as u64;
            let mut out_frames = (FRAMES + 512) as u64;
            converter
                .process(&src, &mut in_frames, &mut dst, &mut out_frames)
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_format_kernels, bench_full_converter);
criterion_main!(benches);

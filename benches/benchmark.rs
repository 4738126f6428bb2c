use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use spekta::{
    rank, resample_and_normalize, Corpus, ExtractorConfig, FeatureVector, Metadata, RasterImage,
    RecordId, ReferenceRecord, SpectrumExtractor,
};

const DIMENSIONS: usize = 200;
const CORPUS_SIZES: [usize; 3] = [100, 1_000, 10_000];

fn configure_criterion() -> Criterion {
    Criterion::default()
        .sample_size(10)
        .measurement_time(std::time::Duration::from_secs(10))
        .warm_up_time(std::time::Duration::from_secs(2))
        .configure_from_args()
}

fn random_corpus(rng: &mut StdRng, size: usize) -> Corpus {
    let records = (0..size)
        .filter_map(|i| {
            let values: Vec<f64> = (0..DIMENSIONS).map(|_| rng.gen::<f64>()).collect();
            FeatureVector::normalized(values).map(|vector| ReferenceRecord {
                id: RecordId(i as u64 + 1),
                label: format!("sample-{}", i),
                vector,
                metadata: Metadata::default(),
            })
        })
        .collect();
    Corpus::new(records)
}

fn synthetic_plot(rng: &mut StdRng) -> RasterImage {
    let (width, height) = (512, 400);
    let mut pixels = vec![1.0f32; width * height * 3];
    for x in 40..470 {
        let top = 245 - rng.gen_range(2..90);
        for y in top..=245 {
            let i = (y * width + x) * 3;
            pixels[i + 1] = 0.0;
            pixels[i + 2] = 0.0;
        }
    }
    RasterImage::rgb(width, height, pixels).expect("valid plot")
}

fn extract_signature(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let image = synthetic_plot(&mut rng);
    let extractor = SpectrumExtractor::new(ExtractorConfig::default()).expect("default config");

    c.bench_function("extract 512x400 plot", |b| {
        b.iter(|| extractor.extract(black_box(&image)).expect("extract"))
    });
}

fn resample_signature(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let signature: Vec<f64> = (0..430).map(|_| rng.gen::<f64>()).collect();

    c.bench_function("resample 430 -> 200", |b| {
        b.iter(|| resample_and_normalize(black_box(&signature), DIMENSIONS))
    });
}

fn rank_corpus(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let query = random_corpus(&mut rng, 1).records()[0].vector.clone();

    let mut group = c.benchmark_group("rank");
    for size in CORPUS_SIZES {
        let corpus = random_corpus(&mut rng, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &corpus, |b, corpus| {
            b.iter(|| rank(black_box(&query), corpus, 0.0).expect("rank"))
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = configure_criterion();
    targets = extract_signature, resample_signature, rank_corpus
}
criterion_main!(benches);

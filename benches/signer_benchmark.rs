//! Per-request signing cost, which is paid on every outbound call.
//!
//! Run with: `cargo bench --bench signer_benchmark`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http::HeaderMap;
use scanshield::{CryptoEngine, MemoryBackend, RequestSigner, SecureStore};

fn benchmark_signer(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let store = SecureStore::new("bench", Arc::new(MemoryBackend::new()));
    let engine = Arc::new(rt.block_on(CryptoEngine::initialize(store.clone())).unwrap());
    let signer = RequestSigner::new(engine, store);
    signer.store_token("bench-token").unwrap();

    let url = "https://api.scan.example/v1/scans?target=10.0.0.0%2F24";
    let body_hash = [0xabu8; 32];

    let mut group = c.benchmark_group("sign");
    group.bench_function("no_body", |b| {
        b.iter(|| signer.sign(black_box("GET"), black_box(url), None).unwrap());
    });
    group.bench_function("with_body_hash", |b| {
        b.iter(|| {
            signer
                .sign(black_box("POST"), black_box(url), Some(black_box(&body_hash[..])))
                .unwrap()
        });
    });
    group.bench_function("sign_into_headers", |b| {
        b.iter(|| {
            let mut headers = HeaderMap::new();
            signer.sign_into("GET", black_box(url), None, &mut headers).unwrap();
            headers
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_signer);
criterion_main!(benches);

use carechain_crypto::pipeline::{open_chunks, seal_chunks};
use carechain_crypto::{BaseNonce, ChunkCipher, ChunkPlan, DataKey, TAG_SIZE};

const AAD: &[u8] = b"record_id=bench";

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_seal_chunk(bencher: divan::Bencher, size: usize) {
    let cipher = ChunkCipher::new(&DataKey::generate(), BaseNonce::generate());
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            cipher
                .seal(0, divan::black_box(AAD), divan::black_box(&data))
                .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_open_chunk(bencher: divan::Bencher, size: usize) {
    let cipher = ChunkCipher::new(&DataKey::generate(), BaseNonce::generate());
    let data = make_data(size);
    let sealed = cipher.seal(0, AAD, &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            cipher
                .open(0, divan::black_box(AAD), divan::black_box(&sealed))
                .unwrap()
        });
}

/// 8 MiB record in 1 MiB chunks across the rayon pool.
#[divan::bench]
fn bench_seal_record(bencher: divan::Bencher) {
    let size = 8 << 20;
    let cipher = ChunkCipher::new(&DataKey::generate(), BaseNonce::generate());
    let data = make_data(size);
    let plan = ChunkPlan::for_plaintext(size, 1 << 20).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| seal_chunks(&cipher, &plan, AAD, divan::black_box(&data)).unwrap());
}

#[divan::bench]
fn bench_open_record(bencher: divan::Bencher) {
    let size = 8 << 20;
    let cipher = ChunkCipher::new(&DataKey::generate(), BaseNonce::generate());
    let data = make_data(size);
    let plan = ChunkPlan::for_plaintext(size, 1 << 20).unwrap();
    let (blob, _) = seal_chunks(&cipher, &plan, AAD, &data).unwrap();
    let ct_plan = ChunkPlan::for_ciphertext(size + plan.len() * TAG_SIZE, 1 << 20).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| open_chunks(&cipher, &ct_plan, AAD, divan::black_box(&blob)).unwrap());
}

fn main() {
    divan::main();
}

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use satsim_calldata::{selector, BinaryReader, BinaryWriter};
use satsim_types::{Address, U256};

fn bench_encode_call(c: &mut Criterion) {
    let target = Address::from_seed(b"pool");
    let amounts: Vec<U256> = (0..16u64).map(U256::from_u64).collect();
    let swap = selector("swap(address,uint256[])");

    c.bench_function("encode_cross_call", |b| {
        b.iter(|| {
            let mut w = BinaryWriter::with_capacity(1024);
            w.write_selector(black_box(swap)).write_address(black_box(&target));
            w.write_u256_array(black_box(&amounts)).unwrap();
            w.into_vec()
        })
    });
}

fn bench_decode_call(c: &mut Criterion) {
    let mut w = BinaryWriter::new();
    w.write_selector(selector("swap(address,uint256[])"))
        .write_address(&Address::from_seed(b"pool"));
    w.write_u256_array(&(0..16u64).map(U256::from_u64).collect::<Vec<_>>())
        .unwrap();
    let encoded = w.into_vec();

    c.bench_function("decode_cross_call", |b| {
        b.iter(|| {
            let mut r = BinaryReader::new(black_box(&encoded));
            let sel = r.read_selector().unwrap();
            let addr = r.read_address().unwrap();
            let values = r.read_u256_array().unwrap();
            (sel, addr, values)
        })
    });
}

fn bench_selector(c: &mut Criterion) {
    c.bench_function("selector_derivation", |b| {
        b.iter(|| selector(black_box("transfer(address,uint256)")))
    });
}

criterion_group!(benches, bench_encode_call, bench_decode_call, bench_selector);
criterion_main!(benches);

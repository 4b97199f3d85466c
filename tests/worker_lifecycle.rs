use alephium_gpu_miner::codec::{NewBlock, MESSAGE_TYPE_NEW_BLOCK};
use alephium_gpu_miner::device::{EmulatedBackend, EmulatedDeviceConfig};
use alephium_gpu_miner::hasher::{HasherKind, InputLayout, NONCE_SIZE};
use alephium_gpu_miner::job::{Job, MiningTemplate};
use alephium_gpu_miner::worker::{Worker, WorkerPool};
use alephium_gpu_miner::Error;
use assert_matches::assert_matches;
use bytes::BytesMut;
use std::collections::HashSet;
use std::sync::Arc;

fn layout() -> InputLayout {
    InputLayout::new(50)
}

fn backend(variant: HasherKind) -> EmulatedBackend {
    EmulatedBackend::new(EmulatedDeviceConfig {
        devices: 2,
        variant: Some(variant),
        grid_size: Some(2),
        block_size: Some(16),
        nonces_per_thread: 4,
    })
}

fn zero_header_template(target: &[u8]) -> Arc<MiningTemplate> {
    let job = Job::new(vec![0u8; 50], b"AB".to_vec(), target.to_vec(), 0, 0).unwrap();
    MiningTemplate::new(job, layout()).unwrap()
}

#[test]
fn test_end_to_end_serialization() {
    for variant in [HasherKind::Inline, HasherKind::Reference] {
        let worker = Worker::new(&backend(variant), 0, 1, layout()).unwrap();
        let template = zero_header_template(&[0x01]);
        worker.install(&template);
        worker.reset().unwrap();

        let state = worker.host_state();
        let mut expected_target = [0u8; 32];
        expected_target[31] = 0x01;
        assert_eq!(state.target(), &expected_target);
        assert_eq!(state.input().len(), 74);
        assert_eq!(state.buffer().len(), 128);
        assert_eq!(&state.input()[NONCE_SIZE..], &[0u8; 50][..]);
        assert!(state.buffer()[74..].iter().all(|b| *b == 0));

        worker.store_found(true);
        let mut out = BytesMut::new();
        let written = worker.serialize_block(&mut out).unwrap();

        assert_eq!(written, 85);
        assert_eq!(out.len(), 85);
        assert_eq!(u32::from_be_bytes(out[..4].try_into().unwrap()), 81);
        assert_eq!(out[4], MESSAGE_TYPE_NEW_BLOCK);
        assert_eq!(u32::from_be_bytes(out[5..9].try_into().unwrap()), 76);
        assert_eq!(&out[9..33], &state.nonce_prefix()[..]);
        assert_eq!(&out[83..], b"AB");

        let block = NewBlock::decode(&out, layout()).unwrap();
        assert_eq!(block.nonce, state.nonce_prefix());
        assert_eq!(&block.header_blob[..], &[0u8; 50][..]);
        assert_eq!(&block.txs_blob[..], b"AB");
    }
}

#[test]
fn test_serialize_appends_to_existing_buffer() {
    let worker = Worker::new(&backend(HasherKind::Inline), 0, 0, layout()).unwrap();
    worker.install(&zero_header_template(&[0x01]));
    worker.reset().unwrap();
    worker.store_found(true);

    let mut out = BytesMut::from(&b"prefix"[..]);
    let written = worker.serialize_block(&mut out).unwrap();
    assert_eq!(written, 85);
    assert_eq!(out.len(), 6 + 85);
    assert_eq!(&out[..6], b"prefix");
}

#[test]
fn test_reset_always_clears_search_state() {
    let worker = Worker::new(&backend(HasherKind::Reference), 0, 0, layout()).unwrap();
    worker.install(&zero_header_template(&[0xff; 32]));

    for _ in 0..8 {
        worker.store_found(true);
        worker.reset().unwrap();

        assert!(!worker.load_found());
        let state = worker.host_state();
        assert_eq!(state.hash_count(), 0);
        assert!(!state.found_good_hash());
    }
}

#[test]
fn test_nonce_prefixes_are_random() {
    let worker = Worker::new(&backend(HasherKind::Inline), 0, 0, layout()).unwrap();
    worker.install(&zero_header_template(&[0x01]));

    let mut prefixes = HashSet::new();
    let mut previous = None;
    for _ in 0..1000 {
        worker.reset().unwrap();
        let prefix = worker.host_state().nonce_prefix();
        assert_ne!(Some(prefix), previous);
        previous = Some(prefix);
        prefixes.insert(prefix);
    }
    assert_eq!(prefixes.len(), 1000);
}

#[test]
fn test_workers_draw_independent_prefixes() {
    let pool = WorkerPool::new(&backend(HasherKind::Inline), 4, layout()).unwrap();
    let template = zero_header_template(&[0x01]);

    let prefixes: HashSet<_> = pool
        .workers()
        .map(|worker| {
            worker.install(&template);
            worker.reset().unwrap();
            worker.host_state().nonce_prefix()
        })
        .collect();
    assert_eq!(prefixes.len(), pool.len());
    assert_eq!(template.ref_count(), pool.len());
}

#[test]
fn test_mismatched_header_rejected_before_reset() {
    let job = Job::new(vec![0u8; 49], Vec::new(), vec![0x01], 0, 0).unwrap();
    assert_matches!(MiningTemplate::new(job, layout()), Err(Error::Template { .. }));
}

#[test]
fn test_layout_capacity_is_block_aligned() {
    for header_len in [1usize, 39, 40, 41, 50, 104, 302] {
        let layout = InputLayout::new(header_len);
        let input_len = NONCE_SIZE + header_len;
        assert_eq!(layout.input_len(), input_len);
        assert_eq!(layout.capacity() % 64, 0);
        assert!(layout.capacity() >= input_len);
        assert!(layout.capacity() - input_len < 64);
    }
}

#[tokio::test]
async fn test_found_block_hashes_below_target() {
    let pool = WorkerPool::new(&backend(HasherKind::Reference), 1, layout()).unwrap();
    let slot = pool.slot(0).unwrap();
    let worker = slot.worker();
    worker.install(&zero_header_template(&[0xff; 32]));

    let mut found = false;
    for _ in 0..16 {
        worker.reset().unwrap();
        if slot.dispatch().await.unwrap() {
            found = true;
            break;
        }
    }
    assert!(found, "an unbounded target should be met within a few launches");

    let result = worker.search_result();
    let mut out = BytesMut::new();
    worker.serialize_block(&mut out).unwrap();
    let block = NewBlock::decode(&out, layout()).unwrap();

    assert_eq!(block.nonce, result.nonce);
    let hash = alephium_gpu_miner::crypto::double_blake3(&block.hash_input());
    assert_eq!(hash, result.hash);
    assert_eq!(alephium_gpu_miner::crypto::chain_index_of(&hash).flat(), 0);
}

use alephium_gpu_miner::codec::NewBlock;
use alephium_gpu_miner::crypto::{chain_index_of, double_blake3, is_solution};
use alephium_gpu_miner::device::{EmulatedBackend, EmulatedDeviceConfig};
use alephium_gpu_miner::hasher::{InputLayout, NONCE_SIZE};
use alephium_gpu_miner::job::{Job, MiningTemplate, TemplateBoard};
use alephium_gpu_miner::worker::Worker;
use alephium_gpu_miner::{ChainIndex, Target};
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const HEADER_LEN: usize = 32;

fn layout() -> InputLayout {
    InputLayout::new(HEADER_LEN)
}

fn worker() -> Worker {
    let backend = EmulatedBackend::new(EmulatedDeviceConfig::default());
    Worker::new(&backend, 0, 0, layout()).unwrap()
}

fn template(tag: u8, chain: ChainIndex) -> Arc<MiningTemplate> {
    let job = Job::new(
        vec![tag; HEADER_LEN],
        vec![tag],
        vec![0x01],
        chain.from_group,
        chain.to_group,
    )
    .unwrap();
    MiningTemplate::new(job, layout()).unwrap()
}

#[test]
fn test_superseded_template_outlives_external_holders() {
    let worker = worker();
    let chain = ChainIndex::new(0, 0).unwrap();
    let a = template(1, chain);
    let b = template(2, chain);

    assert!(worker.install(&a).is_none());
    assert_eq!(a.ref_count(), 1);

    // Someone else still holds A when B replaces it
    let external = a.retain();
    assert_eq!(a.ref_count(), 2);

    let superseded = worker.install(&b).unwrap();
    assert!(Arc::ptr_eq(superseded.template(), &a));
    assert_eq!(a.ref_count(), 2);
    assert_eq!(b.ref_count(), 1);

    drop(superseded);
    assert_eq!(a.ref_count(), 1);
    assert_eq!(external.job().header_blob(), &[1u8; HEADER_LEN][..]);

    drop(external);
    assert_eq!(a.ref_count(), 0);
    assert_eq!(b.ref_count(), 1);

    drop(worker);
    assert_eq!(b.ref_count(), 0);
}

#[test]
fn test_concurrent_install_and_reset() {
    const INSTALLERS: usize = 4;
    const ROUNDS: usize = 2_000;

    let worker = Arc::new(worker());
    let chain = ChainIndex::new(1, 3).unwrap();
    let templates: Arc<Vec<_>> = Arc::new((0..8).map(|tag| template(tag, chain)).collect());
    let barrier = Arc::new(Barrier::new(INSTALLERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    worker.install(&templates[0]);

    let installers: Vec<_> = (0..INSTALLERS)
        .map(|i| {
            let worker = Arc::clone(&worker);
            let templates = Arc::clone(&templates);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let next = &templates[(i + round) % templates.len()];
                    if let Some(superseded) = worker.install(next) {
                        assert!(superseded.ref_count() >= 1);
                    }
                }
            })
        })
        .collect();

    let resetter = {
        let worker = Arc::clone(&worker);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            barrier.wait();
            let mut resets = 0usize;
            while !done.load(Ordering::SeqCst) || resets == 0 {
                let lease = worker.reset().unwrap();
                // The template the hasher was loaded from is still counted
                assert!(lease.ref_count() >= 1);
                let tag = lease.job().header_blob()[0];
                let state = worker.host_state();
                assert!(state.input()[24..].iter().all(|b| *b == tag));

                let pinned = worker.pinned_template().unwrap();
                assert!(pinned.ref_count() >= 1);
                resets += 1;
            }
            resets
        })
    };

    for installer in installers {
        installer.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let resets = resetter.join().unwrap();
    assert!(resets > 0);

    // Only the published lease and the pinned one remain
    let live: usize = templates.iter().map(|t| t.ref_count()).sum();
    assert!((1..=2).contains(&live), "unexpected live leases: {}", live);

    drop(worker);
    assert!(templates.iter().all(|t| t.ref_count() == 0));
}

#[test]
fn test_board_spreads_workers_across_chains() {
    let board = TemplateBoard::new();
    let busy = ChainIndex::new(0, 1).unwrap();
    let idle = ChainIndex::new(2, 2).unwrap();
    board.publish(template(1, busy));
    board.publish(template(2, idle));

    let first = board.next_template().unwrap();
    let second = board.next_template().unwrap();
    assert_eq!(first.template().chain_index(), busy);
    assert_eq!(second.template().chain_index(), idle);
    assert_eq!(board.active_workers(busy), 1);
    assert_eq!(board.active_workers(idle), 1);

    drop(first);
    drop(second);
    assert_eq!(board.active_workers(busy), 0);
    assert_eq!(board.active_workers(idle), 0);
}

#[test]
fn test_board_publish_while_workers_mine() {
    let board = Arc::new(TemplateBoard::new());
    let chain = ChainIndex::new(3, 0).unwrap();
    board.publish(template(0, chain));

    let publisher = {
        let board = Arc::clone(&board);
        thread::spawn(move || {
            for tag in 1..=200u8 {
                board.publish(template(tag, chain));
            }
        })
    };

    let miners: Vec<_> = (0..4)
        .map(|_| {
            let board = Arc::clone(&board);
            thread::spawn(move || {
                let worker = worker();
                for _ in 0..200 {
                    let ticket = board.next_template().unwrap();
                    drop(worker.install(ticket.template()));
                    let lease = worker.reset().unwrap();
                    assert!(lease.ref_count() >= 1);
                }
            })
        })
        .collect();

    publisher.join().unwrap();
    for miner in miners {
        miner.join().unwrap();
    }

    assert_eq!(board.active_workers(chain), 0);
    let latest = board.latest(chain).unwrap();
    assert_eq!(latest.job().header_blob()[0], 200);
    assert_eq!(latest.ref_count(), 0);
}

#[test]
fn test_reset_during_launch_never_mixes_templates() {
    let backend = EmulatedBackend::new(EmulatedDeviceConfig {
        grid_size: Some(64),
        block_size: Some(64),
        nonces_per_thread: 64,
        ..Default::default()
    });
    let worker = Worker::new(&backend, 0, 0, layout()).unwrap();
    let chain = ChainIndex::new(0, 0).unwrap();

    let mut hard = vec![0xff; 32];
    hard[..2].copy_from_slice(&[0, 0]);
    let a_job = Job::new(vec![0xaa; HEADER_LEN], b"AA".to_vec(), hard, 0, 0).unwrap();
    let a = MiningTemplate::new(a_job, layout()).unwrap();
    let b_job = Job::new(vec![0xbb; HEADER_LEN], b"BB".to_vec(), vec![0xff; 32], 0, 0).unwrap();
    let b = MiningTemplate::new(b_job, layout()).unwrap();

    worker.install(&a);
    worker.reset().unwrap();

    let (tx, rx) = mpsc::channel();
    let done = tx.clone();
    worker
        .launch(move |found| {
            let _ = done.send(found);
        })
        .unwrap();

    // Move to B while A's search is most likely still running
    thread::sleep(Duration::from_millis(5));
    drop(worker.install(&b));
    worker.reset().unwrap();

    rx.recv().unwrap();
    assert!(!worker.mirror_found());
    let state = worker.host_state();
    assert!(state.input()[NONCE_SIZE..].iter().all(|byte| *byte == 0xbb));
    assert_eq!(state.hash_count(), 0);

    worker
        .launch(move |found| {
            let _ = tx.send(found);
        })
        .unwrap();
    assert!(rx.recv().unwrap());
    assert!(worker.mirror_found());

    let mut frame = BytesMut::new();
    worker.serialize_block(&mut frame).unwrap();
    let block = NewBlock::decode(&frame, layout()).unwrap();
    assert_eq!(&block.header_blob[..], b.job().header_blob());
    assert_eq!(&block.txs_blob[..], b"BB");

    let hash = double_blake3(&block.hash_input());
    assert_eq!(chain_index_of(&hash), chain);
    assert!(is_solution(&hash, &Target::max(), chain));
}

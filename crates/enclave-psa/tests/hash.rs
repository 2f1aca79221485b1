//! Multi-part hashing against the software enclave.

#![allow(clippy::arithmetic_side_effects)]

use enclave_psa::{
    Capabilities, DriverConfig, Error, Hash, HashOperation,
    test_util::{SimDriver, assert_no_leaks, sim_driver, sim_driver_with},
};
use hex_literal::hex;
use proptest::prelude::*;

const HASHES: [Hash; 5] = [
    Hash::Sha1,
    Hash::Sha224,
    Hash::Sha256,
    Hash::Sha384,
    Hash::Sha512,
];

fn one_shot(driver: &SimDriver, alg: Hash, input: &[u8]) -> Vec<u8> {
    let mut out = [0u8; 64];
    let n = driver
        .hash_compute(alg, input, &mut out)
        .expect("should hash");
    out[..n].to_vec()
}

fn finish(driver: &SimDriver, op: &mut HashOperation) -> Vec<u8> {
    let mut out = [0u8; 64];
    let n = driver.hash_finish(op, &mut out).expect("should finish");
    out[..n].to_vec()
}

#[test_log::test]
fn test_multipart_matches_one_shot() {
    let driver = sim_driver();
    let input = (0..=255u8).cycle().take(1000).collect::<Vec<_>>();
    for alg in HASHES {
        for chunk in [1, 7, 64, 999] {
            let mut op = HashOperation::new();
            driver.hash_setup(&mut op, alg).expect("should set up");
            assert_eq!(op.alg(), Some(alg));
            for part in input.chunks(chunk) {
                driver.hash_update(&mut op, part).expect("should update");
            }
            assert_eq!(
                finish(&driver, &mut op),
                one_shot(&driver, alg, &input),
                "{alg:?} in chunks of {chunk}"
            );
            assert!(!op.is_active());
        }
    }
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_empty_message() {
    let driver = sim_driver();
    let mut op = HashOperation::new();
    driver
        .hash_setup(&mut op, Hash::Sha256)
        .expect("should set up");
    driver.hash_update(&mut op, &[]).expect("should update");
    assert_eq!(
        finish(&driver, &mut op),
        hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
    );
}

#[test_log::test]
fn test_clone_mid_stream() {
    let driver = sim_driver();
    let mut op = HashOperation::new();
    driver
        .hash_setup(&mut op, Hash::Sha256)
        .expect("should set up");
    driver.hash_update(&mut op, b"a").expect("should update");

    let mut copy = HashOperation::new();
    driver
        .hash_clone(&mut op, &mut copy)
        .expect("should clone");
    assert_eq!(copy.alg(), Some(Hash::Sha256));

    driver.hash_update(&mut op, b"bc").expect("should update");
    driver
        .hash_update(&mut copy, b"xyz")
        .expect("should update");
    assert_eq!(
        finish(&driver, &mut op),
        hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
    assert_eq!(
        finish(&driver, &mut copy),
        one_shot(&driver, Hash::Sha256, b"axyz")
    );
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_state_errors() {
    let driver = sim_driver();
    let mut op = HashOperation::new();
    let mut out = [0u8; 64];

    assert_eq!(driver.hash_update(&mut op, b"x"), Err(Error::BadState));
    assert_eq!(driver.hash_finish(&mut op, &mut out), Err(Error::BadState));
    assert_eq!(
        driver.hash_clone(&mut op, &mut HashOperation::new()),
        Err(Error::BadState)
    );
    assert_eq!(driver.hash_abort(&mut op), Ok(()));

    driver
        .hash_setup(&mut op, Hash::Sha384)
        .expect("should set up");
    assert_eq!(driver.hash_setup(&mut op, Hash::Sha256), Err(Error::BadState));

    // Too small a buffer leaves the operation running.
    assert_eq!(
        driver.hash_finish(&mut op, &mut out[..47]),
        Err(Error::BufferTooSmall)
    );
    assert!(op.is_active());

    let mut busy = HashOperation::new();
    driver
        .hash_setup(&mut busy, Hash::Sha1)
        .expect("should set up");
    assert_eq!(driver.hash_clone(&mut op, &mut busy), Err(Error::BadState));

    driver.hash_abort(&mut op).expect("should abort");
    assert!(!op.is_active());
    driver
        .hash_setup(&mut op, Hash::Sha256)
        .expect("aborted operations can be reused");
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_sha3_needs_capability() {
    let mut op = HashOperation::new();
    assert!(matches!(
        sim_driver().hash_setup(&mut op, Hash::Sha3_256),
        Err(Error::NotSupported(_))
    ));
    assert!(!op.is_active());

    let driver = sim_driver_with(DriverConfig {
        capabilities: Capabilities {
            sha3: true,
            ..Capabilities::base()
        },
    });
    driver
        .hash_setup(&mut op, Hash::Sha3_256)
        .expect("should set up");
    driver.hash_update(&mut op, b"abc").expect("should update");
    assert_eq!(
        finish(&driver, &mut op),
        hex!("3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532")
    );
}

proptest! {
    #[test]
    fn test_any_split_matches_one_shot(
        data in proptest::collection::vec(any::<u8>(), 0..300),
        split in any::<prop::sample::Index>(),
    ) {
        let driver = sim_driver();
        let (head, tail) = data.split_at(split.index(data.len() + 1));
        let mut op = HashOperation::new();
        driver.hash_setup(&mut op, Hash::Sha512).expect("should set up");
        driver.hash_update(&mut op, head).expect("should update");
        driver.hash_update(&mut op, tail).expect("should update");
        prop_assert_eq!(finish(&driver, &mut op), one_shot(&driver, Hash::Sha512, &data));
    }
}

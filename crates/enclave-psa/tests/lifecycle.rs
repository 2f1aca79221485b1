//! Locking, resource cleanup and failure handling.

#![allow(clippy::arithmetic_side_effects)]

use std::thread;

use enclave_psa::{
    AeadAlg, Algorithm, Capabilities, CipherAlg, Driver, DriverConfig, EccFamily, Error, Hash,
    HashOperation, KeyAgreementAlg, KeyAttributes, KeyLocation, KeyType, LockHook, MacAlg,
    MacOperation, SignAlg, status_code,
    test_util::{
        CountingHook, Op, SimDriver, SoftEnclave, assert_no_leaks, sim_driver, sim_driver_with,
        stats,
    },
};
use proptest::prelude::*;

const P256: KeyType = KeyType::EccKeyPair(EccFamily::SecpR1);

#[test_log::test]
fn test_lock_hook_brackets_every_call() {
    let driver = Driver::with_lock_hook(
        SoftEnclave::new(),
        DriverConfig::default(),
        CountingHook::new(),
    );
    let mut out = [0u8; 32];
    driver
        .hash_compute(Hash::Sha256, b"abc", &mut out)
        .expect("should hash");
    driver.get_entropy(&mut out).expect("should read entropy");
    let hook = driver.lock_hook();
    assert_eq!(hook.locks(), 2);
    assert_eq!(hook.unlocks(), 2);
}

#[test_log::test]
fn test_lock_failure() {
    let driver = Driver::with_lock_hook(
        SoftEnclave::new(),
        DriverConfig::default(),
        CountingHook::new(),
    );
    let mut out = [0u8; 32];

    driver.lock_hook().set_fail_lock(true);
    assert_eq!(
        driver.hash_compute(Hash::Sha256, b"abc", &mut out),
        Err(Error::ServiceFailure)
    );
    driver.lock_hook().set_fail_lock(false);
    assert_eq!(stats(&driver).calls, 0);

    // The work is done, but the caller still hears about the
    // lock.
    driver.lock_hook().set_fail_unlock(true);
    assert_eq!(
        driver.hash_compute(Hash::Sha256, b"abc", &mut out),
        Err(Error::ServiceFailure)
    );
    driver.lock_hook().set_fail_unlock(false);
    assert_ne!(stats(&driver).calls, 0);
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_status_codes() {
    let driver = sim_driver();
    let mut out = [0u8; 32];
    assert_eq!(
        status_code(&driver.hash_compute(Hash::Sha256, b"abc", &mut out)),
        0
    );
    assert_eq!(
        status_code(&driver.hash_compute(Hash::Sha256, b"abc", &mut out[..31])),
        -138
    );
    assert_eq!(
        status_code(&driver.hash_compute(Hash::Sha3_512, b"abc", &mut out)),
        -134
    );
    assert_eq!(status_code(&driver.get_entropy(&mut [])), -135);
    assert_eq!(
        status_code(&driver.mac_update(&mut MacOperation::new(), b"x")),
        -137
    );
}

#[test_log::test]
fn test_capability_profiles() {
    let key = [0x0bu8; 20];
    let attrs = KeyAttributes::new(KeyType::Hmac, 160);
    let alg = Algorithm::hmac(Hash::Sha512);
    let mut mac = [0u8; 64];

    let base = sim_driver_with(DriverConfig {
        capabilities: Capabilities::base(),
    });
    assert!(matches!(
        base.mac_compute(&attrs, &key, alg, b"Hi There", &mut mac),
        Err(Error::NotSupported(_))
    ));

    let extended = sim_driver_with(DriverConfig {
        capabilities: Capabilities::extended(),
    });
    assert_eq!(
        extended.mac_compute(&attrs, &key, alg, b"Hi There", &mut mac),
        Ok(64)
    );
    // RFC 4231, test case 1.
    assert_eq!(
        mac[..8],
        [0x87, 0xaa, 0x7c, 0xde, 0xa5, 0xef, 0x61, 0x9d]
    );

    let single_shot = sim_driver_with(DriverConfig {
        capabilities: Capabilities {
            mac_multipart: false,
            ..Capabilities::base()
        },
    });
    let mut op = MacOperation::new();
    assert!(matches!(
        single_shot.mac_sign_setup(&mut op, &attrs, &key, Algorithm::hmac(Hash::Sha256)),
        Err(Error::NotSupported(_))
    ));
    assert_no_leaks(&extended);
}

#[test_log::test]
fn test_driver_is_shared_between_threads() {
    let driver = sim_driver();
    let attrs = KeyAttributes::new(KeyType::Hmac, 128);
    let alg = Algorithm::hmac(Hash::Sha256);
    let mut want = [0u8; 32];
    driver
        .mac_compute(&attrs, &[1; 16], alg, b"shared", &mut want)
        .expect("should compute");

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..16 {
                    let mut mac = [0u8; 32];
                    driver
                        .mac_compute(&attrs, &[1; 16], alg, b"shared", &mut mac)
                        .expect("should compute");
                    assert_eq!(mac, want);
                }
            });
        }
    });
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_aborted_mac_frees_its_key() {
    let driver = sim_driver();
    let attrs = KeyAttributes::new(KeyType::Aes, 128);
    let mut op = MacOperation::new();
    driver
        .mac_sign_setup(&mut op, &attrs, &[0; 16], Algorithm::cmac())
        .expect("should set up");
    driver.mac_update(&mut op, b"partial").expect("should update");
    let live = driver
        .with_session(|se| se.live_objects())
        .expect("lock should not fail");
    assert_eq!(live, 1);
    driver.mac_abort(&mut op).expect("should abort");
    assert_no_leaks(&driver);
}

fn hooked_driver() -> SimDriver<CountingHook> {
    Driver::with_lock_hook(
        SoftEnclave::new(),
        DriverConfig::default(),
        CountingHook::new(),
    )
}

#[test_log::test]
fn test_mac_setup_survives_unlock_failure() {
    let driver = hooked_driver();
    let attrs = KeyAttributes::new(KeyType::Aes, 128);
    let mut op = MacOperation::new();

    driver.lock_hook().set_fail_unlock(true);
    assert_eq!(
        driver.mac_sign_setup(&mut op, &attrs, &[3; 16], Algorithm::cmac()),
        Err(Error::ServiceFailure)
    );
    driver.lock_hook().set_fail_unlock(false);
    // The key object was created, so the operation owns it.
    assert!(op.is_active());

    driver.mac_abort(&mut op).expect("should abort");
    assert!(!op.is_active());
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_mac_abort_retries_after_lock_failure() {
    let driver = hooked_driver();
    let attrs = KeyAttributes::new(KeyType::Hmac, 128);
    let mut op = MacOperation::new();
    driver
        .mac_sign_setup(&mut op, &attrs, &[3; 16], Algorithm::hmac(Hash::Sha256))
        .expect("should set up");

    driver.lock_hook().set_fail_lock(true);
    assert_eq!(driver.mac_abort(&mut op), Err(Error::ServiceFailure));
    assert!(op.is_active());
    driver.lock_hook().set_fail_lock(false);

    driver.mac_abort(&mut op).expect("should abort");
    assert!(!op.is_active());
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_mac_finish_retries_after_lock_failure() {
    let driver = hooked_driver();
    let attrs = KeyAttributes::new(KeyType::Hmac, 128);
    let alg = Algorithm::hmac(Hash::Sha256);
    let key = [3u8; 16];
    let mut want = [0u8; 32];
    driver
        .mac_compute(&attrs, &key, alg, b"locked out", &mut want)
        .expect("should compute");

    let mut op = MacOperation::new();
    driver
        .mac_sign_setup(&mut op, &attrs, &key, alg)
        .expect("should set up");
    driver
        .mac_update(&mut op, b"locked out")
        .expect("should update");

    let mut mac = [0u8; 32];
    driver.lock_hook().set_fail_lock(true);
    assert_eq!(
        driver.mac_sign_finish(&mut op, &mut mac),
        Err(Error::ServiceFailure)
    );
    assert!(op.is_active());
    driver.lock_hook().set_fail_lock(false);

    assert_eq!(driver.mac_sign_finish(&mut op, &mut mac), Ok(32));
    assert_eq!(mac, want);
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_mac_finish_cleans_up_on_unlock_failure() {
    let driver = hooked_driver();
    let attrs = KeyAttributes::new(KeyType::Aes, 128);
    let mut op = MacOperation::new();
    driver
        .mac_verify_setup(&mut op, &attrs, &[3; 16], Algorithm::cmac())
        .expect("should set up");

    driver.lock_hook().set_fail_unlock(true);
    assert_eq!(
        driver.mac_verify_finish(&mut op, &[0; 16]),
        Err(Error::ServiceFailure)
    );
    driver.lock_hook().set_fail_unlock(false);
    // The key object was destroyed before the lock was
    // released.
    assert!(!op.is_active());
    assert_no_leaks(&driver);
}

/// Runs `op` once cleanly to count its session calls, then once
/// per call with that call failing, on a fresh enclave each
/// time.
///
/// Whatever fails, nothing may be left behind in the enclave,
/// unless the failing call was the one releasing it.
fn check_faults<T: std::fmt::Debug>(op: impl Fn(&SimDriver) -> Result<T, Error>) {
    let driver = sim_driver();
    let before = stats(&driver).calls;
    op(&driver).expect("operation should succeed");
    let calls = stats(&driver).calls - before;
    assert_ne!(calls, 0);

    for n in 0..calls {
        let driver = sim_driver();
        driver
            .with_session(|se| se.fail_nth_call(n))
            .expect("lock should not fail");
        let res = op(&driver);
        let faults = driver
            .with_session(|se| se.injected_faults().to_vec())
            .expect("lock should not fail");
        assert_eq!(faults.len(), 1, "call {n}");
        if faults[0].is_cleanup() {
            continue;
        }
        assert!(res.is_err(), "call {n} ({:?}) failed silently", faults[0]);
        assert_no_leaks(&driver);
    }
}

#[test_log::test]
fn test_faults_in_cipher() {
    check_faults(|driver| {
        let mut out = [0u8; 32];
        driver.cipher_encrypt(
            &KeyAttributes::new(KeyType::Aes, 128),
            &[9; 16],
            Algorithm::Cipher(CipherAlg::CbcNoPadding),
            &[0; 16],
            &[1; 32],
            &mut out,
        )
    });
}

#[test_log::test]
fn test_faults_in_aead() {
    check_faults(|driver| {
        let mut out = [0u8; 48];
        driver.aead_encrypt(
            &KeyAttributes::new(KeyType::Aes, 256),
            &[9; 32],
            Algorithm::aead(AeadAlg::Ccm),
            &[0; 13],
            b"aad",
            &[1; 32],
            &mut out,
        )
    });
}

#[test_log::test]
fn test_faults_in_aead_decrypt() {
    let attrs = KeyAttributes::new(KeyType::Aes, 256);
    let key = [9u8; 32];
    let alg = Algorithm::aead(AeadAlg::Gcm);
    let nonce = [0u8; 12];
    let mut sealed = [0u8; 48];
    sim_driver()
        .aead_encrypt(&attrs, &key, alg, &nonce, b"aad", &[1; 32], &mut sealed)
        .expect("should seal");

    let open = |driver: &SimDriver, out: &mut [u8]| {
        driver.aead_decrypt(&attrs, &key, alg, &nonce, b"aad", &sealed, out)
    };
    let driver = sim_driver();
    let before = stats(&driver).calls;
    open(&driver, &mut [0u8; 32]).expect("should open");
    let calls = stats(&driver).calls - before;

    for n in 0..calls {
        let driver = sim_driver();
        driver
            .with_session(|se| se.fail_nth_call(n))
            .expect("lock should not fail");
        let mut out = [0xffu8; 32];
        let res = open(&driver, &mut out);
        let fault = driver
            .with_session(|se| se.injected_faults()[0])
            .expect("lock should not fail");
        assert_ne!(res, Err(Error::GenericError), "call {n} ({fault:?})");
        match fault {
            Op::AeadInit | Op::Aead | Op::ContextFree => {
                assert_eq!(res, Err(Error::InvalidSignature), "call {n} ({fault:?})");
            }
            Op::KeyObjectFree | Op::EraseKey => {
                assert_eq!(res, Ok(32), "call {n} ({fault:?})");
                continue;
            }
            _ => assert!(res.is_err(), "call {n} ({fault:?}) failed silently"),
        }
        assert_eq!(out, [0; 32], "call {n} ({fault:?}) left plaintext behind");
        if !fault.is_cleanup() {
            assert_no_leaks(&driver);
        }
    }
}

#[test_log::test]
fn test_faults_in_mac() {
    check_faults(|driver| {
        let mut mac = [0u8; 32];
        driver.mac_compute(
            &KeyAttributes::new(KeyType::Hmac, 128),
            &[9; 16],
            Algorithm::hmac(Hash::Sha256),
            b"input",
            &mut mac,
        )
    });
}

#[test_log::test]
fn test_faults_in_multipart_mac() {
    check_faults(|driver| {
        let attrs = KeyAttributes::new(KeyType::Aes, 128);
        let mut op = MacOperation::new();
        let mut mac = [0u8; 16];
        let res = driver
            .mac_sign_setup(&mut op, &attrs, &[9; 16], Algorithm::cmac())
            .and_then(|()| driver.mac_update(&mut op, b"first"))
            .and_then(|()| driver.mac_update(&mut op, b"second"))
            .and_then(|()| driver.mac_sign_finish(&mut op, &mut mac));
        if op.is_active() {
            // Clear the fault so the abort itself can succeed.
            driver
                .with_session(|se| se.fail_nth_call(u64::MAX))
                .expect("lock should not fail");
            driver.mac_abort(&mut op).expect("should abort");
        }
        res
    });
}

#[test_log::test]
fn test_faults_in_transparent_sign() {
    let attrs = KeyAttributes::new(P256, 256);
    let mut key = [0u8; 32];
    sim_driver()
        .generate_key(&attrs, &mut key)
        .expect("should generate");
    check_faults(|driver| {
        let mut sig = [0u8; 64];
        driver.sign_hash(
            &attrs,
            &key,
            Algorithm::ecdsa(Hash::Sha256),
            &[7; 32],
            &mut sig,
        )
    });
}

#[test_log::test]
fn test_key_erase_failure_does_not_fail_signing() {
    let attrs = KeyAttributes::new(P256, 256);
    let alg = Algorithm::ecdsa(Hash::Sha256);
    let driver = sim_driver();
    let mut key = [0u8; 32];
    driver.generate_key(&attrs, &mut key).expect("should generate");
    let mut public = [0u8; 65];
    driver
        .export_public_key(&attrs, &key, &mut public)
        .expect("should export");

    driver
        .with_session(|se| se.fail_on(Op::EraseKey))
        .expect("lock should not fail");
    let mut sig = [0u8; 64];
    assert_eq!(
        driver.sign_hash(&attrs, &key, alg, &[7; 32], &mut sig),
        Ok(64)
    );
    let faults = driver
        .with_session(|se| se.injected_faults().len())
        .expect("lock should not fail");
    assert_ne!(faults, 0);
    driver
        .with_session(|se| se.clear_faults())
        .expect("lock should not fail");

    let public_attrs = KeyAttributes::new(KeyType::EccPublicKey(EccFamily::SecpR1), 256);
    driver
        .verify_hash(&public_attrs, &public, alg, &[7; 32], &sig)
        .expect("signature should verify");
    // Erasing failed, but every object was still released.
    assert_no_leaks(&driver);
}

#[test_log::test]
fn test_faults_in_multipart_hash() {
    check_faults(|driver| {
        let mut op = HashOperation::new();
        let mut copy = HashOperation::new();
        let mut out = [0u8; 32];
        driver
            .hash_setup(&mut op, Hash::Sha256)
            .and_then(|()| driver.hash_update(&mut op, b"first"))
            .and_then(|()| driver.hash_clone(&mut op, &mut copy))
            .and_then(|()| driver.hash_update(&mut copy, b"second"))
            .and_then(|()| driver.hash_finish(&mut copy, &mut out))
            .and_then(|_| driver.hash_finish(&mut op, &mut out))
    });
}

#[test_log::test]
fn test_faults_in_key_agreement() {
    let attrs = KeyAttributes::new(P256, 256);
    let driver = sim_driver();
    let mut key = [0u8; 32];
    driver.generate_key(&attrs, &mut key).expect("should generate");
    let mut peer = [0u8; 65];
    driver
        .export_public_key(&attrs, &key, &mut peer)
        .expect("should export");
    check_faults(|driver| {
        let mut out = [0u8; 32];
        driver.key_agreement(
            &attrs,
            &key,
            Algorithm::KeyAgreement(KeyAgreementAlg::Ecdh),
            &peer,
            &mut out,
        )
    });
}

#[test_log::test]
fn test_faults_in_opaque_generate() {
    check_faults(|driver| {
        let mut blob = [0u8; 120];
        driver.generate_key(
            &KeyAttributes::new(P256, 256).with_location(KeyLocation::DieUnique),
            &mut blob,
        )
    });
}

/// A request the enclave cannot serve.
#[derive(Clone, Debug)]
enum Unsupported {
    Cipher(CipherAlg),
    Aead(AeadAlg),
    Mac(MacAlg),
    Hash(Hash),
    Sign(SignAlg),
    Agreement(KeyAgreementAlg),
}

fn unsupported() -> impl Strategy<Value = Unsupported> {
    prop_oneof![
        prop_oneof![
            Just(CipherAlg::Cfb),
            Just(CipherAlg::Ofb),
            Just(CipherAlg::Xts),
            Just(CipherAlg::CbcPkcs7),
        ]
        .prop_map(Unsupported::Cipher),
        Just(Unsupported::Aead(AeadAlg::ChaCha20Poly1305)),
        prop_oneof![
            Just(MacAlg::CbcMac),
            Just(MacAlg::Hmac(Hash::Sha1)),
            Just(MacAlg::Hmac(Hash::Sha384)),
            Just(MacAlg::Hmac(Hash::Sha3_256)),
        ]
        .prop_map(Unsupported::Mac),
        prop_oneof![
            Just(Hash::Sha3_224),
            Just(Hash::Sha3_256),
            Just(Hash::Sha3_384),
            Just(Hash::Sha3_512),
        ]
        .prop_map(Unsupported::Hash),
        prop_oneof![
            Just(SignAlg::RsaPkcs1v15(Hash::Sha256)),
            Just(SignAlg::RsaPss(Hash::Sha256)),
            Just(SignAlg::DeterministicEcdsa(Hash::Sha256)),
        ]
        .prop_map(Unsupported::Sign),
        prop_oneof![
            Just(KeyAgreementAlg::Ffdh),
            Just(KeyAgreementAlg::EcdhCkdf),
        ]
        .prop_map(Unsupported::Agreement),
    ]
}

fn run<L: LockHook>(driver: &SimDriver<L>, req: &Unsupported, data: &[u8]) -> Result<usize, Error> {
    let mut out = [0u8; 256];
    match *req {
        Unsupported::Cipher(mode) => driver.cipher_encrypt(
            &KeyAttributes::new(KeyType::Aes, 128),
            &[1; 16],
            Algorithm::Cipher(mode),
            &[0; 16],
            data,
            &mut out,
        ),
        Unsupported::Aead(aead) => driver.aead_encrypt(
            &KeyAttributes::new(KeyType::ChaCha20, 256),
            &[1; 32],
            Algorithm::aead(aead),
            &[0; 12],
            &[],
            data,
            &mut out,
        ),
        Unsupported::Mac(mac) => {
            let key_type = match mac {
                MacAlg::Hmac(_) => KeyType::Hmac,
                _ => KeyType::Aes,
            };
            driver.mac_compute(
                &KeyAttributes::new(key_type, 128),
                &[1; 16],
                Algorithm::Mac { mac, len: None },
                data,
                &mut out,
            )
        }
        Unsupported::Hash(hash) => driver.hash_compute(hash, data, &mut out),
        Unsupported::Sign(sign) => {
            let key_type = match sign {
                SignAlg::RsaPkcs1v15(_) | SignAlg::RsaPss(_) => KeyType::RsaKeyPair,
                _ => P256,
            };
            driver.sign_message(
                &KeyAttributes::new(key_type, 256),
                &[1; 32],
                Algorithm::Sign(sign),
                data,
                &mut out,
            )
        }
        Unsupported::Agreement(ka) => driver.key_agreement(
            &KeyAttributes::new(P256, 256),
            &[1; 32],
            Algorithm::KeyAgreement(ka),
            &[4; 65],
            &mut out,
        ),
    }
}

proptest! {
    #[test]
    fn test_unsupported_requests_never_reach_the_enclave(
        req in unsupported(),
        data in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        let driver = Driver::with_lock_hook(
            SoftEnclave::new(),
            DriverConfig { capabilities: Capabilities::base() },
            CountingHook::new(),
        );
        let res = run(&driver, &req, &data);
        prop_assert!(res.is_err(), "{req:?} succeeded");
        prop_assert_eq!(driver.lock_hook().locks(), 0);
        prop_assert_eq!(stats(&driver).calls, 0);
    }
}

//! Key generation, signatures and key agreement against the
//! software enclave.

#![allow(clippy::arithmetic_side_effects)]

use enclave_psa::{
    Algorithm, EccFamily, Error, Hash, KeyAgreementAlg, KeyAttributes, KeyLocation, KeyType,
    SignAlg, UNCOMPRESSED_POINT,
    test_util::{SimDriver, assert_no_leaks, provision_key, sim_driver},
};
use hex_literal::hex;
use test_log::test;

const P256: KeyType = KeyType::EccKeyPair(EccFamily::SecpR1);
const P256_PUBLIC: KeyType = KeyType::EccPublicKey(EccFamily::SecpR1);
const X25519: KeyType = KeyType::EccKeyPair(EccFamily::Montgomery);
const ED25519: KeyType = KeyType::EccKeyPair(EccFamily::TwistedEdwards);

/// SHA-256("abc").
const DIGEST: [u8; 32] = hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");

fn generate(driver: &SimDriver, attrs: &KeyAttributes) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let n = driver.generate_key(attrs, &mut buf).expect("should generate");
    buf[..n].to_vec()
}

fn public_key(driver: &SimDriver, attrs: &KeyAttributes, key: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; 133];
    let n = driver
        .export_public_key(attrs, key, &mut buf)
        .expect("should export");
    buf[..n].to_vec()
}

#[test]
fn test_hash_compute() {
    let driver = sim_driver();
    let mut out = [0u8; 64];
    assert_eq!(driver.hash_compute(Hash::Sha256, b"abc", &mut out), Ok(32));
    assert_eq!(out[..32], DIGEST);
    assert_eq!(
        driver.hash_compute(Hash::Sha512, b"abc", &mut out[..63]),
        Err(Error::BufferTooSmall)
    );
    assert!(matches!(
        driver.hash_compute(Hash::Sha3_256, b"abc", &mut out),
        Err(Error::NotSupported(_))
    ));
    assert_no_leaks(&driver);
}

#[test]
fn test_get_entropy() {
    let driver = sim_driver();
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    assert_eq!(driver.get_entropy(&mut a), Ok(256));
    assert_eq!(driver.get_entropy(&mut b), Ok(256));
    assert_ne!(a, b);
    assert!(matches!(
        driver.get_entropy(&mut []),
        Err(Error::InvalidArgument(_))
    ));
    assert_no_leaks(&driver);
}

#[test]
fn test_transparent_ecdsa() {
    let driver = sim_driver();
    let attrs = KeyAttributes::new(P256, 256);
    let alg = Algorithm::ecdsa(Hash::Sha256);

    let key = generate(&driver, &attrs);
    assert_eq!(key.len(), 32);
    let public = public_key(&driver, &attrs, &key);
    assert_eq!(public.len(), 65);
    assert_eq!(public[0], UNCOMPRESSED_POINT);

    let mut sig = [0u8; 64];
    assert_eq!(driver.sign_hash(&attrs, &key, alg, &DIGEST, &mut sig), Ok(64));

    let public_attrs = KeyAttributes::new(P256_PUBLIC, 256);
    assert_eq!(
        driver.verify_hash(&public_attrs, &public, alg, &DIGEST, &sig),
        Ok(())
    );
    assert_eq!(driver.verify_hash(&attrs, &key, alg, &DIGEST, &sig), Ok(()));

    let mut bad = sig;
    bad[10] ^= 1;
    assert_eq!(
        driver.verify_hash(&public_attrs, &public, alg, &DIGEST, &bad),
        Err(Error::InvalidSignature)
    );

    // Messages are hashed before they reach the enclave.
    driver
        .sign_message(&attrs, &key, alg, b"abc", &mut sig)
        .expect("should sign");
    assert_eq!(
        driver.verify_hash(&public_attrs, &public, alg, &DIGEST, &sig),
        Ok(())
    );
    assert_eq!(
        driver.verify_message(&public_attrs, &public, alg, b"abd", &sig),
        Err(Error::InvalidSignature)
    );
    assert_no_leaks(&driver);
}

#[test]
fn test_sign_rejects_bad_input() {
    let driver = sim_driver();
    let attrs = KeyAttributes::new(P256, 256);
    let key = generate(&driver, &attrs);
    let mut sig = [0u8; 64];

    // A digest shorter than the key.
    assert!(matches!(
        driver.sign_hash(&attrs, &key, Algorithm::ecdsa(Hash::Sha224), &DIGEST[..28], &mut sig),
        Err(Error::NotSupported(_))
    ));
    // Transparent keys only sign with randomized ECDSA.
    assert!(matches!(
        driver.sign_hash(
            &attrs,
            &key,
            Algorithm::Sign(SignAlg::DeterministicEcdsa(Hash::Sha256)),
            &DIGEST,
            &mut sig
        ),
        Err(Error::NotSupported(_))
    ));
    assert_eq!(
        driver.sign_hash(&attrs, &key, Algorithm::ecdsa(Hash::Sha256), &DIGEST, &mut sig[..63]),
        Err(Error::BufferTooSmall)
    );
    assert!(matches!(
        driver.sign_hash(&attrs, &[], Algorithm::ecdsa(Hash::Sha256), &DIGEST, &mut sig),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        driver.sign_hash(&attrs, &key[..31], Algorithm::ecdsa(Hash::Sha256), &DIGEST, &mut sig),
        Err(Error::InvalidArgument(_))
    ));
    assert_no_leaks(&driver);
}

#[test]
fn test_gateway_ecdsa() {
    let driver = sim_driver();
    let local = KeyAttributes::new(P256, 256);
    let private = generate(&driver, &local);
    let public = public_key(&driver, &local, &private);

    let attrs = local
        .with_location(KeyLocation::Gateway)
        .with_alg(Algorithm::ecdsa(Hash::Sha256));
    let blob = provision_key(&driver, &attrs, &private);
    let mut stored = vec![0u8; blob.len()];
    assert_eq!(driver.import_key(&attrs, &blob, &mut stored), Ok(blob.len()));
    assert_eq!(stored, blob);
    assert_eq!(driver.size_function(&attrs, &stored), blob.len());

    let mut sig = [0u8; 64];
    driver
        .sign_hash(&attrs, &stored, Algorithm::ecdsa(Hash::Sha256), &DIGEST, &mut sig)
        .expect("should sign");
    let public_attrs = KeyAttributes::new(P256_PUBLIC, 256);
    assert_eq!(
        driver.verify_hash(&public_attrs, &public, Algorithm::ecdsa(Hash::Sha256), &DIGEST, &sig),
        Ok(())
    );
    assert_eq!(public_key(&driver, &attrs, &stored), public);
    assert_no_leaks(&driver);
}

#[test]
fn test_gateway_public_key_export() {
    let driver = sim_driver();
    let local = KeyAttributes::new(P256, 256);
    let private = generate(&driver, &local);
    let public = public_key(&driver, &local, &private);

    let attrs = KeyAttributes::new(P256_PUBLIC, 256).with_location(KeyLocation::Gateway);
    let blob = provision_key(&driver, &attrs, &public);
    let mut out = [0u8; 65];
    assert_eq!(driver.export_key(&attrs, &blob, &mut out), Ok(65));
    assert_eq!(out[..], public[..]);

    // Restricted keys stay inside.
    let restricted = attrs.with_alg(Algorithm::ecdsa(Hash::Sha256));
    assert!(matches!(
        driver.export_key(&restricted, &blob, &mut out),
        Err(Error::NotSupported(_))
    ));
    assert_no_leaks(&driver);
}

#[test]
fn test_gateway_ed25519() {
    // RFC 8032, section 7.1, test 2.
    let private = hex!("4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb");
    let want_public = hex!("3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c");
    let want_sig = hex!(
        "92a009a9f0d4cab8720e820b5f642540a2b27b5416503f8fb3762223ebdb69da"
        "085ac1e43e15996e458f3613d0f11d8c387b2eaeb4302aeeb00d291612bb0c00"
    );

    let driver = sim_driver();
    let alg = Algorithm::Sign(SignAlg::PureEdDsa);
    let attrs = KeyAttributes::new(ED25519, 255)
        .with_location(KeyLocation::Gateway)
        .with_alg(alg);
    let blob = provision_key(&driver, &attrs, &private);
    assert_eq!(public_key(&driver, &attrs, &blob), want_public);

    let mut sig = [0u8; 64];
    assert_eq!(driver.sign_message(&attrs, &blob, alg, &[0x72], &mut sig), Ok(64));
    assert_eq!(sig, want_sig);
    assert_eq!(driver.verify_message(&attrs, &blob, alg, &[0x72], &sig), Ok(()));
    assert_eq!(
        driver.verify_message(&attrs, &blob, alg, &[0x73], &sig),
        Err(Error::InvalidSignature)
    );

    assert!(matches!(
        driver.sign_message(&attrs, &blob, alg, b"", &mut sig),
        Err(Error::InvalidArgument(_))
    ));
    // Gateway keys never sign digests.
    assert!(matches!(
        driver.sign_hash(&attrs, &blob, alg, &DIGEST, &mut sig),
        Err(Error::NotSupported(_))
    ));
    assert_no_leaks(&driver);
}

#[test]
fn test_transparent_ecdh() {
    let driver = sim_driver();
    let attrs = KeyAttributes::new(P256, 256);
    let alg = Algorithm::KeyAgreement(KeyAgreementAlg::Ecdh);

    let a = generate(&driver, &attrs);
    let b = generate(&driver, &attrs);
    let a_pub = public_key(&driver, &attrs, &a);
    let b_pub = public_key(&driver, &attrs, &b);

    let mut ab = [0u8; 32];
    let mut ba = [0u8; 32];
    assert_eq!(driver.key_agreement(&attrs, &a, alg, &b_pub, &mut ab), Ok(32));
    assert_eq!(driver.key_agreement(&attrs, &b, alg, &a_pub, &mut ba), Ok(32));
    assert_eq!(ab, ba);

    // The peer key must be an uncompressed point.
    assert!(matches!(
        driver.key_agreement(&attrs, &a, alg, &b_pub[1..], &mut ab),
        Err(Error::InvalidArgument(_))
    ));
    let mut compressed = b_pub.clone();
    compressed[0] = 0x02;
    assert!(matches!(
        driver.key_agreement(&attrs, &a, alg, &compressed, &mut ab),
        Err(Error::InvalidArgument(_))
    ));
    assert_no_leaks(&driver);
}

#[test]
fn test_transparent_x25519() {
    // RFC 7748, section 6.1.
    let alice = hex!("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
    let alice_pub = hex!("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");
    let bob = hex!("5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb");
    let bob_pub = hex!("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");
    let shared = hex!("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");

    let driver = sim_driver();
    let attrs = KeyAttributes::new(X25519, 255);
    let alg = Algorithm::KeyAgreement(KeyAgreementAlg::Ecdh);

    assert_eq!(public_key(&driver, &attrs, &alice), alice_pub);
    let mut out = [0u8; 32];
    assert_eq!(driver.key_agreement(&attrs, &alice, alg, &bob_pub, &mut out), Ok(32));
    assert_eq!(out, shared);
    assert_eq!(driver.key_agreement(&attrs, &bob, alg, &alice_pub, &mut out), Ok(32));
    assert_eq!(out, shared);

    assert!(matches!(
        driver.key_agreement(&KeyAttributes::new(X25519, 256), &alice, alg, &bob_pub, &mut out),
        Err(Error::NotSupported(_))
    ));
    assert!(matches!(
        driver.key_agreement(
            &attrs,
            &alice,
            Algorithm::KeyAgreement(KeyAgreementAlg::EcdhCkdf),
            &bob_pub,
            &mut out
        ),
        Err(Error::InvalidArgument(_))
    ));
    assert_no_leaks(&driver);
}

#[test]
fn test_generate_rejects_bad_input() {
    let driver = sim_driver();
    let mut buf = [0u8; 256];
    assert!(matches!(
        driver.generate_key(&KeyAttributes::new(P256_PUBLIC, 256), &mut buf),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        driver.generate_key(&KeyAttributes::new(KeyType::Aes, 128), &mut buf),
        Err(Error::NotSupported(_))
    ));
    assert!(matches!(
        driver.generate_key(
            &KeyAttributes::new(KeyType::EccKeyPair(EccFamily::BrainpoolPR1), 256),
            &mut buf
        ),
        Err(Error::NotSupported(_))
    ));
    assert_eq!(
        driver.generate_key(&KeyAttributes::new(P256, 256), &mut buf[..31]),
        Err(Error::BufferTooSmall)
    );
    assert_no_leaks(&driver);
}

//! Tests for utility functions

use hpc_scheduler::util::{elapsed_secs, now_ms, sha256_hex, ReportSigner};

#[test]
fn test_now_ms_is_after_2020() {
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_elapsed_secs() {
    assert_eq!(elapsed_secs(0, 61_999), 61);
    assert_eq!(elapsed_secs(10, 0), 0);
}

#[test]
fn test_sha256_hex_known_vector() {
    assert_eq!(
        sha256_hex(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_signer_round_trip() {
    let signer = ReportSigner::new("k1", "shared-key").unwrap();
    let sig = signer.sign(b"payload");
    assert!(signer.verify(b"payload", &sig));
    assert!(!signer.verify(b"payload2", &sig));
    assert!(!signer.verify(b"payload", "not-hex"));
    assert_eq!(signer.key_id(), "k1");
}

#[test]
fn test_signer_debug_hides_key() {
    let signer = ReportSigner::new("k1", "shared-key").unwrap();
    let rendered = format!("{signer:?}");
    assert!(rendered.contains("k1"));
    assert!(!rendered.contains("shared-key"));
}

#[test]
fn test_init_tracing_is_idempotent() {
    hpc_scheduler::util::init_tracing();
    hpc_scheduler::util::init_tracing();
    tracing::info!("tracing initialised twice without panicking");
}

use rand::{Rng, SeedableRng};
use snc::{CodeType, DecoderKind, EncodeContext, Parameters, SncDecoder, SncPacket};

fn params(code_type: CodeType) -> Parameters {
    Parameters {
        datasize: 2048,
        size_p: 64,
        size_c: 4,
        size_b: 4,
        size_g: 8,
        code_type,
        bpc: false,
        bnc: false,
        sys: false,
        seed: 909,
        hdpc: false,
        nonuniform: false,
        oa_oneround: false,
    }
}

fn payload(n: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen()).collect()
}

/// Suspend a decoder to a byte blob mid-decode, restore it, and check that
/// it converges to the same recovery as one that never suspended.
fn run_suspend_resume(p: Parameters, kind: DecoderKind, suspend_after: usize) {
    let data = payload(p.datasize, 0xCAFE);
    let mut enc = EncodeContext::new(p, Some(&data)).unwrap();
    let dec_params = *enc.parameters();

    let packets: Vec<SncPacket> = (0..20 * enc.snum()).map(|_| enc.generate()).collect();

    let mut straight = SncDecoder::new(dec_params, kind, 4).unwrap();
    let mut suspended = SncDecoder::new(dec_params, kind, 4).unwrap();

    let mut blob = Vec::new();
    for (i, pkt) in packets.iter().enumerate() {
        if !straight.finished() {
            straight.process(pkt.clone());
        }
        if i == suspend_after {
            suspended.save(&mut blob).unwrap();
            suspended = SncDecoder::restore(blob.as_slice()).unwrap();
            assert_eq!(suspended.kind(), kind);
        }
        if !suspended.finished() {
            suspended.process(pkt.clone());
        }
        if straight.finished() && suspended.finished() {
            break;
        }
    }

    assert!(straight.finished() && suspended.finished());
    assert_eq!(straight.recover_data().unwrap(), data);
    assert_eq!(suspended.recover_data().unwrap(), data);
    assert_eq!(straight.overhead(), suspended.overhead());
}

#[test]
fn cbd_suspend_resume_mid_decode() {
    // Suspend after roughly snum/2 packets.
    run_suspend_resume(params(CodeType::Band), DecoderKind::Cbd, 16);
}

#[test]
fn gg_suspend_resume_mid_decode() {
    run_suspend_resume(params(CodeType::Band), DecoderKind::Gg, 16);
}

#[test]
fn bd_suspend_resume_mid_decode() {
    run_suspend_resume(params(CodeType::Band), DecoderKind::Bd, 16);
}

#[test]
fn oa_suspend_resume_before_and_after_ready() {
    // Before the global phase starts.
    run_suspend_resume(params(CodeType::Band), DecoderKind::Oa, 8);
    // After it: readiness needs snum + aoh = 36 packets.
    run_suspend_resume(params(CodeType::Band), DecoderKind::Oa, 40);
}

#[test]
fn pp_suspend_resume_mid_decode() {
    let mut p = params(CodeType::WindWrap);
    p.size_c = 0;
    run_suspend_resume(p, DecoderKind::Pp, 16);
}

#[test]
fn restore_matches_file_roundtrip() {
    let p = params(CodeType::Band);
    let data = payload(p.datasize, 7);
    let mut enc = EncodeContext::new(p, Some(&data)).unwrap();
    let dec_params = *enc.parameters();
    let mut dec = SncDecoder::new(dec_params, DecoderKind::Cbd, 0).unwrap();
    for _ in 0..10 {
        dec.process(enc.generate());
    }
    let dir = std::env::temp_dir().join("snc-dec-state-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("cbd.part");
    dec.save_to_path(&path).unwrap();
    let restored = SncDecoder::restore_from_path(&path).unwrap();
    assert_eq!(restored.kind(), DecoderKind::Cbd);
    assert_eq!(restored.overhead(), dec.overhead());
    assert_eq!(restored.cost(), dec.cost());
    std::fs::remove_file(path).unwrap();
}

#[test]
fn finished_decoder_survives_persistence() {
    let p = params(CodeType::Band);
    let data = payload(p.datasize, 70);
    let mut enc = EncodeContext::new(p, Some(&data)).unwrap();
    let mut dec = SncDecoder::new(*enc.parameters(), DecoderKind::Cbd, 0).unwrap();
    let mut fed = 0;
    while !dec.finished() && fed < 1000 {
        dec.process(enc.generate());
        fed += 1;
    }
    assert!(dec.finished());
    let mut blob = Vec::new();
    dec.save(&mut blob).unwrap();
    let restored = SncDecoder::restore(blob.as_slice()).unwrap();
    assert!(restored.finished());
    assert_eq!(restored.recover_data().unwrap(), data);
}

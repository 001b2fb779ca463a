#![no_main]
use libfuzzer_sys::fuzz_target;
use udsmux_core::UnixAddr;
use udsmux_core::addr::{MAX_ABSTRACT_LEN, MAX_PATH_LEN, SUN_PATH_LEN};

fuzz_target!(|data: &[u8]| {
    let Ok(addr) = UnixAddr::from_wire(data) else {
        assert!(data.is_empty());
        return;
    };
    assert_eq!(addr.is_abstract(), data[0] == 0);

    let encoded = addr.encode();
    assert!(encoded.len() as usize <= 2 + SUN_PATH_LEN);

    // Decoding yields the name, cut to the namespace limit.
    let limit = if addr.is_abstract() { MAX_ABSTRACT_LEN } else { MAX_PATH_LEN };
    let decoded = encoded.decode().expect("encoded addresses decode");
    assert_eq!(decoded.is_abstract(), addr.is_abstract());
    let name = addr.as_bytes();
    assert_eq!(decoded.as_bytes(), &name[..name.len().min(limit)]);
    assert_eq!(encoded.healing().is_heal(), name.len() > limit);
});
